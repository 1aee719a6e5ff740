//! proctor-store — Persistence and question loading for proctor.
//!
//! Implements `ResultSink` and `QuestionSource` for an in-memory store,
//! JSON files on disk and a Supabase (PostgREST) backend, plus the
//! configuration that selects between them.

pub mod config;
pub mod file;
pub mod memory;
pub mod supabase;

pub use config::{
    create_sink, create_source, load_config, load_config_from, parse_config, ProctorConfig,
    SinkConfig,
};
pub use file::{read_results, DirectorySource, FileSink};
pub use memory::MemorySink;
pub use supabase::{SupabaseSink, SupabaseSource};
