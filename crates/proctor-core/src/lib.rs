//! proctor-core — Timed assessment session engine.
//!
//! This crate defines the question model, the answer store, the scorer, the
//! countdown timer and the session state machine that turns a run through a
//! question set into exactly one scored, persisted result.

pub mod answers;
pub mod clock;
pub mod controller;
pub mod error;
pub mod model;
pub mod parser;
pub mod scorer;
pub mod session;
pub mod timer;
pub mod traits;

pub use controller::{ControllerConfig, SessionController};
pub use error::{SessionError, SinkError};
pub use session::{Session, SessionResult, SessionState, SubmitTrigger};
