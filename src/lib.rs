// Library surface shared by the binary and the integration tests.
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod instructions;
pub mod presentation;
pub mod procedure;
pub mod results;
pub mod runtime;
pub mod scoring;
pub mod session;
pub mod summary;
pub mod terminal;
pub mod ui;

pub use error::{Result, SessionError};
