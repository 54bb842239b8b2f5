//! Defines the error type shared by the codec and connection engine.

use thiserror::Error;

/// A generic milter protocol error.
#[derive(Error, Debug)]
pub enum MilterError {
    /// A command name doesn't belong to the milter command catalog.
    #[error("invalid command: {0}")]
    InvalidCommand(String),
    /// The wire data is malformed, too short, or otherwise doesn't match
    /// the schema for the command it's tagged with.
    #[error("milter codec error: {0}")]
    Codec(String),
    /// An I/O error occurred on the underlying transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
