//! Error types for the encoder module.

use thiserror::Error;

use crate::session::SessionState;

/// Errors that can occur during encoding operations.
#[derive(Debug, Error)]
pub enum EncoderError {
    /// Operation not valid in the session's current state.
    #[error("{op} not allowed in state {state:?}")]
    InvalidState {
        op: &'static str,
        state: SessionState,
    },

    /// Engine could not be allocated or configured.
    #[error("Initialization failed: {0}")]
    Initialization(String),

    /// Engine rejected or failed on a frame.
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Invalid input data.
    #[error("Invalid input data: {0}")]
    InvalidInput(String),

    /// Packet queue full.
    #[error("Encoder overload: queue depth {0}")]
    Overload(usize),

    /// Engine not compiled into this build.
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// Packet receiver dropped.
    #[error("Packet channel disconnected")]
    ChannelDisconnected,
}
