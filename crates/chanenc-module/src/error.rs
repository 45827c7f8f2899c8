//! Error types for the encode module.

use thiserror::Error;

use chanenc_encoder::EncoderError;

/// Parameter set rejected by the validation gate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Required keys absent.
    #[error("missing required parameter(s): {}", .0.join(", "))]
    Missing(Vec<String>),

    /// Keys whose values are not valid integers.
    #[error("malformed numeric parameter(s): {}", .0.join(", "))]
    Malformed(Vec<String>),
}

/// Accelerator binding failures.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Index outside the available devices.
    #[error("device {device_id} not available ({available} device(s) present)")]
    InvalidDevice { device_id: i32, available: u32 },
}

/// Frame could not be shaped for the engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdaptError {
    /// Matrix mode, but no interleaved image on the frame.
    #[error("frame carries no BGR matrix")]
    MissingMatrix,

    /// Planar mode, but the frame has no planes.
    #[error("frame carries no planes")]
    MissingPlanes,

    /// Mode token matched no adapter.
    #[error("unknown preprocessing mode {0:?}")]
    UnknownMode(String),
}

/// Errors surfaced by the module facade.
#[derive(Debug, Error)]
pub enum ModuleError {
    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Device binding failed.
    #[error("Device binding failed: {0}")]
    Device(#[from] DeviceError),

    /// Encoder engine failure.
    #[error("Encoder error: {0}")]
    Encoder(#[from] EncoderError),

    /// Frame processed before open.
    #[error("Module not open")]
    NotOpen,

    /// Open called twice.
    #[error("Module already open")]
    AlreadyOpen,

    /// Frame processed after close.
    #[error("Module closed")]
    Closed,
}
