//! Multi-channel encode module.
//!
//! Receives decoded frames tagged with a channel id, lazily opens one
//! encoder session per channel on its first frame, adapts each frame's
//! buffers to what the engine accepts, routes end of stream as a flush, and
//! closes every session at shutdown.

mod adapter;
mod config;
mod device;
mod error;
mod metrics;
mod module;
mod registry;

pub use adapter::{
    select_target_format, FormatAdapter, MatrixAdapter, Payload, PayloadAdapter, PlanarAdapter,
};
pub use config::{
    check_param_set, parse_pre_type, Configuration, ModuleParamSet, ParamCheck, ParamRegistry,
    DEFAULT_BIT_RATE, DEFAULT_DEVICE_ID, DEFAULT_DST_HEIGHT, DEFAULT_DST_WIDTH,
    DEFAULT_FRAME_RATE, DEFAULT_GOP_SIZE, DEFAULT_PRE_TYPE, PRE_TYPE_ALIAS, REQUIRED_KEYS,
};
pub use device::{bound_device, DeviceBinder, HostDevices};
pub use error::{AdaptError, ConfigError, DeviceError, ModuleError};
pub use metrics::{DropReason, MetricsSnapshot, ModuleMetrics};
pub use module::{EncodeModule, ProcessStatus, FALLBACK_TARGET_FORMAT};
pub use registry::{ChannelContext, ChannelRegistry, SharedContext};

pub use chanenc_encoder::{PreprocessMode, TargetFormat};

/// Result type for module operations.
pub type ModuleResult<T> = Result<T, ModuleError>;
