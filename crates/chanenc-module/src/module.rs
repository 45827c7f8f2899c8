//! The encode module: configuration, frame dispatch and teardown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use chanenc_encoder::{
    Codec, EncoderSession, EngineFactory, EngineParams, PreprocessMode, TargetFormat,
};
use chanenc_frame::{ChannelId, Frame};

use crate::adapter::{select_target_format, FormatAdapter};
use crate::config::{self, Configuration, ModuleParamSet, ParamCheck};
use crate::device::DeviceBinder;
use crate::error::{AdaptError, ModuleError};
use crate::metrics::{DropReason, MetricsSnapshot, ModuleMetrics};
use crate::registry::{ChannelContext, ChannelRegistry};
use crate::ModuleResult;

/// Target format for a channel whose first frame has an unsupported layout.
pub const FALLBACK_TARGET_FORMAT: TargetFormat = TargetFormat::Nv12;

/// Outcome of processing one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Payload submitted to the channel's session.
    Encoded,

    /// End of stream routed to the channel's session.
    Flushed,

    /// Frame skipped; the channel keeps running.
    Dropped(DropReason),

    /// Engine or module failure, already logged.
    Failed(String),
}

impl ProcessStatus {
    /// Returns true unless the frame hit a failure.
    pub fn is_benign(&self) -> bool {
        !matches!(self, Self::Failed(_))
    }
}

struct OpenState {
    config: Configuration,
    adapter: FormatAdapter,
}

/// Routes each channel's frames to its own encoder session.
pub struct EncodeModule {
    name: String,
    codec: Codec,
    factory: Arc<dyn EngineFactory>,
    binder: Arc<dyn DeviceBinder>,
    state: Option<OpenState>,
    registry: ChannelRegistry,
    metrics: ModuleMetrics,
    unknown_mode_reported: AtomicBool,
    closed: AtomicBool,
}

impl EncodeModule {
    /// Create a closed module.
    pub fn new(
        name: impl Into<String>,
        factory: Arc<dyn EngineFactory>,
        binder: Arc<dyn DeviceBinder>,
    ) -> Self {
        Self {
            name: name.into(),
            codec: Codec::default(),
            factory,
            binder,
            state: None,
            registry: ChannelRegistry::new(),
            metrics: ModuleMetrics::new(),
            unknown_mode_reported: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Codec requested from the engine factory.
    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    /// Validation gate run by the framework before [`EncodeModule::open`].
    pub fn check_param_set(params: &ModuleParamSet) -> ParamCheck {
        let check = config::check_param_set(params);
        if !check.is_ok() {
            error!("[EncodeModule] {}", check.diagnostic());
        }
        check
    }

    /// Resolve the configuration and bind the calling thread to its device.
    #[instrument(name = "module_open", skip(self, params), fields(module = %self.name))]
    pub fn open(&mut self, params: &ModuleParamSet) -> ModuleResult<()> {
        if self.state.is_some() {
            return Err(ModuleError::AlreadyOpen);
        }

        let config = Configuration::from_params(params);
        self.binder.bind(config.device_id)?;

        let adapter = FormatAdapter::for_mode(config.preprocess, &config.pre_type);
        info!(
            dst_width = config.dst_width,
            dst_height = config.dst_height,
            frame_rate = config.frame_rate,
            bit_rate = config.bit_rate,
            gop_size = config.gop_size,
            device_id = config.device_id,
            pre_type = %config.pre_type,
            "Encode module open"
        );

        self.state = Some(OpenState { config, adapter });
        Ok(())
    }

    /// Route one frame. Never fails the pipeline; problems are logged and
    /// reflected in the returned status.
    pub fn process(&self, frame: &Frame) -> ProcessStatus {
        let Some(state) = &self.state else {
            error!(channel = frame.channel_id, "Frame received before open");
            return ProcessStatus::Failed(ModuleError::NotOpen.to_string());
        };
        if self.closed.load(Ordering::Acquire) {
            warn!(channel = frame.channel_id, "Frame received after close");
            return ProcessStatus::Failed(ModuleError::Closed.to_string());
        }

        let (ctx, created) = self
            .registry
            .get_or_create(frame.channel_id, || self.create_context(frame, &state.config));
        if created {
            self.metrics.record_channel_opened();
        }
        let mut ctx = ctx.lock();

        if frame.is_eos() {
            return self.flush_channel(&mut ctx);
        }

        if ctx.eos_reached() {
            warn!(channel = frame.channel_id, "Frame after end of stream, dropping");
            return self.dropped(DropReason::AfterEndOfStream);
        }

        if let Some(reason) = ctx.open_error() {
            debug!(channel = frame.channel_id, "Encoder unavailable, skipping frame");
            return ProcessStatus::Failed(format!("encoder unavailable: {reason}"));
        }

        if !created {
            ctx.observe_format(&frame.format);
        }

        let payload = match state.adapter.prepare(frame) {
            Ok(payload) => payload,
            Err(AdaptError::UnknownMode(token)) => {
                if !self.unknown_mode_reported.swap(true, Ordering::Relaxed) {
                    warn!(pre_type = %token, "Unknown preprocessing mode, frames will be dropped");
                }
                return self.dropped(DropReason::UnknownMode);
            }
            Err(e) => {
                warn!(channel = frame.channel_id, "Cannot adapt frame: {}", e);
                return self.dropped(DropReason::MissingPayload);
            }
        };

        match ctx
            .session_mut()
            .update(payload.as_bytes(), frame.timestamp, frame.channel_id)
        {
            Ok(()) => {
                self.metrics.record_encoded();
                ProcessStatus::Encoded
            }
            Err(e) => {
                error!(channel = frame.channel_id, timestamp = frame.timestamp, "Update failed: {}", e);
                self.metrics.record_failure();
                ProcessStatus::Failed(e.to_string())
            }
        }
    }

    /// Close every session and empty the registry. Safe to call repeatedly.
    ///
    /// Frames processed afterwards fail instead of reopening channels.
    ///
    /// All sessions are closed even if some fail; the first failure is
    /// returned.
    #[instrument(name = "module_close", skip(self), fields(module = %self.name))]
    pub fn close(&self) -> ModuleResult<()> {
        self.closed.store(true, Ordering::Release);
        if self.registry.is_empty() {
            return Ok(());
        }

        let mut first_error = None;
        for ctx in self.registry.drain_all() {
            let mut ctx = ctx.lock();
            let channel = ctx.channel_id();
            match ctx.session_mut().close() {
                Ok(()) => {
                    self.metrics.record_session_closed();
                    debug!(channel, "Channel closed");
                }
                Err(e) => {
                    error!(channel, "Session close failed: {}", e);
                    first_error.get_or_insert(ModuleError::Encoder(e));
                }
            }
        }

        info!("All channels closed");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Module instance name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolved configuration, once open.
    pub fn config(&self) -> Option<&Configuration> {
        self.state.as_ref().map(|s| &s.config)
    }

    /// Configured preprocessing mode, once open.
    pub fn preprocess_mode(&self) -> Option<PreprocessMode> {
        self.state.as_ref().map(|s| s.adapter.mode())
    }

    /// Number of live channel contexts.
    pub fn channel_count(&self) -> usize {
        self.registry.len()
    }

    /// Format a channel's session was opened with.
    pub fn target_format(&self, channel_id: ChannelId) -> Option<TargetFormat> {
        self.registry
            .get(channel_id)
            .map(|ctx| ctx.lock().target_format())
    }

    /// Current counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    fn create_context(&self, frame: &Frame, config: &Configuration) -> ChannelContext {
        // The bare EOS marker carries no layout to map
        let target_format = if frame.is_eos() && !frame.format.is_known() {
            FALLBACK_TARGET_FORMAT
        } else {
            select_target_format(&frame.format, None).unwrap_or_else(|| {
                warn!(
                    channel = frame.channel_id,
                    format = %frame.format,
                    fallback = %FALLBACK_TARGET_FORMAT,
                    "First frame has unsupported format, using fallback"
                );
                FALLBACK_TARGET_FORMAT
            })
        };

        // An EOS marker carries no geometry
        let (src_width, src_height) = if frame.width == 0 || frame.height == 0 {
            (config.dst_width, config.dst_height)
        } else {
            (frame.width, frame.height)
        };

        let params = EngineParams {
            channel_id: frame.channel_id,
            src_width,
            src_height,
            dst_width: config.dst_width,
            dst_height: config.dst_height,
            frame_rate: config.frame_rate,
            format: target_format,
            bit_rate: config.bit_rate,
            gop_size: config.gop_size,
            codec: self.codec,
            device_id: config.device_id,
            preprocess: config.preprocess,
        };

        let mut session = EncoderSession::new(frame.channel_id, Arc::clone(&self.factory));
        let open_error = match session.open(params) {
            Ok(()) => {
                info!(channel = frame.channel_id, format = %target_format, "Channel opened");
                None
            }
            Err(e) => {
                error!(channel = frame.channel_id, "Encoder open failed: {}", e);
                self.metrics.record_failure();
                Some(e.to_string())
            }
        };

        ChannelContext::new(
            frame.channel_id,
            session,
            frame.format.clone(),
            target_format,
            open_error,
        )
    }

    fn flush_channel(&self, ctx: &mut ChannelContext) -> ProcessStatus {
        let channel = ctx.channel_id();
        if ctx.eos_reached() {
            debug!(channel, "Repeated end of stream ignored");
            return self.dropped(DropReason::AfterEndOfStream);
        }
        ctx.mark_eos();

        if let Some(reason) = ctx.open_error() {
            debug!(channel, "Encoder unavailable, nothing to flush");
            return ProcessStatus::Failed(format!("encoder unavailable: {reason}"));
        }

        match ctx.session_mut().flush() {
            Ok(()) => {
                self.metrics.record_flush();
                info!(channel, "End of stream");
                ProcessStatus::Flushed
            }
            Err(e) => {
                error!(channel, "Flush failed: {}", e);
                self.metrics.record_failure();
                ProcessStatus::Failed(e.to_string())
            }
        }
    }

    fn dropped(&self, reason: DropReason) -> ProcessStatus {
        self.metrics.record_drop(reason);
        ProcessStatus::Dropped(reason)
    }
}

impl Drop for EncodeModule {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(module = %self.name, "Close on drop failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::HostDevices;
    use chanenc_encoder::{packet_channel, EncodedPacket, RawEngineFactory};
    use chanenc_frame::{FrameFlags, PixelFormat, Plane};
    use crossbeam_channel::Receiver;

    fn module(pre_type: &str) -> (EncodeModule, Receiver<EncodedPacket>) {
        let (sink, rx) = packet_channel();
        let mut module = EncodeModule::new(
            "encoder",
            Arc::new(RawEngineFactory::new(sink)),
            Arc::new(HostDevices::default()),
        );
        let params = [("pre_type".to_string(), pre_type.to_string())].into_iter().collect();
        module.open(&params).unwrap();
        (module, rx)
    }

    fn nv12(channel: ChannelId, ts: i64) -> Frame {
        Frame::new(
            channel,
            PixelFormat::Nv12,
            4,
            2,
            ts,
            vec![Plane::new(vec![0u8; 8]), Plane::new(vec![0u8; 4])],
        )
    }

    #[test]
    fn test_process_before_open_fails() {
        let (sink, _rx) = packet_channel();
        let module = EncodeModule::new(
            "encoder",
            Arc::new(RawEngineFactory::new(sink)),
            Arc::new(HostDevices::default()),
        );
        let status = module.process(&nv12(0, 0));
        assert!(!status.is_benign());
        assert_eq!(module.channel_count(), 0);
    }

    #[test]
    fn test_open_twice_rejected() {
        let (mut module, _rx) = module("mlu");
        let result = module.open(&ModuleParamSet::new());
        assert!(matches!(result, Err(ModuleError::AlreadyOpen)));
    }

    #[test]
    fn test_device_binding_failure() {
        let (sink, _rx) = packet_channel();
        let mut module = EncodeModule::new(
            "encoder",
            Arc::new(RawEngineFactory::new(sink)),
            Arc::new(HostDevices::new(1)),
        );
        let params = [("device_id".to_string(), "3".to_string())].into_iter().collect();
        let result = module.open(&params);
        assert!(matches!(result, Err(ModuleError::Device(_))));
        assert!(module.config().is_none());
    }

    #[test]
    fn test_planar_frame_encoded() {
        let (module, rx) = module("mlu");
        assert_eq!(module.process(&nv12(1, 0)), ProcessStatus::Encoded);
        assert_eq!(rx.try_recv().unwrap().data.len(), 12);
        assert_eq!(module.target_format(1), Some(TargetFormat::Nv12));
        assert_eq!(module.preprocess_mode(), Some(PreprocessMode::RawPlanar));
    }

    #[test]
    fn test_frame_after_eos_dropped() {
        let (module, _rx) = module("mlu");
        assert_eq!(module.process(&nv12(1, 0)), ProcessStatus::Encoded);
        assert_eq!(module.process(&Frame::eos(1, 40)), ProcessStatus::Flushed);
        assert_eq!(
            module.process(&nv12(1, 80)),
            ProcessStatus::Dropped(DropReason::AfterEndOfStream)
        );
        assert_eq!(
            module.process(&Frame::eos(1, 120)),
            ProcessStatus::Dropped(DropReason::AfterEndOfStream)
        );
        assert_eq!(module.metrics().flushes, 1);
    }

    #[test]
    fn test_matrix_mode_without_matrix_dropped() {
        let (module, _rx) = module("opencv");
        assert_eq!(
            module.process(&nv12(2, 0)),
            ProcessStatus::Dropped(DropReason::MissingPayload)
        );
        assert_eq!(module.channel_count(), 1);
    }

    #[test]
    fn test_eos_first_frame_keeps_its_format() {
        let (module, _rx) = module("opencv");
        let mut frame = Frame::new(1, PixelFormat::Bgr24, 4, 2, 0, Vec::new());
        frame.flags.insert(FrameFlags::EOS);

        assert_eq!(module.process(&frame), ProcessStatus::Flushed);
        assert_eq!(module.target_format(1), Some(TargetFormat::Bgr24));
    }

    #[test]
    fn test_bare_eos_marker_uses_fallback() {
        let (module, _rx) = module("mlu");
        assert_eq!(module.process(&Frame::eos(2, 0)), ProcessStatus::Flushed);
        assert_eq!(module.target_format(2), Some(FALLBACK_TARGET_FORMAT));
    }

    #[test]
    fn test_frame_after_close_does_not_reopen() {
        let (module, _rx) = module("mlu");
        assert_eq!(module.process(&nv12(1, 0)), ProcessStatus::Encoded);
        module.close().unwrap();

        let status = module.process(&nv12(1, 40));
        assert_eq!(status, ProcessStatus::Failed(ModuleError::Closed.to_string()));
        assert_eq!(module.channel_count(), 0);
        assert_eq!(module.metrics().channels_opened, 1);
    }

    #[test]
    fn test_unsupported_first_frame_uses_fallback() {
        let (module, _rx) = module("mlu");
        let frame = Frame::new(
            5,
            PixelFormat::Other("I420".into()),
            4,
            2,
            0,
            vec![Plane::new(vec![0u8; 12])],
        );
        assert_eq!(module.process(&frame), ProcessStatus::Encoded);
        assert_eq!(module.target_format(5), Some(FALLBACK_TARGET_FORMAT));
    }
}
