//! Encoder session lifecycle for one channel.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::error::EncoderError;
use crate::{EncoderEngine, EncoderResult, EngineFactory, EngineParams};

/// Lifecycle state of an [`EncoderSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No engine allocated yet.
    Uninitialized,

    /// Engine open, no frame submitted.
    Open,

    /// At least one frame submitted.
    Updating,

    /// End of stream signalled.
    Flushing,

    /// Engine released.
    Closed,
}

/// Owns the encoder engine for one channel.
pub struct EncoderSession {
    channel_id: u32,
    state: SessionState,
    factory: Arc<dyn EngineFactory>,
    engine: Option<Box<dyn EncoderEngine>>,
    params: Option<EngineParams>,
    frames_submitted: u64,
}

impl EncoderSession {
    /// Create an unopened session.
    pub fn new(channel_id: u32, factory: Arc<dyn EngineFactory>) -> Self {
        Self {
            channel_id,
            state: SessionState::Uninitialized,
            factory,
            engine: None,
            params: None,
            frames_submitted: 0,
        }
    }

    /// Allocate the engine.
    #[instrument(name = "session_open", skip(self, params), fields(channel = self.channel_id))]
    pub fn open(&mut self, params: EngineParams) -> EncoderResult<()> {
        self.expect_state("open", &[SessionState::Uninitialized])?;

        debug!(
            src_width = params.src_width,
            src_height = params.src_height,
            dst_width = params.dst_width,
            dst_height = params.dst_height,
            format = %params.format,
            bit_rate = params.bit_rate,
            gop_size = params.gop_size,
            device_id = params.device_id,
            "Opening encoder engine"
        );

        let engine = self.factory.open(&params)?;
        info!(engine = engine.name(), "Encoder session open");

        self.engine = Some(engine);
        self.params = Some(params);
        self.state = SessionState::Open;
        Ok(())
    }

    /// Submit one frame's payload.
    pub fn update(&mut self, payload: &[u8], timestamp: i64, channel_id: u32) -> EncoderResult<()> {
        self.expect_state("update", &[SessionState::Open, SessionState::Updating])?;

        if channel_id != self.channel_id {
            return Err(EncoderError::InvalidInput(format!(
                "frame for channel {} routed to session {}",
                channel_id, self.channel_id
            )));
        }

        let engine = self.engine.as_mut().ok_or(EncoderError::InvalidState {
            op: "update",
            state: self.state,
        })?;
        engine.update(payload, timestamp)?;

        self.state = SessionState::Updating;
        self.frames_submitted += 1;
        Ok(())
    }

    /// Signal end of stream.
    #[instrument(name = "session_flush", skip(self), fields(channel = self.channel_id))]
    pub fn flush(&mut self) -> EncoderResult<()> {
        self.expect_state("flush", &[SessionState::Open, SessionState::Updating])?;

        // Leave Open/Updating before calling into the engine so a failed
        // flush is never retried.
        self.state = SessionState::Flushing;
        let engine = self.engine.as_mut().ok_or(EncoderError::InvalidState {
            op: "flush",
            state: SessionState::Flushing,
        })?;
        engine.flush()?;

        debug!(frames = self.frames_submitted, "Session flushed");
        Ok(())
    }

    /// Release the engine. Closing a closed session is a no-op.
    #[instrument(name = "session_close", skip(self), fields(channel = self.channel_id))]
    pub fn close(&mut self) -> EncoderResult<()> {
        if self.state == SessionState::Closed {
            return Ok(());
        }

        self.state = SessionState::Closed;
        match self.engine.take() {
            Some(mut engine) => {
                engine.close()?;
                debug!(frames = self.frames_submitted, "Session closed");
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Channel this session encodes.
    pub fn channel_id(&self) -> u32 {
        self.channel_id
    }

    /// Parameters the engine was opened with.
    pub fn params(&self) -> Option<&EngineParams> {
        self.params.as_ref()
    }

    /// Frames accepted by the engine.
    pub fn frames_submitted(&self) -> u64 {
        self.frames_submitted
    }

    fn expect_state(&self, op: &'static str, allowed: &[SessionState]) -> EncoderResult<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(EncoderError::InvalidState {
                op,
                state: self.state,
            })
        }
    }
}

impl Drop for EncoderSession {
    fn drop(&mut self) {
        if self.state != SessionState::Closed {
            if let Err(e) = self.close() {
                warn!(channel = self.channel_id, "Engine close failed on drop: {}", e);
            }
        }
    }
}
