//! End-to-end routing through the encode module with a recording engine.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use parking_lot::Mutex;

use chanenc_encoder::{EncoderEngine, EncoderError, EncoderResult, EngineFactory, EngineParams};
use chanenc_frame::{BgrMatrix, ChannelId, Frame, PixelFormat, Plane};
use chanenc_module::{
    DropReason, EncodeModule, HostDevices, ModuleParamSet, ProcessStatus, TargetFormat,
};

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Update { len: usize, timestamp: i64 },
    Flush,
    Close,
}

#[derive(Default)]
struct Recorder {
    opens: AtomicUsize,
    params: Mutex<Vec<EngineParams>>,
    calls: Mutex<HashMap<u32, Vec<Call>>>,
}

impl Recorder {
    fn calls(&self, channel: u32) -> Vec<Call> {
        self.calls.lock().get(&channel).cloned().unwrap_or_default()
    }

    fn count(&self, channel: u32, pred: fn(&Call) -> bool) -> usize {
        self.calls(channel).iter().filter(|c| pred(c)).count()
    }

    fn total_updates(&self) -> usize {
        self.calls
            .lock()
            .values()
            .flatten()
            .filter(|c| matches!(c, Call::Update { .. }))
            .count()
    }
}

struct RecordingEngine {
    channel: u32,
    recorder: Arc<Recorder>,
}

impl RecordingEngine {
    fn record(&self, call: Call) {
        self.recorder
            .calls
            .lock()
            .entry(self.channel)
            .or_default()
            .push(call);
    }
}

impl EncoderEngine for RecordingEngine {
    fn update(&mut self, payload: &[u8], timestamp: i64) -> EncoderResult<()> {
        self.record(Call::Update {
            len: payload.len(),
            timestamp,
        });
        Ok(())
    }

    fn flush(&mut self) -> EncoderResult<()> {
        self.record(Call::Flush);
        Ok(())
    }

    fn close(&mut self) -> EncoderResult<()> {
        self.record(Call::Close);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

struct RecordingFactory {
    recorder: Arc<Recorder>,
    fail_channel: Option<u32>,
}

impl EngineFactory for RecordingFactory {
    fn open(&self, params: &EngineParams) -> EncoderResult<Box<dyn EncoderEngine>> {
        if self.fail_channel == Some(params.channel_id) {
            return Err(EncoderError::Initialization("allocation failed".into()));
        }
        self.recorder.opens.fetch_add(1, Ordering::SeqCst);
        self.recorder.params.lock().push(params.clone());
        Ok(Box::new(RecordingEngine {
            channel: params.channel_id,
            recorder: Arc::clone(&self.recorder),
        }))
    }
}

fn params(pairs: &[(&str, &str)]) -> ModuleParamSet {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn open_module(pre_type: &str) -> (EncodeModule, Arc<Recorder>) {
    open_module_with(pre_type, None)
}

fn open_module_with(pre_type: &str, fail_channel: Option<u32>) -> (EncodeModule, Arc<Recorder>) {
    let recorder = Arc::new(Recorder::default());
    let factory = Arc::new(RecordingFactory {
        recorder: Arc::clone(&recorder),
        fail_channel,
    });
    let mut module = EncodeModule::new("encoder", factory, Arc::new(HostDevices::default()));
    module
        .open(&params(&[("pre_type", pre_type), ("bit_rate", "512")]))
        .unwrap();
    (module, recorder)
}

fn nv12(channel: ChannelId, timestamp: i64) -> Frame {
    Frame::new(
        channel,
        PixelFormat::Nv12,
        8,
        4,
        timestamp,
        vec![Plane::new(vec![16u8; 32]), Plane::new(vec![128u8; 16])],
    )
}

fn bgr(channel: ChannelId, timestamp: i64) -> Frame {
    nv12(channel, timestamp).with_bgr(BgrMatrix::packed(vec![0u8; 96], 8, 4))
}

#[test]
fn test_one_context_per_channel() {
    let (module, recorder) = open_module("mlu");

    for ts in 0..5 {
        for channel in [3, 1, 2] {
            assert_eq!(module.process(&nv12(channel, ts)), ProcessStatus::Encoded);
        }
    }

    assert_eq!(module.channel_count(), 3);
    assert_eq!(recorder.opens.load(Ordering::SeqCst), 3);
    assert_eq!(module.metrics().channels_opened, 3);
    assert_eq!(recorder.count(1, |c| matches!(c, Call::Update { .. })), 5);
}

#[test]
fn test_concurrent_first_frames_open_one_session() {
    let (module, recorder) = open_module("mlu");
    let module = Arc::new(module);
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let module = Arc::clone(&module);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let channel = i % 2;
                barrier.wait();
                for ts in 0..10 {
                    assert!(module.process(&nv12(channel, ts)).is_benign());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(module.channel_count(), 2);
    assert_eq!(recorder.opens.load(Ordering::SeqCst), 2);
    assert_eq!(recorder.total_updates(), 80);
}

#[test]
fn test_session_opened_with_first_frame_and_config() {
    let (module, recorder) = open_module("mlu");
    module.process(&nv12(7, 0));

    let params = recorder.params.lock();
    assert_eq!(params.len(), 1);
    let p = &params[0];
    assert_eq!((p.src_width, p.src_height), (8, 4));
    assert_eq!((p.dst_width, p.dst_height), (960, 540));
    assert_eq!(p.bit_rate, 524_288);
    assert_eq!(p.gop_size, 10);
    assert_eq!(p.frame_rate, 25);
    assert_eq!(p.format, TargetFormat::Nv12);
    assert_eq!(p.channel_id, 7);
}

#[test]
fn test_close_twice_releases_once() {
    let (module, recorder) = open_module("mlu");
    module.process(&nv12(1, 0));
    module.process(&nv12(2, 0));

    module.close().unwrap();
    module.close().unwrap();

    assert_eq!(module.channel_count(), 0);
    assert_eq!(recorder.count(1, |c| *c == Call::Close), 1);
    assert_eq!(recorder.count(2, |c| *c == Call::Close), 1);
    assert_eq!(module.metrics().sessions_closed, 2);

    drop(module);
    assert_eq!(recorder.count(1, |c| *c == Call::Close), 1);
}

#[test]
fn test_close_without_channels_is_noop() {
    let (module, recorder) = open_module("opencv");
    module.close().unwrap();
    module.close().unwrap();
    assert_eq!(recorder.opens.load(Ordering::SeqCst), 0);
}

#[test]
fn test_eos_first_frame_creates_context_and_flushes_once() {
    let (module, recorder) = open_module("mlu");

    assert_eq!(module.process(&Frame::eos(4, 0)), ProcessStatus::Flushed);

    assert_eq!(module.channel_count(), 1);
    assert_eq!(recorder.calls(4), vec![Call::Flush]);
    // No geometry on the marker, so the configured size stands in
    let params = recorder.params.lock();
    assert_eq!((params[0].src_width, params[0].src_height), (960, 540));
}

#[test]
fn test_eos_skips_adaptation() {
    // Matrix mode would drop a frame without a matrix; EOS must still flush
    let (module, recorder) = open_module("opencv");
    module.process(&bgr(1, 0));
    assert_eq!(module.process(&Frame::eos(1, 40)), ProcessStatus::Flushed);

    assert_eq!(
        recorder.calls(1),
        vec![Call::Update { len: 96, timestamp: 0 }, Call::Flush]
    );
    assert_eq!(module.metrics().dropped_frames, 0);
}

#[test]
fn test_unknown_mode_never_updates() {
    let (module, recorder) = open_module("cuda");

    for ts in 0..4 {
        for channel in [1, 2] {
            let status = module.process(&nv12(channel, ts));
            assert_eq!(status, ProcessStatus::Dropped(DropReason::UnknownMode));
            assert!(status.is_benign());
        }
    }

    assert_eq!(recorder.total_updates(), 0);
    assert_eq!(module.metrics().unknown_mode_drops, 8);
    module.close().unwrap();
}

#[test]
fn test_format_sticks_to_first_frame() {
    let (module, recorder) = open_module("mlu");

    module.process(&nv12(1, 0));
    let rgb = Frame::new(
        1,
        PixelFormat::Other("RGB24".into()),
        8,
        4,
        40,
        vec![Plane::new(vec![0u8; 96])],
    );
    assert_eq!(module.process(&rgb), ProcessStatus::Encoded);
    let nv21 = Frame::new(
        1,
        PixelFormat::Nv21,
        8,
        4,
        80,
        vec![Plane::new(vec![0u8; 32]), Plane::new(vec![0u8; 16])],
    );
    module.process(&nv21);

    assert_eq!(module.target_format(1), Some(TargetFormat::Nv12));
    assert_eq!(recorder.opens.load(Ordering::SeqCst), 1);
}

#[test]
fn test_planar_payload_is_concatenated() {
    let (module, recorder) = open_module("mlu");
    module.process(&nv12(1, 33));
    assert_eq!(recorder.calls(1), vec![Call::Update { len: 48, timestamp: 33 }]);
}

#[test]
fn test_failed_open_isolated_to_channel() {
    let (module, recorder) = open_module_with("mlu", Some(2));

    let status = module.process(&nv12(2, 0));
    assert!(!status.is_benign());
    assert!(!module.process(&nv12(2, 40)).is_benign());
    assert_eq!(module.process(&nv12(1, 0)), ProcessStatus::Encoded);

    // The failed channel keeps its context; no retry on later frames
    assert_eq!(module.channel_count(), 2);
    assert_eq!(recorder.opens.load(Ordering::SeqCst), 1);
    assert_eq!(module.metrics().failures, 1);

    // EOS on the failed channel has no engine to flush
    let eos = module.process(&Frame::eos(2, 80));
    assert!(matches!(eos, ProcessStatus::Failed(ref reason) if reason.starts_with("encoder unavailable")));
    assert_eq!(
        module.process(&Frame::eos(2, 120)),
        ProcessStatus::Dropped(DropReason::AfterEndOfStream)
    );
    assert_eq!(module.metrics().failures, 1);
    assert_eq!(module.metrics().flushes, 0);
    module.close().unwrap();
}

#[test]
fn test_check_param_set_gate() {
    let full = params(&[
        ("dst_width", "960"),
        ("dst_height", "540"),
        ("frame_rate", "25"),
        ("bit_rate", "1024"),
        ("gop_size", "10"),
        ("device_id", "0"),
        ("pre_type", "opencv"),
    ]);
    assert!(EncodeModule::check_param_set(&full).is_ok());

    let mut partial = full.clone();
    partial.remove("gop_size");
    let check = EncodeModule::check_param_set(&partial);
    assert!(!check.is_ok());
    assert!(check.diagnostic().contains("gop_size"));
}

#[test]
fn test_metrics_snapshot_serializes() {
    let (module, _recorder) = open_module("mlu");
    module.process(&nv12(1, 0));
    let json = serde_json::to_value(module.metrics()).unwrap();
    assert_eq!(json["frames_encoded"], 1);
    assert_eq!(json["channels_opened"], 1);
}
