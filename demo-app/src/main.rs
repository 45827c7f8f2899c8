//! Feeds synthetic multi-channel video through the encode module.
//!
//! Usage: `chanenc-demo [--channels N] [--frames N] [--codec raw|h264] [key=value ...]`

mod synth;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use tracing::{info, warn};

use chanenc_encoder::{create_engine_factory, packet_channel, Codec, EncoderError};
use chanenc_module::{EncodeModule, HostDevices, ModuleParamSet, ParamRegistry};

use synth::{spawn_source, StreamShape};

#[derive(Parser, Debug)]
#[command(
    name = "chanenc-demo",
    version,
    about = "Feed synthetic multi-channel video through the encode module",
    after_help = ParamRegistry::encoder().describe()
)]
struct Cli {
    /// Number of channels to generate.
    #[arg(long, default_value_t = 4)]
    channels: u32,

    /// Frames per channel before end of stream.
    #[arg(long, default_value_t = 50)]
    frames: u64,

    /// Engine to encode with.
    #[arg(long, value_enum, default_value_t = CodecArg::H264)]
    codec: CodecArg,

    /// Module parameters as key=value.
    #[arg(value_parser = parse_param)]
    params: Vec<(String, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CodecArg {
    Raw,
    H264,
}

impl From<CodecArg> for Codec {
    fn from(arg: CodecArg) -> Self {
        match arg {
            CodecArg::Raw => Codec::Raw,
            CodecArg::H264 => Codec::H264,
        }
    }
}

impl Cli {
    fn param_set(&self) -> ModuleParamSet {
        self.params.iter().cloned().collect()
    }
}

fn parse_param(arg: &str) -> Result<(String, String), String> {
    match arg.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got {arg:?}")),
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let params = cli.param_set();

    EncodeModule::check_param_set(&params).into_result()?;

    let (sink, packets) = packet_channel();
    let requested = Codec::from(cli.codec);
    let (factory, codec) = match create_engine_factory(requested, sink.clone()) {
        Ok(factory) => (factory, requested),
        Err(EncoderError::NotSupported(reason)) => {
            warn!(%reason, "H.264 unavailable, falling back to raw engine");
            (create_engine_factory(Codec::Raw, sink.clone())?, Codec::Raw)
        }
        Err(e) => return Err(e.into()),
    };

    let mut module = EncodeModule::new("encoder", factory, Arc::new(HostDevices::default()))
        .with_codec(codec);
    module.open(&params)?;
    let module = Arc::new(module);

    let config = module.config().cloned().context("module not open")?;
    let shape = StreamShape {
        width: config.dst_width,
        height: config.dst_height,
        frames: cli.frames,
        ts_step: 1000 / i64::from(config.frame_rate.max(1)),
    };
    info!(channels = cli.channels, frames = cli.frames, "Starting synthetic run");

    // Collector counts packets per channel until every sender is gone
    let collector = thread::spawn(move || {
        let mut per_channel: BTreeMap<u32, (u64, usize)> = BTreeMap::new();
        for packet in packets.iter() {
            let entry = per_channel.entry(packet.channel_id).or_default();
            entry.0 += 1;
            entry.1 += packet.data.len();
        }
        per_channel
    });

    let workers: Vec<_> = (0..cli.channels)
        .map(|channel| {
            let module = Arc::clone(&module);
            let (frames, source) = spawn_source(channel, shape);
            thread::spawn(move || {
                for frame in frames.iter() {
                    let status = module.process(&frame);
                    if !status.is_benign() {
                        warn!(channel, ?status, "Frame not encoded");
                    }
                }
                if source.join().is_err() {
                    warn!(channel, "Frame source panicked");
                }
            })
        })
        .collect();

    for worker in workers {
        if worker.join().is_err() {
            warn!("Channel worker panicked");
        }
    }

    module.close()?;
    let metrics = module.metrics();
    let overflow = sink.dropped();
    drop(module);
    drop(sink);

    let per_channel = match collector.join() {
        Ok(counts) => counts,
        Err(_) => bail!("packet collector panicked"),
    };
    for (channel, (count, bytes)) in &per_channel {
        info!(channel, packets = count, bytes, "Channel summary");
    }

    println!("{}", serde_json::to_string_pretty(&metrics)?);
    if overflow > 0 {
        warn!(overflow, "Packets dropped on a full queue");
    }
    Ok(())
}
