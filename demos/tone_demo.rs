//! Plays a sine tone through whichever output the feeder selects.
//!
//! cargo run --example tone_demo -- --frequency 440 --seconds 3

use std::f32::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use audio_feeder::{ConfigManager, Feeder, FeederError, FeederLogger, FeederOptions, SampleBuffer};
use clap::Parser;
use log::{info, warn};

/// Sine tone generator driving the audio feeder
#[derive(Parser)]
#[command(name = "tone-demo")]
#[command(about = "Feed a generated sine tone to the best available audio output")]
struct Args {
    /// Tone frequency in Hz
    #[arg(short, long, default_value_t = 440.0)]
    frequency: f32,

    /// How long to play
    #[arg(short, long, default_value_t = 3.0)]
    seconds: f32,

    /// Nominal feed rate; converted to the output's native rate
    #[arg(short, long, default_value_t = 22050)]
    rate: u32,

    /// Nominal channel count
    #[arg(short, long, default_value_t = 1)]
    channels: u16,
}

/// Frames per generated chunk
const CHUNK_FRAMES: usize = 1024;

struct ToneGenerator {
    frequency: f32,
    rate: u32,
    phase: f32,
}

impl ToneGenerator {
    fn next_chunk(&mut self, channels: u16) -> Result<SampleBuffer, FeederError> {
        let step = 2.0 * PI * self.frequency / self.rate as f32;
        let mut samples = Vec::with_capacity(CHUNK_FRAMES);
        for _ in 0..CHUNK_FRAMES {
            samples.push(0.25 * self.phase.sin());
            self.phase = (self.phase + step) % (2.0 * PI);
        }
        SampleBuffer::new(vec![samples; channels as usize])
    }
}

#[tokio::main]
async fn main() -> Result<(), FeederError> {
    let args = Args::parse();

    let config = match ConfigManager::new() {
        Ok(manager) => manager.get_config().clone(),
        Err(e) => {
            eprintln!("Warning: using default configuration: {}", e.user_message());
            Default::default()
        }
    };
    if let Err(e) = FeederLogger::init_with_default(&config.log_level) {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }

    if let Some(context) = Feeder::init_shared_output_context() {
        info!("Pre-warmed '{}' at {} Hz", context.device_name, context.rate);
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);
    if let Err(e) = ctrlc::set_handler(move || {
        println!("\nReceived interrupt signal. Stopping...");
        shutdown_flag.store(true, Ordering::Relaxed);
    }) {
        warn!("Ctrl-C handler unavailable: {}", e);
    }

    let mut feeder = Feeder::new(FeederOptions::with_config(config));
    feeder.init(args.channels, args.rate)?;
    feeder.set_on_starved(|| warn!("Output starved"));
    feeder.wait_until_ready(|| info!("Output ready"))?;

    println!(
        "Playing {} Hz through {} output ({} Hz, {} ch)",
        args.frequency,
        feeder.backend_kind().map(|kind| kind.as_str()).unwrap_or("no"),
        feeder.backend_rate().unwrap_or(0),
        feeder.backend_channels().unwrap_or(0),
    );

    let mut tone = ToneGenerator {
        frequency: args.frequency,
        rate: args.rate,
        phase: 0.0,
    };
    let total_frames = (args.seconds.max(0.0) * args.rate as f32) as usize;
    let low_water = feeder.backend_rate().unwrap_or(args.rate) as f64 / 2.0;
    let mut fed = 0usize;

    feeder.start()?;
    loop {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }

        let state = feeder.playback_state()?;
        if fed >= total_frames && state.queued_clamped() <= 0.0 {
            break;
        }
        if fed < total_frames && state.queued_clamped() < low_water {
            feeder.buffer_data(tone.next_chunk(args.channels)?)?;
            fed += CHUNK_FRAMES;
            continue;
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let state = feeder.playback_state()?;
    println!(
        "Played {:.2}s, {} underrun(s), {:.3}s of inserted silence",
        state.playback_position, state.dropped, state.delayed_time
    );
    feeder.stop()?;
    feeder.close()
}
