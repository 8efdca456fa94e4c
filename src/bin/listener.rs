//! SDR listener
//!
//! Connects to an SDRconnect device, tunes it and plays its audio stream.
//! On every (re)connection the tune target is applied again and audio is
//! restarted.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sdr_audio_link::{
    audio::device::list_output_devices,
    config::{AppConfig, BackendPreference},
    protocol::DemodMode,
    Session, TuneTarget, Tuner,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BackendArg {
    Auto,
    Inline,
}

#[derive(Parser, Debug)]
#[command(name = "listener")]
#[command(about = "Live audio from an SDRconnect receiver")]
#[command(version)]
struct Args {
    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Device host
    #[arg(long)]
    host: Option<String>,

    /// Device WebSocket port
    #[arg(short, long)]
    port: Option<u16>,

    /// Frequency to tune to, in Hz
    #[arg(short, long)]
    frequency: Option<u64>,

    /// Demodulator (AM, USB, LSB, NFM, WFM, CW, SAM)
    #[arg(short, long)]
    mode: Option<DemodMode>,

    /// Filter bandwidth in Hz
    #[arg(short, long)]
    bandwidth: Option<u32>,

    /// Do not start audio playback
    #[arg(long)]
    no_audio: bool,

    /// Enable the spectrum stream and log its alignment
    #[arg(long)]
    spectrum: bool,

    /// Playback backend
    #[arg(long, value_enum)]
    backend: Option<BackendArg>,

    /// List output devices and exit
    #[arg(long)]
    list_devices: bool,
}

fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => AppConfig::load(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => AppConfig::load_or_default().context("Failed to load configuration")?,
    };

    if let Some(host) = &args.host {
        config.device.host = host.clone();
    }
    if let Some(port) = args.port {
        config.device.port = port;
    }
    if let Some(backend) = args.backend {
        config.playback.backend = match backend {
            BackendArg::Auto => BackendPreference::Auto,
            BackendArg::Inline => BackendPreference::Inline,
        };
    }
    config.validate()?;
    Ok(config)
}

/// Re-apply the target and restart the streams after a connect
async fn on_connected(tuner: &Tuner, target: Option<TuneTarget>, args: &Args) -> Result<()> {
    if let Some(target) = target {
        tuner.apply(&target)?;
        tracing::info!(
            "Tuned to {} Hz, {} {} Hz",
            target.frequency_hz,
            target.demodulator,
            target.bandwidth_hz
        );
    } else {
        if let Some(mode) = args.mode {
            tuner.set_demodulator(mode)?;
        }
        if let Some(bandwidth) = args.bandwidth {
            tuner.set_bandwidth(bandwidth)?;
        }
    }

    if !args.no_audio {
        // Opening the output device may block
        let audio = tuner.clone();
        let kind = tokio::task::spawn_blocking(move || audio.start_audio()).await??;
        tracing::info!("Audio started ({} backend)", kind);
    }
    if args.spectrum {
        tuner.start_spectrum()?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    if args.list_devices {
        println!("\n=== Available Output Devices ===");
        for name in list_output_devices() {
            println!("  {}", name);
        }
        return Ok(());
    }

    let config = load_config(&args)?;
    tracing::info!("Starting SDR listener for {}", config.device.url());

    let target = args.frequency.map(|frequency| {
        let mut target = TuneTarget::with_defaults(frequency, &config.tuning);
        if let Some(mode) = args.mode {
            target.demodulator = mode;
        }
        if let Some(bandwidth) = args.bandwidth {
            target.bandwidth_hz = bandwidth;
        }
        target
    });

    let session = Session::new(&config)?;
    let tuner = Tuner::new(session.handle());

    let (connection_tx, mut connection_rx) = mpsc::unbounded_channel();
    session.on_connection(move |connected| {
        let _ = connection_tx.send(*connected);
    });
    session.on_signal(|reading| {
        if let Some(power) = reading.power {
            tracing::info!("Signal power: {:.1} dBm", power);
        }
        if let Some(snr) = reading.snr {
            tracing::info!("SNR: {:.1} dB", snr);
        }
    });
    if args.spectrum {
        session.on_spectrum(|frame| {
            tracing::debug!(
                "Spectrum frame {}: {} bins, peak shift {}",
                frame.counter,
                frame.bins.len(),
                frame.peak_shift
            );
        });
    }

    session.connect()?;

    loop {
        tokio::select! {
            Some(connected) = connection_rx.recv() => {
                if connected {
                    if let Err(e) = on_connected(&tuner, target, &args).await {
                        tracing::error!("Failed to set up receiver: {}", e);
                    }
                } else {
                    tracing::warn!("Waiting for device...");
                }
            }
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl-C")?;
                tracing::info!("Shutting down");
                break;
            }
        }
    }

    let status = session.status();
    if let Some(center) = status.properties.center_frequency {
        tracing::info!("Last center frequency: {} Hz", center);
    }
    session.disconnect()?;
    session.shutdown().await;
    Ok(())
}
