//! # SDR Audio Link
//!
//! Live receiver audio and control session for an SDRconnect device.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                        NETWORK / SESSION CONTEXT (tokio)                  │
//! │                                                                           │
//! │   WebSocket ──► Session Manager ──► text ──► property cache / signal      │
//! │   (device)      (session::manager)   │        / property subscribers      │
//! │      ▲               │  ▲            │                                    │
//! │      │               │  │ backoff    └─ binary ──► Frame Demultiplexer    │
//! │      │               │  │ poll timer                (demux)               │
//! │      │               │  │                          │          │           │
//! │      │               │  │                  spectrum ▼    audio ▼          │
//! │      │               │  │          peak alignment + subs   mono f32 + subs│
//! │      │               │  │                                      │          │
//! │   Tuning Façade ─────┘  │                                      ▼          │
//! │   (tuning)              │                        Execution Backend        │
//! │                         │                        (audio::playback)        │
//! └─────────────────────────┼─────────────────────────────┬─────────┬─────────┘
//!                           │                  one-way    │         │ inline
//!                           │                  transfer   ▼         ▼ ticks
//! ┌─────────────────────────┼──────────────┐   ┌───────────────┐ ┌─────────────┐
//! │  AUDIO CONTEXT (cpal callback thread)  │◄──│ realtime      │ │ inline      │
//! │  PlaybackBuffer: ring + pre-buffer     │   │ backend       │ │ backend     │
//! │  gate + drift-compensated resampler    │   └───────────────┘ └─────────────┘
//! └────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod config;
pub mod demux;
pub mod error;
pub mod protocol;
pub mod session;
pub mod spectrum;
pub mod tuning;

pub use error::{Error, Result};
pub use session::{Session, SessionHandle};
pub use tuning::{TuneTarget, Tuner};

/// Application-wide constants
pub mod constants {
    /// Output sample rate of the device audio stream
    pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

    /// Interleaved channels in an inbound audio frame
    pub const DEFAULT_INPUT_CHANNELS: u16 = 2;

    /// Playback ring capacity in mono samples (~2.7 s at 48 kHz, power of 2)
    pub const RING_BUFFER_CAPACITY: usize = 131_072;

    /// Samples that must accumulate before playback starts (~340 ms)
    pub const PRE_BUFFER_SAMPLES: usize = 16_384;

    /// Occupancy the drift controller steers towards (~170 ms)
    pub const TARGET_LEVEL: usize = 8_192;

    /// Divisor of the proportional drift controller
    pub const DRIFT_SMOOTHING: f64 = 200_000.0;

    /// Maximum deviation of the resampling step from 1.0
    pub const MAX_DRIFT_CORRECTION: f64 = 0.05;

    /// Block size of the inline fallback backend
    pub const INLINE_BLOCK_SIZE: usize = 4096;

    /// First 16-bit word of a spectrum frame
    pub const SPECTRUM_SENTINEL: u16 = 0x0003;

    /// Default SDRconnect WebSocket port
    pub const DEFAULT_DEVICE_PORT: u16 = 5454;

    /// Initial reconnect delay in milliseconds
    pub const RECONNECT_BASE_MS: u64 = 1_000;

    /// Reconnect delay ceiling in milliseconds
    pub const RECONNECT_MAX_MS: u64 = 30_000;

    /// Telemetry poll interval in milliseconds
    pub const SIGNAL_POLL_MS: u64 = 2_000;

    /// Delay before re-reading the centre frequency after a tune
    pub const CENTER_REFRESH_DELAY_MS: u64 = 200;
}
