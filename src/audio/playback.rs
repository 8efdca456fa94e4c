//! Playback execution backends
//!
//! One [`PlaybackBuffer`] per playback session, run by one of two
//! interchangeable backends:
//!
//! - [`RealtimeBackend`]: the buffer lives on the output device's callback
//!   thread. The network side hands each converted mono block over a
//!   channel and never touches the buffer itself.
//! - [`InlineBackend`]: the buffer lives on the network context and is
//!   pulled in fixed-size blocks on a timer.
//!
//! Both feed the same [`Renderer`], so they sound the same for the same
//! input. The choice is made once, at playback start, from a capability
//! check; if the real-time thread cannot be acquired the session silently
//! falls back to inline.

use std::time::Duration;

use crate::audio::buffer::{PlaybackBuffer, PlaybackStats};
use crate::audio::device::{select_output, OutputTarget};
use crate::audio::inline::{block_sink_for, InlineBackend};
use crate::audio::realtime::RealtimeBackend;
use crate::config::{BackendPreference, PlaybackConfig};

/// Message from the network side to whichever context owns the buffer
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackCommand {
    /// Mono samples in [-1, 1]
    Samples(Vec<f32>),
    /// Clear cursors and close the pre-buffer gate
    Reset,
    /// Output gain
    Gain(f32),
}

/// Which backend a playback session ended up on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Realtime,
    Inline,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Realtime => f.write_str("realtime"),
            BackendKind::Inline => f.write_str("inline"),
        }
    }
}

/// Output volume with mute
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gain {
    volume: f32,
    muted: bool,
}

impl Gain {
    pub fn new(volume: f32) -> Self {
        Self {
            volume: volume.clamp(0.0, 1.0),
            muted: false,
        }
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    /// Multiplier applied to rendered samples
    pub fn factor(&self) -> f32 {
        if self.muted {
            0.0
        } else {
            self.volume
        }
    }
}

/// Buffer plus gain; the part both backends share
pub struct Renderer {
    buffer: PlaybackBuffer,
    gain: f32,
    scratch: Vec<f32>,
}

impl Renderer {
    pub fn new(config: &PlaybackConfig, gain: f32) -> Self {
        Self {
            buffer: PlaybackBuffer::from_config(config),
            gain,
            scratch: vec![0.0; config.inline_block_size],
        }
    }

    pub fn apply(&mut self, command: PlaybackCommand) {
        match command {
            PlaybackCommand::Samples(samples) => self.buffer.write(&samples),
            PlaybackCommand::Reset => self.buffer.reset(),
            PlaybackCommand::Gain(gain) => self.gain = gain,
        }
    }

    /// Render one block into interleaved `out`, copying mono to every channel
    pub fn render_interleaved(&mut self, out: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        let frames = out.len() / channels;
        if self.scratch.len() < frames {
            self.scratch.resize(frames, 0.0);
        }

        let block = &mut self.scratch[..frames];
        self.buffer.render(block);

        for (frame, &sample) in out.chunks_exact_mut(channels).zip(block.iter()) {
            frame.fill(sample * self.gain);
        }
    }

    pub fn stats(&self) -> PlaybackStats {
        self.buffer.stats()
    }
}

/// Strategy interface over the two execution contexts
pub trait PlaybackBackend: Send {
    fn kind(&self) -> BackendKind;

    /// Hand over a converted mono block
    fn push(&mut self, samples: Vec<f32>);

    /// Reset the buffer; applied between block pulls
    fn reset(&mut self);

    fn set_gain(&mut self, gain: f32);

    /// Interval at which the caller must invoke [`PlaybackBackend::pull`].
    /// `None` when the backend is clocked by the output device.
    fn block_interval(&self) -> Option<Duration> {
        None
    }

    /// Render one block on the caller's context
    fn pull(&mut self) {}

    /// Buffered samples as last observed
    fn buffered(&self) -> usize;

    fn stop(&mut self);
}

/// Result of looking for a real-time output context
#[derive(Debug)]
pub enum Capability {
    Realtime(OutputTarget),
    InlineOnly(String),
}

/// Check whether a real-time output thread can be used
pub fn detect_capability(config: &PlaybackConfig) -> Capability {
    if config.backend == BackendPreference::Inline {
        return Capability::InlineOnly("inline backend requested".to_string());
    }

    match select_output(config.output_device.as_deref(), config.sample_rate) {
        Ok(target) => Capability::Realtime(target),
        Err(e) => Capability::InlineOnly(e.to_string()),
    }
}

/// Pick and start a backend for a new playback session
pub fn start_backend(config: &PlaybackConfig, gain: Gain) -> Box<dyn PlaybackBackend> {
    let reason = match detect_capability(config) {
        Capability::Realtime(target) => {
            let name = target.name.clone();
            match RealtimeBackend::start(target, config, gain.factor()) {
                Ok(backend) => {
                    tracing::info!("Playback on real-time output thread ({})", name);
                    return Box::new(backend);
                }
                Err(e) => e.to_string(),
            }
        }
        Capability::InlineOnly(reason) => reason,
    };

    tracing::info!("Playback on inline backend: {}", reason);
    Box::new(InlineBackend::new(
        config,
        gain.factor(),
        block_sink_for(config.fallback_output),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    fn small_config() -> PlaybackConfig {
        PlaybackConfig {
            capacity: 1024,
            prebuffer: 256,
            target_level: 128,
            inline_block_size: 64,
            ..Default::default()
        }
    }

    #[test]
    fn test_gain_factor() {
        let mut gain = Gain::new(1.7);
        assert_eq!(gain.factor(), 1.0);
        gain.set_volume(0.25);
        assert_eq!(gain.factor(), 0.25);
        gain.set_muted(true);
        assert_eq!(gain.factor(), 0.0);
        assert_eq!(gain.volume(), 0.25);
    }

    #[test]
    fn test_renderer_copies_mono_to_channels() {
        let config = small_config();
        let mut renderer = Renderer::new(&config, 0.5);
        renderer.apply(PlaybackCommand::Samples(vec![0.8; 512]));

        let mut out = vec![0.0f32; 8];
        renderer.render_interleaved(&mut out, 2);
        for frame in out.chunks_exact(2) {
            assert_eq!(frame[0], frame[1]);
            assert!((frame[0] - 0.4).abs() < 1e-6);
        }
    }

    #[test]
    fn test_channel_fed_and_direct_renderers_match() {
        // Same input, once via a one-way channel drained per pull (as on the
        // audio thread) and once applied directly (as inline)
        let config = small_config();
        let mut direct = Renderer::new(&config, 0.8);
        let mut threaded = Renderer::new(&config, 0.8);
        let (tx, rx) = unbounded();

        let mut direct_out = vec![0.0f32; 64];
        let mut threaded_out = vec![0.0f32; 64];

        for n in 0..200 {
            let block: Vec<f32> = (0..65).map(|i| ((n * 65 + i) as f32 * 0.01).sin()).collect();
            direct.apply(PlaybackCommand::Samples(block.clone()));
            tx.send(PlaybackCommand::Samples(block)).unwrap();
            if n == 120 {
                direct.apply(PlaybackCommand::Reset);
                tx.send(PlaybackCommand::Reset).unwrap();
            }

            while let Ok(cmd) = rx.try_recv() {
                threaded.apply(cmd);
            }
            direct.render_interleaved(&mut direct_out, 1);
            threaded.render_interleaved(&mut threaded_out, 1);
            assert_eq!(direct_out, threaded_out);
        }

        assert_eq!(direct.stats(), threaded.stats());
    }

    #[test]
    fn test_inline_preference_skips_device_lookup() {
        let config = PlaybackConfig {
            backend: BackendPreference::Inline,
            ..small_config()
        };
        assert!(matches!(detect_capability(&config), Capability::InlineOnly(_)));

        let backend = start_backend(&config, Gain::new(0.8));
        assert_eq!(backend.kind(), BackendKind::Inline);
        assert!(backend.block_interval().is_some());
    }
}
