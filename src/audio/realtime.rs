//! Dedicated-thread playback backend
//!
//! The playback buffer is owned by the cpal output callback. The session
//! side only sends messages, which the callback drains at the start of each
//! pull, so a reset can never land in the middle of one.
//!
//! Sample blocks travel on a bounded queue and are dropped when it is full.
//! Reset and gain travel on their own unbounded queue so they always arrive.
//! Each block is stamped with the reset generation it was pushed in; blocks
//! queued before a reset are discarded when the reset is applied.

use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::device::OutputTarget;
use crate::audio::playback::{BackendKind, PlaybackBackend, PlaybackCommand, Renderer};
use crate::config::PlaybackConfig;
use crate::error::AudioError;

/// How long to wait for the output stream to come up
const STARTUP_TIMEOUT: Duration = Duration::from_secs(2);

/// Mono samples pushed between two resets
struct Block {
    generation: u64,
    samples: Vec<f32>,
}

enum Control {
    Reset(u64),
    Gain(f32),
}

/// Session side of the link to the audio callback
pub(crate) struct CommandLink {
    blocks: Sender<Block>,
    control: Sender<Control>,
    generation: u64,
    /// Blocks dropped because the audio thread stopped draining
    dropped_blocks: u64,
}

/// Callback side of the link
pub(crate) struct CommandFeed {
    blocks: Receiver<Block>,
    control: Receiver<Control>,
    generation: u64,
}

/// Link with room for `depth` sample blocks in flight
pub(crate) fn command_link(depth: usize) -> (CommandLink, CommandFeed) {
    let (block_tx, block_rx) = bounded(depth.max(1));
    let (control_tx, control_rx) = unbounded();
    (
        CommandLink {
            blocks: block_tx,
            control: control_tx,
            generation: 0,
            dropped_blocks: 0,
        },
        CommandFeed {
            blocks: block_rx,
            control: control_rx,
            generation: 0,
        },
    )
}

impl CommandLink {
    pub(crate) fn push(&mut self, samples: Vec<f32>) {
        let block = Block {
            generation: self.generation,
            samples,
        };
        match self.blocks.try_send(block) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped_blocks += 1;
                if self.dropped_blocks.is_power_of_two() {
                    tracing::warn!(
                        "Audio thread is not draining, {} blocks dropped",
                        self.dropped_blocks
                    );
                }
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::trace!("Playback stream gone, block dropped");
            }
        }
    }

    pub(crate) fn reset(&mut self) {
        self.generation += 1;
        self.send_control(Control::Reset(self.generation));
    }

    pub(crate) fn set_gain(&mut self, gain: f32) {
        self.send_control(Control::Gain(gain));
    }

    pub(crate) fn dropped_blocks(&self) -> u64 {
        self.dropped_blocks
    }

    fn send_control(&self, control: Control) {
        if self.control.send(control).is_err() {
            tracing::trace!("Playback stream gone, control dropped");
        }
    }
}

impl CommandFeed {
    /// Apply everything queued so far, in the order it was issued
    pub(crate) fn drain_into(&mut self, renderer: &mut Renderer) {
        self.drain_control(renderer);
        while let Ok(block) = self.blocks.try_recv() {
            if block.generation > self.generation {
                // Pushed after a reset this side has not applied yet
                self.drain_control(renderer);
            }
            if block.generation == self.generation {
                renderer.apply(PlaybackCommand::Samples(block.samples));
            }
        }
    }

    fn drain_control(&mut self, renderer: &mut Renderer) {
        while let Ok(control) = self.control.try_recv() {
            match control {
                Control::Reset(generation) => {
                    self.generation = generation;
                    renderer.apply(PlaybackCommand::Reset);
                }
                Control::Gain(gain) => renderer.apply(PlaybackCommand::Gain(gain)),
            }
        }
    }
}

pub struct RealtimeBackend {
    link: CommandLink,

    /// Whether the stream thread should keep the stream alive
    running: Arc<AtomicBool>,

    /// Buffered samples published by the callback after each pull
    level: Arc<AtomicUsize>,

    thread_handle: Option<JoinHandle<()>>,
}

impl RealtimeBackend {
    /// Build and start the output stream on its own thread.
    ///
    /// Blocks the calling thread until the stream is playing, or for at
    /// most two seconds before giving up with the reason it could not be
    /// started.
    pub fn start(
        target: OutputTarget,
        config: &PlaybackConfig,
        gain: f32,
    ) -> Result<Self, AudioError> {
        let (link, feed) = command_link(config.queue_depth);
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);

        let running = Arc::new(AtomicBool::new(true));
        let level = Arc::new(AtomicUsize::new(0));

        let renderer = Renderer::new(config, gain);
        let running_for_loop = running.clone();
        let level_for_callback = level.clone();

        let handle = thread::Builder::new()
            .name("playback-rt".to_string())
            .spawn(move || {
                let OutputTarget { device, config, .. } = target;
                let stream = build_stream(&device, &config, renderer, feed, level_for_callback)
                    .and_then(|stream| {
                        stream.play()?;
                        Ok(stream)
                    });

                match stream {
                    Ok(_stream) => {
                        let _ = ready_tx.send(Ok(()));

                        // Keep the stream alive while running
                        while running_for_loop.load(Ordering::Relaxed) {
                            thread::sleep(Duration::from_millis(10));
                        }
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })
            .map_err(|e| AudioError::RealtimeUnavailable(e.to_string()))?;

        match ready_rx.recv_timeout(STARTUP_TIMEOUT) {
            Ok(Ok(())) => Ok(Self {
                link,
                running,
                level,
                thread_handle: Some(handle),
            }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                running.store(false, Ordering::SeqCst);
                Err(AudioError::RealtimeUnavailable(
                    "output stream did not start in time".to_string(),
                ))
            }
        }
    }

    pub fn dropped_blocks(&self) -> u64 {
        self.link.dropped_blocks()
    }
}

fn build_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut renderer: Renderer,
    mut feed: CommandFeed,
    level: Arc<AtomicUsize>,
) -> Result<cpal::Stream, AudioError> {
    let channels = config.channels as usize;

    let stream = device.build_output_stream(
        config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            feed.drain_into(&mut renderer);
            renderer.render_interleaved(data, channels);
            level.store(renderer.stats().buffered, Ordering::Relaxed);
        },
        move |err| {
            tracing::warn!("Playback stream error: {}", err);
        },
        None,
    )?;

    Ok(stream)
}

impl PlaybackBackend for RealtimeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Realtime
    }

    fn push(&mut self, samples: Vec<f32>) {
        self.link.push(samples);
    }

    fn reset(&mut self) {
        self.link.reset();
    }

    fn set_gain(&mut self, gain: f32) {
        self.link.set_gain(gain);
    }

    fn buffered(&self) -> usize {
        self.level.load(Ordering::Relaxed)
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for RealtimeBackend {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> PlaybackConfig {
        PlaybackConfig {
            capacity: 64,
            prebuffer: 4,
            target_level: 4,
            inline_block_size: 8,
            ..Default::default()
        }
    }

    #[test]
    fn test_control_survives_full_queue() {
        let config = small_config();
        let mut renderer = Renderer::new(&config, 1.0);
        let (mut link, mut feed) = command_link(2);

        link.push(vec![0.5; 8]);
        link.push(vec![0.5; 8]);
        link.push(vec![0.5; 8]);
        assert_eq!(link.dropped_blocks(), 1);

        link.reset();
        link.set_gain(0.0);
        feed.drain_into(&mut renderer);

        // Stale blocks went with the reset
        let stats = renderer.stats();
        assert_eq!(stats.buffered, 0);
        assert!(stats.prebuffering);

        link.push(vec![0.5; 8]);
        feed.drain_into(&mut renderer);
        assert_eq!(renderer.stats().buffered, 8);

        let mut out = vec![1.0f32; 4];
        renderer.render_interleaved(&mut out, 1);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_blocks_after_reset_are_kept() {
        let config = small_config();
        let mut renderer = Renderer::new(&config, 1.0);
        let (mut link, mut feed) = command_link(8);

        link.push(vec![0.1; 6]);
        link.reset();
        link.push(vec![0.2; 5]);
        feed.drain_into(&mut renderer);
        assert_eq!(renderer.stats().buffered, 5);

        // Reset issued after the callback already took the block
        link.push(vec![0.3; 3]);
        feed.drain_into(&mut renderer);
        link.reset();
        feed.drain_into(&mut renderer);
        assert_eq!(renderer.stats().buffered, 0);
    }

    #[test]
    fn test_gain_applies_in_order() {
        let config = small_config();
        let mut renderer = Renderer::new(&config, 1.0);
        let (mut link, mut feed) = command_link(4);

        link.set_gain(0.0);
        link.set_gain(0.5);
        link.push(vec![0.8; 16]);
        feed.drain_into(&mut renderer);

        let mut out = vec![0.0f32; 4];
        renderer.render_interleaved(&mut out, 1);
        assert!(out.iter().all(|&s| (s - 0.4).abs() < 1e-6));
    }
}
