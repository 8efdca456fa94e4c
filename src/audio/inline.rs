//! Inline playback backend
//!
//! Fallback for hosts without a usable real-time output thread. The buffer
//! is driven from the session's own event loop: each [`pull`] renders one
//! fixed-size block and hands it to a [`BlockSink`].
//!
//! [`pull`]: PlaybackBackend::pull

use crossbeam_channel::Sender;
use std::io::Write;
use std::time::Duration;

use crate::audio::playback::{BackendKind, PlaybackBackend, PlaybackCommand, Renderer};
use crate::config::{FallbackOutput, PlaybackConfig};

/// Destination for blocks rendered by the inline backend
pub trait BlockSink: Send {
    fn write_block(&mut self, block: &[f32]);
}

/// Discards output
#[derive(Debug, Default)]
pub struct NullSink;

impl BlockSink for NullSink {
    fn write_block(&mut self, _block: &[f32]) {}
}

/// Writes signed 16-bit little-endian mono PCM
pub struct PcmWriterSink<W: Write + Send> {
    writer: W,
    bytes: Vec<u8>,
    failed: bool,
}

impl<W: Write + Send> PcmWriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            bytes: Vec::new(),
            failed: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> BlockSink for PcmWriterSink<W> {
    fn write_block(&mut self, block: &[f32]) {
        if self.failed {
            return;
        }

        self.bytes.clear();
        for &sample in block {
            let s = (sample.clamp(-1.0, 1.0) * 32767.0) as i16;
            self.bytes.extend_from_slice(&s.to_le_bytes());
        }

        if let Err(e) = self.writer.write_all(&self.bytes).and_then(|_| self.writer.flush()) {
            tracing::warn!("PCM output failed, discarding further blocks: {}", e);
            self.failed = true;
        }
    }
}

/// Forwards each block to a channel
pub struct ChannelSink(pub Sender<Vec<f32>>);

impl BlockSink for ChannelSink {
    fn write_block(&mut self, block: &[f32]) {
        let _ = self.0.try_send(block.to_vec());
    }
}

/// Sink for the configured fallback output
pub fn block_sink_for(output: FallbackOutput) -> Box<dyn BlockSink> {
    match output {
        FallbackOutput::Null => Box::new(NullSink),
        FallbackOutput::Stdout => Box::new(PcmWriterSink::new(std::io::stdout())),
    }
}

pub struct InlineBackend {
    renderer: Renderer,
    block: Vec<f32>,
    interval: Duration,
    sink: Box<dyn BlockSink>,
}

impl InlineBackend {
    pub fn new(config: &PlaybackConfig, gain: f32, sink: Box<dyn BlockSink>) -> Self {
        Self {
            renderer: Renderer::new(config, gain),
            block: vec![0.0; config.inline_block_size],
            interval: config.inline_block_interval(),
            sink,
        }
    }
}

impl PlaybackBackend for InlineBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Inline
    }

    fn push(&mut self, samples: Vec<f32>) {
        self.renderer.apply(PlaybackCommand::Samples(samples));
    }

    fn reset(&mut self) {
        self.renderer.apply(PlaybackCommand::Reset);
    }

    fn set_gain(&mut self, gain: f32) {
        self.renderer.apply(PlaybackCommand::Gain(gain));
    }

    fn block_interval(&self) -> Option<Duration> {
        Some(self.interval)
    }

    fn pull(&mut self) {
        self.renderer.render_interleaved(&mut self.block, 1);
        self.sink.write_block(&self.block);
    }

    fn buffered(&self) -> usize {
        self.renderer.stats().buffered
    }

    fn stop(&mut self) {
        self.renderer.apply(PlaybackCommand::Reset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn test_inline_pull_renders_blocks() {
        let config = PlaybackConfig {
            capacity: 4096,
            prebuffer: 1024,
            target_level: 512,
            inline_block_size: 256,
            ..Default::default()
        };
        let (tx, rx) = unbounded();
        let mut backend = InlineBackend::new(&config, 1.0, Box::new(ChannelSink(tx)));

        backend.pull();
        let silent = rx.try_recv().unwrap();
        assert_eq!(silent.len(), 256);
        assert!(silent.iter().all(|&s| s == 0.0));

        backend.push(vec![0.5; 1024]);
        backend.pull();
        let block = rx.try_recv().unwrap();
        assert!(block.iter().all(|&s| (s - 0.5).abs() < 1e-6));
        assert!(backend.buffered() < 1024);

        backend.reset();
        assert_eq!(backend.buffered(), 0);
    }

    #[test]
    fn test_pcm_writer_sink() {
        let mut sink = PcmWriterSink::new(Vec::new());
        sink.write_block(&[0.0, 1.0, -1.0, 2.0]);
        let bytes = sink.into_inner();
        let samples: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        assert_eq!(samples, vec![0, 32767, -32767, 32767]);
    }
}
