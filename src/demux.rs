//! Binary frame demultiplexer
//!
//! Spectrum and audio share one binary channel. A frame whose first 16-bit
//! word (little-endian) equals [`SPECTRUM_SENTINEL`] carries `u8` spectrum
//! bins after that word; any other frame is raw interleaved `i16` PCM with
//! no header. Nothing else is validated, so a PCM frame that happens to
//! start with the sentinel is taken for spectrum.

use bytes::Bytes;

use crate::constants::SPECTRUM_SENTINEL;

/// Interleaved 16-bit PCM frame
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Interleaved samples
    pub samples: Vec<i16>,
    /// Arrival order among audio frames
    pub sequence: u64,
}

impl AudioFrame {
    /// Convert to mono `f32` in [-1, 1), keeping the first channel of each
    /// interleaved frame.
    pub fn to_mono(&self, channels: u16) -> Vec<f32> {
        let channels = channels.max(1) as usize;
        self.samples
            .chunks_exact(channels)
            .map(|frame| frame[0] as f32 / 32768.0)
            .collect()
    }
}

/// Spectrum amplitude bins
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrumFrame {
    pub bins: Bytes,
    /// Monotonic spectrum frame counter
    pub counter: u64,
    /// Display shift that puts the peak at the centre, see [`crate::spectrum`]
    pub peak_shift: i32,
}

/// Classified binary frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Spectrum(SpectrumFrame),
    Audio(AudioFrame),
}

/// True when the frame starts with the spectrum sentinel
pub fn is_spectrum(data: &[u8]) -> bool {
    data.len() >= 2 && u16::from_le_bytes([data[0], data[1]]) == SPECTRUM_SENTINEL
}

/// Stateful classifier that stamps frames with their arrival order
#[derive(Debug, Default)]
pub struct Demuxer {
    spectrum_frames: u64,
    audio_frames: u64,
}

impl Demuxer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify one frame
    pub fn demux(&mut self, data: Bytes) -> Frame {
        if is_spectrum(&data) {
            let counter = self.spectrum_frames;
            self.spectrum_frames += 1;
            return Frame::Spectrum(SpectrumFrame {
                bins: data.slice(2..),
                counter,
                peak_shift: 0,
            });
        }

        let samples = data
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        let sequence = self.audio_frames;
        self.audio_frames += 1;
        Frame::Audio(AudioFrame { samples, sequence })
    }

    pub fn spectrum_frames(&self) -> u64 {
        self.spectrum_frames
    }

    pub fn audio_frames(&self) -> u64 {
        self.audio_frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm(samples: &[i16]) -> Bytes {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect::<Vec<u8>>().into()
    }

    #[test]
    fn test_spectrum_frame_strips_header() {
        let mut demux = Demuxer::new();
        let mut data = vec![0x03, 0x00];
        data.extend((0..=255u8).collect::<Vec<_>>());

        match demux.demux(Bytes::from(data)) {
            Frame::Spectrum(frame) => {
                assert_eq!(frame.bins.len(), 256);
                assert_eq!(frame.bins[0], 0);
                assert_eq!(frame.bins[255], 255);
                assert_eq!(frame.counter, 0);
            }
            other => panic!("expected spectrum, got {:?}", other),
        }
        assert_eq!(demux.spectrum_frames(), 1);
    }

    #[test]
    fn test_audio_frame_uses_full_payload() {
        let mut demux = Demuxer::new();
        match demux.demux(pcm(&[100, -100, 3, 4])) {
            Frame::Audio(frame) => {
                assert_eq!(frame.samples, vec![100, -100, 3, 4]);
                assert_eq!(frame.sequence, 0);
            }
            other => panic!("expected audio, got {:?}", other),
        }
    }

    #[test]
    fn test_big_endian_sentinel_is_audio() {
        let mut demux = Demuxer::new();
        assert!(matches!(demux.demux(Bytes::from_static(&[0x00, 0x03, 1, 2])), Frame::Audio(_)));
    }

    #[test]
    fn test_pcm_starting_with_sentinel_is_misrouted() {
        // Known ambiguity of the wire format
        let mut demux = Demuxer::new();
        assert!(matches!(demux.demux(pcm(&[3, 500, 600])), Frame::Spectrum(_)));
    }

    #[test]
    fn test_short_and_odd_frames() {
        let mut demux = Demuxer::new();
        match demux.demux(Bytes::from_static(&[7])) {
            Frame::Audio(frame) => assert!(frame.samples.is_empty()),
            other => panic!("expected audio, got {:?}", other),
        }
        match demux.demux(Bytes::from_static(&[1, 0, 9])) {
            Frame::Audio(frame) => {
                assert_eq!(frame.samples, vec![1]);
                assert_eq!(frame.sequence, 1);
            }
            other => panic!("expected audio, got {:?}", other),
        }
        // Header only: spectrum with no bins
        match demux.demux(Bytes::from_static(&[3, 0])) {
            Frame::Spectrum(frame) => assert!(frame.bins.is_empty()),
            other => panic!("expected spectrum, got {:?}", other),
        }
    }

    #[test]
    fn test_to_mono_keeps_first_channel() {
        let frame = AudioFrame {
            samples: vec![16384, -1, -32768, 5, 0, 7],
            sequence: 0,
        };
        assert_eq!(frame.to_mono(2), vec![0.5, -1.0, 0.0]);
        assert_eq!(frame.to_mono(1).len(), 6);
    }
}
