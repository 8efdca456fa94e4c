//! Audio playback subsystem

pub mod buffer;
pub mod device;
pub mod inline;
pub mod playback;
pub mod realtime;

pub use buffer::{drift_step, PlaybackBuffer, PlaybackStats, RingBuffer};
pub use device::{list_output_devices, OutputTarget};
pub use inline::{BlockSink, ChannelSink, InlineBackend, NullSink, PcmWriterSink};
pub use playback::{
    start_backend, BackendKind, Capability, Gain, PlaybackBackend, PlaybackCommand, Renderer,
};
pub use realtime::RealtimeBackend;
