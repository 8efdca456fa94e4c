//! Tuning
//!
//! Radio-level operations expressed as property writes and stream toggles
//! on a session. Every call is fire-and-forget: while the session is not
//! connected the device commands are dropped.

use serde::{Deserialize, Serialize};

use crate::audio::playback::BackendKind;
use crate::config::TuningDefaults;
use crate::error::SessionError;
use crate::protocol::{DemodMode, Property};
use crate::session::SessionHandle;

/// A station to listen to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TuneTarget {
    pub frequency_hz: u64,
    pub demodulator: DemodMode,
    pub bandwidth_hz: u32,
}

impl TuneTarget {
    /// Target at `frequency_hz` with the configured default mode and bandwidth
    pub fn with_defaults(frequency_hz: u64, defaults: &TuningDefaults) -> Self {
        Self {
            frequency_hz,
            demodulator: defaults.default_demodulator,
            bandwidth_hz: defaults.default_bandwidth,
        }
    }
}

#[derive(Clone)]
pub struct Tuner {
    session: SessionHandle,
}

impl Tuner {
    pub fn new(session: SessionHandle) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// Set the VFO frequency. The device's center frequency is re-read
    /// shortly afterwards.
    pub fn tune(&self, frequency_hz: u64) -> Result<(), SessionError> {
        tracing::debug!("Tuning to {} Hz", frequency_hz);
        self.session
            .set_property(Property::VfoFrequency, frequency_hz.to_string())
    }

    pub fn set_demodulator(&self, mode: DemodMode) -> Result<(), SessionError> {
        self.session.set_property(Property::Demodulator, mode.as_str())
    }

    pub fn set_bandwidth(&self, bandwidth_hz: u32) -> Result<(), SessionError> {
        self.session
            .set_property(Property::FilterBandwidth, bandwidth_hz.to_string())
    }

    pub fn set_antenna_port(&self, port: &str) -> Result<(), SessionError> {
        self.session.set_property(Property::AntennaSelect, port)
    }

    /// Frequency, then mode, then bandwidth
    pub fn apply(&self, target: &TuneTarget) -> Result<(), SessionError> {
        self.tune(target.frequency_hz)?;
        self.set_demodulator(target.demodulator)?;
        self.set_bandwidth(target.bandwidth_hz)
    }

    /// Start local playback, then ask the device for audio.
    ///
    /// Blocks like [`SessionHandle::start_playback`] while the output
    /// device is opened, for up to two seconds.
    pub fn start_audio(&self) -> Result<BackendKind, SessionError> {
        let kind = self.session.start_playback()?;
        self.session.enable_audio_stream(true)?;
        Ok(kind)
    }

    pub fn stop_audio(&self) -> Result<(), SessionError> {
        self.session.enable_audio_stream(false)?;
        self.session.stop_playback()
    }

    pub fn start_spectrum(&self) -> Result<(), SessionError> {
        self.session.enable_spectrum(true)
    }

    pub fn stop_spectrum(&self) -> Result<(), SessionError> {
        self.session.enable_spectrum(false)
    }

    /// Flush buffered audio and wait for the pre-buffer again
    pub fn reset(&self) -> Result<(), SessionError> {
        self.session.reset_playback()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_with_defaults() {
        let target = TuneTarget::with_defaults(7_200_000, &TuningDefaults::default());
        assert_eq!(target.demodulator, DemodMode::Am);
        assert_eq!(target.bandwidth_hz, 7500);
        assert_eq!(target.frequency_hz, 7_200_000);
    }

    #[test]
    fn test_target_serde() {
        let target: TuneTarget = serde_json::from_str(
            r#"{"frequency_hz":14074000,"demodulator":"USB","bandwidth_hz":2800}"#,
        )
        .unwrap();
        assert_eq!(target.demodulator, DemodMode::Usb);
        assert_eq!(target.frequency_hz, 14_074_000);
    }
}
