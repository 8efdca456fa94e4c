//! Output device lookup and capability checks

use cpal::traits::{DeviceTrait, HostTrait};

use crate::error::AudioError;

/// An output device together with a stream configuration it accepts
pub struct OutputTarget {
    pub device: cpal::Device,
    pub config: cpal::StreamConfig,
    pub name: String,
}

impl std::fmt::Debug for OutputTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputTarget")
            .field("name", &self.name)
            .field("channels", &self.config.channels)
            .field("sample_rate", &self.config.sample_rate.0)
            .finish()
    }
}

/// Names of all output devices on the default host
pub fn list_output_devices() -> Vec<String> {
    let host = cpal::default_host();
    match host.output_devices() {
        Ok(devices) => devices.filter_map(|d| d.name().ok()).collect(),
        Err(e) => {
            tracing::debug!("Cannot enumerate output devices: {}", e);
            Vec::new()
        }
    }
}

/// Find an output device by name, or the default output device
pub fn find_output_device(name: Option<&str>) -> Result<cpal::Device, AudioError> {
    let host = cpal::default_host();

    let Some(name) = name else {
        return host
            .default_output_device()
            .ok_or_else(|| AudioError::DeviceNotFound("No default output device".to_string()));
    };

    let devices = host
        .output_devices()
        .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;

    for device in devices {
        if device.name().ok().as_deref() == Some(name) {
            return Ok(device);
        }
    }

    Err(AudioError::DeviceNotFound(name.to_string()))
}

/// Look for an `f32` output configuration at `sample_rate`.
///
/// Mono playback is copied to every channel, so any channel count is
/// acceptable; stereo is preferred.
pub fn select_output(device_name: Option<&str>, sample_rate: u32) -> Result<OutputTarget, AudioError> {
    let device = find_output_device(device_name)?;
    let name = device.name().unwrap_or_else(|_| "Unknown".to_string());

    let rate = cpal::SampleRate(sample_rate);
    let mut candidates: Vec<cpal::SupportedStreamConfigRange> = device
        .supported_output_configs()
        .map_err(|e| AudioError::CpalError(e.to_string()))?
        .filter(|range| {
            range.sample_format() == cpal::SampleFormat::F32
                && range.min_sample_rate() <= rate
                && rate <= range.max_sample_rate()
        })
        .collect();

    candidates.sort_by_key(|range| (range.channels() != 2, range.channels()));

    let range = candidates.into_iter().next().ok_or_else(|| {
        AudioError::UnsupportedFormat(format!("{} has no f32 output at {} Hz", name, sample_rate))
    })?;

    let config = range.with_sample_rate(rate).config();

    Ok(OutputTarget {
        device,
        config,
        name,
    })
}
