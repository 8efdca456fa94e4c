//! SDRconnect control protocol
//!
//! Text frames are JSON objects tagged by `event_type`. Property values are
//! always strings on the wire, including numbers, and stream toggles carry
//! `"true"` / `"false"`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ProtocolError;

/// Receiver demodulator modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DemodMode {
    #[serde(rename = "AM")]
    Am,
    #[serde(rename = "USB")]
    Usb,
    #[serde(rename = "LSB")]
    Lsb,
    #[serde(rename = "NFM")]
    Nfm,
    #[serde(rename = "WFM")]
    Wfm,
    #[serde(rename = "CW")]
    Cw,
    #[serde(rename = "SAM")]
    Sam,
}

impl DemodMode {
    pub const ALL: [DemodMode; 7] = [
        DemodMode::Am,
        DemodMode::Usb,
        DemodMode::Lsb,
        DemodMode::Nfm,
        DemodMode::Wfm,
        DemodMode::Cw,
        DemodMode::Sam,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DemodMode::Am => "AM",
            DemodMode::Usb => "USB",
            DemodMode::Lsb => "LSB",
            DemodMode::Nfm => "NFM",
            DemodMode::Wfm => "WFM",
            DemodMode::Cw => "CW",
            DemodMode::Sam => "SAM",
        }
    }
}

impl fmt::Display for DemodMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DemodMode {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DemodMode::ALL
            .iter()
            .copied()
            .find(|mode| mode.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ProtocolError::UnknownDemodulator(s.to_string()))
    }
}

/// Device properties this crate reads or writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Property {
    VfoFrequency,
    CenterFrequency,
    SampleRate,
    IqSampleRate,
    Demodulator,
    FilterBandwidth,
    SignalPower,
    SignalSnr,
    AntennaSelect,
}

impl Property {
    /// Read once on every new connection
    pub const INITIAL_READS: [Property; 6] = [
        Property::VfoFrequency,
        Property::CenterFrequency,
        Property::SampleRate,
        Property::IqSampleRate,
        Property::Demodulator,
        Property::FilterBandwidth,
    ];

    /// Re-requested on the poll timer; the device does not reliably push these
    pub const POLLED: [Property; 2] = [Property::SignalPower, Property::SignalSnr];

    pub fn name(&self) -> &'static str {
        match self {
            Property::VfoFrequency => "device_vfo_frequency",
            Property::CenterFrequency => "device_center_frequency",
            Property::SampleRate => "device_sample_rate",
            Property::IqSampleRate => "iq_sample_rate",
            Property::Demodulator => "demodulator",
            Property::FilterBandwidth => "filter_bandwidth",
            Property::SignalPower => "signal_power",
            Property::SignalSnr => "signal_snr",
            Property::AntennaSelect => "antenna_select",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "device_vfo_frequency" => Property::VfoFrequency,
            "device_center_frequency" => Property::CenterFrequency,
            "device_sample_rate" => Property::SampleRate,
            "iq_sample_rate" => Property::IqSampleRate,
            "demodulator" => Property::Demodulator,
            "filter_bandwidth" => Property::FilterBandwidth,
            "signal_power" => Property::SignalPower,
            "signal_snr" => Property::SignalSnr,
            "antenna_select" => Property::AntennaSelect,
            _ => return None,
        })
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A control frame exchanged over the text channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum ControlMessage {
    GetProperty {
        property: String,
    },
    SetProperty {
        property: String,
        value: String,
    },
    PropertyChanged {
        property: String,
        value: String,
    },
    GetPropertyResponse {
        property: String,
        value: String,
    },
    AudioStreamEnable {
        #[serde(with = "bool_string")]
        value: bool,
    },
    SpectrumEnable {
        #[serde(with = "bool_string")]
        value: bool,
    },
}

impl ControlMessage {
    pub fn get(property: Property) -> Self {
        ControlMessage::GetProperty {
            property: property.name().to_string(),
        }
    }

    pub fn set(property: Property, value: impl Into<String>) -> Self {
        ControlMessage::SetProperty {
            property: property.name().to_string(),
            value: value.into(),
        }
    }

    /// Parse a text frame
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> String {
        // A tagged enum of strings and bools cannot fail to serialize
        serde_json::to_string(self).unwrap_or_default()
    }

    /// `(property, value)` for device-originated property reports
    pub fn property_report(&self) -> Option<(&str, &str)> {
        match self {
            ControlMessage::PropertyChanged { property, value }
            | ControlMessage::GetPropertyResponse { property, value } => {
                Some((property.as_str(), value.as_str()))
            }
            _ => None,
        }
    }
}

/// Parse a numeric property value
pub fn parse_number(property: &str, value: &str) -> Result<f64, ProtocolError> {
    value
        .trim()
        .parse::<f64>()
        .map_err(|_| ProtocolError::InvalidValue {
            property: property.to_string(),
            value: value.to_string(),
        })
}

mod bool_string {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(if *value { "true" } else { "false" })
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        let s = String::deserialize(deserializer)?;
        match s.as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(D::Error::custom(format!("expected \"true\" or \"false\", got {other:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_property_wire_shape() {
        let msg = ControlMessage::set(Property::VfoFrequency, "9500000");
        let value: serde_json::Value = serde_json::from_str(&msg.to_json()).unwrap();
        assert_eq!(
            value,
            json!({
                "event_type": "set_property",
                "property": "device_vfo_frequency",
                "value": "9500000"
            })
        );
    }

    #[test]
    fn test_stream_enable_uses_string_booleans() {
        let value: serde_json::Value =
            serde_json::from_str(&ControlMessage::AudioStreamEnable { value: true }.to_json()).unwrap();
        assert_eq!(value, json!({"event_type": "audio_stream_enable", "value": "true"}));

        let value: serde_json::Value =
            serde_json::from_str(&ControlMessage::SpectrumEnable { value: false }.to_json()).unwrap();
        assert_eq!(value, json!({"event_type": "spectrum_enable", "value": "false"}));
    }

    #[test]
    fn test_parse_property_changed() {
        let msg = ControlMessage::parse(
            r#"{"event_type":"property_changed","property":"signal_power","value":"-71.5"}"#,
        )
        .unwrap();
        assert_eq!(msg.property_report(), Some(("signal_power", "-71.5")));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(ControlMessage::parse("not json").is_err());
        assert!(ControlMessage::parse(r#"{"event_type":"bogus"}"#).is_err());
        assert!(ControlMessage::parse(r#"{"event_type":"get_property_response"}"#).is_err());
    }

    #[test]
    fn test_demod_mode_round_trip_names() {
        for mode in DemodMode::ALL {
            assert_eq!(mode.as_str().parse::<DemodMode>().unwrap(), mode);
        }
        assert_eq!("usb".parse::<DemodMode>().unwrap(), DemodMode::Usb);
        assert!("FM".parse::<DemodMode>().is_err());
    }

    #[test]
    fn test_property_names() {
        assert_eq!(Property::from_name("antenna_select"), Some(Property::AntennaSelect));
        assert_eq!(Property::from_name("volume"), None);
        for p in Property::INITIAL_READS {
            assert_eq!(Property::from_name(p.name()), Some(p));
        }
    }
}
