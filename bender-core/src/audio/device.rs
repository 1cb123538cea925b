//! Audio input device enumeration and lookup.

use serde::{Deserialize, Serialize};

#[cfg(feature = "audio-cpal")]
use crate::error::{BenderError, Result};

/// Metadata about an audio input device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Human-readable device name reported by the OS.
    pub name: String,
    /// Whether this is the system default input device.
    pub is_default: bool,
    /// Largest channel count any supported configuration offers.
    pub max_channels: u16,
    /// Sample rates (Hz) the device advertises, as inclusive ranges.
    pub rate_ranges: Vec<(u32, u32)>,
}

impl DeviceInfo {
    /// Whether some advertised range covers `rate` with at least `channels`.
    pub fn supports(&self, rate: u32, channels: u16) -> bool {
        channels <= self.max_channels
            && self
                .rate_ranges
                .iter()
                .any(|&(lo, hi)| (lo..=hi).contains(&rate))
    }
}

/// Resolve an input device by exact name, or the default input when `name`
/// is `None` or `"default"`.
///
/// Unlike a best-effort UI picker, a named device that cannot be found is an
/// error: the pipeline must not silently capture from another microphone.
#[cfg(feature = "audio-cpal")]
pub fn resolve_input_device(name: Option<&str>) -> Result<cpal::Device> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    match name.map(str::trim).filter(|n| !n.is_empty() && *n != "default") {
        None => host
            .default_input_device()
            .ok_or(BenderError::NoDefaultInputDevice),
        Some(wanted) => {
            let mut devices = host
                .input_devices()
                .map_err(|e| BenderError::AudioDevice(e.to_string()))?;
            devices
                .find(|device| device.name().map(|n| n == wanted).unwrap_or(false))
                .ok_or_else(|| BenderError::AudioDevice(format!("input device '{wanted}' not found")))
        }
    }
}

/// List all available audio input devices on the system.
///
/// Returns an empty `Vec` if cpal is not available or no devices exist.
#[cfg(feature = "audio-cpal")]
pub fn list_input_devices() -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let devices = match host.input_devices() {
        Ok(devices) => devices,
        Err(e) => {
            tracing::warn!("failed to enumerate input devices: {e}");
            return vec![];
        }
    };

    let mut list = devices
        .enumerate()
        .map(|(idx, device)| {
            let name = device
                .name()
                .unwrap_or_else(|_| format!("Input Device {}", idx + 1));
            let is_default = default_name.as_deref() == Some(name.as_str());
            let mut max_channels = 0;
            let mut rate_ranges = Vec::new();
            if let Ok(configs) = device.supported_input_configs() {
                for range in configs {
                    max_channels = max_channels.max(range.channels());
                    let span = (range.min_sample_rate().0, range.max_sample_rate().0);
                    if !rate_ranges.contains(&span) {
                        rate_ranges.push(span);
                    }
                }
            }
            DeviceInfo {
                name,
                is_default,
                max_channels,
                rate_ranges,
            }
        })
        .collect::<Vec<_>>();

    list.sort_by_key(|d| (!d.is_default, d.name.to_ascii_lowercase()));
    list
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_input_devices() -> Vec<DeviceInfo> {
    vec![]
}

#[cfg(test)]
mod tests {
    use super::DeviceInfo;

    #[test]
    fn supports_checks_rate_ranges_and_channels() {
        let info = DeviceInfo {
            name: "Google VoiceHAT".into(),
            is_default: true,
            max_channels: 2,
            rate_ranges: vec![(8_000, 16_000), (48_000, 48_000)],
        };
        assert!(info.supports(48_000, 2));
        assert!(info.supports(16_000, 1));
        assert!(!info.supports(44_100, 2));
        assert!(!info.supports(48_000, 4));
    }
}
