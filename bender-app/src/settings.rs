//! Settings file (TOML) layered over the pipeline defaults.
//!
//! Every key is optional: the file only names what differs from
//! `PipelineConfig::default()`. Names are normalized (trimmed, `"default"`
//! device mapped to the system default) before the engine validates the
//! config; numeric knobs are left as written, so an out-of-range value is a
//! fatal configuration error rather than a silent clamp.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use bender_core::{PipelineConfig, PublisherConfig};

pub fn default_settings_path() -> PathBuf {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            std::env::var_os("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/etc"))
                .join(".config")
        })
        .join("bender")
        .join("bender.toml")
}

/// Load settings from `path`, or from the default location when `None`.
///
/// An explicitly named file must exist; a missing default file means
/// "use the defaults".
pub fn load_settings(path: Option<&Path>) -> Result<PipelineConfig> {
    let (path, required) = match path {
        Some(p) => (p.to_path_buf(), true),
        None => (default_settings_path(), false),
    };

    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no settings file, using defaults");
            return Ok(PipelineConfig::default());
        }
        Err(e) => {
            return Err(e).with_context(|| format!("reading settings {}", path.display()));
        }
    };

    let config: PipelineConfig =
        toml::from_str(&raw).with_context(|| format!("parsing settings {}", path.display()))?;
    tracing::info!(path = %path.display(), "settings loaded");
    Ok(config)
}

/// Trim device and channel names.
pub fn normalize(config: &mut PipelineConfig) {
    config.device = config
        .device
        .as_ref()
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty() && !d.eq_ignore_ascii_case("default"));
    normalize_publisher(&mut config.publisher);
}

fn normalize_publisher(publisher: &mut PublisherConfig) {
    let defaults = PublisherConfig::default();
    publisher.decision_channel = normalize_channel(&publisher.decision_channel, &defaults.decision_channel);
    publisher.metrics_channel = normalize_channel(&publisher.metrics_channel, &defaults.metrics_channel);
}

fn normalize_channel(raw: &str, fallback: &str) -> String {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        fallback.into()
    } else {
        trimmed.into()
    }
}
