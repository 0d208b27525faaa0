use std::fs;
use std::path::Path;

use anyhow::Context;
use pulse_engine::TrackerSettings;
use pulse_logging::{pulse_info, pulse_warn};

const DEFAULT_CONFIG_FILENAME: &str = "jobpulse.ron";

/// Loads tracker settings.
///
/// An explicit path must exist and parse. Without one, `./jobpulse.ron` is
/// used when present and defaults otherwise. Fields missing from the file keep
/// their default values.
pub fn load_settings(explicit: Option<&Path>) -> anyhow::Result<TrackerSettings> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => {
            let fallback = Path::new(DEFAULT_CONFIG_FILENAME);
            if !fallback.exists() {
                pulse_info!("No {} found, using default settings", DEFAULT_CONFIG_FILENAME);
                return Ok(TrackerSettings::default());
            }
            fallback.to_path_buf()
        }
    };

    let content = fs::read_to_string(&path)
        .with_context(|| format!("reading settings from {}", path.display()))?;
    let settings = parse_settings(&content)
        .with_context(|| format!("parsing settings from {}", path.display()))?;
    pulse_info!("Loaded settings from {:?}", path);
    Ok(settings)
}

pub fn parse_settings(content: &str) -> anyhow::Result<TrackerSettings> {
    if content.trim().is_empty() {
        pulse_warn!("Settings file is empty, using defaults");
        return Ok(TrackerSettings::default());
    }
    Ok(ron::from_str(content)?)
}

pub fn default_settings_ron() -> anyhow::Result<String> {
    let pretty = ron::ser::PrettyConfig::new();
    Ok(ron::ser::to_string_pretty(&TrackerSettings::default(), pretty)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use pulse_core::ErrorPercent;
    use std::io::Write;

    #[test]
    fn partial_file_keeps_defaults() {
        let settings = parse_settings(
            r#"(
                poll: (base_url: "https://api.example", interval_ms: 750),
                error_percent: hold_last,
                max_duration_ms: Some(600000),
            )"#,
        )
        .unwrap();

        let defaults = TrackerSettings::default();
        assert_eq!(settings.poll.base_url, "https://api.example");
        assert_eq!(settings.poll.interval_ms, 750);
        assert_eq!(settings.poll.status_path, defaults.poll.status_path);
        assert_eq!(settings.push, defaults.push);
        assert_eq!(settings.weights, defaults.weights);
        assert_eq!(settings.error_percent, ErrorPercent::HoldLast);
        assert_eq!(settings.max_duration_ms, Some(600_000));
    }

    #[test]
    fn default_output_parses_back() {
        let text = default_settings_ron().unwrap();
        assert_eq!(parse_settings(&text).unwrap(), TrackerSettings::default());
    }

    #[test]
    fn explicit_file_is_loaded() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "(push: (url: \"wss://push.example/ws\", event: \"sync\"))").unwrap();

        let settings = load_settings(Some(file.path())).unwrap();
        assert_eq!(settings.push.url, "wss://push.example/ws");
        assert_eq!(settings.push.event, "sync");
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_settings(Some(&dir.path().join("absent.ron"))).unwrap_err();
        assert!(err.to_string().contains("reading settings"));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "(poll: (interval_ms: \"soon\"))").unwrap();

        let err = load_settings(Some(file.path())).unwrap_err();
        assert!(err.to_string().contains("parsing settings"));
    }
}
