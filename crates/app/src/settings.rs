use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Format, Json, Serialized},
};
use serde::{Deserialize, Serialize};

use quill_stream::StreamerConfig;

pub const SETTINGS_DIRECTORY_NAME: &str = "quill";
pub const SETTINGS_FILE_NAME: &str = "replay.json";

/// Replay pacing settings, layered over defaults from an optional JSON
/// file. Both knobs affect animation pace only, never correctness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplaySettings {
    /// Drain interval between displayed units, in milliseconds.
    #[serde(default = "default_typing_speed_ms")]
    pub typing_speed_ms: u64,
    /// Gap between replayed script events when a line does not carry its
    /// own `delay_ms`.
    #[serde(default = "default_event_gap_ms")]
    pub event_gap_ms: u64,
}

fn default_typing_speed_ms() -> u64 {
    30
}

fn default_event_gap_ms() -> u64 {
    10
}

impl Default for ReplaySettings {
    fn default() -> Self {
        Self {
            typing_speed_ms: default_typing_speed_ms(),
            event_gap_ms: default_event_gap_ms(),
        }
    }
}

impl ReplaySettings {
    /// Loads settings from `path` when given, otherwise from the default
    /// config location. A missing or unparseable file falls back to
    /// defaults; replay pacing is never worth failing startup over.
    pub fn load(path: Option<&Path>) -> Self {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => default_settings_path(),
        };
        if !path.exists() {
            tracing::info!("settings file not found at {:?}, using defaults", path);
            return Self::default();
        }

        let figment =
            Figment::from(Serialized::defaults(Self::default())).merge(Json::file(&path));

        match figment.extract::<Self>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(
                    "failed to parse settings from {:?}: {}. using defaults",
                    path,
                    error
                );
                Self::default()
            }
        }
    }

    fn normalized(mut self) -> Self {
        // A zero drain interval would busy-spin the clock.
        self.typing_speed_ms = self.typing_speed_ms.max(1);
        self
    }

    pub fn streamer_config(&self) -> StreamerConfig {
        StreamerConfig {
            typing_speed: Duration::from_millis(self.typing_speed_ms),
        }
    }

    pub fn event_gap(&self) -> Duration {
        Duration::from_millis(self.event_gap_ms)
    }
}

fn default_settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(SETTINGS_DIRECTORY_NAME)
        .join(SETTINGS_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_pacing() {
        let settings = ReplaySettings::default();
        assert_eq!(settings.typing_speed_ms, 30);
        assert_eq!(
            settings.streamer_config().typing_speed,
            Duration::from_millis(30)
        );
    }

    #[test]
    fn normalization_clamps_zero_typing_speed() {
        let settings = ReplaySettings {
            typing_speed_ms: 0,
            event_gap_ms: 0,
        }
        .normalized();
        assert_eq!(settings.typing_speed_ms, 1);
        assert_eq!(settings.event_gap_ms, 0, "zero event gap is allowed");
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let settings = ReplaySettings::load(Some(Path::new("/nonexistent/replay.json")));
        assert_eq!(settings, ReplaySettings::default());
    }
}
