// Session tunables, loadable from `~/.tandem/config.toml`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Serialized payloads at or above this many characters are chunked.
const DEFAULT_CHUNK_SIZE: usize = 2500;
/// Default quiet window before a coalesced field change is broadcast.
const DEFAULT_DEBOUNCE_MS: u64 = 500;
/// Minimum allowed debounce window.
const MIN_DEBOUNCE_MS: u64 = 100;
/// Maximum allowed debounce window.
const MAX_DEBOUNCE_MS: u64 = 5_000;
/// Grace delay letting a final whisper flush before teardown.
const DEFAULT_FLUSH_GRACE_MS: u64 = 500;
/// Idle time after which an incomplete chunk assembly is evicted.
const DEFAULT_ASSEMBLY_TTL_SECS: u64 = 30;

/// Root directory for Tandem global state: `~/.tandem/`.
pub fn global_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".tandem"))
}

/// Path to the global config file: `~/.tandem/config.toml`.
pub fn global_config_path() -> Option<PathBuf> {
    global_dir().map(|d| d.join("config.toml"))
}

/// Collaboration session configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CollabConfig {
    /// Chunking threshold in characters of serialized payload.
    pub chunk_size: usize,
    /// Debounce quiet window in milliseconds (clamped to [100, 5000]).
    pub debounce_ms: u64,
    /// Grace delay in milliseconds before a revision-restore teardown.
    pub flush_grace_ms: u64,
    /// Seconds of inactivity before an incomplete chunk assembly is dropped.
    pub assembly_ttl_secs: u64,
}

impl Default for CollabConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            flush_grace_ms: DEFAULT_FLUSH_GRACE_MS,
            assembly_ttl_secs: DEFAULT_ASSEMBLY_TTL_SECS,
        }
    }
}

impl CollabConfig {
    /// Load from `~/.tandem/config.toml`. Returns defaults if the file
    /// doesn't exist or can't be parsed.
    pub fn load() -> Self {
        global_config_path().and_then(|p| Self::load_from(&p).ok()).unwrap_or_default()
    }

    /// Load from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        toml::from_str(&contents).map_err(ConfigError::Parse)
    }

    /// Save to a specific path (creates parent directories).
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigError::Io)?;
        }
        let contents = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(path, contents).map_err(ConfigError::Io)
    }

    /// Debounce window, clamped to a sane range.
    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_ms.clamp(MIN_DEBOUNCE_MS, MAX_DEBOUNCE_MS))
    }

    pub fn flush_grace(&self) -> Duration {
        Duration::from_millis(self.flush_grace_ms)
    }

    pub fn assembly_ttl(&self) -> Duration {
        Duration::from_secs(self.assembly_ttl_secs)
    }
}

// ── Errors ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Serialize(toml::ser::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "config I/O error: {e}"),
            Self::Parse(e) => write!(f, "config parse error: {e}"),
            Self::Serialize(e) => write!(f, "config serialize error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let config = CollabConfig::default();
        assert_eq!(config.chunk_size, 2500);
        assert_eq!(config.debounce_window(), Duration::from_millis(500));
        assert_eq!(config.flush_grace(), Duration::from_millis(500));
        assert_eq!(config.assembly_ttl(), Duration::from_secs(30));
    }

    #[test]
    fn debounce_window_clamps_to_range() {
        let mut config = CollabConfig { debounce_ms: 10, ..CollabConfig::default() };
        assert_eq!(config.debounce_window(), Duration::from_millis(100));
        config.debounce_ms = 60_000;
        assert_eq!(config.debounce_window(), Duration::from_millis(5_000));
    }

    #[test]
    fn save_and_reload_roundtrips() {
        let dir = TempDir::new().expect("temp dir should be created");
        let path = dir.path().join("config.toml");
        let config = CollabConfig { chunk_size: 1000, debounce_ms: 250, ..CollabConfig::default() };

        config.save_to(&path).expect("config should save");
        let reloaded = CollabConfig::load_from(&path).expect("config should reload");
        assert_eq!(reloaded, config);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = TempDir::new().expect("temp dir should be created");
        let result = CollabConfig::load_from(&dir.path().join("absent.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = TempDir::new().expect("temp dir should be created");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "debounce_ms = 300\n").expect("config should be written");

        let config = CollabConfig::load_from(&path).expect("config should parse");
        assert_eq!(config.debounce_ms, 300);
        assert_eq!(config.chunk_size, 2500);
    }
}
