use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// On-disk TOML configuration. All fields are optional so partial configs
/// merge cleanly with defaults; CLI flags still win over everything here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    pub mailto: Option<String>,
    pub cache_dir: Option<String>,
    pub min_score: Option<f64>,
    pub non_interactive: Option<bool>,
}

/// Platform config path: `<config_dir>/bibscout/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("bibscout").join("config.toml"))
}

/// Load config by cascading CWD `.bibscout.toml` over the platform config.
pub fn load_config() -> ConfigFile {
    let platform = config_path().and_then(|p| load_from_path(&p));
    let cwd = load_from_path(&PathBuf::from(".bibscout.toml"));

    match (platform, cwd) {
        (None, None) => ConfigFile::default(),
        (Some(p), None) => p,
        (None, Some(c)) => c,
        (Some(p), Some(c)) => merge(p, c),
    }
}

/// Load a config from a specific path. `None` when the file is missing or
/// unparsable.
fn load_from_path(path: &PathBuf) -> Option<ConfigFile> {
    let content = std::fs::read_to_string(path).ok()?;
    toml::from_str(&content).ok()
}

/// Merge two configs: `overlay` values take precedence over `base`.
fn merge(base: ConfigFile, overlay: ConfigFile) -> ConfigFile {
    ConfigFile {
        mailto: overlay.mailto.or(base.mailto),
        cache_dir: overlay.cache_dir.or(base.cache_dir),
        min_score: overlay.min_score.or(base.min_score),
        non_interactive: overlay.non_interactive.or(base.non_interactive),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_overlay_wins() {
        let base = ConfigFile {
            mailto: Some("base@example.org".into()),
            cache_dir: Some("/base".into()),
            min_score: None,
            non_interactive: Some(false),
        };
        let overlay = ConfigFile {
            mailto: Some("overlay@example.org".into()),
            cache_dir: None,
            min_score: Some(0.8),
            non_interactive: None,
        };
        let merged = merge(base, overlay);
        assert_eq!(merged.mailto.as_deref(), Some("overlay@example.org"));
        assert_eq!(merged.cache_dir.as_deref(), Some("/base"));
        assert_eq!(merged.min_score, Some(0.8));
        assert_eq!(merged.non_interactive, Some(false));
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: ConfigFile = toml::from_str("mailto = \"me@example.org\"\n").unwrap();
        assert_eq!(config.mailto.as_deref(), Some("me@example.org"));
        assert!(config.cache_dir.is_none());
    }
}
