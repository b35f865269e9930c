use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// On-disk TOML configuration structure.
/// All fields are optional so partial configs work (merge with defaults).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    pub paths: Option<PathsConfig>,
    pub fetch: Option<FetchConfig>,
    pub bibliography: Option<BibliographyConfig>,
    pub lookup: Option<LookupConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathsConfig {
    pub data_dir: Option<String>,
    pub source_dir: Option<String>,
    pub cache_path: Option<String>,
    pub workspace_dir: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchConfig {
    pub base_url: Option<String>,
    pub timeout_secs: Option<u64>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BibliographyConfig {
    pub max_size_mb: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LookupConfig {
    pub enabled: Option<bool>,
    pub api_url: Option<String>,
}

/// Platform config directory path: `<config_dir>/citesource/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("citesource").join("config.toml"))
}

/// Load config by cascading CWD `.citesource.toml` over platform config.
/// CWD values override platform values.
pub fn load_config() -> ConfigFile {
    let platform = config_path().and_then(|p| load_from_path(&p));
    let cwd = load_from_path(Path::new(".citesource.toml"));

    match (platform, cwd) {
        (None, None) => ConfigFile::default(),
        (Some(p), None) => p,
        (None, Some(c)) => c,
        (Some(p), Some(c)) => merge(p, c),
    }
}

/// Load a config from a specific path. Returns `None` if the file doesn't
/// exist or can't be parsed.
pub fn load_from_path(path: &Path) -> Option<ConfigFile> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str(&content) {
        Ok(config) => Some(config),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unparseable config file");
            None
        }
    }
}

/// Field from `overlay`'s section if set, else from `base`'s.
fn pick<S, T>(overlay: &Option<S>, base: &Option<S>, field: impl Fn(&S) -> Option<T>) -> Option<T> {
    overlay
        .as_ref()
        .and_then(&field)
        .or_else(|| base.as_ref().and_then(&field))
}

/// Merge two configs: `overlay` values take precedence over `base`.
pub fn merge(base: ConfigFile, overlay: ConfigFile) -> ConfigFile {
    let (b, o) = (&base, &overlay);
    ConfigFile {
        paths: Some(PathsConfig {
            data_dir: pick(&o.paths, &b.paths, |p| p.data_dir.clone()),
            source_dir: pick(&o.paths, &b.paths, |p| p.source_dir.clone()),
            cache_path: pick(&o.paths, &b.paths, |p| p.cache_path.clone()),
            workspace_dir: pick(&o.paths, &b.paths, |p| p.workspace_dir.clone()),
        }),
        fetch: Some(FetchConfig {
            base_url: pick(&o.fetch, &b.fetch, |f| f.base_url.clone()),
            timeout_secs: pick(&o.fetch, &b.fetch, |f| f.timeout_secs),
            user_agent: pick(&o.fetch, &b.fetch, |f| f.user_agent.clone()),
        }),
        bibliography: Some(BibliographyConfig {
            max_size_mb: pick(&o.bibliography, &b.bibliography, |c| c.max_size_mb),
        }),
        lookup: Some(LookupConfig {
            enabled: pick(&o.lookup, &b.lookup, |l| l.enabled),
            api_url: pick(&o.lookup, &b.lookup, |l| l.api_url.clone()),
        }),
    }
}

/// Save the config to the platform config directory.
pub fn save_config(config: &ConfigFile) -> Result<PathBuf, String> {
    let path = config_path().ok_or_else(|| "Could not determine config directory".to_string())?;
    save_to_path(config, &path)?;
    Ok(path)
}

pub fn save_to_path(config: &ConfigFile, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
    }
    let content =
        toml::to_string_pretty(config).map_err(|e| format!("Failed to serialize config: {}", e))?;
    std::fs::write(path, content).map_err(|e| format!("Failed to write config: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_toml() {
        let config = ConfigFile {
            paths: Some(PathsConfig {
                cache_path: Some("/tmp/references.db".to_string()),
                ..Default::default()
            }),
            bibliography: Some(BibliographyConfig {
                max_size_mb: Some(4),
            }),
            ..Default::default()
        };
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: ConfigFile = toml::from_str(&toml_str).unwrap();
        assert_eq!(
            parsed.paths.unwrap().cache_path.unwrap(),
            "/tmp/references.db"
        );
        assert_eq!(parsed.bibliography.unwrap().max_size_mb, Some(4));
    }

    #[test]
    fn absent_fields_deserialize_as_none() {
        let toml_str = "[fetch]\nbase_url = \"http://localhost:8080\"\n";
        let parsed: ConfigFile = toml::from_str(toml_str).unwrap();
        let fetch = parsed.fetch.unwrap();
        assert_eq!(fetch.base_url.as_deref(), Some("http://localhost:8080"));
        assert!(fetch.timeout_secs.is_none());
        assert!(parsed.paths.is_none());
    }

    #[test]
    fn merge_overlay_wins() {
        let base = ConfigFile {
            fetch: Some(FetchConfig {
                base_url: Some("https://base".to_string()),
                timeout_secs: Some(10),
                ..Default::default()
            }),
            ..Default::default()
        };
        let overlay = ConfigFile {
            fetch: Some(FetchConfig {
                base_url: Some("https://overlay".to_string()),
                ..Default::default()
            }),
            lookup: Some(LookupConfig {
                enabled: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        };
        let merged = merge(base, overlay);
        let fetch = merged.fetch.unwrap();
        assert_eq!(fetch.base_url.unwrap(), "https://overlay");
        assert_eq!(fetch.timeout_secs, Some(10));
        assert_eq!(merged.lookup.unwrap().enabled, Some(true));
    }

    #[test]
    fn merge_base_preserved_when_overlay_absent() {
        let base = ConfigFile {
            paths: Some(PathsConfig {
                data_dir: Some("/base/data".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let merged = merge(base, ConfigFile::default());
        assert_eq!(merged.paths.unwrap().data_dir.unwrap(), "/base/data");
    }

    #[test]
    fn save_and_load_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = ConfigFile {
            lookup: Some(LookupConfig {
                enabled: Some(true),
                api_url: Some("http://localhost/api".to_string()),
            }),
            ..Default::default()
        };
        save_to_path(&config, &path).unwrap();
        let loaded = load_from_path(&path).unwrap();
        assert_eq!(loaded.lookup.unwrap().api_url.unwrap(), "http://localhost/api");
    }

    #[test]
    fn unparseable_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[fetch\nbase_url = ").unwrap();
        assert!(load_from_path(&path).is_none());
        assert!(load_from_path(&dir.path().join("missing.toml")).is_none());
    }
}
