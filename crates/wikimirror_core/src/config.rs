use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::sync::{DEFAULT_STOPPING_THRESHOLD, DEFAULT_THROTTLE_MS};

pub const DEFAULT_ENDPOINT: &str = "https://www.wikidot.com/xml-rpc-api.php";
pub const DEFAULT_USER_AGENT: &str = "wikimirror/0.1";
pub const DEFAULT_API_KEY_FILE: &str = "apikey.txt";
pub const DEFAULT_MIRROR_DIR: &str = "site";
pub const DEFAULT_OVERRIDE_FILE: &str = "override.txt";
pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct MirrorConfig {
    #[serde(default)]
    pub site: SiteSection,
    #[serde(default)]
    pub sync: SyncSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct SiteSection {
    pub name: Option<String>,
    pub endpoint: Option<String>,
    pub api_key_file: Option<String>,
    pub mirror_dir: Option<String>,
    pub user_agent: Option<String>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct SyncSection {
    pub stopping_threshold: Option<usize>,
    pub throttle_ms: Option<u64>,
    pub override_file: Option<String>,
    pub abort_on_attachment_error: Option<bool>,
}

impl MirrorConfig {
    pub fn endpoint(&self) -> &str {
        self.site.endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT)
    }

    pub fn user_agent(&self) -> &str {
        self.site.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT)
    }

    pub fn api_key_file(&self) -> &str {
        self.site
            .api_key_file
            .as_deref()
            .unwrap_or(DEFAULT_API_KEY_FILE)
    }

    pub fn mirror_dir(&self) -> &str {
        self.site.mirror_dir.as_deref().unwrap_or(DEFAULT_MIRROR_DIR)
    }

    pub fn timeout_ms(&self) -> u64 {
        self.site.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS)
    }

    pub fn stopping_threshold(&self) -> usize {
        self.sync
            .stopping_threshold
            .unwrap_or(DEFAULT_STOPPING_THRESHOLD)
    }

    pub fn throttle_ms(&self) -> u64 {
        self.sync.throttle_ms.unwrap_or(DEFAULT_THROTTLE_MS)
    }

    pub fn override_file(&self) -> &str {
        self.sync
            .override_file
            .as_deref()
            .unwrap_or(DEFAULT_OVERRIDE_FILE)
    }

    pub fn abort_on_attachment_error(&self) -> bool {
        self.sync.abort_on_attachment_error.unwrap_or(false)
    }
}

/// Load and parse a MirrorConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<MirrorConfig> {
    if !config_path.exists() {
        return Ok(MirrorConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: MirrorConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

/// Read the API key file. Surrounding whitespace is dropped; an empty file is an error.
pub fn read_api_key(path: &Path) -> Result<String> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read API key file {}", path.display()))?;
    let key = content.trim();
    if key.is_empty() {
        bail!("API key file {} is empty", path.display());
    }
    Ok(key.to_string())
}

/// Read an override list: one page per line, blank lines and `#` comments skipped.
pub fn read_override_list(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read override list {}", path.display()))?;
    Ok(parse_override_list(&content))
}

pub fn parse_override_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_config_uses_builtin_values() {
        let config = MirrorConfig::default();
        assert!(config.site.name.is_none());
        assert_eq!(config.endpoint(), DEFAULT_ENDPOINT);
        assert_eq!(config.mirror_dir(), "site");
        assert_eq!(config.stopping_threshold(), 100);
        assert_eq!(config.throttle_ms(), 50);
        assert_eq!(config.override_file(), "override.txt");
        assert!(!config.abort_on_attachment_error());
    }

    #[test]
    fn load_config_returns_default_for_missing_file() {
        let config = load_config(Path::new("/nonexistent/config.toml")).expect("load config");
        assert_eq!(config, MirrorConfig::default());
    }

    #[test]
    fn load_config_parses_both_sections() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(
            &config_path,
            r#"
[site]
name = "fancyclopedia"
endpoint = "https://mirror.example/xml-rpc-api.php"
api_key_file = "secrets/key.txt"
mirror_dir = "mirrors"
user_agent = "test-agent/1.0"
timeout_ms = 5000

[sync]
stopping_threshold = 0
throttle_ms = 250
override_file = "redo.txt"
abort_on_attachment_error = true
"#,
        )
        .expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert_eq!(config.site.name.as_deref(), Some("fancyclopedia"));
        assert_eq!(config.endpoint(), "https://mirror.example/xml-rpc-api.php");
        assert_eq!(config.api_key_file(), "secrets/key.txt");
        assert_eq!(config.mirror_dir(), "mirrors");
        assert_eq!(config.user_agent(), "test-agent/1.0");
        assert_eq!(config.timeout_ms(), 5000);
        assert_eq!(config.stopping_threshold(), 0);
        assert_eq!(config.throttle_ms(), 250);
        assert_eq!(config.override_file(), "redo.txt");
        assert!(config.abort_on_attachment_error());
    }

    #[test]
    fn load_config_tolerates_partial_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(&config_path, "[site]\nname = \"scifi\"\n").expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert_eq!(config.site.name.as_deref(), Some("scifi"));
        assert_eq!(config.sync, SyncSection::default());
    }

    #[test]
    fn load_config_returns_error_for_invalid_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(&config_path, "[site\nname = \"oops\"").expect("write config");
        let error = load_config(&config_path).expect_err("must fail");
        assert!(error.to_string().contains("failed to parse"));
    }

    #[test]
    fn api_key_is_trimmed_and_required() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("apikey.txt");
        fs::write(&path, "  abc123\n").expect("write key");
        assert_eq!(read_api_key(&path).expect("key"), "abc123");

        fs::write(&path, "\n").expect("write empty key");
        assert!(read_api_key(&path).is_err());
        assert!(read_api_key(&temp.path().join("missing.txt")).is_err());
    }

    #[test]
    fn override_list_skips_blanks_and_comments() {
        let pages = parse_override_list("start\n\n  # redo later\n forum:news \r\nstart\n");
        assert_eq!(pages, vec!["start", "forum:news", "start"]);
    }
}
