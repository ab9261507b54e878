use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Serialize;

use crate::client::WikidotClientConfig;
use crate::config::{MirrorConfig, read_api_key};
use crate::mirror::MirrorLayout;
use crate::sync::SyncOptions;

pub const STATE_DIR_NAME: &str = ".wikimirror";
pub const CONFIG_FILENAME: &str = "config.toml";

pub const ENV_PROJECT_ROOT: &str = "WIKIMIRROR_PROJECT_ROOT";
pub const ENV_SITE: &str = "WIKIDOT_SITE";
pub const ENV_ENDPOINT: &str = "WIKIDOT_ENDPOINT";
pub const ENV_API_KEY: &str = "WIKIDOT_API_KEY";
pub const ENV_USER_AGENT: &str = "WIKIDOT_USER_AGENT";
pub const ENV_STOPPING_THRESHOLD: &str = "WIKIMIRROR_STOPPING_THRESHOLD";
pub const ENV_THROTTLE_MS: &str = "WIKIMIRROR_THROTTLE_MS";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueSource {
    Flag,
    Env,
    Config,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Config => "config",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub project_root: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        let cwd = env::current_dir().context("failed to read current directory")?;
        Ok(Self { cwd })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub project_root: PathBuf,
    pub state_dir: PathBuf,
    pub config_path: PathBuf,
    pub root_source: ValueSource,
    pub config_source: ValueSource,
}

impl ResolvedPaths {
    pub fn diagnostics(&self) -> String {
        format!(
            "project_root={} ({})\nstate_dir={}\nconfig_path={} ({})",
            normalize_for_display(&self.project_root),
            self.root_source.as_str(),
            normalize_for_display(&self.state_dir),
            normalize_for_display(&self.config_path),
            self.config_source.as_str(),
        )
    }
}

pub fn resolve_paths(
    context: &ResolutionContext,
    overrides: &PathOverrides,
) -> Result<ResolvedPaths> {
    resolve_paths_with_lookup(context, overrides, |key| env::var(key).ok())
}

fn resolve_paths_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: F,
) -> Result<ResolvedPaths>
where
    F: Fn(&str) -> Option<String>,
{
    let (project_root, root_source) = if let Some(path) = overrides.project_root.as_deref() {
        (absolutize(path, &context.cwd), ValueSource::Flag)
    } else if let Some(value) = non_empty(lookup_env(ENV_PROJECT_ROOT)) {
        (absolutize(Path::new(&value), &context.cwd), ValueSource::Env)
    } else {
        (context.cwd.clone(), ValueSource::Default)
    };

    let state_dir = project_root.join(STATE_DIR_NAME);
    let (config_path, config_source) = match overrides.config.as_deref() {
        Some(path) => (absolutize(path, &project_root), ValueSource::Flag),
        None => (state_dir.join(CONFIG_FILENAME), ValueSource::Default),
    };

    Ok(ResolvedPaths {
        project_root,
        state_dir,
        config_path,
        root_source,
        config_source,
    })
}

/// Command-line values that take precedence over the environment and the config file.
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub site: Option<String>,
    pub stopping_threshold: Option<usize>,
    pub override_file: Option<PathBuf>,
}

/// Everything a mirror run needs, resolved once before any remote call.
///
/// The API key is deliberately absent; it is loaded separately by [`load_api_key`] so that
/// printing settings never exposes it.
#[derive(Debug, Clone, Serialize)]
pub struct MirrorSettings {
    pub site: String,
    pub site_source: ValueSource,
    pub endpoint: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub api_key_path: PathBuf,
    pub mirror_root: PathBuf,
    pub override_path: PathBuf,
    pub stopping_threshold: usize,
    pub throttle_ms: u64,
    pub abort_on_attachment_error: bool,
}

impl MirrorSettings {
    pub fn layout(&self) -> MirrorLayout {
        MirrorLayout::new(&self.mirror_root)
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            stopping_threshold: self.stopping_threshold,
            throttle: Duration::from_millis(self.throttle_ms),
            abort_on_attachment_error: self.abort_on_attachment_error,
        }
    }

    pub fn client_config(&self, api_key: String) -> WikidotClientConfig {
        WikidotClientConfig {
            endpoint: self.endpoint.clone(),
            site: self.site.clone(),
            api_key,
            user_agent: self.user_agent.clone(),
            timeout_ms: self.timeout_ms,
        }
    }

    pub fn diagnostics(&self) -> String {
        format!(
            "site={} ({})\nendpoint={}\nmirror_root={}\napi_key_file={}\noverride_file={}\nstopping_threshold={}\nthrottle_ms={}\ntimeout_ms={}",
            self.site,
            self.site_source.as_str(),
            self.endpoint,
            normalize_for_display(&self.mirror_root),
            normalize_for_display(&self.api_key_path),
            normalize_for_display(&self.override_path),
            self.stopping_threshold,
            self.throttle_ms,
            self.timeout_ms,
        )
    }
}

pub fn resolve_settings(
    paths: &ResolvedPaths,
    config: &MirrorConfig,
    overrides: &SettingsOverrides,
) -> Result<MirrorSettings> {
    resolve_settings_with_lookup(paths, config, overrides, |key| env::var(key).ok())
}

fn resolve_settings_with_lookup<F>(
    paths: &ResolvedPaths,
    config: &MirrorConfig,
    overrides: &SettingsOverrides,
    lookup_env: F,
) -> Result<MirrorSettings>
where
    F: Fn(&str) -> Option<String>,
{
    let (site, site_source) = if let Some(site) = non_empty(overrides.site.clone()) {
        (site, ValueSource::Flag)
    } else if let Some(site) = non_empty(lookup_env(ENV_SITE)) {
        (site, ValueSource::Env)
    } else if let Some(site) = non_empty(config.site.name.clone()) {
        (site, ValueSource::Config)
    } else {
        bail!(
            "no site configured; pass --site, set {ENV_SITE}, or add `name` under [site] in {}",
            normalize_for_display(&paths.config_path)
        );
    };
    validate_site_name(&site)?;

    let endpoint =
        non_empty(lookup_env(ENV_ENDPOINT)).unwrap_or_else(|| config.endpoint().to_string());
    let user_agent =
        non_empty(lookup_env(ENV_USER_AGENT)).unwrap_or_else(|| config.user_agent().to_string());

    let stopping_threshold = match overrides.stopping_threshold {
        Some(value) => value,
        None => match non_empty(lookup_env(ENV_STOPPING_THRESHOLD)) {
            Some(value) => value
                .parse()
                .with_context(|| format!("{ENV_STOPPING_THRESHOLD} must be a number: {value}"))?,
            None => config.stopping_threshold(),
        },
    };
    let throttle_ms = match non_empty(lookup_env(ENV_THROTTLE_MS)) {
        Some(value) => value
            .parse()
            .with_context(|| format!("{ENV_THROTTLE_MS} must be a number: {value}"))?,
        None => config.throttle_ms(),
    };

    let root = &paths.project_root;
    let override_path = match overrides.override_file.as_deref() {
        Some(path) => absolutize(path, root),
        None => absolutize(Path::new(config.override_file()), root),
    };

    Ok(MirrorSettings {
        mirror_root: absolutize(Path::new(config.mirror_dir()), root).join(&site),
        api_key_path: absolutize(Path::new(config.api_key_file()), root),
        site,
        site_source,
        endpoint,
        user_agent,
        timeout_ms: config.timeout_ms(),
        override_path,
        stopping_threshold,
        throttle_ms,
        abort_on_attachment_error: config.abort_on_attachment_error(),
    })
}

/// API key from `WIKIDOT_API_KEY`, falling back to the configured key file.
pub fn load_api_key(settings: &MirrorSettings) -> Result<String> {
    load_api_key_with_lookup(settings, |key| env::var(key).ok())
}

fn load_api_key_with_lookup<F>(settings: &MirrorSettings, lookup_env: F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(key) = non_empty(lookup_env(ENV_API_KEY)) {
        return Ok(key);
    }
    read_api_key(&settings.api_key_path)
        .with_context(|| format!("no API key; set {ENV_API_KEY} or create the key file"))
}

/// Site names become both a URL user name and a directory name.
pub fn validate_site_name(site: &str) -> Result<()> {
    if site.is_empty() {
        bail!("site name must not be empty");
    }
    if !site
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '-')
    {
        bail!("invalid site name `{site}`: only ASCII letters, digits and `-` are allowed");
    }
    Ok(())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

pub fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
