use anyhow::{anyhow, Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use url::Url;

use crate::detect::PromptVariant;

const DEFAULT_API_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_MODEL: &str = "gpt-4o";
const DEFAULT_MAX_TOKENS: u32 = 4096;
const DEFAULT_IMAGE_DETAIL: &str = "high";
const DEFAULT_TIMEOUT_SECS: u64 = 120;
const DEFAULT_DELAY_MS: u64 = 1000;
const DEFAULT_IMAGES_DIR: &str = "test_images";
const DEFAULT_RESULTS_ROOT: &str = ".";
const DEFAULT_ENV_FILE: &str = ".env";
const IMAGE_DETAILS: &[&str] = &["low", "high", "auto"];

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct EvalConfigFile {
    api: Option<ApiConfigFile>,
    paths: Option<PathsConfigFile>,
    pacing: Option<PacingConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ApiConfigFile {
    url: Option<String>,
    key: Option<String>,
    model: Option<String>,
    max_tokens: Option<u32>,
    detail: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PathsConfigFile {
    images_dir: Option<PathBuf>,
    results_root: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PacingConfigFile {
    delay_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct EvalConfig {
    pub api: ApiSettings,
    pub images_dir: PathBuf,
    /// Directory holding the per-variant results directories.
    pub results_root: PathBuf,
    /// Pause between two consecutive model requests.
    pub request_delay: Duration,
}

/// Connection settings for the hosted chat completion endpoint.
#[derive(Clone)]
pub struct ApiSettings {
    pub url: String,
    pub key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    /// Image detail hint: low, high or auto.
    pub detail: String,
    pub timeout: Duration,
}

impl std::fmt::Debug for ApiSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiSettings")
            .field("url", &self.url)
            .field("key", &self.key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("detail", &self.detail)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ApiSettings {
    pub fn require_key(&self) -> Result<&str> {
        self.key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| anyhow!("OPENAI_API_KEY not set (environment, .env file or [api].key)"))
    }
}

impl EvalConfig {
    /// Defaults, then `CLUTTER_EVAL_CONFIG` (TOML), then `.env`, then environment.
    pub fn load() -> Result<Self> {
        let env_file = Path::new(DEFAULT_ENV_FILE);
        if env_file.is_file() {
            let applied = load_env_file(env_file)?;
            log::debug!("applied {} variables from {}", applied, env_file.display());
        }
        let config_path = std::env::var("CLUTTER_EVAL_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: EvalConfigFile) -> Self {
        let api_file = file.api.unwrap_or_default();
        let paths_file = file.paths.unwrap_or_default();
        let api = ApiSettings {
            url: api_file.url.unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            key: api_file.key,
            model: api_file.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            max_tokens: api_file.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            detail: api_file
                .detail
                .unwrap_or_else(|| DEFAULT_IMAGE_DETAIL.to_string()),
            timeout: Duration::from_secs(api_file.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
        };
        Self {
            api,
            images_dir: paths_file
                .images_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_IMAGES_DIR)),
            results_root: paths_file
                .results_root
                .unwrap_or_else(|| PathBuf::from(DEFAULT_RESULTS_ROOT)),
            request_delay: Duration::from_millis(
                file.pacing
                    .and_then(|pacing| pacing.delay_ms)
                    .unwrap_or(DEFAULT_DELAY_MS),
            ),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(key) = non_empty_env("OPENAI_API_KEY") {
            self.api.key = Some(key);
        }
        if let Some(url) = non_empty_env("CLUTTER_EVAL_API_URL") {
            self.api.url = url;
        }
        if let Some(model) = non_empty_env("CLUTTER_EVAL_MODEL") {
            self.api.model = model;
        }
        if let Some(dir) = non_empty_env("CLUTTER_EVAL_IMAGES_DIR") {
            self.images_dir = PathBuf::from(dir);
        }
        if let Some(dir) = non_empty_env("CLUTTER_EVAL_RESULTS_DIR") {
            self.results_root = PathBuf::from(dir);
        }
        if let Some(delay) = non_empty_env("CLUTTER_EVAL_DELAY_MS") {
            let millis: u64 = delay.trim().parse().map_err(|_| {
                anyhow!("CLUTTER_EVAL_DELAY_MS must be an integer number of milliseconds")
            })?;
            self.request_delay = Duration::from_millis(millis);
        }
        if let Some(timeout) = non_empty_env("CLUTTER_EVAL_TIMEOUT_SECS") {
            let seconds: u64 = timeout.trim().parse().map_err(|_| {
                anyhow!("CLUTTER_EVAL_TIMEOUT_SECS must be an integer number of seconds")
            })?;
            self.api.timeout = Duration::from_secs(seconds);
        }
        Ok(())
    }

    /// Checks settings that do not depend on the selected backend.
    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.api.url)
            .with_context(|| format!("invalid API url '{}'", self.api.url))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(anyhow!(
                "API url must use http or https, got '{}'",
                url.scheme()
            ));
        }
        if self.api.model.trim().is_empty() {
            return Err(anyhow!("model must not be empty"));
        }
        if self.api.max_tokens == 0 {
            return Err(anyhow!("max_tokens must be greater than zero"));
        }
        if !IMAGE_DETAILS.contains(&self.api.detail.as_str()) {
            return Err(anyhow!(
                "image detail must be one of {}, got '{}'",
                IMAGE_DETAILS.join("|"),
                self.api.detail
            ));
        }
        if self.api.timeout.is_zero() {
            return Err(anyhow!("request timeout must be greater than zero"));
        }
        Ok(())
    }

    /// Results directory for a prompt variant under the results root.
    pub fn results_dir_for(&self, variant: PromptVariant) -> PathBuf {
        self.results_root.join(variant.default_results_dir())
    }
}

fn read_config_file(path: &Path) -> Result<EvalConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn env_line_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\s*(?:export\s+)?([A-Za-z_][A-Za-z0-9_]*)\s*=\s*(.*?)\s*$")
            .expect("env line pattern is valid")
    })
}

/// Parse `KEY=VALUE` lines. Blank lines, `#` comments and lines that are not
/// assignments are skipped; one level of matching quotes is stripped.
pub fn parse_env_file(contents: &str) -> Vec<(String, String)> {
    contents
        .lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .filter_map(|line| env_line_pattern().captures(line))
        .map(|caps| (caps[1].to_string(), unquote(&caps[2]).to_string()))
        .collect()
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// Export variables from an env file. Variables already present in the
/// process environment win. Returns how many were set.
pub fn load_env_file(path: &Path) -> Result<usize> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read env file {}", path.display()))?;
    let mut applied = 0;
    for (key, value) in parse_env_file(&raw) {
        if std::env::var_os(&key).is_none() {
            std::env::set_var(&key, value);
            applied += 1;
        }
    }
    Ok(applied)
}
