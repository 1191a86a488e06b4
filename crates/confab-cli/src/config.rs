use anyhow::{Context, Result, anyhow};
use clap::ValueEnum;
use confab_core::providers::{anthropic, google, openai, openai_compat};
use confab_core::{
    AnthropicConfig, AnthropicProvider, CompletionProvider, GoogleConfig, GoogleProvider,
    OpenAiCompatConfig, OpenAiCompatProvider, OpenAiConfig, OpenAiProvider,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

/// Template written by `confab init` and used when no config file exists
pub const DEFAULT_CONFIG: &str = include_str!("../../../config/default.toml");

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfabConfig {
    #[serde(default)]
    pub defaults: DefaultsConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

/// Which adapter to build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Openai,
    Anthropic,
    Google,
    Local,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Openai => "openai",
            Self::Anthropic => "anthropic",
            Self::Google => "google",
            Self::Local => "local",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    #[serde(default = "default_provider")]
    pub provider: ProviderKind,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_provider() -> ProviderKind {
    ProviderKind::Openai
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub openai: Option<OpenAiProviderConfig>,
    #[serde(default)]
    pub anthropic: Option<AnthropicProviderConfig>,
    #[serde(default)]
    pub google: Option<GoogleProviderConfig>,
    #[serde(default)]
    pub local: Option<LocalProviderConfig>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct OpenAiProviderConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_openai_model")]
    pub model: String,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl std::fmt::Debug for OpenAiProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProviderConfig")
            .field("api_key", &mask_secret(&self.api_key))
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("organization", &self.organization)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Default for OpenAiProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_openai_model(),
            base_url: default_openai_base_url(),
            organization: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_openai_model() -> String {
    openai::DEFAULT_MODEL.to_string()
}
fn default_openai_base_url() -> String {
    openai::DEFAULT_BASE_URL.to_string()
}

#[derive(Clone, Serialize, Deserialize)]
pub struct AnthropicProviderConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_anthropic_model")]
    pub model: String,
    #[serde(default = "default_anthropic_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl std::fmt::Debug for AnthropicProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicProviderConfig")
            .field("api_key", &mask_secret(&self.api_key))
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Default for AnthropicProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_anthropic_model(),
            base_url: default_anthropic_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_anthropic_model() -> String {
    anthropic::DEFAULT_MODEL.to_string()
}
fn default_anthropic_base_url() -> String {
    anthropic::DEFAULT_BASE_URL.to_string()
}

#[derive(Clone, Serialize, Deserialize)]
pub struct GoogleProviderConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_google_model")]
    pub model: String,
    #[serde(default = "default_google_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl std::fmt::Debug for GoogleProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleProviderConfig")
            .field("api_key", &mask_secret(&self.api_key))
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Default for GoogleProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_google_model(),
            base_url: default_google_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_google_model() -> String {
    google::DEFAULT_MODEL.to_string()
}
fn default_google_base_url() -> String {
    google::DEFAULT_BASE_URL.to_string()
}

/// Any OpenAI-compatible server (Ollama, vLLM, LM Studio)
#[derive(Clone, Serialize, Deserialize)]
pub struct LocalProviderConfig {
    #[serde(default = "default_local_name")]
    pub name: String,
    #[serde(default = "default_local_api_key")]
    pub api_key: String,
    #[serde(default = "default_local_model")]
    pub model: String,
    #[serde(default = "default_local_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub allow_system: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl std::fmt::Debug for LocalProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalProviderConfig")
            .field("name", &self.name)
            .field("api_key", &mask_secret(&self.api_key))
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("allow_system", &self.allow_system)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Default for LocalProviderConfig {
    fn default() -> Self {
        Self {
            name: default_local_name(),
            api_key: default_local_api_key(),
            model: default_local_model(),
            base_url: default_local_base_url(),
            allow_system: false,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_local_name() -> String {
    openai_compat::DEFAULT_NAME.to_string()
}
fn default_local_api_key() -> String {
    openai_compat::DEFAULT_API_KEY.to_string()
}
fn default_local_model() -> String {
    openai_compat::DEFAULT_MODEL.to_string()
}
fn default_local_base_url() -> String {
    openai_compat::DEFAULT_BASE_URL.to_string()
}

/// Mask a secret string for safe display in Debug output / logs.
/// Shows first 3 and last 4 chars for keys longer than 7 chars, otherwise "***".
fn mask_secret(s: &str) -> String {
    if s.is_empty() {
        return "(empty)".to_string();
    }
    let chars: Vec<char> = s.chars().collect();
    if chars.len() > 7 {
        let prefix: String = chars[..3].iter().collect();
        let suffix: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", prefix, suffix)
    } else {
        "***".to_string()
    }
}

pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".confab")
}

impl ConfabConfig {
    /// Load `~/.confab/config.toml` (or `custom_path`)
    ///
    /// A missing default file falls back to the built-in template so that
    /// environment-only setups work without `confab init`. An explicit path must exist.
    pub fn load(custom_path: &Option<PathBuf>) -> Result<Self> {
        let path = custom_path
            .clone()
            .unwrap_or_else(|| config_dir().join("config.toml"));

        if custom_path.is_none() && !path.exists() {
            debug!(
                "No config at {}, using built-in defaults",
                path.display()
            );
            return Self::parse(DEFAULT_CONFIG)
                .context("Failed to parse built-in default config");
        }

        // Group/other readable files may leak keys
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Ok(metadata) = std::fs::metadata(&path) {
                let mode = metadata.permissions().mode();
                if mode & 0o077 != 0 {
                    return Err(anyhow!(
                        "Config file {:?} has overly permissive permissions ({:o}). \
                         It may contain secrets. Fix with: chmod 600 {:?}",
                        path,
                        mode & 0o777,
                        path
                    ));
                }
            }
        }

        let content = std::fs::read_to_string(&path).with_context(|| {
            format!(
                "Failed to read config at {}. Run `confab init` first.",
                path.display()
            )
        })?;

        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config at {}", path.display()))?;
        config.warn_hardcoded_keys(&content);

        Ok(config)
    }

    /// Expand allowlisted env vars, then parse TOML
    pub fn parse(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        Ok(toml::from_str(&expanded)?)
    }

    fn warn_hardcoded_keys(&self, raw: &str) {
        let providers = &self.providers;
        let keys = [
            (providers.openai.as_ref().map(|c| &c.api_key), openai::API_KEY_ENV_VAR),
            (providers.anthropic.as_ref().map(|c| &c.api_key), anthropic::API_KEY_ENV_VAR),
            (providers.google.as_ref().map(|c| &c.api_key), google::API_KEY_ENV_VAR),
        ];
        for (key, env_var) in keys {
            let Some(key) = key.filter(|k| !k.is_empty()) else {
                continue;
            };
            // Expanded values never appear literally in the raw file
            if raw.contains(&format!("\"{}\"", key)) {
                warn!(
                    "API key is hardcoded in config file. For security, use environment variables: api_key = \"${{{}}}\"",
                    env_var
                );
            }
        }
    }

    /// Copy with every API key masked, for display
    pub fn redacted(&self) -> Self {
        let mut cfg = self.clone();
        if let Some(c) = cfg.providers.openai.as_mut() {
            c.api_key = mask_secret(&c.api_key);
        }
        if let Some(c) = cfg.providers.anthropic.as_mut() {
            c.api_key = mask_secret(&c.api_key);
        }
        if let Some(c) = cfg.providers.google.as_mut() {
            c.api_key = mask_secret(&c.api_key);
        }
        if let Some(c) = cfg.providers.local.as_mut() {
            c.api_key = mask_secret(&c.api_key);
        }
        cfg
    }

    /// Build the adapter for `kind`
    ///
    /// A missing section uses that adapter's defaults, with the key taken from
    /// the vendor's usual environment variable.
    pub fn build_provider(&self, kind: ProviderKind) -> Result<Box<dyn CompletionProvider>> {
        let provider: Box<dyn CompletionProvider> = match kind {
            ProviderKind::Openai => {
                let c = self.providers.openai.clone().unwrap_or_else(|| OpenAiProviderConfig {
                    api_key: std::env::var(openai::API_KEY_ENV_VAR).unwrap_or_default(),
                    ..Default::default()
                });
                let mut config = OpenAiConfig::new(c.api_key)
                    .with_model(c.model)
                    .with_base_url(c.base_url)
                    .with_timeout(Duration::from_secs(c.timeout_secs));
                if let Some(org) = c.organization {
                    config = config.with_organization(org);
                }
                Box::new(OpenAiProvider::new(config)?)
            }
            ProviderKind::Anthropic => {
                let c = self.providers.anthropic.clone().unwrap_or_else(|| AnthropicProviderConfig {
                    api_key: std::env::var(anthropic::API_KEY_ENV_VAR).unwrap_or_default(),
                    ..Default::default()
                });
                Box::new(AnthropicProvider::new(
                    AnthropicConfig::new(c.api_key)
                        .with_model(c.model)
                        .with_base_url(c.base_url)
                        .with_timeout(Duration::from_secs(c.timeout_secs)),
                )?)
            }
            ProviderKind::Google => {
                let c = self.providers.google.clone().unwrap_or_else(|| GoogleProviderConfig {
                    api_key: std::env::var(google::API_KEY_ENV_VAR).unwrap_or_default(),
                    ..Default::default()
                });
                Box::new(GoogleProvider::new(
                    GoogleConfig::new(c.api_key)
                        .with_model(c.model)
                        .with_base_url(c.base_url)
                        .with_timeout(Duration::from_secs(c.timeout_secs)),
                )?)
            }
            ProviderKind::Local => {
                let c = self.providers.local.clone().unwrap_or_default();
                Box::new(OpenAiCompatProvider::new(OpenAiCompatConfig {
                    name: c.name,
                    api_key: c.api_key,
                    model: c.model,
                    base_url: c.base_url,
                    allow_system: c.allow_system,
                    timeout: Duration::from_secs(c.timeout_secs),
                })?)
            }
        };

        debug!(
            "Built {} provider (model {})",
            provider.provider_name(),
            provider.model()
        );
        Ok(provider)
    }
}

/// Allowlist of environment variable names that may be expanded in config files.
/// This prevents an attacker who can modify the config from reading arbitrary env vars.
const ALLOWED_ENV_VARS: &[&str] = &[
    "OPENAI_API_KEY",
    "ANTHROPIC_API_KEY",
    "GEMINI_API_KEY",
    "LOCAL_LLM_API_KEY",
    "HOME",
    "USER",
];

fn expand_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    let mut pos = 0;
    while pos < result.len() {
        let Some(start) = result[pos..].find("${") else {
            break;
        };
        let abs_start = pos + start;
        let Some(end) = result[abs_start..].find('}') else {
            break;
        };
        let var_name = result[abs_start + 2..abs_start + end].to_string();

        if !ALLOWED_ENV_VARS.contains(&var_name.as_str()) {
            warn!(
                "Skipping expansion of unrecognized env var '{}' in config (not in allowlist)",
                var_name
            );
            // Leave ${VAR} in place so it's obvious
            pos = abs_start + end + 1;
            continue;
        }

        let value = std::env::var(&var_name).unwrap_or_default();
        result = format!(
            "{}{}{}",
            &result[..abs_start],
            value,
            &result[abs_start + end + 1..]
        );
        pos = abs_start + value.len();
    }
    result
}
