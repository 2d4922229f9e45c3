use crate::error::{BridgeError, Result};
use crate::providers::ProviderKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "responses-bridge.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Serve every model through this provider instead of inferring from the name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderKind>,
    #[serde(default)]
    pub providers: HashMap<ProviderKind, ProviderSettings>,
    /// Requested model name → upstream model name.
    #[serde(default)]
    pub models: HashMap<String, String>,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditConfig {
    /// JSONL file receiving REQ/RES/REQ-RAW/RES-RAW records. Unset disables auditing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

fn default_port() -> u16 {
    4333
}

fn default_timeout_secs() -> u64 {
    300
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            provider: None,
            providers: HashMap::new(),
            models: HashMap::new(),
            audit: AuditConfig::default(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl BridgeConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Search standard locations for a config file, falling back to defaults
    /// when none exists. An explicit path must exist.
    /// Priority: CLI arg > CWD > XDG config > home dir
    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::load(path);
        }

        for candidate in &config_search_paths() {
            if candidate.exists() {
                tracing::info!(path = %candidate.display(), "Loading config");
                return Self::load(candidate);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Resolve the effective base URL (config override or provider preset default)
    pub fn effective_base_url(&self, kind: ProviderKind) -> String {
        self.providers
            .get(&kind)
            .and_then(|s| s.base_url.clone())
            .unwrap_or_else(|| kind.preset().base_url.to_string())
    }

    fn api_key_env(&self, kind: ProviderKind) -> Option<String> {
        self.providers
            .get(&kind)
            .and_then(|s| s.api_key_env.clone())
            .or_else(|| kind.preset().default_api_key_env.map(str::to_string))
    }

    /// Resolve the API key from the configured environment variable. `None`
    /// for providers that need no credentials.
    pub fn resolve_api_key(&self, kind: ProviderKind) -> Result<Option<String>> {
        let Some(var) = self.api_key_env(kind) else {
            return Ok(None);
        };
        std::env::var(&var).map(Some).map_err(|_| {
            BridgeError::config(format!(
                "Environment variable '{var}' not set. Set it with your {kind} API key."
            ))
        })
    }

    /// Upstream model name for a requested one.
    pub fn map_model<'a>(&'a self, model: &'a str) -> &'a str {
        self.models.get(model).map_or(model, String::as_str)
    }
}

pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // CWD
    paths.push(PathBuf::from(CONFIG_FILE_NAME));

    // XDG / platform config dir
    if cfg!(target_os = "macos") {
        if let Some(home) = dirs_path() {
            paths.push(
                home.join("Library")
                    .join("Application Support")
                    .join("responses-bridge")
                    .join("config.toml"),
            );
        }
    } else {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            paths.push(PathBuf::from(xdg).join("responses-bridge").join("config.toml"));
        }
        if let Some(home) = dirs_path() {
            paths.push(home.join(".config").join("responses-bridge").join("config.toml"));
        }
    }

    // Home directory fallback
    if let Some(home) = dirs_path() {
        paths.push(home.join(".responses-bridge.toml"));
    }

    paths
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(
            f,
            r#"
port = 5000
provider = "gemini"
timeout_secs = 60

[providers.ollama]
base_url = "http://gpu-box:11434"

[providers.openai]
api_key_env = "MY_OPENAI_KEY"

[models]
"fast" = "gpt-4o-mini"

[audit]
path = "/tmp/bridge-audit.jsonl"
"#
        )
        .unwrap();

        let config = BridgeConfig::load(f.path()).unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(config.provider, Some(ProviderKind::Google));
        assert_eq!(config.timeout_secs, 60);
        assert_eq!(config.map_model("fast"), "gpt-4o-mini");
        assert_eq!(config.map_model("gpt-4o"), "gpt-4o");
        assert_eq!(
            config.effective_base_url(ProviderKind::Ollama),
            "http://gpu-box:11434"
        );
        assert_eq!(
            config.api_key_env(ProviderKind::OpenAi).as_deref(),
            Some("MY_OPENAI_KEY")
        );
        assert_eq!(
            config.audit.path.as_deref(),
            Some(Path::new("/tmp/bridge-audit.jsonl"))
        );
    }

    #[test]
    fn test_defaults() {
        let config: BridgeConfig = toml::from_str("").unwrap();
        assert_eq!(config.port, 4333);
        assert!(config.provider.is_none());
        assert_eq!(
            config.effective_base_url(ProviderKind::OpenAi),
            "https://api.openai.com/v1"
        );
        assert_eq!(
            config.api_key_env(ProviderKind::Anthropic).as_deref(),
            Some("ANTHROPIC_API_KEY")
        );
    }

    #[test]
    fn test_ollama_needs_no_key() {
        let config = BridgeConfig::default();
        assert_eq!(config.resolve_api_key(ProviderKind::Ollama).unwrap(), None);
    }

    #[test]
    fn test_missing_key_is_config_error() {
        let mut config = BridgeConfig::default();
        config.providers.insert(
            ProviderKind::OpenAi,
            ProviderSettings {
                base_url: None,
                api_key_env: Some("RESPONSES_BRIDGE_TEST_UNSET_KEY".to_string()),
            },
        );
        assert!(matches!(
            config.resolve_api_key(ProviderKind::OpenAi),
            Err(BridgeError::Config { .. })
        ));
    }
}
