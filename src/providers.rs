//! Built-in presets for the four supported backends.
//!
//! Each preset defines the default base URL and the environment variable holding
//! the API key. The model-prefix table decides which backend serves a model when
//! no provider was configured explicitly.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[serde(alias = "open_ai")]
    OpenAi,
    Anthropic,
    #[serde(alias = "gemini")]
    Google,
    Ollama,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::OpenAi,
        ProviderKind::Anthropic,
        ProviderKind::Google,
        ProviderKind::Ollama,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Google => "google",
            Self::Ollama => "ollama",
        }
    }

    #[must_use]
    pub fn preset(self) -> &'static ProviderPreset {
        match self {
            Self::OpenAi => &PRESETS[0],
            Self::Anthropic => &PRESETS[1],
            Self::Google => &PRESETS[2],
            Self::Ollama => &PRESETS[3],
        }
    }

    /// Infer the backend from a model name using the prefix table.
    #[must_use]
    pub fn infer_from_model(model: &str) -> Option<Self> {
        let lower = model.to_ascii_lowercase();
        // Ollama tags look like `llama3.1:8b`
        if lower.contains(':') {
            return Some(Self::Ollama);
        }
        MODEL_PREFIXES
            .iter()
            .find(|(prefix, _)| lower.starts_with(prefix))
            .map(|(_, kind)| *kind)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openai" | "open_ai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "google" | "gemini" => Ok(Self::Google),
            "ollama" => Ok(Self::Ollama),
            other => Err(format!(
                "unknown provider '{other}'. Known providers: openai, anthropic, google, ollama"
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProviderPreset {
    pub kind: ProviderKind,
    pub base_url: &'static str,
    /// `None` for backends that take no credentials.
    pub default_api_key_env: Option<&'static str>,
}

static PRESETS: [ProviderPreset; 4] = [
    ProviderPreset {
        kind: ProviderKind::OpenAi,
        base_url: "https://api.openai.com/v1",
        default_api_key_env: Some("OPENAI_API_KEY"),
    },
    ProviderPreset {
        kind: ProviderKind::Anthropic,
        base_url: "https://api.anthropic.com",
        default_api_key_env: Some("ANTHROPIC_API_KEY"),
    },
    ProviderPreset {
        kind: ProviderKind::Google,
        base_url: "https://generativelanguage.googleapis.com/v1beta",
        default_api_key_env: Some("GEMINI_API_KEY"),
    },
    ProviderPreset {
        kind: ProviderKind::Ollama,
        base_url: "http://localhost:11434",
        default_api_key_env: None,
    },
];

const MODEL_PREFIXES: &[(&str, ProviderKind)] = &[
    ("gpt-", ProviderKind::OpenAi),
    ("chatgpt-", ProviderKind::OpenAi),
    ("o1", ProviderKind::OpenAi),
    ("o3", ProviderKind::OpenAi),
    ("o4", ProviderKind::OpenAi),
    ("text-", ProviderKind::OpenAi),
    ("claude-", ProviderKind::Anthropic),
    ("gemini-", ProviderKind::Google),
    ("llama", ProviderKind::Ollama),
    ("qwen", ProviderKind::Ollama),
    ("mistral", ProviderKind::Ollama),
    ("phi", ProviderKind::Ollama),
    ("gemma", ProviderKind::Ollama),
    ("deepseek", ProviderKind::Ollama),
];

impl ProviderPreset {
    #[must_use]
    pub fn from_name(name: &str) -> Option<&'static ProviderPreset> {
        name.parse::<ProviderKind>().ok().map(ProviderKind::preset)
    }

    #[must_use]
    pub fn all() -> &'static [ProviderPreset] {
        &PRESETS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_providers() {
        assert!(ProviderPreset::from_name("openai").is_some());
        assert!(ProviderPreset::from_name("Gemini").is_some()); // alias, case-insensitive
        assert!(ProviderPreset::from_name("unknown_provider").is_none());
    }

    #[test]
    fn test_presets_line_up_with_kinds() {
        for kind in ProviderKind::ALL {
            assert_eq!(kind.preset().kind, kind);
        }
        assert!(ProviderKind::Ollama.preset().default_api_key_env.is_none());
    }

    #[test]
    fn test_infer_from_model() {
        assert_eq!(ProviderKind::infer_from_model("gpt-4o"), Some(ProviderKind::OpenAi));
        assert_eq!(ProviderKind::infer_from_model("o3-mini"), Some(ProviderKind::OpenAi));
        assert_eq!(
            ProviderKind::infer_from_model("claude-3-5-sonnet-20241022"),
            Some(ProviderKind::Anthropic)
        );
        assert_eq!(
            ProviderKind::infer_from_model("gemini-2.0-flash"),
            Some(ProviderKind::Google)
        );
        assert_eq!(ProviderKind::infer_from_model("llama3.1"), Some(ProviderKind::Ollama));
        assert_eq!(
            ProviderKind::infer_from_model("my-finetune:latest"),
            Some(ProviderKind::Ollama)
        );
        assert_eq!(ProviderKind::infer_from_model("mystery-model"), None);
    }

    #[test]
    fn test_serde_names() {
        let kind: ProviderKind = serde_json::from_str("\"openai\"").unwrap();
        assert_eq!(kind, ProviderKind::OpenAi);
        assert_eq!(serde_json::to_string(&ProviderKind::Google).unwrap(), "\"google\"");
    }
}
