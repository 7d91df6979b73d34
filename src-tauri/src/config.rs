use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::doc_processor::OcrConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Which hosted API the generation model is reached through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Claude,
    OpenAi,
    Ollama,
}

impl ProviderKind {
    pub fn default_base_url(self) -> &'static str {
        match self {
            ProviderKind::Claude => "https://api.anthropic.com",
            ProviderKind::OpenAi => "https://api.openai.com/v1",
            ProviderKind::Ollama => "http://localhost:11434",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Claude => "claude",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Ollama => "ollama",
        }
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "claude" | "anthropic" => Ok(ProviderKind::Claude),
            "openai" => Ok(ProviderKind::OpenAi),
            "ollama" => Ok(ProviderKind::Ollama),
            other => Err(format!("unknown provider '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub provider: ProviderKind,
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: Option<f32>,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub max_attempts: usize,
}

#[derive(Debug, Clone)]
pub struct EmbeddingSettings {
    /// Empty means retrieval runs on the keyword fallback only.
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub max_attempts: usize,
}

#[derive(Debug, Clone)]
pub struct RetrievalSettings {
    pub similarity_threshold: f32,
    pub top_k: usize,
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub db_path: Option<PathBuf>,
    pub ttl: Duration,
    pub max_entries: usize,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub data_dir: PathBuf,
    pub analysis_min_chars: usize,
    pub llm: LlmSettings,
    pub embedding: EmbeddingSettings,
    pub retrieval: RetrievalSettings,
    pub sessions: SessionSettings,
    pub ocr: OcrConfig,
}

const SECRET_KEYS: &[&str] = &["llm_api_key", "embedding_api_key"];

impl AppConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let provider: ProviderKind = parse_or(&get, "LLM_PROVIDER", ProviderKind::Claude)?;
        let provider_key = match provider {
            ProviderKind::Claude => get("ANTHROPIC_API_KEY"),
            ProviderKind::OpenAi => get("OPENAI_API_KEY"),
            ProviderKind::Ollama => None,
        };
        let default_model = match provider {
            ProviderKind::Claude => "claude-3-5-sonnet-20240620",
            ProviderKind::OpenAi => "gpt-4o",
            ProviderKind::Ollama => "llama3",
        };

        let llm = LlmSettings {
            provider,
            api_key: get("LLM_API_KEY").or(provider_key).unwrap_or_default(),
            base_url: get("LLM_BASE_URL")
                .unwrap_or_else(|| provider.default_base_url().to_string()),
            model: get("LLM_MODEL").unwrap_or_else(|| default_model.to_string()),
            temperature: Some(parse_or(&get, "LLM_TEMPERATURE", 0.2_f32)?),
            connect_timeout: Duration::from_secs(parse_or(&get, "LLM_CONNECT_TIMEOUT_SECS", 60)?),
            read_timeout: Duration::from_secs(parse_or(&get, "LLM_READ_TIMEOUT_SECS", 120)?),
            max_attempts: positive(&get, "LLM_MAX_ATTEMPTS", 3)?,
        };

        let embedding = EmbeddingSettings {
            api_key: get("EMBEDDING_API_KEY")
                .or_else(|| get("OPENAI_API_KEY"))
                .unwrap_or_default(),
            base_url: get("EMBEDDING_BASE_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            model: get("EMBEDDING_MODEL").unwrap_or_else(|| "text-embedding-3-small".to_string()),
            connect_timeout: llm.connect_timeout,
            read_timeout: llm.read_timeout,
            max_attempts: llm.max_attempts,
        };

        let similarity_threshold: f32 = parse_or(&get, "RETRIEVAL_THRESHOLD", 0.5)?;
        if !(-1.0..=1.0).contains(&similarity_threshold) {
            return Err(ConfigError::Invalid {
                key: "RETRIEVAL_THRESHOLD",
                value: similarity_threshold.to_string(),
                reason: "must be within [-1, 1]".into(),
            });
        }

        let languages = get("OCR_LANGUAGES")
            .map(|raw| {
                raw.split(',')
                    .map(|l| l.trim().to_string())
                    .filter(|l| !l.is_empty())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_else(|| vec!["spa".to_string(), "eng".to_string()]);

        let analysis_min_chars = parse_or(&get, "ANALYSIS_MIN_CHARS", 50)?;

        Ok(AppConfig {
            bind_addr: parse_or(&get, "ENERGYWISE_BIND", SocketAddr::from(([127, 0, 0, 1], 5000)))?,
            upload_dir: get("UPLOAD_FOLDER").unwrap_or_else(|| "uploads".into()).into(),
            max_upload_bytes: positive(&get, "MAX_CONTENT_LENGTH", 16 * 1024 * 1024)?,
            data_dir: get("KNOWLEDGE_DATA_DIR").unwrap_or_else(|| "data".into()).into(),
            analysis_min_chars,
            llm,
            embedding,
            retrieval: RetrievalSettings {
                similarity_threshold,
                top_k: positive(&get, "RETRIEVAL_TOP_K", 3)?,
            },
            sessions: SessionSettings {
                db_path: get("SESSION_DB_PATH").map(PathBuf::from),
                ttl: Duration::from_secs(parse_or(&get, "SESSION_TTL_SECS", 3600)?),
                max_entries: positive(&get, "SESSION_MAX_ENTRIES", 1000)?,
            },
            ocr: OcrConfig {
                tesseract_path: get("TESSERACT_PATH").unwrap_or_else(|| "tesseract".into()),
                pdftoppm_path: get("PDFTOPPM_PATH").unwrap_or_else(|| "pdftoppm".into()),
                languages,
                min_chars: parse_or(&get, "OCR_MIN_CHARS", 10)?,
                dpi: parse_or(&get, "OCR_DPI", 300)?,
                prefer_text_layer: parse_or(&get, "PDF_TEXT_LAYER", true)?,
                text_layer_min_chars: analysis_min_chars,
            },
        })
    }

    /// Effective settings for display, with API keys masked.
    pub fn redacted(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        let mut put = |key: &str, value: String| {
            let value = if SECRET_KEYS.contains(&key) {
                mask_secret(&value)
            } else {
                value
            };
            map.insert(key.to_string(), value);
        };

        put("bind_addr", self.bind_addr.to_string());
        put("upload_dir", self.upload_dir.display().to_string());
        put("max_upload_bytes", self.max_upload_bytes.to_string());
        put("data_dir", self.data_dir.display().to_string());
        put("analysis_min_chars", self.analysis_min_chars.to_string());
        put("llm_provider", self.llm.provider.as_str().to_string());
        put("llm_api_key", self.llm.api_key.clone());
        put("llm_base_url", self.llm.base_url.clone());
        put("llm_model", self.llm.model.clone());
        put("llm_max_attempts", self.llm.max_attempts.to_string());
        put("embedding_api_key", self.embedding.api_key.clone());
        put("embedding_base_url", self.embedding.base_url.clone());
        put("embedding_model", self.embedding.model.clone());
        put(
            "retrieval_threshold",
            self.retrieval.similarity_threshold.to_string(),
        );
        put("retrieval_top_k", self.retrieval.top_k.to_string());
        put("session_ttl_secs", self.sessions.ttl.as_secs().to_string());
        put("session_max_entries", self.sessions.max_entries.to_string());
        put("ocr_languages", self.ocr.languages.join(","));
        map
    }
}

/// Mask API keys for display
fn mask_secret(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.is_empty() {
        String::new()
    } else if chars.len() > 8 {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", head, tail)
    } else {
        "****".to_string()
    }
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

fn positive<G>(get: &G, key: &'static str, default: usize) -> Result<usize, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let value = parse_or(get, key, default)?;
    if value == 0 {
        return Err(ConfigError::Invalid {
            key,
            value: "0".into(),
            reason: "must be greater than zero".into(),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.llm.provider, ProviderKind::Claude);
        assert_eq!(config.llm.base_url, "https://api.anthropic.com");
        assert_eq!(config.max_upload_bytes, 16 * 1024 * 1024);
        assert_eq!(config.analysis_min_chars, 50);
        assert_eq!(config.ocr.min_chars, 10);
        assert_eq!(config.ocr.languages, vec!["spa", "eng"]);
        assert!((config.retrieval.similarity_threshold - 0.5).abs() < f32::EPSILON);
        assert_eq!(config.retrieval.top_k, 3);
        assert!(config.embedding.api_key.is_empty());
        assert_eq!(config.embedding.connect_timeout, Duration::from_secs(60));
        assert_eq!(config.embedding.read_timeout, Duration::from_secs(120));
        assert_eq!(config.embedding.max_attempts, 3);
    }

    #[test]
    fn test_provider_key_fallback() {
        let config = load(&[("LLM_PROVIDER", "openai"), ("OPENAI_API_KEY", "sk-test")]).unwrap();
        assert_eq!(config.llm.provider, ProviderKind::OpenAi);
        assert_eq!(config.llm.api_key, "sk-test");
        assert_eq!(config.embedding.api_key, "sk-test");
        assert_eq!(config.llm.model, "gpt-4o");
    }

    #[test]
    fn test_invalid_value_names_variable() {
        let err = load(&[("SESSION_MAX_ENTRIES", "lots")]).unwrap_err();
        assert!(err.to_string().contains("SESSION_MAX_ENTRIES"));

        let err = load(&[("RETRIEVAL_TOP_K", "0")]).unwrap_err();
        assert!(err.to_string().contains("greater than zero"));

        let err = load(&[("RETRIEVAL_THRESHOLD", "1.5")]).unwrap_err();
        assert!(err.to_string().contains("RETRIEVAL_THRESHOLD"));
    }

    #[test]
    fn test_redacted_masks_keys() {
        let config = load(&[("LLM_API_KEY", "sk-ant-1234567890abcd")]).unwrap();
        let shown = config.redacted();
        assert_eq!(shown["llm_api_key"], "sk-a...abcd");
        assert_eq!(shown["embedding_api_key"], "");
        assert_eq!(shown["llm_provider"], "claude");
    }
}
