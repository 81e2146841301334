use crate::error::ConfigError;
use crate::models::{ChunkingOptions, GenerationParams, SearchStrategy};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PREFIX: &str = "PDF_BOT_";
pub const CONFIG_PATH_ENV: &str = "CONFIG_PATH";
pub const DEFAULT_CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Quantization {
    #[serde(rename = "none")]
    None,
    #[serde(rename = "8bit")]
    Int8,
    #[serde(rename = "4bit")]
    Int4,
}

impl Quantization {
    fn tag_suffix(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Int8 => Some("q8_0"),
            Self::Int4 => Some("q4_0"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingBackend {
    Ollama,
    Ngram,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SearchType {
    Similarity,
    Mmr,
    SimilarityScoreThreshold,
}

/// Process-wide options, fixed once loaded and handed to each component.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub model_name: String,
    pub quantization: Quantization,
    pub embedding_backend: EmbeddingBackend,
    pub embedding_model: String,
    pub embedding_dimensions: usize,
    pub llm_endpoint: String,
    pub request_timeout_secs: u64,

    pub max_length: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub repetition_penalty: f32,

    pub chunk_size: usize,
    pub chunk_overlap: usize,

    pub retriever_k: usize,
    pub search_type: SearchType,
    pub fetch_k: usize,
    pub lambda_mult: f32,
    pub score_threshold: f32,
    pub return_source_docs: bool,

    pub pdf_dir: PathBuf,
    pub vector_store_dir: PathBuf,
    pub model_cache_dir: PathBuf,

    pub log_level: String,
    pub log_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model_name: "llama2:7b-chat".to_string(),
            quantization: Quantization::Int8,
            embedding_backend: EmbeddingBackend::Ollama,
            embedding_model: "all-minilm".to_string(),
            embedding_dimensions: crate::embeddings::DEFAULT_EMBEDDING_DIMENSIONS,
            llm_endpoint: "http://localhost:11434".to_string(),
            request_timeout_secs: 300,
            max_length: 512,
            temperature: 0.7,
            top_p: 0.95,
            repetition_penalty: 1.15,
            chunk_size: 1_000,
            chunk_overlap: 200,
            retriever_k: 3,
            search_type: SearchType::Similarity,
            fetch_k: 20,
            lambda_mult: 0.5,
            score_threshold: 0.0,
            return_source_docs: true,
            pdf_dir: PathBuf::from("./data/pdf_specs"),
            vector_store_dir: PathBuf::from("./data/vector_store"),
            model_cache_dir: PathBuf::from("./models"),
            log_level: "INFO".to_string(),
            log_dir: PathBuf::from("logs"),
        }
    }
}

/// Values supplied on the command line; they win over every other layer.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub pdf_dir: Option<PathBuf>,
    pub vector_store_dir: Option<PathBuf>,
    pub chunk_size: Option<usize>,
    pub chunk_overlap: Option<usize>,
}

impl Settings {
    /// Loads `.env`, then layers the config file and `PDF_BOT_*` variables
    /// over the defaults. An explicit `config_path` must exist; otherwise
    /// `$CONFIG_PATH` (or `config.json`) is used only when present.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let file = match config_path {
            Some(path) => Some(path.to_path_buf()),
            None => {
                let candidate = std::env::var(CONFIG_PATH_ENV)
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));
                candidate.exists().then_some(candidate)
            }
        };

        let env = std::env::vars_os()
            .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)));
        Self::from_sources(file.as_deref(), env)
    }

    pub fn from_sources<I>(file: Option<&Path>, env: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut layered = match serde_json::to_value(Settings::default())? {
            Value::Object(map) => map,
            _ => return Err(ConfigError::Invalid("defaults are not a map".to_string())),
        };

        if let Some(path) = file {
            let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            match serde_json::from_str::<Value>(&raw)? {
                Value::Object(overlay) => layered.extend(overlay),
                _ => {
                    return Err(ConfigError::Invalid(format!(
                        "{} must contain a JSON object",
                        path.display()
                    )))
                }
            }
        }

        apply_env(&mut layered, env);

        let settings: Settings = serde_json::from_value(Value::Object(layered))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn with_overrides(mut self, overrides: Overrides) -> Result<Self, ConfigError> {
        if let Some(pdf_dir) = overrides.pdf_dir {
            self.pdf_dir = pdf_dir;
        }
        if let Some(vector_store_dir) = overrides.vector_store_dir {
            self.vector_store_dir = vector_store_dir;
        }
        if let Some(chunk_size) = overrides.chunk_size {
            self.chunk_size = chunk_size;
        }
        if let Some(chunk_overlap) = overrides.chunk_overlap {
            self.chunk_overlap = chunk_overlap;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| Err(ConfigError::Invalid(message));

        if self.chunk_size == 0 {
            return invalid("chunk_size must be greater than zero".to_string());
        }
        if self.chunk_overlap >= self.chunk_size {
            return invalid(format!(
                "chunk_overlap {} must be smaller than chunk_size {}",
                self.chunk_overlap, self.chunk_size
            ));
        }
        if self.retriever_k == 0 {
            return invalid("retriever_k must be at least 1".to_string());
        }
        if self.fetch_k < self.retriever_k {
            return invalid(format!(
                "fetch_k {} must not be smaller than retriever_k {}",
                self.fetch_k, self.retriever_k
            ));
        }
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return invalid(format!("top_p {} must be in (0, 1]", self.top_p));
        }
        if !(self.temperature >= 0.0) {
            return invalid(format!("temperature {} must not be negative", self.temperature));
        }
        if !(self.repetition_penalty > 0.0) {
            return invalid(format!(
                "repetition_penalty {} must be positive",
                self.repetition_penalty
            ));
        }
        if !(0.0..=1.0).contains(&self.lambda_mult) {
            return invalid(format!("lambda_mult {} must be in [0, 1]", self.lambda_mult));
        }
        if self.embedding_dimensions == 0 {
            return invalid("embedding_dimensions must be greater than zero".to_string());
        }
        if self.max_length == 0 {
            return invalid("max_length must be greater than zero".to_string());
        }
        if let Err(error) = url::Url::parse(&self.llm_endpoint) {
            return invalid(format!("llm_endpoint {:?}: {error}", self.llm_endpoint));
        }
        if log_directive(&self.log_level).is_none() {
            return invalid(format!("unknown log_level {:?}", self.log_level));
        }
        Ok(())
    }

    pub fn chunking_options(&self) -> ChunkingOptions {
        ChunkingOptions {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
        }
    }

    pub fn generation_params(&self) -> GenerationParams {
        GenerationParams {
            max_length: self.max_length,
            temperature: self.temperature,
            top_p: self.top_p,
            repetition_penalty: self.repetition_penalty,
        }
    }

    pub fn search_strategy(&self) -> SearchStrategy {
        match self.search_type {
            SearchType::Similarity => SearchStrategy::Similarity,
            SearchType::Mmr => SearchStrategy::Mmr {
                fetch_k: self.fetch_k,
                lambda: self.lambda_mult,
            },
            SearchType::SimilarityScoreThreshold => SearchStrategy::SimilarityScoreThreshold {
                threshold: self.score_threshold,
            },
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Model reference sent to the inference server. The quantization
    /// choice becomes a tag suffix unless the name already pins one.
    pub fn resolved_model_name(&self) -> String {
        let Some(suffix) = self.quantization.tag_suffix() else {
            return self.model_name.clone();
        };

        match self.model_name.split_once(':') {
            Some((_, tag)) if has_quantization_tag(tag) => self.model_name.clone(),
            Some(_) => format!("{}-{suffix}", self.model_name),
            None => format!("{}:{suffix}", self.model_name),
        }
    }

    /// `tracing` filter directive for the configured `log_level`.
    pub fn log_filter(&self) -> &'static str {
        log_directive(&self.log_level).unwrap_or("info")
    }

    pub fn ensure_directories(&self) -> std::io::Result<()> {
        for dir in [&self.pdf_dir, &self.vector_store_dir, &self.model_cache_dir] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

fn apply_env<I>(layered: &mut Map<String, Value>, env: I)
where
    I: IntoIterator<Item = (String, String)>,
{
    for (name, raw) in env {
        let Some(key) = name.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let key = key.to_ascii_lowercase();
        let Some(current) = layered.get(&key) else {
            continue;
        };

        // String-typed options keep the raw text so a model tag like "7"
        // is not read as a number.
        let value = if current.is_string() {
            Value::String(raw)
        } else {
            serde_json::from_str(&raw).unwrap_or(Value::String(raw))
        };
        layered.insert(key, value);
    }
}

fn has_quantization_tag(tag: &str) -> bool {
    let tag = tag.to_ascii_lowercase();
    ["q2", "q3", "q4", "q5", "q6", "q8", "fp16", "f16", "fp32"]
        .iter()
        .any(|marker| tag.contains(marker))
}

fn log_directive(level: &str) -> Option<&'static str> {
    match level.to_ascii_uppercase().as_str() {
        "TRACE" => Some("trace"),
        "DEBUG" => Some("debug"),
        "INFO" => Some("info"),
        "WARN" | "WARNING" => Some("warn"),
        "ERROR" | "CRITICAL" => Some("error"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn env(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn defaults_are_valid() -> Result<(), ConfigError> {
        let settings = Settings::from_sources(None, Vec::new())?;
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.chunk_size, 1_000);
        assert_eq!(settings.chunk_overlap, 200);
        assert_eq!(settings.retriever_k, 3);
        assert_eq!(settings.search_strategy(), SearchStrategy::Similarity);
        Ok(())
    }

    #[test]
    fn env_beats_file_beats_defaults() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"chunk_size": 800, "retriever_k": 5, "model_name": "mistral:7b"}"#,
        )?;

        let settings = Settings::from_sources(
            Some(&path),
            env(&[("PDF_BOT_RETRIEVER_K", "7"), ("UNRELATED", "x")]),
        )?;

        assert_eq!(settings.chunk_size, 800);
        assert_eq!(settings.retriever_k, 7);
        assert_eq!(settings.model_name, "mistral:7b");
        assert_eq!(settings.chunk_overlap, 200);
        Ok(())
    }

    #[test]
    fn string_options_keep_raw_env_text() -> Result<(), ConfigError> {
        let settings = Settings::from_sources(
            None,
            env(&[
                ("PDF_BOT_MODEL_NAME", "7"),
                ("PDF_BOT_SEARCH_TYPE", "mmr"),
                ("PDF_BOT_QUANTIZATION", "4bit"),
                ("PDF_BOT_RETURN_SOURCE_DOCS", "false"),
            ]),
        )?;
        assert_eq!(settings.model_name, "7");
        assert_eq!(settings.search_type, SearchType::Mmr);
        assert_eq!(settings.quantization, Quantization::Int4);
        assert!(!settings.return_source_docs);
        Ok(())
    }

    #[test]
    fn overlap_not_below_size_is_rejected() {
        let result = Settings::from_sources(None, env(&[("PDF_BOT_CHUNK_OVERLAP", "1000")]));
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn unknown_search_type_is_rejected() {
        let result = Settings::from_sources(None, env(&[("PDF_BOT_SEARCH_TYPE", "bm25")]));
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let result = Settings::from_sources(Some(Path::new("/definitely/not/here.json")), Vec::new());
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn cli_overrides_are_validated() -> Result<(), ConfigError> {
        let settings = Settings::default().with_overrides(Overrides {
            chunk_size: Some(500),
            chunk_overlap: Some(50),
            ..Overrides::default()
        })?;
        assert_eq!(settings.chunk_size, 500);

        let rejected = Settings::default().with_overrides(Overrides {
            chunk_size: Some(100),
            ..Overrides::default()
        });
        assert!(matches!(rejected, Err(ConfigError::Invalid(_))));
        Ok(())
    }

    #[test]
    fn quantization_selects_model_tag() {
        let mut settings = Settings::default();
        assert_eq!(settings.resolved_model_name(), "llama2:7b-chat-q8_0");

        settings.quantization = Quantization::Int4;
        settings.model_name = "mistral".to_string();
        assert_eq!(settings.resolved_model_name(), "mistral:q4_0");

        settings.model_name = "llama2:13b-chat-q5_K_M".to_string();
        assert_eq!(settings.resolved_model_name(), "llama2:13b-chat-q5_K_M");

        settings.quantization = Quantization::None;
        settings.model_name = "llama2:7b-chat".to_string();
        assert_eq!(settings.resolved_model_name(), "llama2:7b-chat");
    }

    #[test]
    fn mmr_strategy_uses_fetch_k_and_lambda() -> Result<(), ConfigError> {
        let settings = Settings::from_sources(
            None,
            env(&[
                ("PDF_BOT_SEARCH_TYPE", "mmr"),
                ("PDF_BOT_FETCH_K", "10"),
                ("PDF_BOT_LAMBDA_MULT", "0.25"),
            ]),
        )?;
        assert_eq!(
            settings.search_strategy(),
            SearchStrategy::Mmr {
                fetch_k: 10,
                lambda: 0.25
            }
        );
        Ok(())
    }

    #[test]
    fn python_style_log_levels_are_accepted() -> Result<(), ConfigError> {
        let settings = Settings::from_sources(None, env(&[("PDF_BOT_LOG_LEVEL", "WARNING")]))?;
        assert_eq!(settings.log_filter(), "warn");
        Ok(())
    }
}
