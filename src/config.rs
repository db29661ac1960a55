//! Configuration for lingua-memory

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::embedding::LOCAL_MODEL_DIMENSIONS;
use crate::error::{Error, Result};
use crate::memory::SESSION_NAMESPACE_PREFIX;

/// Which embedding provider backs the memory store and ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingBackend {
    /// Hosted OpenAI-compatible `/embeddings` endpoint
    OpenAi,
    /// Local fastembed model, no API key needed
    Local,
    /// Deterministic feature hashing, no model at all
    Hashing,
}

impl FromStr for EmbeddingBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "local" | "fastembed" => Ok(Self::Local),
            "hashing" | "hash" => Ok(Self::Hashing),
            other => Err(Error::config(format!("unknown embedding backend '{}'", other))),
        }
    }
}

/// Which vector index stores memory and feedback records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorBackend {
    Lance,
    Sqlite,
}

impl FromStr for VectorBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "lance" | "lancedb" => Ok(Self::Lance),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(Error::config(format!("unknown vector backend '{}'", other))),
        }
    }
}

/// Configuration for the memory and personalization engine
#[derive(Debug, Clone)]
pub struct Config {
    /// Base directory for all storage
    pub data_dir: PathBuf,

    /// API key for the hosted completion, embedding and speech providers
    pub openai_api_key: Option<String>,

    /// Base URL of the OpenAI-compatible API
    pub openai_base_url: String,

    /// Chat completion model
    pub completion_model: String,

    /// Sampling temperature for conversation replies
    pub temperature: f32,

    /// Text-to-speech model
    pub speech_model: String,

    /// Text-to-speech voice
    pub speech_voice: String,

    /// Embedding provider
    pub embedding_backend: EmbeddingBackend,

    /// Embedding model name
    pub embedding_model: String,

    /// Embedding dimensions (1536 for text-embedding-3-small)
    pub embedding_dimensions: usize,

    /// Vector index backend
    pub vector_backend: VectorBackend,

    /// Namespace shared by all feedback records
    pub feedback_namespace: String,

    /// Capacity of each session's short-term window
    pub max_history: usize,

    /// Similar past exchanges considered by the contextual matcher
    pub recall_top_k: usize,

    /// Experience records scanned by the contextual matcher
    pub contextual_feedback_limit: usize,

    /// Records fetched when synthesizing a profile or a progress summary
    pub feedback_query_limit: usize,

    /// Timeout for conversation-path provider calls
    pub provider_timeout: Duration,

    /// Timeout for the proficiency analysis call
    pub analysis_timeout: Duration,

    /// Maximum analyses running at once
    pub max_concurrent_analyses: usize,

    /// Analyses waiting in the queue before new ones are dropped
    pub analysis_queue_capacity: usize,

    /// HTTP server port
    pub server_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lingua-memory");

        Self {
            data_dir,
            openai_api_key: None,
            openai_base_url: "https://api.openai.com/v1".to_string(),
            completion_model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            speech_model: "tts-1".to_string(),
            speech_voice: "alloy".to_string(),
            embedding_backend: EmbeddingBackend::OpenAi,
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_dimensions: 1536,
            vector_backend: VectorBackend::Lance,
            feedback_namespace: "feedback".to_string(),
            max_history: 20,
            recall_top_k: 5,
            contextual_feedback_limit: 20,
            feedback_query_limit: 50,
            provider_timeout: Duration::from_secs(30),
            analysis_timeout: Duration::from_secs(5),
            max_concurrent_analyses: 4,
            analysis_queue_capacity: 64,
            server_port: 8000,
        }
    }
}

impl Config {
    /// Create a new config with a custom data directory
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Build a config from defaults, a `.env` file if present, and the environment
    pub fn from_env() -> Result<Self> {
        // A missing .env is normal in production
        let _ = dotenvy::dotenv();

        let mut config = Self::default();

        if let Some(dir) = env_var("LINGUA_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        config.openai_api_key = env_var("OPENAI_API_KEY");
        if let Some(url) = env_var("OPENAI_BASE_URL") {
            config.openai_base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(model) = env_var("LINGUA_COMPLETION_MODEL") {
            config.completion_model = model;
        }
        if let Some(model) = env_var("LINGUA_EMBEDDING_MODEL") {
            config.embedding_model = model;
        }
        if let Some(backend) = env_var("LINGUA_EMBEDDING_BACKEND") {
            config.embedding_backend = backend.parse()?;
            if config.embedding_backend == EmbeddingBackend::Local {
                config.embedding_dimensions = LOCAL_MODEL_DIMENSIONS;
            }
        }
        if let Some(dims) = env_var("LINGUA_EMBEDDING_DIMENSIONS") {
            config.embedding_dimensions = parse_number("LINGUA_EMBEDDING_DIMENSIONS", &dims)?;
        }
        if let Some(backend) = env_var("LINGUA_VECTOR_BACKEND") {
            config.vector_backend = backend.parse()?;
        }
        if let Some(n) = env_var("LINGUA_MAX_HISTORY") {
            config.max_history = parse_number("LINGUA_MAX_HISTORY", &n)?;
        }
        if let Some(port) = env_var("LINGUA_PORT") {
            config.server_port = parse_number("LINGUA_PORT", &port)?;
        }
        if let Some(n) = env_var("LINGUA_ANALYSIS_WORKERS") {
            config.max_concurrent_analyses = parse_number("LINGUA_ANALYSIS_WORKERS", &n)?;
        }
        if let Some(n) = env_var("LINGUA_ANALYSIS_QUEUE") {
            config.analysis_queue_capacity = parse_number("LINGUA_ANALYSIS_QUEUE", &n)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_history == 0 {
            return Err(Error::config("max_history must be at least 1"));
        }
        if self.embedding_dimensions == 0 {
            return Err(Error::config("embedding_dimensions must be at least 1"));
        }
        if self.max_concurrent_analyses == 0 || self.analysis_queue_capacity == 0 {
            return Err(Error::config("analysis workers and queue capacity must be at least 1"));
        }
        if self.feedback_namespace.trim().is_empty()
            || self.feedback_namespace.starts_with(SESSION_NAMESPACE_PREFIX)
        {
            return Err(Error::config(format!(
                "feedback_namespace must be non-empty and must not start with '{}'",
                SESSION_NAMESPACE_PREFIX
            )));
        }
        Ok(())
    }

    /// Get the path to the SQLite database
    pub fn sqlite_path(&self) -> PathBuf {
        self.data_dir.join("vectors.db")
    }

    /// Get the path to the vector database
    pub fn vector_db_path(&self) -> PathBuf {
        self.data_dir.join("vectors")
    }

    /// Get the directory rendered speech is written to
    pub fn audio_dir(&self) -> PathBuf {
        self.data_dir.join("tts_out")
    }

    /// Ensure all required directories exist
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::create_dir_all(self.vector_db_path())?;
        std::fs::create_dir_all(self.audio_dir())?;
        Ok(())
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::config(format!("{} must be a number, got '{}'", key, value)))
}
