use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::analysis::StoreTimeouts;
use crate::embedding::{DEFAULT_HASH_DIMENSION, DEFAULT_OPENAI_BASE_URL, DEFAULT_OPENAI_DIMENSION, DEFAULT_OPENAI_MODEL};
use crate::vision::DEFAULT_VISION_MODEL;

pub const SEGMENT_FILE: &str = "analyses.dat";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EmbedderKind {
    /// OpenAI when an API key is configured, hashing otherwise
    Auto,
    Hash,
    Openai,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Durability {
    Strict,
    Relaxed,
}

/// Server configuration. Every flag can also come from the environment.
#[derive(Parser, Clone, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Config {
    #[clap(long, env = "SCANLENS_ADDR", default_value = "127.0.0.1:8000")]
    pub addr: SocketAddr,

    /// Directory holding the analysis segment
    #[clap(long, env = "SCANLENS_DATA_DIR", default_value = "./medical_db")]
    pub data_dir: PathBuf,

    #[clap(long, value_enum, env = "SCANLENS_EMBEDDER", default_value = "auto")]
    pub embedder: EmbedderKind,

    #[clap(long, env = "SCANLENS_EMBEDDING_MODEL", default_value = DEFAULT_OPENAI_MODEL)]
    pub embedding_model: String,

    /// Defaults to 384 for hashing, 1536 for OpenAI
    #[clap(long, env = "SCANLENS_EMBEDDING_DIM")]
    pub embedding_dim: Option<usize>,

    #[clap(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    #[clap(long, env = "OPENAI_BASE_URL", default_value = DEFAULT_OPENAI_BASE_URL)]
    pub openai_base_url: String,

    #[clap(long, env = "SCANLENS_VISION_MODEL", default_value = DEFAULT_VISION_MODEL)]
    pub vision_model: String,

    #[clap(long, env = "SCANLENS_EMBED_TIMEOUT_SECS", default_value = "5")]
    pub embed_timeout_secs: u64,

    #[clap(long, env = "SCANLENS_STORE_TIMEOUT_SECS", default_value = "5")]
    pub store_timeout_secs: u64,

    #[clap(long, env = "SCANLENS_VISION_TIMEOUT_SECS", default_value = "120")]
    pub vision_timeout_secs: u64,

    /// Largest accepted request body (base64 images are ~4/3 of the file size)
    #[clap(long, env = "SCANLENS_MAX_BODY_BYTES", default_value = "16777216")]
    pub max_body_bytes: u64,

    /// Overrides the durability mode picked from the host profile
    #[clap(long, value_enum, env = "SCANLENS_DURABILITY")]
    pub durability: Option<Durability>,
}

impl Config {
    pub fn api_key(&self) -> Option<&str> {
        self.openai_api_key.as_deref().filter(|k| !k.trim().is_empty())
    }

    pub fn resolved_embedder(&self) -> EmbedderKind {
        match self.embedder {
            EmbedderKind::Auto if self.api_key().is_some() => EmbedderKind::Openai,
            EmbedderKind::Auto => EmbedderKind::Hash,
            other => other,
        }
    }

    pub fn embedding_dimension(&self) -> usize {
        self.embedding_dim.unwrap_or(match self.resolved_embedder() {
            EmbedderKind::Openai => DEFAULT_OPENAI_DIMENSION,
            _ => DEFAULT_HASH_DIMENSION,
        })
    }

    pub fn segment_path(&self) -> PathBuf {
        self.data_dir.join(SEGMENT_FILE)
    }

    pub fn strict_durability(&self, profile_default: bool) -> bool {
        match self.durability {
            Some(Durability::Strict) => true,
            Some(Durability::Relaxed) => false,
            None => profile_default,
        }
    }

    pub fn timeouts(&self) -> StoreTimeouts {
        StoreTimeouts {
            embed: Duration::from_secs(self.embed_timeout_secs),
            store: Duration::from_secs(self.store_timeout_secs),
        }
    }

    pub fn vision_timeout(&self) -> Duration {
        Duration::from_secs(self.vision_timeout_secs)
    }
}
