use std::fs;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use scanlens::config::{Config, EmbedderKind};
use scanlens::manager::SystemProfile;
use scanlens::server::ScanServer;
use scanlens::service::{AnalysisService, SystemClock};
use scanlens::vision::OpenAiVisionClient;
use scanlens::{AnalysisStore, EmbeddingProvider, HashingEmbedder, LocalVectorStore, OpenAiEmbedder, RandomIds};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,scanlens=info")),
        )
        .with_target(false)
        .with_level(true)
        .init();

    let config = Config::parse();
    let profile = SystemProfile::detect();
    profile.log();

    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(profile.worker_threads)
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?
        .block_on(async_main(config, profile))
}

async fn async_main(config: Config, profile: SystemProfile) -> anyhow::Result<()> {
    fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("cannot create data dir {}", config.data_dir.display()))?;

    let dimension = config.embedding_dimension();
    anyhow::ensure!(dimension > 0, "--embedding-dim must be at least 1");
    let embedder: Arc<dyn EmbeddingProvider> = match config.resolved_embedder() {
        EmbedderKind::Openai => {
            let key = config
                .api_key()
                .context("--embedder openai needs OPENAI_API_KEY")?;
            Arc::new(OpenAiEmbedder::with_base_url(
                &config.embedding_model,
                key,
                dimension,
                &config.openai_base_url,
            ))
        }
        EmbedderKind::Hash | EmbedderKind::Auto => Arc::new(HashingEmbedder::new(dimension)),
    };
    info!(embedder = embedder.name(), dimension, "embedding provider ready");

    let strict = config.strict_durability(profile.strict_durability);
    let segment_path = config.segment_path();
    let vector_store = tokio::task::spawn_blocking(move || LocalVectorStore::open(&segment_path, dimension, strict))
        .await?
        .with_context(|| format!("cannot open vector store in {}", config.data_dir.display()))?;

    let store = AnalysisStore::new(embedder, Arc::new(vector_store), Arc::new(RandomIds), config.timeouts())?;

    let vision = OpenAiVisionClient::new(&config.vision_model, config.api_key().map(str::to_string))
        .with_base_url(&config.openai_base_url)
        .with_timeout(config.vision_timeout());
    if config.api_key().is_none() {
        info!("no OPENAI_API_KEY set; /analyze requests must carry their own api_key");
    }

    let service = AnalysisService::new(Arc::new(vision), store, Arc::new(SystemClock));
    let server = ScanServer::new(service, config.max_body_bytes);

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutting down");
    };
    server.run(config.addr, shutdown).await?;
    Ok(())
}
