//! MCP server binary: speak tools over stdio, Kokoro engine behind the gate.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use mcp_kokoro::{
    cache::AudioCache,
    engine::EngineConfig,
    gate::{EngineGate, EngineLoader},
    kokoro,
    playback::RodioOutput,
    rpc,
    speak::SpeakService,
};

#[derive(Debug, Parser)]
#[command(name = "mcp-kokoro", version, about = "Kokoro text-to-speech tools over stdio")]
struct Args {
    /// Kokoro language code used when a voice prefix is unrecognised.
    #[arg(long, default_value = "a", env = "MCP_KOKORO_LANG")]
    lang_code: String,

    /// HuggingFace repository holding the ONNX model.
    #[arg(long, default_value = "onnx-community/Kokoro-82M-v1.0-ONNX", env = "MCP_KOKORO_REPO")]
    repo_id: String,

    /// Local directory with model files; skips the hub download.
    #[arg(long, env = "MCP_KOKORO_MODEL_DIR")]
    model_dir: Option<PathBuf>,

    /// Audio cache root (defaults to the platform per-user cache directory).
    #[arg(long, env = "MCP_KOKORO_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Soft cache size limit in megabytes; the cache is cleared when exceeded.
    #[arg(long, env = "MCP_KOKORO_CACHE_LIMIT_MB")]
    cache_limit_mb: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr without exception — stdout is the protocol stream.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let engine_config = EngineConfig {
        lang_code: args.lang_code,
        repo_id: args.repo_id,
        model_dir: args.model_dir,
    };
    let loader: EngineLoader = Arc::new(move || kokoro::load(&engine_config));
    let gate = EngineGate::spawn(loader);

    let max_bytes = args.cache_limit_mb.map(|mb| mb * 1024 * 1024);
    let cache = match args.cache_dir {
        Some(root) => AudioCache::new(root, max_bytes),
        None => AudioCache::in_user_cache(max_bytes),
    };
    tracing::info!(cache_dir = %cache.dir().display(), "audio cache configured");

    let service = SpeakService::new(gate, cache, Arc::new(RodioOutput));
    rpc::serve(service).await
}
