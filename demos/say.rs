//! Speak a line of text from the command line, without the RPC server.
//!
//! ```sh
//! cargo run --features kokoro --example say -- "Hello from Kokoro."
//! cargo run --features kokoro --example say -- --voice bm_george --out hello.wav "Hello."
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use mcp_kokoro::{
    adapter,
    cache::AudioCache,
    engine::{Utterance, SAMPLE_RATE},
    gate::EngineGate,
    kokoro,
    playback::{self, AudioOutput, RodioOutput},
    speak::{DEFAULT_SPEED, DEFAULT_VOICE},
    stream,
};

#[derive(Debug, Parser)]
struct Args {
    /// Text to speak.
    text: String,

    #[arg(long, default_value = DEFAULT_VOICE)]
    voice: String,

    #[arg(long, default_value_t = DEFAULT_SPEED)]
    speed: f32,

    /// Also write the audio to a WAV file.
    #[arg(long)]
    out: Option<PathBuf>,

    /// Local directory with model files; skips the hub download.
    #[arg(long)]
    model_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let engine_config = mcp_kokoro::EngineConfig {
        model_dir: args.model_dir,
        ..Default::default()
    };
    let gate = EngineGate::spawn(Arc::new(move || kokoro::load(&engine_config)));
    let engine = gate.acquire().await?;

    let request = Utterance::new(&args.text, &args.voice, args.speed);
    let cache = AudioCache::in_user_cache(None);
    let key = mcp_kokoro::cache::cache_key(&request);

    let spoken = match cache.lookup(&key) {
        Some(samples) => {
            RodioOutput.play(&samples, SAMPLE_RATE)?;
            samples
        }
        None => {
            let spoken =
                stream::run(adapter::chunks(engine.as_ref(), &request), &RodioOutput, SAMPLE_RATE)?;
            cache.store(&key, &spoken)?;
            spoken
        }
    };

    if let Some(out) = args.out {
        playback::write_wav(&out, &spoken, SAMPLE_RATE)?;
        eprintln!("wrote {} samples to {}", spoken.len(), out.display());
    }
    Ok(())
}
