//! The speak operation.
//!
//! One entry point turns text into played audio: readiness gate, cache
//! lookup, synthesis with streaming playback, cache store.  The result is
//! always a human-readable string — success or failure, nothing propagates
//! past this boundary as an error value.

use std::sync::Arc;

use crate::adapter;
use crate::cache::{cache_key, AudioCache};
use crate::engine::{EngineHandle, Utterance, SAMPLE_RATE};
use crate::error::Result;
use crate::gate::EngineGate;
use crate::playback::AudioOutput;
use crate::stdio::StdoutToStderr;
use crate::stream;

/// Voice used when the caller does not pick one.
pub const DEFAULT_VOICE: &str = "af_heart";
/// Speed used when the caller does not pick one.
pub const DEFAULT_SPEED: f32 = 1.0;
/// Approval prompts speak slightly faster than normal reading.
const APPROVAL_SPEED: f32 = 1.1;

/// Shared speak pipeline: one instance serves every request in the process.
#[derive(Clone)]
pub struct SpeakService {
    gate: Arc<EngineGate>,
    cache: AudioCache,
    output: Arc<dyn AudioOutput>,
}

impl SpeakService {
    pub fn new(gate: Arc<EngineGate>, cache: AudioCache, output: Arc<dyn AudioOutput>) -> Self {
        Self { gate, cache, output }
    }

    /// Speak `text` aloud and describe the outcome.
    ///
    /// Blank text is a success without engine involvement — there is nothing
    /// to say, and callers pass through empty strings often enough that
    /// failing them would only add noise.
    pub async fn speak(&self, text: &str, voice: Option<String>, speed: Option<f32>) -> String {
        if text.trim().is_empty() {
            return format!("Successfully spoke: {}", text);
        }

        let engine = match self.gate.acquire().await {
            Ok(engine) => engine,
            Err(e) => return format!("Error: {}", e),
        };

        let request = Utterance::new(
            text,
            voice.unwrap_or_else(|| DEFAULT_VOICE.to_string()),
            speed.unwrap_or(DEFAULT_SPEED),
        );
        let cache = self.cache.clone();
        let output = Arc::clone(&self.output);
        let text = text.to_string();

        let outcome = tokio::task::spawn_blocking(move || {
            speak_blocking(&engine, &cache, output.as_ref(), &request)
        })
        .await;

        match outcome {
            Ok(Ok(())) => format!("Successfully spoke: {}", text),
            Ok(Err(e)) => format!("Error speaking text: {}", e),
            Err(join) => format!("Error speaking text: {}", join),
        }
    }

    /// Speak an approval prompt built around `text`.
    pub async fn ask_approval(&self, text: &str) -> String {
        let prompt = format!("Attention required. {}. Do you approve?", text);
        self.speak(&prompt, None, Some(APPROVAL_SPEED)).await
    }

    /// Announce a task status change.
    pub async fn announce_task(&self, task_name: &str, status: &str) -> String {
        let announcement = format!("Task {} has {}.", task_name, status);
        self.speak(&announcement, None, None).await
    }
}

/// The blocking half of a speak request: replay from cache, or synthesize,
/// stream, and store.
fn speak_blocking(
    engine: &EngineHandle,
    cache: &AudioCache,
    output: &dyn AudioOutput,
    request: &Utterance,
) -> Result<()> {
    let key = cache_key(request);

    if let Some(samples) = cache.lookup(&key) {
        tracing::info!(key, "replaying cached audio");
        return output.play(&samples, SAMPLE_RATE);
    }

    // The native stack prints to fd 1; keep the protocol stream clean while
    // it runs.  A failed redirect is logged and synthesis proceeds anyway.
    let guard = match StdoutToStderr::new() {
        Ok(guard) => Some(guard),
        Err(e) => {
            tracing::warn!(error = %e, "stdout redirection unavailable");
            None
        }
    };

    let chunks = adapter::chunks(engine.as_ref(), request);
    let spoken = stream::run(chunks, output, SAMPLE_RATE)?;
    drop(guard);

    if !spoken.is_empty() {
        // Store failures leave the request successful but uncached.
        if let Err(e) = cache.store(&key, &spoken) {
            tracing::warn!(key, error = %e, "failed to cache spoken audio");
        }
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
