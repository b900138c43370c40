//! Synthesis engine boundary.
//!
//! The neural model is an external collaborator: the crate only fixes the
//! shape of a request, the shapes a result may arrive in, and the trait an
//! engine must implement.  Everything downstream (adapter, coordinator,
//! cache) works against this seam, so tests run with scripted engines and
//! the real model plugs in behind the `kokoro` feature.

use std::sync::Arc;

/// Audio sample rate produced by the engine (Kokoro emits 24 kHz mono).
pub const SAMPLE_RATE: u32 = 24_000;

/// One (text, voice, speed) request to be converted to audio.
///
/// Immutable once constructed.  Cache identity is the exact triple — no
/// normalization is applied to any field.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub text: String,
    pub voice: String,
    pub speed: f32,
}

impl Utterance {
    pub fn new(text: impl Into<String>, voice: impl Into<String>, speed: f32) -> Self {
        Self { text: text.into(), voice: voice.into(), speed }
    }
}

/// Engine construction parameters: a language code and a model identifier,
/// with an optional local model directory overriding the download path.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Single-letter Kokoro language code (`a` = US English).
    pub lang_code: String,
    /// HuggingFace repository holding the ONNX export.
    pub repo_id: String,
    /// Pre-downloaded model directory; skips the hub entirely when set.
    pub model_dir: Option<std::path::PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lang_code: "a".to_string(),
            repo_id: "onnx-community/Kokoro-82M-v1.0-ONNX".to_string(),
            model_dir: None,
        }
    }
}

/// A raw per-segment result as produced by the engine.
///
/// Engine versions have shipped two shapes for the same data: a structured
/// result object and a positional (graphemes, phonemes, audio) triple.  Both
/// are accepted here and collapsed to "just the audio" in one place, so an
/// engine upgrade touches nothing outside this shim.
#[derive(Debug, Clone)]
pub enum RawSegment {
    /// Structured result carrying an optional audio buffer.
    Structured {
        graphemes: String,
        phonemes: String,
        audio: Option<Vec<f32>>,
    },
    /// Positional triple from older engine versions.
    Triple(String, String, Option<Vec<f32>>),
}

impl RawSegment {
    /// Extract the audio buffer, whatever shape the result arrived in.
    pub fn into_audio(self) -> Option<Vec<f32>> {
        match self {
            RawSegment::Structured { audio, .. } => audio,
            RawSegment::Triple(_, _, audio) => audio,
        }
    }
}

/// A synthesis engine: text in, one raw segment of audio out.
///
/// Implementations are shared behind an `Arc` once the readiness gate
/// publishes them, so they must be usable from concurrent requests.
pub trait SynthesisEngine: Send + Sync {
    /// Synthesize one already-segmented span of text.
    ///
    /// Called once per segment by the adapter; a fresh speak request
    /// re-invokes the engine from the first segment (sequences are not
    /// restartable).
    fn synthesize(&self, text: &str, voice: &str, speed: f32) -> anyhow::Result<RawSegment>;
}

/// Shared handle to a ready engine.
pub type EngineHandle = Arc<dyn SynthesisEngine>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_audio_both_shapes() {
        let s = RawSegment::Structured {
            graphemes: "hi".into(),
            phonemes: "haɪ".into(),
            audio: Some(vec![0.1, 0.2]),
        };
        assert_eq!(s.into_audio(), Some(vec![0.1, 0.2]));

        let t = RawSegment::Triple("hi".into(), "haɪ".into(), Some(vec![0.3]));
        assert_eq!(t.into_audio(), Some(vec![0.3]));

        let none = RawSegment::Triple("hi".into(), "haɪ".into(), None);
        assert_eq!(none.into_audio(), None);
    }
}
