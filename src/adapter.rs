//! Synthesis adapter — turns an [`Utterance`] into a lazy sequence of clean
//! audio chunks.
//!
//! Responsibilities, in order:
//! 1. Segmentation: boundaries at newline runs and at whitespace following
//!    sentence-final punctuation, so the first chunk can play while the rest
//!    of the text is still being synthesized.
//! 2. Shape normalization: either engine result shape collapses to an audio
//!    buffer; a shape with no audio is a malformed-segment error.
//! 3. Clipping correction: overdriven chunks are rescaled to peak at 0.99.
//! 4. Zero-length chunks are dropped silently.

use fancy_regex::Regex;
use once_cell::sync::Lazy;

use crate::engine::{SynthesisEngine, Utterance};
use crate::error::{Result, SpeakError};

/// Peak amplitude after clipping correction.
const CLIP_TARGET: f32 = 0.99;

/// Segment boundaries: whitespace after sentence-final punctuation, or any
/// run of line breaks.  The punctuation stays with the preceding segment.
static RE_BOUNDARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?<=[.!?])\s+|[\r\n]+").unwrap());

static RE_SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

// ─────────────────────────────────────────────────────────────────────────────
// Text segmentation
// ─────────────────────────────────────────────────────────────────────────────

/// Split text into synthesis segments.
///
/// Residual line breaks inside a segment are collapsed to single spaces, so
/// chunking does not depend on incidental formatting in the input.
pub fn segment_text(text: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut start = 0;

    for m in RE_BOUNDARY.find_iter(text).filter_map(|m| m.ok()) {
        push_segment(&mut segments, &text[start..m.start()]);
        start = m.end();
    }
    push_segment(&mut segments, &text[start..]);
    segments
}

fn push_segment(segments: &mut Vec<String>, raw: &str) {
    let cleaned = RE_SPACES.replace_all(raw.trim(), " ");
    if !cleaned.is_empty() {
        segments.push(cleaned.into_owned());
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Chunk normalization
// ─────────────────────────────────────────────────────────────────────────────

/// Rescale a chunk whose peak exceeds 1.0 so it lands at [`CLIP_TARGET`].
///
/// Quiet chunks pass through untouched — only overdriven segments are
/// corrected, and the whole chunk is scaled so its waveform keeps its shape.
pub fn correct_clipping(samples: &mut [f32]) {
    let max_abs = samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
    if max_abs > 1.0 {
        let scale = CLIP_TARGET / max_abs;
        for s in samples.iter_mut() {
            *s *= scale;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Chunk sequence
// ─────────────────────────────────────────────────────────────────────────────

/// Lazy, finite, forward-only sequence of normalized audio chunks.
///
/// Each `next()` invokes the engine for one segment; nothing is synthesized
/// ahead of the consumer's demand (the streaming coordinator provides the
/// read-ahead, bounded by its queue depth).
pub struct ChunkSequence<'a> {
    engine: &'a dyn SynthesisEngine,
    segments: std::vec::IntoIter<String>,
    voice: &'a str,
    speed: f32,
    index: usize,
}

/// Build the chunk sequence for an utterance.
pub fn chunks<'a>(engine: &'a dyn SynthesisEngine, request: &'a Utterance) -> ChunkSequence<'a> {
    ChunkSequence {
        engine,
        segments: segment_text(&request.text).into_iter(),
        voice: &request.voice,
        speed: request.speed,
        index: 0,
    }
}

impl Iterator for ChunkSequence<'_> {
    type Item = Result<Vec<f32>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let segment = self.segments.next()?;
            let index = self.index;
            self.index += 1;

            tracing::debug!(segment = index, text = %segment, "synthesizing segment");
            let raw = match self.engine.synthesize(&segment, self.voice, self.speed) {
                Ok(raw) => raw,
                Err(e) => return Some(Err(SpeakError::Engine(e.to_string()))),
            };

            let Some(mut samples) = raw.into_audio() else {
                tracing::error!(segment = index, "engine result carried no audio");
                return Some(Err(SpeakError::MalformedSegment { index }));
            };
            if samples.is_empty() {
                continue;
            }
            correct_clipping(&mut samples);
            return Some(Ok(samples));
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::RawSegment;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Engine scripted with one raw segment per input segment, in order.
    struct ScriptedEngine {
        script: Vec<RawSegment>,
        calls: AtomicUsize,
    }

    impl ScriptedEngine {
        fn new(script: Vec<RawSegment>) -> Self {
            Self { script, calls: AtomicUsize::new(0) }
        }
    }

    impl SynthesisEngine for ScriptedEngine {
        fn synthesize(&self, _: &str, _: &str, _: f32) -> anyhow::Result<RawSegment> {
            let i = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.script[i % self.script.len()].clone())
        }
    }

    fn structured(audio: Option<Vec<f32>>) -> RawSegment {
        RawSegment::Structured { graphemes: String::new(), phonemes: String::new(), audio }
    }

    #[test]
    fn test_segment_sentences() {
        let segs = segment_text("Hello world. How are you? Fine!");
        assert_eq!(segs, vec!["Hello world.", "How are you?", "Fine!"]);
    }

    #[test]
    fn test_segment_newline_runs() {
        let segs = segment_text("first line\n\nsecond line\nthird");
        assert_eq!(segs, vec!["first line", "second line", "third"]);
    }

    #[test]
    fn test_segment_collapses_inner_whitespace() {
        // A lone newline is a boundary; internal double spaces collapse.
        let segs = segment_text("one  two\tthree");
        assert_eq!(segs, vec!["one two three"]);
    }

    #[test]
    fn test_segment_empty_and_whitespace() {
        assert!(segment_text("").is_empty());
        assert!(segment_text(" \n \n ").is_empty());
    }

    #[test]
    fn test_clipping_rescales_overdriven_chunk() {
        let mut samples = vec![0.5, -2.0, 1.5];
        correct_clipping(&mut samples);
        let max_abs = samples.iter().fold(0.0f32, |a, s| a.max(s.abs()));
        assert!((max_abs - 0.99).abs() < 1e-6);
        // Waveform shape preserved: ratios intact.
        assert!((samples[0] / samples[2] - 0.5 / 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_clipping_leaves_quiet_chunk_untouched() {
        let mut samples = vec![0.5, -0.9, 0.99];
        let original = samples.clone();
        correct_clipping(&mut samples);
        assert_eq!(samples, original);
    }

    #[test]
    fn test_chunks_skip_empty_segments() {
        let engine = ScriptedEngine::new(vec![
            structured(Some(vec![])),
            structured(Some(vec![0.1])),
        ]);
        let request = Utterance::new("One. Two.", "af_heart", 1.0);
        let out: Vec<_> = chunks(&engine, &request).collect::<Result<_>>().unwrap();
        assert_eq!(out, vec![vec![0.1]]);
    }

    #[test]
    fn test_chunks_malformed_segment() {
        let engine = ScriptedEngine::new(vec![
            structured(Some(vec![0.1])),
            structured(None),
        ]);
        let request = Utterance::new("One. Two.", "af_heart", 1.0);
        let results: Vec<_> = chunks(&engine, &request).collect();
        assert!(results[0].is_ok());
        assert!(matches!(
            results[1],
            Err(SpeakError::MalformedSegment { index: 1 })
        ));
    }

    #[test]
    fn test_chunk_sequence_crosses_threads() {
        // The coordinator hands the sequence to a producer thread, so it has
        // to be Send.
        fn assert_send<T: Send>(_: &T) {}
        let engine = ScriptedEngine::new(vec![structured(Some(vec![0.1]))]);
        let request = Utterance::new("One.", "af_heart", 1.0);
        let seq = chunks(&engine, &request);
        assert_send(&seq);
        let total: usize = std::thread::scope(|scope| {
            scope.spawn(move || seq.map(|c| c.unwrap().len()).sum()).join().unwrap()
        });
        assert_eq!(total, 1);
    }

    #[test]
    fn test_chunks_are_lazy() {
        let engine = ScriptedEngine::new(vec![structured(Some(vec![0.1]))]);
        let request = Utterance::new("One. Two. Three.", "af_heart", 1.0);
        let mut seq = chunks(&engine, &request);
        assert!(seq.next().is_some());
        assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
    }
}
