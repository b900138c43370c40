//! Streaming playback coordinator.
//!
//! Overlaps synthesis and playback: a producer thread pulls chunks from the
//! synthesis sequence into a bounded queue while the calling thread plays
//! them in order.  The queue bound keeps memory flat no matter how long the
//! text is; the end marker is the only way the consumer loop terminates, so
//! producer faults cannot hang the request.

use std::sync::mpsc;

use crate::error::{Result, SpeakError};
use crate::playback::AudioOutput;

/// Chunks buffered ahead of playback.  Small: each chunk is a full sentence
/// of audio, so even a depth of a few chunks hides synthesis latency.
const QUEUE_DEPTH: usize = 8;

enum Handoff {
    Chunk(Vec<f32>),
    /// Terminal marker, sent exactly once on every producer path.
    End,
}

/// Play a chunk sequence to `output`, returning the concatenated samples.
///
/// Semantics:
/// - Chunks play strictly in production order.
/// - A producer fault stops production; chunks already queued still play,
///   then the fault is returned.
/// - A playback fault stops playback; remaining production is drained and
///   discarded so the producer never blocks on a full queue, and the playback
///   fault wins over any later producer fault.
pub fn run(
    chunks: impl Iterator<Item = Result<Vec<f32>>> + Send,
    output: &dyn AudioOutput,
    sample_rate: u32,
) -> Result<Vec<f32>> {
    let (tx, rx) = mpsc::sync_channel::<Handoff>(QUEUE_DEPTH);

    std::thread::scope(|scope| {
        let producer = scope.spawn(move || {
            for chunk in chunks {
                match chunk {
                    Ok(samples) => {
                        // Consumer gone means playback already failed and the
                        // drain finished; stop producing.
                        if tx.send(Handoff::Chunk(samples)).is_err() {
                            return Ok(());
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Handoff::End);
                        return Err(e);
                    }
                }
            }
            let _ = tx.send(Handoff::End);
            Ok(())
        });

        let mut spoken: Vec<f32> = Vec::new();
        let mut playback_fault: Option<SpeakError> = None;

        while let Ok(handoff) = rx.recv() {
            match handoff {
                Handoff::Chunk(samples) => {
                    if playback_fault.is_some() {
                        continue; // drain and discard
                    }
                    match output.play(&samples, sample_rate) {
                        Ok(()) => spoken.extend_from_slice(&samples),
                        Err(e) => {
                            tracing::warn!(error = %e, "playback fault, draining producer");
                            playback_fault = Some(e);
                        }
                    }
                }
                Handoff::End => break,
            }
        }

        let produced = producer
            .join()
            .unwrap_or_else(|_| Err(SpeakError::Engine("synthesis thread panicked".into())));

        if let Some(fault) = playback_fault {
            return Err(fault);
        }
        produced?;
        Ok(spoken)
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::testing::RecordingOutput;

    fn ok_chunks(chunks: Vec<Vec<f32>>) -> impl Iterator<Item = Result<Vec<f32>>> {
        chunks.into_iter().map(Ok)
    }

    #[test]
    fn test_plays_in_order_and_returns_concatenation() {
        let output = RecordingOutput::new();
        let spoken = run(
            ok_chunks(vec![vec![0.1], vec![0.2, 0.3], vec![0.4]]),
            &output,
            24_000,
        )
        .unwrap();

        assert_eq!(spoken, vec![0.1, 0.2, 0.3, 0.4]);
        assert_eq!(
            *output.played.lock().unwrap(),
            vec![vec![0.1], vec![0.2, 0.3], vec![0.4]]
        );
    }

    #[test]
    fn test_empty_sequence_is_fine() {
        let output = RecordingOutput::new();
        let spoken = run(ok_chunks(vec![]), &output, 24_000).unwrap();
        assert!(spoken.is_empty());
        assert_eq!(output.calls(), 0);
    }

    #[test]
    fn test_producer_fault_after_queued_chunks() {
        let output = RecordingOutput::new();
        let chunks = vec![
            Ok(vec![0.1]),
            Ok(vec![0.2]),
            Err(SpeakError::Engine("segment 2 blew up".into())),
            Ok(vec![0.9]), // never produced
        ];
        let err = run(chunks.into_iter(), &output, 24_000).unwrap_err();

        assert!(matches!(err, SpeakError::Engine(_)));
        // Everything queued before the fault still played.
        assert_eq!(*output.played.lock().unwrap(), vec![vec![0.1], vec![0.2]]);
    }

    #[test]
    fn test_playback_fault_drains_without_deadlock() {
        // More chunks than the queue holds, failing on the very first play:
        // without the drain the producer would block forever on a full queue.
        let output = RecordingOutput::failing_from(0);
        let chunks: Vec<_> = (0..QUEUE_DEPTH * 4).map(|i| Ok(vec![i as f32])).collect();
        let err = run(chunks.into_iter(), &output, 24_000).unwrap_err();

        assert!(matches!(err, SpeakError::Playback(_)));
        // Nothing played after the fault.
        assert!(output.played.lock().unwrap().is_empty());
        assert_eq!(output.calls(), 1);
    }

    #[test]
    fn test_playback_fault_wins_over_later_producer_fault() {
        let output = RecordingOutput::failing_from(0);
        let chunks = vec![
            Ok(vec![0.1]),
            Err(SpeakError::Engine("late".into())),
        ];
        let err = run(chunks.into_iter(), &output, 24_000).unwrap_err();
        assert!(matches!(err, SpeakError::Playback(_)));
    }
}
