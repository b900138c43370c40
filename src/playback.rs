//! Audio output devices.
//!
//! The coordinator talks to a trait object, so tests substitute a recording
//! sink and the binary plugs in the real device.  Physical playback is
//! serialized process-wide: two overlapping requests never interleave their
//! audio on the device.

use std::sync::Mutex;

use crate::error::{Result, SpeakError};

/// Something that can play a mono float32 buffer to completion.
pub trait AudioOutput: Send + Sync {
    /// Play `samples` at `sample_rate`, blocking until playback finishes.
    fn play(&self, samples: &[f32], sample_rate: u32) -> Result<()>;
}

/// Process-wide playback lock.  Held for the full duration of each buffer so
/// concurrent speak requests queue behind one another at the device.
static DEVICE_LOCK: Mutex<()> = Mutex::new(());

/// Default output: the system audio device via rodio.
///
/// The output stream is opened per play call rather than held open — the
/// device can come and go between requests (headphones unplugged, default
/// sink changed) and a fresh stream picks up the current default.
#[derive(Debug, Default)]
pub struct RodioOutput;

impl AudioOutput for RodioOutput {
    fn play(&self, samples: &[f32], sample_rate: u32) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }
        // A poisoned lock means a previous playback panicked; the device
        // itself holds no state worth protecting beyond serialization.
        let _guard = DEVICE_LOCK.lock().unwrap_or_else(|e| e.into_inner());

        let stream = rodio::OutputStreamBuilder::open_default_stream()
            .map_err(|e| SpeakError::Playback(e.to_string()))?;
        let sink = rodio::Sink::connect_new(stream.mixer());
        sink.append(rodio::buffer::SamplesBuffer::new(1, sample_rate, samples.to_vec()));
        sink.sleep_until_end();
        Ok(())
    }
}

/// Write samples to a 16-bit PCM WAV file.
///
/// Debugging escape hatch: lets a synthesized or cached buffer be inspected
/// in an editor instead of played.
pub fn write_wav(path: &std::path::Path, samples: &[f32], sample_rate: u32) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .map_err(|e| SpeakError::Playback(format!("cannot create WAV: {}", e)))?;
    for &s in samples {
        let s16 = (s * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        writer
            .write_sample(s16)
            .map_err(|e| SpeakError::Playback(format!("WAV write error: {}", e)))?;
    }
    writer
        .finalize()
        .map_err(|e| SpeakError::Playback(format!("WAV finalise error: {}", e)))
}
