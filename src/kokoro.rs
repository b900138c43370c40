//! Kokoro ONNX engine.
//!
//! Uses [`ort`] (ONNX Runtime Rust bindings) for inference.
//! The three model inputs are:
//!
//! | Name               | Shape          | dtype   |
//! |--------------------|----------------|---------|
//! | `input_ids`/`tokens` | `[1, seq_len]` | int64 |
//! | `style`            | `[1, 256]`     | float32 |
//! | `speed`            | `[1]`          | float32 |
//!
//! Model exports disagree on the token input name, so it is detected from the
//! session at load time.  Phonemization runs through the `espeak-ng` binary
//! (must be on PATH); voice style vectors come from a `.npz`-style zip of
//! per-voice `.npy` arrays.

use std::{
    collections::HashMap,
    io::{Read, Write},
    path::{Path, PathBuf},
    process::{Command, Stdio},
    sync::Mutex,
};

use anyhow::{bail, Context, Result};
use hf_hub::api::sync::Api;
use ort::{session::Session, value::Tensor};
use serde::Deserialize;

use crate::engine::{EngineConfig, EngineHandle, RawSegment, SynthesisEngine};
use crate::stdio::StdoutToStderr;

/// Style vector width across all Kokoro exports.
const STYLE_DIM: usize = 256;

fn default_model_file() -> String {
    "kokoro-v1.0.onnx".to_string()
}

fn default_voices_file() -> String {
    "voices-v1.0.bin".to_string()
}

/// Deserialised `config.json` from a Kokoro model repository.
///
/// Only the fields this engine needs: file names (with conventional
/// defaults) and the IPA-character vocabulary.
#[derive(Debug, Deserialize)]
struct ModelConfig {
    #[serde(default = "default_model_file")]
    model_file: String,
    #[serde(default = "default_voices_file")]
    voices: String,
    vocab: HashMap<String, i64>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Loading
// ─────────────────────────────────────────────────────────────────────────────

/// Load the Kokoro engine per `config`, downloading the model from the hub
/// unless a local model directory is given.
///
/// Heavy and chatty: ONNX Runtime and the download stack both print to fd 1,
/// so the whole load runs behind the stdout guard.
pub fn load(config: &EngineConfig) -> Result<EngineHandle> {
    let guard = StdoutToStderr::new();
    if let Err(e) = &guard {
        tracing::warn!(error = %e, "stdout redirection unavailable during engine load");
    }

    let files = match &config.model_dir {
        Some(dir) => local_files(dir)?,
        None => download_files(&config.repo_id)?,
    };

    let config_bytes = std::fs::read(&files.config)
        .with_context(|| format!("cannot read config: {}", files.config.display()))?;
    let model_config: ModelConfig =
        serde_json::from_slice(&config_bytes).context("failed to parse config.json")?;

    let vocab = parse_vocab(model_config.vocab)?;

    let session = Session::builder()
        .context("failed to create ORT session builder")?
        .commit_from_file(&files.model)
        .with_context(|| format!("cannot load ONNX model: {}", files.model.display()))?;
    let tokens_input = detect_tokens_input(&session);

    let voices = load_voices(&files.voices)
        .with_context(|| format!("cannot load voices: {}", files.voices.display()))?;
    tracing::info!(voices = voices.len(), "kokoro engine loaded");

    Ok(std::sync::Arc::new(KokoroEngine {
        session: Mutex::new(session),
        tokens_input,
        voices,
        vocab,
        fallback_lang: espeak_lang_for_code(&config.lang_code),
    }))
}

struct ModelFiles {
    config: PathBuf,
    model: PathBuf,
    voices: PathBuf,
}

fn local_files(dir: &Path) -> Result<ModelFiles> {
    let files = ModelFiles {
        config: dir.join("config.json"),
        model: dir.join(default_model_file()),
        voices: dir.join(default_voices_file()),
    };
    for path in [&files.config, &files.model, &files.voices] {
        if !path.is_file() {
            bail!("model directory is missing {}", path.display());
        }
    }
    Ok(files)
}

/// Fetch the three model files through the hub cache
/// (`~/.cache/huggingface/hub` by default — repeat loads are local).
fn download_files(repo_id: &str) -> Result<ModelFiles> {
    tracing::info!(repo_id, "downloading model files");
    let api = Api::new().context("failed to initialise HuggingFace Hub client")?;
    let repo = api.model(repo_id.to_string());

    let get = |filename: &str| {
        repo.get(filename)
            .with_context(|| format!("failed to download '{}' from '{}'", filename, repo_id))
    };

    let config = get("config.json")?;
    let config_bytes = std::fs::read(&config)
        .with_context(|| format!("cannot read config: {}", config.display()))?;
    let parsed: ModelConfig =
        serde_json::from_slice(&config_bytes).context("failed to parse config.json")?;

    Ok(ModelFiles {
        model: get(&parsed.model_file)?,
        voices: get(&parsed.voices)?,
        config,
    })
}

fn parse_vocab(raw: HashMap<String, i64>) -> Result<HashMap<char, i64>> {
    let mut vocab = HashMap::with_capacity(raw.len());
    for (key, id) in raw {
        let mut chars = key.chars();
        let (Some(ch), None) = (chars.next(), chars.next()) else {
            bail!("vocab key {:?} is not a single character", key);
        };
        vocab.insert(ch, id);
    }
    Ok(vocab)
}

// ─────────────────────────────────────────────────────────────────────────────
// Voice store
// ─────────────────────────────────────────────────────────────────────────────

/// Per-voice style matrix, flat row-major `[N, 256]`.  Row index tracks the
/// token count of the utterance, keeping prosody consistent across lengths.
struct Voice {
    data: Vec<f32>,
}

impl Voice {
    /// Row at `idx`, clamped to the valid range.
    fn style_row(&self, idx: usize) -> &[f32] {
        let nrows = self.data.len() / STYLE_DIM;
        let i = idx.min(nrows.saturating_sub(1));
        &self.data[i * STYLE_DIM..(i + 1) * STYLE_DIM]
    }
}

/// Load the voices archive: a zip of `<voice>.npy` entries, each a float32
/// array whose element count is a multiple of [`STYLE_DIM`].
fn load_voices(path: &Path) -> Result<HashMap<String, Voice>> {
    let file = std::fs::File::open(path)?;
    let mut zip = zip::ZipArchive::new(file).context("voices archive is not a zip")?;

    let mut voices = HashMap::new();
    for i in 0..zip.len() {
        let mut entry = zip
            .by_index(i)
            .with_context(|| format!("cannot read voices entry {}", i))?;
        let raw_name = entry.name().to_string();
        if raw_name.ends_with('/') {
            continue;
        }
        let name = raw_name.trim_end_matches(".npy").to_string();

        let mut bytes = Vec::new();
        entry
            .read_to_end(&mut bytes)
            .with_context(|| format!("cannot read voices entry {}", raw_name))?;
        let data = parse_style_npy(&bytes)
            .with_context(|| format!("bad style array in {}", raw_name))?;
        voices.insert(name, Voice { data });
    }
    if voices.is_empty() {
        bail!("voices archive contains no voices");
    }
    Ok(voices)
}

/// Extract the flat float32 payload of a style `.npy` entry.
///
/// Shape handling is deliberately loose — exports ship `[N, 256]` and
/// `[N, 1, 256]` variants — so only the element count is validated.
fn parse_style_npy(data: &[u8]) -> Result<Vec<f32>> {
    if data.len() < 10 || &data[..6] != b"\x93NUMPY" {
        bail!("not a valid NPY entry");
    }
    let header_len = u16::from_le_bytes([data[8], data[9]]) as usize;
    let payload = data
        .get(10 + header_len..)
        .context("NPY entry truncated in header")?;
    if payload.len() % 4 != 0 {
        bail!("float payload length {} is not a multiple of 4", payload.len());
    }

    let floats: Vec<f32> = payload
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    if floats.is_empty() || floats.len() % STYLE_DIM != 0 {
        bail!(
            "style element count {} is not a positive multiple of {}",
            floats.len(),
            STYLE_DIM
        );
    }
    Ok(floats)
}

// ─────────────────────────────────────────────────────────────────────────────
// Phonemization
// ─────────────────────────────────────────────────────────────────────────────

/// espeak-ng language for a voice id.  The two-character prefix encodes the
/// language; unknown prefixes fall back to the configured default.
fn espeak_lang_for_voice<'a>(voice: &str, fallback: &'a str) -> &'a str {
    match voice.get(..2) {
        Some("af" | "am") => "en-us",
        Some("bf" | "bm") => "en-gb",
        Some("ef" | "em") => "es",
        Some("ff") => "fr",
        Some("hf" | "hm") => "hi",
        Some("if" | "im") => "it",
        Some("jf" | "jm") => "ja",
        Some("pf" | "pm") => "pt-br",
        Some("zf" | "zm") => "cmn",
        _ => fallback,
    }
}

/// espeak-ng language for a single-letter Kokoro language code.
fn espeak_lang_for_code(code: &str) -> &'static str {
    match code {
        "b" => "en-gb",
        "e" => "es",
        "f" => "fr",
        "h" => "hi",
        "i" => "it",
        "j" => "ja",
        "p" => "pt-br",
        "z" => "cmn",
        _ => "en-us",
    }
}

fn run_espeak(text: &str, lang: &str) -> Result<String> {
    let mut child = Command::new("espeak-ng")
        .args(["--ipa", "--stdin", "-q", "-v", lang])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                anyhow::anyhow!(
                    "espeak-ng not found — install it (apt/brew install espeak-ng)"
                )
            } else {
                anyhow::Error::from(e).context("failed to spawn espeak-ng")
            }
        })?;

    if let Some(mut stdin) = child.stdin.take() {
        // espeak-ng is line-oriented; an unterminated last line can be
        // under-processed.
        stdin.write_all(text.as_bytes())?;
        if !text.ends_with('\n') {
            stdin.write_all(b"\n")?;
        }
    }

    let output = child.wait_with_output().context("espeak-ng did not run")?;
    if !output.status.success() {
        bail!(
            "espeak-ng exited with {:?}: {}",
            output.status.code(),
            String::from_utf8_lossy(&output.stderr)
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Map IPA characters to token ids.  Characters missing from the vocab are
/// silently dropped, matching the reference tokenizer.
fn ipa_to_ids(ipa: &str, vocab: &HashMap<char, i64>) -> Vec<i64> {
    let mut ids = Vec::new();
    for line in ipa.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if !ids.is_empty() {
            // Line break inside one segment reads as a pause.
            if let Some(&space) = vocab.get(&' ') {
                ids.push(space);
            }
        }
        for ch in line.chars() {
            if ch == '_' {
                continue;
            }
            if let Some(&id) = vocab.get(&ch) {
                ids.push(id);
            }
        }
    }
    ids
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────────────────────────────────────

pub struct KokoroEngine {
    session: Mutex<Session>,
    tokens_input: String,
    voices: HashMap<String, Voice>,
    vocab: HashMap<char, i64>,
    fallback_lang: &'static str,
}

/// Pick the token-input name the export actually uses.
fn detect_tokens_input(session: &Session) -> String {
    session
        .inputs
        .iter()
        .map(|i| i.name.clone())
        .find(|name| name == "input_ids" || name == "tokens")
        .unwrap_or_else(|| "input_ids".to_string())
}

impl KokoroEngine {
    fn infer(&self, ids: Vec<i64>, voice: &str, speed: f32) -> Result<Vec<f32>> {
        let voice_data = self
            .voices
            .get(voice)
            .with_context(|| format!("voice '{}' not found in voices archive", voice))?;

        // Token sequence is zero-padded on both ends; the style row tracks
        // the unpadded token count.
        let style_row = voice_data.style_row(ids.len()).to_vec();
        let mut padded = Vec::with_capacity(ids.len() + 2);
        padded.push(0);
        padded.extend(ids);
        padded.push(0);
        let seq_len = padded.len();

        let t_tokens = Tensor::<i64>::from_array(([1usize, seq_len], padded))
            .context("failed to build token tensor")?;
        let t_style = Tensor::<f32>::from_array(([1usize, STYLE_DIM], style_row))
            .context("failed to build style tensor")?;
        let t_speed = Tensor::<f32>::from_array(([1usize], vec![speed]))
            .context("failed to build speed tensor")?;

        let mut session = self
            .session
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let outputs = session
            .run(ort::inputs![
                self.tokens_input.as_str() => t_tokens,
                "style" => t_style,
                "speed" => t_speed,
            ])
            .context("ONNX inference failed")?;

        // Output 0 is the waveform, shape [1, T] or [T].
        let (_shape, audio) = outputs[0]
            .try_extract_tensor::<f32>()
            .context("failed to extract audio tensor")?;
        Ok(audio.to_vec())
    }
}

impl SynthesisEngine for KokoroEngine {
    fn synthesize(&self, text: &str, voice: &str, speed: f32) -> Result<RawSegment> {
        let lang = espeak_lang_for_voice(voice, self.fallback_lang);
        let ipa = run_espeak(text, lang)
            .with_context(|| format!("phonemization failed for {:?}", text))?;
        let ids = ipa_to_ids(&ipa, &self.vocab);

        let audio = if ids.is_empty() {
            // Nothing speakable in the segment (e.g. bare punctuation).
            Some(Vec::new())
        } else {
            Some(self.infer(ids, voice, speed)?)
        };

        Ok(RawSegment::Structured {
            graphemes: text.to_string(),
            phonemes: ipa.trim().to_string(),
            audio,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab() -> HashMap<char, i64> {
        HashMap::from([(' ', 16), ('h', 50), ('ə', 25), ('l', 44), ('ˈ', 156)])
    }

    #[test]
    fn test_ipa_to_ids_drops_unknown_chars() {
        assert_eq!(ipa_to_ids("hə#l", &vocab()), vec![50, 25, 44]);
    }

    #[test]
    fn test_ipa_to_ids_skips_underscore_and_joins_lines() {
        assert_eq!(ipa_to_ids("h_ə\nl", &vocab()), vec![50, 25, 16, 44]);
    }

    #[test]
    fn test_voice_lang_prefixes() {
        assert_eq!(espeak_lang_for_voice("af_heart", "en-us"), "en-us");
        assert_eq!(espeak_lang_for_voice("bm_george", "en-us"), "en-gb");
        assert_eq!(espeak_lang_for_voice("zf_xiaobei", "en-us"), "cmn");
        assert_eq!(espeak_lang_for_voice("mystery", "fr"), "fr");
    }

    #[test]
    fn test_lang_code_mapping() {
        assert_eq!(espeak_lang_for_code("a"), "en-us");
        assert_eq!(espeak_lang_for_code("j"), "ja");
        assert_eq!(espeak_lang_for_code("unknown"), "en-us");
    }

    #[test]
    fn test_parse_vocab_rejects_multichar_keys() {
        let raw = HashMap::from([("ab".to_string(), 1i64)]);
        assert!(parse_vocab(raw).is_err());
    }

    #[test]
    fn test_style_row_clamps() {
        let voice = Voice { data: (0..STYLE_DIM * 2).map(|i| i as f32).collect() };
        assert_eq!(voice.style_row(0)[0], 0.0);
        assert_eq!(voice.style_row(1)[0], STYLE_DIM as f32);
        // Past the end clamps to the last row.
        assert_eq!(voice.style_row(500)[0], STYLE_DIM as f32);
    }

    #[test]
    fn test_parse_style_npy_accepts_loose_shapes() {
        let samples: Vec<f32> = (0..STYLE_DIM).map(|i| i as f32).collect();
        let buf = crate::npy::to_npy_1d(&samples);
        let parsed = parse_style_npy(&buf).unwrap();
        assert_eq!(parsed.len(), STYLE_DIM);
        assert_eq!(parsed[10], 10.0);
    }

    #[test]
    fn test_parse_style_npy_rejects_partial_rows() {
        let buf = crate::npy::to_npy_1d(&[0.0f32; 100]);
        assert!(parse_style_npy(&buf).is_err());
    }
}
