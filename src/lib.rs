//! Kokoro text-to-speech speak tools, served over stdio JSON-RPC.
//!
//! The crate turns "speak this text" requests into audio on the system output
//! device, with three properties the server shape depends on:
//!
//! - **Non-blocking startup** — the neural engine loads in the background
//!   behind a readiness gate ([`gate::EngineGate`]); requests wait for it
//!   instead of racing it, and a failed load gets exactly one retry before
//!   the gate fails fast.
//! - **Content-addressed caching** — synthesized audio is stored under the
//!   SHA-256 of its `text|voice|speed` identity ([`cache::AudioCache`]), so a
//!   repeated phrase replays instantly without engine work.
//! - **Streaming playback** — long texts are segmented at sentence and line
//!   boundaries and played while later segments are still synthesizing
//!   ([`adapter`], [`stream`]).
//!
//! The library compiles without any inference stack; implement
//! [`engine::SynthesisEngine`] to plug in an engine, or enable the `kokoro`
//! feature for the bundled ONNX one.
//!
//! ```no_run
//! use std::sync::Arc;
//! use mcp_kokoro::{cache::AudioCache, gate::{EngineGate, EngineLoader},
//!     playback::RodioOutput, speak::SpeakService};
//!
//! # async fn demo(loader: EngineLoader) {
//! let gate = EngineGate::spawn(loader);
//! let cache = AudioCache::in_user_cache(None);
//! let service = SpeakService::new(gate, cache, Arc::new(RodioOutput));
//! println!("{}", service.speak("Hello there.", None, None).await);
//! # }
//! ```

pub mod adapter;
pub mod cache;
pub mod engine;
pub mod error;
pub mod gate;
#[cfg(feature = "kokoro")]
pub mod kokoro;
pub mod npy;
pub mod playback;
pub mod rpc;
pub mod speak;
pub mod stdio;
pub mod stream;

pub use engine::{EngineConfig, EngineHandle, RawSegment, SynthesisEngine, Utterance, SAMPLE_RATE};
pub use error::{Result, SpeakError};
pub use speak::{SpeakService, DEFAULT_SPEED, DEFAULT_VOICE};
