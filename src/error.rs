//! Error taxonomy for the speak pipeline.
//!
//! Component failures stay typed inside the crate and are flattened into a
//! user-facing string at the speak boundary — nothing crosses the RPC
//! transport as a raw error.

/// Failure modes of a single speak request.
#[derive(Debug, thiserror::Error)]
pub enum SpeakError {
    /// Engine initialization never succeeded; terminal for the process.
    #[error("speech engine failed to initialize: {0}")]
    EngineUnavailable(String),

    /// The engine raised while producing a segment.
    #[error("synthesis failed: {0}")]
    Engine(String),

    /// A segment result could not be interpreted as audio.
    #[error("segment {index}: engine result carried no audio")]
    MalformedSegment { index: usize },

    /// The output device refused a buffer or failed mid-play.
    #[error("audio playback failed: {0}")]
    Playback(String),

    /// Durable-storage read/write error.  Always non-fatal to the request:
    /// reads degrade to a cache miss, writes to "played but not cached".
    #[error("cache I/O failed: {0}")]
    Cache(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SpeakError>;
