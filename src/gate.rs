//! Engine readiness gate.
//!
//! Model load takes seconds; requests must neither block the transport nor
//! each trigger their own load.  The gate starts one background load at
//! construction and publishes the outcome on a watch channel.  Requests wait
//! on the channel; if the background load failed, exactly one more synchronous
//! attempt is made (single-flight across concurrent requests), after which
//! the gate fails fast for the rest of the process lifetime.

use std::sync::Arc;

use tokio::sync::watch;

use crate::engine::EngineHandle;
use crate::error::{Result, SpeakError};

/// Engine construction closure.  Runs on a blocking thread; may be invoked
/// at most twice (background attempt plus one fallback).
pub type EngineLoader = Arc<dyn Fn() -> anyhow::Result<EngineHandle> + Send + Sync>;

#[derive(Clone)]
enum GateState {
    Loading,
    Ready(EngineHandle),
    Failed(String),
}

/// Gate guarding access to the synthesis engine.
pub struct EngineGate {
    tx: watch::Sender<GateState>,
    loader: EngineLoader,
    /// `true` once the fallback attempt has been consumed.
    fallback_spent: tokio::sync::Mutex<bool>,
}

impl EngineGate {
    /// Start the background load immediately and return the gate.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(loader: EngineLoader) -> Arc<Self> {
        let (tx, _rx) = watch::channel(GateState::Loading);
        let gate = Arc::new(Self {
            tx,
            loader,
            fallback_spent: tokio::sync::Mutex::new(false),
        });

        let background = Arc::clone(&gate);
        tokio::spawn(async move {
            tracing::info!("loading speech engine in background");
            let state = background.run_loader().await;
            if let GateState::Failed(msg) = &state {
                tracing::error!(error = %msg, "background engine load failed");
            } else {
                tracing::info!("speech engine ready");
            }
            let _ = background.tx.send(state);
        });
        gate
    }

    /// Gate that is ready from the start.  Test and embedding convenience.
    pub fn ready(handle: EngineHandle) -> Arc<Self> {
        let loader: EngineLoader = {
            let handle = Arc::clone(&handle);
            Arc::new(move || Ok(Arc::clone(&handle)))
        };
        let (tx, _rx) = watch::channel(GateState::Ready(handle));
        Arc::new(Self {
            tx,
            loader,
            fallback_spent: tokio::sync::Mutex::new(true),
        })
    }

    async fn run_loader(&self) -> GateState {
        let loader = Arc::clone(&self.loader);
        match tokio::task::spawn_blocking(move || loader()).await {
            Ok(Ok(handle)) => GateState::Ready(handle),
            Ok(Err(e)) => GateState::Failed(format!("{:#}", e)),
            Err(join) => GateState::Failed(format!("engine loader panicked: {}", join)),
        }
    }

    fn current(&self) -> GateState {
        self.tx.borrow().clone()
    }

    /// Wait for the engine, retrying the load once if the background attempt
    /// failed.
    ///
    /// Concurrent callers share a single fallback attempt: whichever caller
    /// reaches the retry first runs it, the rest observe its outcome.  Once
    /// the fallback is spent the gate answers instantly.
    pub async fn acquire(&self) -> Result<EngineHandle> {
        let mut rx = self.tx.subscribe();
        let settled = rx
            .wait_for(|s| !matches!(s, GateState::Loading))
            .await
            .map(|s| s.clone())
            .unwrap_or_else(|_| self.current());

        let failure = match settled {
            GateState::Ready(handle) => return Ok(handle),
            GateState::Failed(msg) => msg,
            GateState::Loading => unreachable!("wait_for settled on Loading"),
        };

        let mut spent = self.fallback_spent.lock().await;

        // Another caller may have completed the fallback while this one
        // waited on the lock.
        match self.current() {
            GateState::Ready(handle) => return Ok(handle),
            GateState::Failed(msg) if *spent => return Err(SpeakError::EngineUnavailable(msg)),
            _ => {}
        }

        *spent = true;
        tracing::warn!(error = %failure, "background load failed, retrying synchronously");
        let state = self.run_loader().await;
        let _ = self.tx.send(state.clone());
        match state {
            GateState::Ready(handle) => Ok(handle),
            GateState::Failed(msg) => Err(SpeakError::EngineUnavailable(msg)),
            GateState::Loading => unreachable!(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{RawSegment, SynthesisEngine};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NullEngine;

    impl SynthesisEngine for NullEngine {
        fn synthesize(&self, _: &str, _: &str, _: f32) -> anyhow::Result<RawSegment> {
            Ok(RawSegment::Triple(String::new(), String::new(), Some(vec![0.0])))
        }
    }

    fn counting_loader(
        fail_first: usize,
    ) -> (EngineLoader, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let loader_calls = Arc::clone(&calls);
        let loader: EngineLoader = Arc::new(move || {
            let n = loader_calls.fetch_add(1, Ordering::SeqCst);
            if n < fail_first {
                anyhow::bail!("model file missing (attempt {})", n);
            }
            Ok(Arc::new(NullEngine) as EngineHandle)
        });
        (loader, calls)
    }

    #[tokio::test]
    async fn test_acquire_after_successful_background_load() {
        let (loader, calls) = counting_loader(0);
        let gate = EngineGate::spawn(loader);
        assert!(gate.acquire().await.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fallback_recovers_from_background_failure() {
        let (loader, calls) = counting_loader(1);
        let gate = EngineGate::spawn(loader);
        assert!(gate.acquire().await.is_ok());
        // Later acquires hit the published handle without reloading.
        assert!(gate.acquire().await.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fail_fast_after_fallback_failure() {
        let (loader, calls) = counting_loader(usize::MAX);
        let gate = EngineGate::spawn(loader);

        let err = gate.acquire().await.err().unwrap();
        assert!(matches!(err, SpeakError::EngineUnavailable(_)));
        // Second acquire must not trigger a third load attempt.
        let err = gate.acquire().await.err().unwrap();
        assert!(matches!(err, SpeakError::EngineUnavailable(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_acquires_share_one_fallback() {
        let (loader, calls) = counting_loader(1);
        let gate = EngineGate::spawn(loader);

        let (a, b) = tokio::join!(gate.acquire(), gate.acquire());
        assert!(a.is_ok());
        assert!(b.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_ready_gate_never_loads() {
        let gate = EngineGate::ready(Arc::new(NullEngine));
        assert!(gate.acquire().await.is_ok());
    }
}
