//! File-descriptor level stdout protection.
//!
//! Stdout carries the RPC channel, and the native inference stack prints
//! banners and progress bars straight to fd 1 where Rust-level capture cannot
//! reach them.  [`StdoutToStderr`] rebinds fd 1 to stderr for its lifetime so
//! anything the engine prints lands in the log stream instead of corrupting
//! the protocol.

#[cfg(unix)]
use std::io::Write;
#[cfg(unix)]
use std::sync::{Mutex, MutexGuard};

#[cfg(unix)]
static REDIRECT_LOCK: Mutex<()> = Mutex::new(());

/// RAII guard: while alive, writes to fd 1 go to stderr.
///
/// Only one redirection is active at a time; constructing a second guard
/// blocks until the first is dropped.  On non-unix targets this is a no-op.
pub struct StdoutToStderr {
    #[cfg(unix)]
    saved_stdout: libc::c_int,
    #[cfg(unix)]
    _lock: MutexGuard<'static, ()>,
}

impl StdoutToStderr {
    #[cfg(unix)]
    pub fn new() -> std::io::Result<Self> {
        let lock = REDIRECT_LOCK.lock().unwrap_or_else(|e| e.into_inner());

        // Flush Rust-side buffers before touching the descriptor, so buffered
        // protocol output is not dragged along into stderr.
        std::io::stdout().flush()?;

        // SAFETY: plain descriptor duplication on known-valid fds 1 and 2.
        let saved_stdout = unsafe { libc::dup(libc::STDOUT_FILENO) };
        if saved_stdout < 0 {
            return Err(std::io::Error::last_os_error());
        }
        if unsafe { libc::dup2(libc::STDERR_FILENO, libc::STDOUT_FILENO) } < 0 {
            let err = std::io::Error::last_os_error();
            unsafe { libc::close(saved_stdout) };
            return Err(err);
        }
        Ok(Self { saved_stdout, _lock: lock })
    }

    #[cfg(not(unix))]
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {})
    }
}

impl Drop for StdoutToStderr {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            // Anything the redirected code buffered should land on stderr,
            // not leak onto the restored protocol stream.
            let _ = std::io::stdout().flush();
            // SAFETY: restoring the descriptor saved in `new`.
            unsafe {
                libc::dup2(self.saved_stdout, libc::STDOUT_FILENO);
                libc::close(self.saved_stdout);
            }
        }
    }
}
