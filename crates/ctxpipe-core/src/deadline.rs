//! Bounded execution for model calls.
//!
//! The closure runs on a worker thread. When the deadline passes the caller
//! gets [`Error::Timeout`]; the worker is detached and its result discarded.

use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

pub fn run_with_timeout<T, F>(
    operation: &str,
    timeout: Option<Duration>,
    f: F,
) -> Result<anyhow::Result<T>>
where
    T: Send + 'static,
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
{
    let Some(timeout) = timeout else {
        return Ok(f());
    };
    let started = Instant::now();
    let (tx, rx) = mpsc::sync_channel(1);
    thread::Builder::new()
        .name(format!("ctxpipe-{operation}"))
        .spawn(move || {
            let _ = tx.send(f());
        })
        .map_err(|e| Error::Operation(format!("failed to spawn {operation} worker: {e}")))?;
    match rx.recv_timeout(timeout) {
        Ok(result) => Ok(result),
        Err(mpsc::RecvTimeoutError::Timeout) => Err(Error::Timeout {
            operation: operation.to_string(),
            elapsed: started.elapsed(),
        }),
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            Err(Error::Operation(format!("{operation} worker panicked")))
        }
    }
}
