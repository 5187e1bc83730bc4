//! Dedicated embedding worker thread.
//!
//! The model is heavy to load (download plus ONNX session init) and inference
//! can take hundreds of milliseconds, so neither may run on a request thread.
//! Callers submit (text, reply-channel) requests over an mpsc channel; the
//! worker owns the model and answers asynchronously.
//!
//! Lazy loading happens on the worker thread itself, so concurrent first
//! callers queue behind a single load instead of triggering redundant ones.
//! The loaded model lives for the process lifetime.

use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Mutex;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::semantic::embeddings::{EmbeddingError, EmbeddingModel};

enum Request {
    Embed {
        text: String,
        reply: mpsc::Sender<Result<Vec<f32>, EmbeddingError>>,
    },
    Preload {
        reply: mpsc::Sender<bool>,
    },
    Shutdown,
}

/// Handle to the embedding worker thread.
///
/// Cheap to share behind an `Arc`; all methods take `&self`.
pub struct EmbeddingWorker {
    tx: mpsc::Sender<Request>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl EmbeddingWorker {
    /// Spawn the worker thread. The model is not loaded until the first
    /// embed or preload request arrives.
    pub fn spawn(model_name: String, cache_dir: PathBuf, download_timeout: Duration) -> Self {
        let (tx, rx) = mpsc::channel::<Request>();

        let handle = std::thread::Builder::new()
            .name("embedding-worker".to_string())
            .spawn(move || worker_loop(rx, model_name, cache_dir, download_timeout))
            .expect("failed to spawn embedding worker thread");

        Self {
            tx,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Embed text, blocking until the worker answers.
    ///
    /// Used by background tasks that have no caller waiting on them.
    pub fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.tx
            .send(Request::Embed {
                text: text.to_string(),
                reply: reply_tx,
            })
            .map_err(|_| EmbeddingError::WorkerGone)?;

        reply_rx.recv().map_err(|_| EmbeddingError::WorkerGone)?
    }

    /// Embed text, giving up after `timeout`.
    ///
    /// A timed-out caller simply abandons its reply channel; the worker and
    /// its loaded model are unaffected and will serve the next request.
    pub fn embed_timeout(
        &self,
        text: &str,
        timeout: Duration,
    ) -> Result<Vec<f32>, EmbeddingError> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.tx
            .send(Request::Embed {
                text: text.to_string(),
                reply: reply_tx,
            })
            .map_err(|_| EmbeddingError::WorkerGone)?;

        match reply_rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(EmbeddingError::Timeout(timeout)),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(EmbeddingError::WorkerGone),
        }
    }

    /// Load the model without embedding anything, to mask first-use latency.
    /// Returns whether the model became ready.
    pub fn preload(&self) -> bool {
        let (reply_tx, reply_rx) = mpsc::channel();
        if self
            .tx
            .send(Request::Preload { reply: reply_tx })
            .is_err()
        {
            return false;
        }
        reply_rx.recv().unwrap_or(false)
    }

    /// Stop the worker and wait for it to exit.
    pub fn shutdown(&self) {
        let _ = self.tx.send(Request::Shutdown);
        if let Ok(mut guard) = self.handle.lock() {
            if let Some(handle) = guard.take() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for EmbeddingWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(
    rx: mpsc::Receiver<Request>,
    model_name: String,
    cache_dir: PathBuf,
    download_timeout: Duration,
) {
    // Owned exclusively by this thread; requests serialize here, which is
    // what makes the lazy load single-flight.
    let mut model: Option<EmbeddingModel> = None;

    let ensure_model =
        |model: &mut Option<EmbeddingModel>| -> Result<(), EmbeddingError> {
            if model.is_none() {
                log::info!("loading embedding model '{model_name}'");
                let loaded =
                    EmbeddingModel::new(&model_name, cache_dir.clone(), Some(download_timeout))?;
                log::info!("embedding model '{model_name}' ready");
                *model = Some(loaded);
            }
            Ok(())
        };

    while let Ok(request) = rx.recv() {
        match request {
            Request::Embed { text, reply } => {
                let result = match ensure_model(&mut model) {
                    Ok(()) => model
                        .as_ref()
                        .expect("model present after ensure_model")
                        .embed(&text),
                    Err(err) => {
                        log::error!("embedding model load failed: {err}");
                        Err(err)
                    }
                };
                // the caller may have timed out and dropped its receiver
                let _ = reply.send(result);
            }
            Request::Preload { reply } => {
                let ready = match ensure_model(&mut model) {
                    Ok(()) => true,
                    Err(err) => {
                        log::error!("embedding model preload failed: {err}");
                        false
                    }
                };
                let _ = reply.send(ready);
            }
            Request::Shutdown => break,
        }
    }

    log::debug!("embedding worker stopped");
}
