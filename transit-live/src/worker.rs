//! Isolated decode worker.
//!
//! A tokio task owns the [`Pipeline`] and serves requests from an mpsc
//! queue, one at a time and in arrival order. Each message is decoded on the
//! blocking pool so large payloads never stall the runtime, and every
//! accepted request gets exactly one response through its oneshot reply:
//! `processed-message` on success, `rejected-message` with a structured
//! [`ErrorDescriptor`] otherwise.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use transit_core::config::WorkerConfig;
use transit_core::{Envelope, FeedError, Pipeline, Timings};

// ---------------------------------------------------------------------------
// Protocol
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WorkerRequest {
    /// Decode and validate one raw message. The buffer moves into the
    /// request and is dropped by the worker.
    ProcessMessage { data: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WorkerResponse {
    ProcessedMessage { data: Envelope, timings: TimingsMs },
    #[serde(rename = "rejected-message")]
    Rejected { error: ErrorDescriptor, timings: TimingsMs },
}

/// Pipeline timings in fractional milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct TimingsMs {
    pub decode_ms: f64,
    pub validate_ms: f64,
    pub total_ms: f64,
}

impl From<Timings> for TimingsMs {
    fn from(t: Timings) -> Self {
        TimingsMs {
            decode_ms: t.decode.as_secs_f64() * 1e3,
            validate_ms: t.validate.as_secs_f64() * 1e3,
            total_ms: t.total.as_secs_f64() * 1e3,
        }
    }
}

/// Structured rejection reason sent back to the requester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorDescriptor {
    /// Machine-readable kind, e.g. `unsupported_version`, `decode_arity`.
    pub kind: String,
    pub message: String,
    /// Location inside the message, when known (`d.vehicles[2][3]`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl From<&FeedError> for ErrorDescriptor {
    fn from(err: &FeedError) -> Self {
        let path = match err {
            FeedError::Validation(e) => Some(e.path().to_string()),
            _ => None,
        };
        ErrorDescriptor {
            kind: err.kind().to_string(),
            message: err.to_string(),
            path,
        }
    }
}

impl WorkerResponse {
    pub fn timings(&self) -> TimingsMs {
        match self {
            WorkerResponse::ProcessedMessage { timings, .. } | WorkerResponse::Rejected { timings, .. } => {
                *timings
            }
        }
    }
}

/// Handle one request. Runs synchronously on the caller's thread.
pub fn dispatch(pipeline: &Pipeline, request: WorkerRequest) -> WorkerResponse {
    match request {
        WorkerRequest::ProcessMessage { data } => {
            let outcome = pipeline.process(&data);
            let timings = TimingsMs::from(outcome.timings);
            match outcome.result {
                Ok(envelope) => {
                    debug!(
                        version = envelope.version,
                        payload = envelope.data.key(),
                        rows = envelope.data.len(),
                        decode_ms = timings.decode_ms,
                        validate_ms = timings.validate_ms,
                        total_ms = timings.total_ms,
                        "processed message"
                    );
                    WorkerResponse::ProcessedMessage {
                        data: envelope,
                        timings,
                    }
                }
                Err(err) => {
                    let descriptor = ErrorDescriptor::from(&err);
                    warn!(
                        kind = %descriptor.kind,
                        path = descriptor.path.as_deref().unwrap_or("-"),
                        bytes = data.len(),
                        decode_ms = timings.decode_ms,
                        validate_ms = timings.validate_ms,
                        total_ms = timings.total_ms,
                        error = %err,
                        "rejected message"
                    );
                    WorkerResponse::Rejected {
                        error: descriptor,
                        timings,
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Worker task
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("decode worker is not running")]
    Closed,
    #[error("decode worker did not respond within {0:?}")]
    Timeout(Duration),
}

struct Job {
    request: WorkerRequest,
    reply: oneshot::Sender<WorkerResponse>,
}

/// Cloneable sender side of the worker queue.
#[derive(Clone)]
pub struct WorkerHandle {
    tx: mpsc::Sender<Job>,
    timeout: Duration,
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("timeout", &self.timeout)
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl WorkerHandle {
    /// Send a request and wait for its response.
    ///
    /// The configured timeout covers both queueing and processing.
    pub async fn request(&self, request: WorkerRequest) -> Result<WorkerResponse, WorkerError> {
        let (reply, rx) = oneshot::channel();
        let roundtrip = async {
            self.tx
                .send(Job { request, reply })
                .await
                .map_err(|_| WorkerError::Closed)?;
            rx.await.map_err(|_| WorkerError::Closed)
        };
        tokio::time::timeout(self.timeout, roundtrip)
            .await
            .map_err(|_| WorkerError::Timeout(self.timeout))?
    }

    /// Shorthand for a `process-message` request.
    pub async fn process(&self, data: Vec<u8>) -> Result<WorkerResponse, WorkerError> {
        self.request(WorkerRequest::ProcessMessage { data }).await
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[cfg(test)]
impl WorkerHandle {
    /// A handle whose worker is already gone.
    pub(crate) fn closed() -> Self {
        let (tx, _) = mpsc::channel(1);
        WorkerHandle {
            tx,
            timeout: Duration::from_secs(1),
        }
    }
}

/// The running worker task.
#[derive(Debug)]
pub struct DecodeWorker {
    handle: WorkerHandle,
    task: JoinHandle<()>,
}

impl DecodeWorker {
    /// Start the worker on the current tokio runtime.
    pub fn spawn(pipeline: Pipeline, config: &WorkerConfig) -> DecodeWorker {
        let pipeline = Arc::new(pipeline.with_max_message_bytes(config.max_message_bytes));
        let (tx, rx) = mpsc::channel(config.queue_depth.max(1));
        let task = tokio::spawn(run(pipeline, rx));
        DecodeWorker {
            handle: WorkerHandle {
                tx,
                timeout: Duration::from_millis(config.timeout_ms),
            },
            task,
        }
    }

    pub fn handle(&self) -> WorkerHandle {
        self.handle.clone()
    }

    /// Stop accepting work from this handle and wait for queued requests to
    /// drain. Other live clones keep the task running until they drop.
    pub async fn shutdown(self) {
        drop(self.handle);
        if let Err(e) = self.task.await {
            error!(error = %e, "decode worker task failed");
        }
    }
}

async fn run(pipeline: Arc<Pipeline>, mut rx: mpsc::Receiver<Job>) {
    debug!("decode worker started");
    while let Some(Job { request, reply }) = rx.recv().await {
        let pipeline = Arc::clone(&pipeline);
        let response = match tokio::task::spawn_blocking(move || dispatch(&pipeline, request)).await {
            Ok(response) => response,
            Err(e) => {
                error!(error = %e, "decode job panicked");
                WorkerResponse::Rejected {
                    error: ErrorDescriptor {
                        kind: "internal".into(),
                        message: e.to_string(),
                        path: None,
                    },
                    timings: TimingsMs::default(),
                }
            }
        };
        if reply.send(response).is_err() {
            debug!("requester dropped before the response was ready");
        }
    }
    debug!("decode worker stopped");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
