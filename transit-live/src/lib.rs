//! transit-live: async shell around transit-core.
//!
//! Decoding runs in an isolated worker task so message bursts never stall
//! the caller; a [`session::FeedSession`] pairs that worker with a
//! [`transit_core::Tracker`], and [`transport`] feeds it from the realtime
//! websocket.

pub mod logging;
pub mod session;
pub mod transport;
pub mod worker;

pub use session::{FeedSession, Ingested, SessionError};
pub use worker::{DecodeWorker, ErrorDescriptor, WorkerError, WorkerHandle, WorkerRequest, WorkerResponse};
