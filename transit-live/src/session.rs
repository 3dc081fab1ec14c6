//! A decode worker paired with the tracker it feeds.

use thiserror::Error;
use tracing::{debug, info, warn};

use transit_core::{FeedError, TrackEvent, Tracker};

use crate::worker::{ErrorDescriptor, WorkerError, WorkerHandle, WorkerResponse};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Worker(#[from] WorkerError),
}

/// What happened to one ingested message.
#[derive(Debug, Clone, PartialEq)]
pub enum Ingested {
    Applied(Vec<TrackEvent>),
    /// The message was dropped; tracked state is unchanged.
    Rejected(ErrorDescriptor),
}

/// Sequential consumer of raw feed messages.
///
/// `ingest` takes `&mut self`, so one message is fully reconciled before the
/// next is looked at, in arrival order.
#[derive(Debug)]
pub struct FeedSession<H = ()> {
    worker: WorkerHandle,
    tracker: Tracker<H>,
}

impl<H> FeedSession<H> {
    pub fn new(worker: WorkerHandle) -> Self {
        FeedSession {
            worker,
            tracker: Tracker::new(),
        }
    }

    pub fn tracker(&self) -> &Tracker<H> {
        &self.tracker
    }

    /// Mutable access for attaching and detaching view handles.
    pub fn tracker_mut(&mut self) -> &mut Tracker<H> {
        &mut self.tracker
    }

    /// Decode `bytes` on the worker, then reconcile the result.
    ///
    /// Only worker failures (gone, timed out) are errors; a bad message is
    /// `Ok(Ingested::Rejected)`.
    pub async fn ingest(&mut self, bytes: Vec<u8>) -> Result<Ingested, SessionError> {
        let response = self.worker.process(bytes).await.inspect_err(|e| {
            self.tracker.record_rejected();
            warn!(error = %e, "decode worker unavailable");
        })?;

        match response {
            WorkerResponse::ProcessedMessage { data, .. } => match self.tracker.apply(&data) {
                Ok(events) => {
                    let new = events
                        .iter()
                        .filter(|e| matches!(e, TrackEvent::NewVehicle { .. } | TrackEvent::NewStop { .. }))
                        .count();
                    if new > 0 {
                        info!(new, total = self.tracker.vehicles.len(), "new entities tracked");
                    }
                    debug!(
                        generation = self.tracker.generation,
                        events = events.len(),
                        "applied message"
                    );
                    Ok(Ingested::Applied(events))
                }
                Err(err) => {
                    let err = FeedError::from(err);
                    warn!(kind = err.kind(), error = %err, "message failed row decoding; keeping previous state");
                    Ok(Ingested::Rejected(ErrorDescriptor::from(&err)))
                }
            },
            WorkerResponse::Rejected { error, .. } => {
                self.tracker.record_rejected();
                Ok(Ingested::Rejected(error))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::DecodeWorker;
    use transit_core::config::WorkerConfig;
    use transit_core::{Envelope, Payload, Pipeline, Primitive, PROTOCOL_V1};

    fn vehicles(rows: Vec<Vec<Primitive>>) -> Vec<u8> {
        Envelope::new(PROTOCOL_V1, Payload::Vehicles(rows)).to_cbor().unwrap()
    }

    fn row(id: &str, lat: f64, lng: f64) -> Vec<Primitive> {
        vec![id.into(), "6".into(), "trip".into(), lat.into(), lng.into()]
    }

    #[tokio::test]
    async fn test_ingest_applies_and_rejects() {
        let worker = DecodeWorker::spawn(Pipeline::default(), &WorkerConfig::default());
        let mut session: FeedSession<String> = FeedSession::new(worker.handle());

        let out = session.ingest(vehicles(vec![row("v1", 45.0, 15.0)])).await.unwrap();
        assert!(matches!(out, Ingested::Applied(ref e) if e.len() == 1));

        session
            .tracker_mut()
            .vehicle_mut("v1")
            .unwrap()
            .attach_view("marker-1".to_string());

        // short row: decodes and validates, fails the codec
        let short = vehicles(vec![vec!["v1".into(), "6".into(), "trip".into()]]);
        let Ingested::Rejected(err) = session.ingest(short).await.unwrap() else {
            panic!("expected rejection");
        };
        assert_eq!(err.kind, "decode_arity");

        // corrupt bytes: rejected by the worker
        let Ingested::Rejected(err) = session.ingest(vec![0x1f]).await.unwrap() else {
            panic!("expected rejection");
        };
        assert_eq!(err.kind, "deserialize");

        let tracked = session.tracker().vehicle("v1").unwrap();
        assert_eq!(tracked.entity.lat, 45.0);
        assert_eq!(tracked.view().map(String::as_str), Some("marker-1"));
        assert_eq!(session.tracker().total_messages, 3);
        assert_eq!(session.tracker().rejected_messages, 2);

        drop(session);
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_worker_gone() {
        let mut session: FeedSession = FeedSession::new(WorkerHandle::closed());
        let err = session.ingest(vehicles(vec![])).await.unwrap_err();
        assert!(matches!(err, SessionError::Worker(WorkerError::Closed)));
        assert_eq!(session.tracker().rejected_messages, 1);
    }
}
