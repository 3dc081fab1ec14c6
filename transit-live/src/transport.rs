//! Realtime websocket feed.
//!
//! Binary frames carry encoded messages and go straight into the session.
//! Text frames are ignored. Ping/pong is answered by tungstenite.

use futures_util::StreamExt;
use thiserror::Error;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info};

use crate::session::{FeedSession, Ingested, SessionError};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Counters for one `listen` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenStats {
    pub messages: usize,
    pub rejected: usize,
    pub ignored_frames: usize,
}

/// Connect to `url` and feed every binary frame to `session` until the
/// server closes the stream or `limit` messages have been ingested.
///
/// `on_message` sees the session right after each message is reconciled.
pub async fn listen<H, F>(
    url: &str,
    session: &mut FeedSession<H>,
    limit: Option<usize>,
    mut on_message: F,
) -> Result<ListenStats, TransportError>
where
    F: FnMut(&FeedSession<H>, &Ingested),
{
    info!(%url, "connecting to realtime feed");
    let (mut ws, _response) = tokio_tungstenite::connect_async(url).await?;
    info!(%url, "connected");

    let mut stats = ListenStats::default();
    if limit == Some(0) {
        return Ok(stats);
    }

    while let Some(frame) = ws.next().await {
        match frame? {
            Message::Binary(bytes) => {
                stats.messages += 1;
                let ingested = session.ingest(bytes).await?;
                if matches!(ingested, Ingested::Rejected(_)) {
                    stats.rejected += 1;
                }
                on_message(session, &ingested);

                if limit.is_some_and(|n| stats.messages >= n) {
                    debug!(messages = stats.messages, "message limit reached");
                    if let Err(e) = ws.close(None).await {
                        debug!(error = %e, "close handshake failed");
                    }
                    break;
                }
            }
            Message::Close(frame) => {
                info!(?frame, "feed closed by server");
                break;
            }
            Message::Text(text) => {
                stats.ignored_frames += 1;
                debug!(len = text.len(), "ignoring text frame");
            }
            _ => {}
        }
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::DecodeWorker;
    use futures_util::SinkExt;
    use tokio::net::TcpListener;
    use transit_core::config::WorkerConfig;
    use transit_core::{Envelope, Payload, Pipeline, PROTOCOL_V1};

    fn vehicle_message(lat: f64) -> Vec<u8> {
        Envelope::new(
            PROTOCOL_V1,
            Payload::Vehicles(vec![vec![
                "v1".into(),
                "6".into(),
                "t".into(),
                lat.into(),
                15.0.into(),
            ]]),
        )
        .to_cbor()
        .unwrap()
    }

    /// Serve `frames` to the first client, then close.
    async fn serve(frames: Vec<Message>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            for frame in frames {
                if ws.send(frame).await.is_err() {
                    return;
                }
            }
            let _ = ws.close(None).await;
            while let Some(Ok(_)) = ws.next().await {}
        });
        format!("ws://{addr}/v1/ws")
    }

    #[tokio::test]
    async fn test_listen_until_close() {
        let url = serve(vec![
            Message::Binary(vehicle_message(45.0)),
            Message::Text("hello".into()),
            Message::Binary(vec![0xff, 0x00]),
            Message::Binary(vehicle_message(45.001)),
        ])
        .await;

        let worker = DecodeWorker::spawn(Pipeline::default(), &WorkerConfig::default());
        let mut session: FeedSession = FeedSession::new(worker.handle());
        let mut seen = Vec::new();
        let stats = listen(&url, &mut session, None, |s, _| seen.push(s.tracker().total_messages))
            .await
            .unwrap();

        assert_eq!(
            stats,
            ListenStats {
                messages: 3,
                rejected: 1,
                ignored_frames: 1,
            }
        );
        assert_eq!(seen, [1, 2, 3]);
        let v1 = session.tracker().vehicle("v1").unwrap();
        assert_eq!(v1.entity.lat, 45.001);
        assert_eq!(v1.entity.move_angle, Some(std::f64::consts::FRAC_PI_2));

        drop(session);
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_listen_limit() {
        let url = serve(vec![
            Message::Binary(vehicle_message(45.0)),
            Message::Binary(vehicle_message(45.1)),
            Message::Binary(vehicle_message(45.2)),
        ])
        .await;

        let worker = DecodeWorker::spawn(Pipeline::default(), &WorkerConfig::default());
        let mut session: FeedSession = FeedSession::new(worker.handle());
        let stats = listen(&url, &mut session, Some(2), |_, _| {}).await.unwrap();
        assert_eq!(stats.messages, 2);
        assert_eq!(session.tracker().vehicle("v1").unwrap().entity.lat, 45.1);

        drop(session);
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let worker = DecodeWorker::spawn(Pipeline::default(), &WorkerConfig::default());
        let mut session: FeedSession = FeedSession::new(worker.handle());
        let err = listen(&format!("ws://{addr}"), &mut session, None, |_, _| {})
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::WebSocket(_)));
    }
}
