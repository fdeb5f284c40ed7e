//! HTTP surface: the multipart stream on `/`, a single-frame snapshot and the
//! background reset trigger.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};
use tracing::info;

use super::mjpeg::{multipart_stream, FramePacket, BOUNDARY};

#[derive(Clone)]
struct ServerState {
    frames: watch::Receiver<Option<FramePacket>>,
    reset: Arc<AtomicBool>,
}

fn router(state: ServerState) -> Router {
    Router::new()
        .route("/", get(video_feed))
        .route("/frame.jpg", get(snapshot))
        .route("/reset", post(request_reset))
        .with_state(state)
}

/// Serve until `shutdown` fires (or its sender is dropped).
///
/// Open streams finish on their own once the publisher is dropped.
pub async fn serve(
    listener: TcpListener,
    frames: watch::Receiver<Option<FramePacket>>,
    reset: Arc<AtomicBool>,
    shutdown: oneshot::Receiver<()>,
) -> Result<()> {
    let addr = listener.local_addr().context("Listener has no local address")?;
    info!("Streaming on http://{addr}/");

    axum::serve(listener, router(ServerState { frames, reset }))
        .with_graceful_shutdown(async {
            let _ = shutdown.await;
        })
        .await
        .context("HTTP server error")?;

    info!("HTTP server stopped");
    Ok(())
}

/// `GET /`: multipart stream of every frame from now on
async fn video_feed(State(state): State<ServerState>) -> Response {
    info!("Viewer connected");
    let body = Body::from_stream(multipart_stream(state.frames.clone()));
    (
        [
            (
                header::CONTENT_TYPE,
                format!("multipart/x-mixed-replace; boundary={BOUNDARY}"),
            ),
            (header::CACHE_CONTROL, "no-cache".to_string()),
        ],
        body,
    )
        .into_response()
}

/// `GET /frame.jpg`: latest frame, or 204 before the first one
async fn snapshot(State(state): State<ServerState>) -> Response {
    let latest = state.frames.borrow().clone();
    match latest {
        Some(packet) => ([(header::CONTENT_TYPE, "image/jpeg")], packet.jpeg).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

/// `POST /reset`: ask the frame loop to forget the learned background
async fn request_reset(State(state): State<ServerState>) -> StatusCode {
    info!("Background reset requested");
    state.reset.store(true, Ordering::Relaxed);
    StatusCode::ACCEPTED
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::mjpeg::multipart_part;
    use crate::output::{MjpegPublisher, OutputSink};
    use axum::body::to_bytes;
    use bytes::Bytes;

    fn state(publisher: &MjpegPublisher) -> ServerState {
        ServerState {
            frames: publisher.subscribe(),
            reset: Arc::new(AtomicBool::new(false)),
        }
    }

    #[tokio::test]
    async fn snapshot_is_empty_before_first_frame() {
        let publisher = MjpegPublisher::new();
        let response = snapshot(State(state(&publisher))).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn snapshot_returns_latest_jpeg() {
        let mut publisher = MjpegPublisher::new();
        publisher.publish(FramePacket {
            sequence: 7,
            jpeg: Bytes::from_static(b"jpeg"),
        });

        let response = snapshot(State(state(&publisher))).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.as_ref(), b"jpeg");
    }

    #[tokio::test]
    async fn feed_is_multipart_and_ends_with_publisher() {
        let mut publisher = MjpegPublisher::new();
        publisher.publish(FramePacket {
            sequence: 1,
            jpeg: Bytes::from_static(b"one"),
        });

        let response = video_feed(State(state(&publisher))).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "multipart/x-mixed-replace; boundary=frame"
        );
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");

        drop(publisher);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body, multipart_part(b"one"));
    }

    #[tokio::test]
    async fn serves_over_tcp_until_shutdown() {
        let publisher = MjpegPublisher::new();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (tx, shutdown) = oneshot::channel();

        let reset = Arc::new(AtomicBool::new(false));

        let server = tokio::spawn(serve(listener, publisher.subscribe(), reset, shutdown));
        tx.send(()).unwrap();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn reset_request_raises_the_flag() {
        let publisher = MjpegPublisher::new();
        let shared = state(&publisher);
        let reset = shared.reset.clone();

        let status = request_reset(State(shared)).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert!(reset.load(Ordering::Relaxed));
    }
}
