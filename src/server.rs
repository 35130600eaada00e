use crate::agent::{AgentGateway, ConnectionReport, TurnEvent, TurnRequest};
use crate::sse;
use anyhow::Context;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderValue};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn router(gateway: Arc<AgentGateway>) -> Router {
    Router::new()
        .route("/api/stream-chat", post(stream_chat))
        .route("/api/test-connection", get(test_connection))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(gateway)
}

/// Bind and run the relay until shutdown.
pub async fn serve(listen: &str, gateway: Arc<AgentGateway>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("failed to bind {listen}"))?;
    let addr = listener.local_addr().context("failed to read local address")?;
    tracing::info!(%addr, "relay listening");

    let report = gateway.test_connection().await;
    if report.success {
        tracing::info!(message = %report.message, "agent connection ok");
    } else {
        tracing::warn!(message = %report.message, "agent connection unavailable");
    }

    axum::serve(listener, router(gateway))
        .await
        .context("server error")
}

async fn test_connection(State(gateway): State<Arc<AgentGateway>>) -> Json<ConnectionReport> {
    Json(gateway.test_connection().await)
}

/// Framing adapter between the gateway's turn events and the wire.
///
/// Each chunk becomes one `data: ...` frame verbatim; completion becomes
/// the `[DONE]` frame and closes the body. No content inspection.
async fn stream_chat(
    State(gateway): State<Arc<AgentGateway>>,
    Json(request): Json<TurnRequest>,
) -> Response {
    let (turn_tx, mut turn_rx) = mpsc::channel::<TurnEvent>(64);
    let (frame_tx, frame_rx) = mpsc::channel::<Result<Bytes, Infallible>>(64);

    tokio::spawn(async move { gateway.stream_chat_response(request, turn_tx).await });

    tokio::spawn(async move {
        while let Some(event) = turn_rx.recv().await {
            match event {
                TurnEvent::Chunk(text) => {
                    if frame_tx.send(Ok(sse::frame(&text))).await.is_err() {
                        break;
                    }
                }
                TurnEvent::Complete => {
                    let _ = frame_tx.send(Ok(sse::done_frame())).await;
                    break;
                }
            }
        }
    });

    let mut resp = Response::new(Body::from_stream(ReceiverStream::new(frame_rx)));
    let headers = resp.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    resp
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::GatewaySettings;

    async fn spawn_relay() -> String {
        let gateway = Arc::new(AgentGateway::new(
            reqwest::Client::new(),
            GatewaySettings::default(),
        ));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(gateway)).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_connection_returns_soft_failure_json() {
        let base = spawn_relay().await;

        let resp = reqwest::get(format!("{base}/api/test-connection"))
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);

        let report: ConnectionReport = resp.json().await.unwrap();
        assert!(!report.success);
        assert!(report.message.contains("not configured"));
    }

    #[tokio::test]
    async fn stream_chat_emits_framed_error_then_done() {
        let base = spawn_relay().await;

        let resp = reqwest::Client::new()
            .post(format!("{base}/api/stream-chat"))
            .json(&serde_json::json!({
                "message": "hello",
                "jsonContext": null,
                "history": [],
            }))
            .send()
            .await
            .unwrap();

        assert_eq!(resp.status(), 200);
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/event-stream"
        );
        assert_eq!(
            resp.headers().get(header::CACHE_CONTROL).unwrap(),
            "no-cache"
        );

        // The body is finite: error chunk then terminal frame.
        let body = resp.text().await.unwrap();
        assert!(body.starts_with("data: "));
        assert!(body.contains("Configuration Error"));
        assert!(body.ends_with("data: [DONE]\n\n"));
    }
}
