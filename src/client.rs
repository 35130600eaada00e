use crate::agent::{ConnectionReport, TurnRequest};
use crate::sse::{Frame, FrameDecoder};
use anyhow::{anyhow, Context};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;

/// Client-side view of one relayed turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Response headers confirmed ok; no content yet.
    Accepted,
    Chunk(String),
    Done,
}

/// POST a turn to the relay and drive its SSE body to completion.
///
/// `Accepted` fires once after the status check, `Chunk` once per decoded
/// frame, and `Done` exactly once, whether the terminal marker was seen or
/// the stream simply ended. Transport failures are returned as errors and
/// end the turn; there is no retry.
pub async fn stream_to_agent(
    http: &reqwest::Client,
    server_url: &str,
    request: &TurnRequest,
    events: &mpsc::UnboundedSender<ClientEvent>,
) -> anyhow::Result<()> {
    let url = format!("{}/api/stream-chat", server_url.trim_end_matches('/'));

    let resp = http
        .post(&url)
        .json(request)
        .send()
        .await
        .with_context(|| format!("failed to reach relay at {url}"))?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(anyhow!("failed to connect: {} - {body}", status.as_u16()));
    }
    let _ = events.send(ClientEvent::Accepted);

    let mut stream = resp.bytes_stream();
    let mut decoder = FrameDecoder::new();

    while let Some(item) = stream.next().await {
        let bytes = match item {
            Ok(b) => b,
            Err(e) => {
                tracing::error!(error = %e, "stream read error");
                return Err(anyhow!(e).context("stream read error"));
            }
        };

        for frame in decoder.push(&bytes)? {
            match frame {
                Frame::Data(text) => {
                    let _ = events.send(ClientEvent::Chunk(text));
                }
                Frame::Done => {
                    let _ = events.send(ClientEvent::Done);
                    return Ok(());
                }
            }
        }
    }

    // Natural end without the terminal marker: flush the residual
    // buffer, then finalize.
    match decoder.finish()? {
        Some(Frame::Data(text)) => {
            let _ = events.send(ClientEvent::Chunk(text));
        }
        Some(Frame::Done) | None => {}
    }
    let _ = events.send(ClientEvent::Done);
    Ok(())
}

/// Ask the relay whether the agent service is reachable.
pub async fn test_connection(
    http: &reqwest::Client,
    server_url: &str,
) -> anyhow::Result<ConnectionReport> {
    let url = format!("{}/api/test-connection", server_url.trim_end_matches('/'));

    let resp = http
        .get(&url)
        .send()
        .await
        .with_context(|| format!("failed to reach relay at {url}"))?;

    let status = resp.status();
    let body = resp
        .bytes()
        .await
        .context("failed to read connection report")?;
    if !status.is_success() {
        return Err(anyhow!(
            "test-connection failed: HTTP {status}: {}",
            String::from_utf8_lossy(&body)
        ));
    }
    serde_json::from_slice(&body).context("failed to parse connection report JSON")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentGateway, GatewaySettings};
    use crate::{server, sse};
    use axum::body::Body;
    use axum::http::{header, HeaderValue, StatusCode};
    use axum::response::Response;
    use axum::routing::post;
    use axum::Router;
    use std::convert::Infallible;
    use std::sync::Arc;

    fn request() -> TurnRequest {
        TurnRequest {
            message: "hello".into(),
            json_context: None,
            history: Vec::new(),
        }
    }

    async fn spawn_router(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    /// Serves a fixed frame sequence pre-split at the given byte chunks.
    fn canned_stream_router(chunks: Vec<Vec<u8>>) -> Router {
        Router::new().route(
            "/api/stream-chat",
            post(move || {
                let chunks = chunks.clone();
                async move {
                    let parts = chunks
                        .into_iter()
                        .map(|c| Ok::<_, Infallible>(bytes::Bytes::from(c)));
                    let mut resp = Response::new(Body::from_stream(tokio_stream::iter(parts)));
                    resp.headers_mut().insert(
                        header::CONTENT_TYPE,
                        HeaderValue::from_static("text/event-stream"),
                    );
                    resp
                }
            }),
        )
    }

    #[tokio::test]
    async fn non_ok_status_errors_with_status_and_body() {
        let app = Router::new().route(
            "/api/stream-chat",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        );
        let base = spawn_router(app).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let err = stream_to_agent(&reqwest::Client::new(), &base, &request(), &tx)
            .await
            .expect_err("500 must fail the turn");

        let msg = format!("{err:#}");
        assert!(msg.contains("500"), "missing status in: {msg}");
        assert!(msg.contains("boom"), "missing body in: {msg}");

        // onResponse must never fire for a rejected request.
        drop(tx);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn decodes_frames_split_across_reads() {
        // Frames split mid-marker, mid-delimiter, and mid-multibyte
        // character; also a frame buffered after the terminal marker.
        let wire = b"data: H\xc3\xa9llo\n\ndata: World\n\ndata: [DONE]\n\ndata: late\n\n";
        let chunks = vec![
            wire[..8].to_vec(),   // ends between the \xc3 and \xa9 bytes
            wire[8..13].to_vec(), // ends between the two delimiter newlines
            wire[13..].to_vec(),
        ];
        let base = spawn_router(canned_stream_router(chunks)).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        stream_to_agent(&reqwest::Client::new(), &base, &request(), &tx)
            .await
            .unwrap();
        drop(tx);

        let mut got = Vec::new();
        while let Some(ev) = rx.recv().await {
            got.push(ev);
        }
        assert_eq!(
            got,
            vec![
                ClientEvent::Accepted,
                ClientEvent::Chunk("H\u{e9}llo".into()),
                ClientEvent::Chunk("World".into()),
                ClientEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn natural_end_flushes_residual_and_completes() {
        let chunks = vec![b"data: only\n\ndata: tail".to_vec()];
        let base = spawn_router(canned_stream_router(chunks)).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        stream_to_agent(&reqwest::Client::new(), &base, &request(), &tx)
            .await
            .unwrap();
        drop(tx);

        let mut got = Vec::new();
        while let Some(ev) = rx.recv().await {
            got.push(ev);
        }
        assert_eq!(
            got,
            vec![
                ClientEvent::Accepted,
                ClientEvent::Chunk("only".into()),
                ClientEvent::Chunk("tail".into()),
                ClientEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn round_trips_the_relay_end_to_end() {
        // Unconfigured gateway behind the real router: the turn comes
        // back as one configuration-error chunk, then completion.
        let gateway = Arc::new(AgentGateway::new(
            reqwest::Client::new(),
            GatewaySettings::default(),
        ));
        let base = spawn_router(server::router(gateway)).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        stream_to_agent(&reqwest::Client::new(), &base, &request(), &tx)
            .await
            .unwrap();
        drop(tx);

        assert_eq!(rx.recv().await, Some(ClientEvent::Accepted));
        match rx.recv().await {
            Some(ClientEvent::Chunk(text)) => assert!(text.contains("Configuration Error")),
            other => panic!("expected error chunk, got {other:?}"),
        }
        assert_eq!(rx.recv().await, Some(ClientEvent::Done));
        assert_eq!(rx.recv().await, None);
    }

    #[test]
    fn encode_decode_round_trip_preserves_newlines() {
        let text = "first line\nsecond line";
        let mut dec = FrameDecoder::new();
        let frames = dec.push(&sse::frame(text)).unwrap();
        assert_eq!(frames, vec![Frame::Data(text.into())]);
    }
}
