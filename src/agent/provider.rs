use anyhow::{anyhow, Context};
use futures_core::stream::BoxStream;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

/// Typed view of the provider's run stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    Created,
    /// Text fragments of one message delta, in emission order.
    Delta(Vec<String>),
    Completed,
    /// Provider-reported run error; the payload is its raw data field.
    Failed(String),
    /// Provider closed the event stream.
    Done,
}

/// REST client for the hosted agent service: threads, streaming runs,
/// file upload, and vector stores.
#[derive(Debug, Clone)]
pub struct AgentsClient {
    http: reqwest::Client,
    base: Url,
    api_key: Option<String>,
}

impl AgentsClient {
    pub fn new(
        http: reqwest::Client,
        endpoint: &str,
        api_key: Option<String>,
    ) -> anyhow::Result<Self> {
        // Url::join drops the last path segment without a trailing slash.
        let normalized = if endpoint.ends_with('/') {
            endpoint.to_string()
        } else {
            format!("{endpoint}/")
        };
        let base = Url::parse(&normalized)
            .with_context(|| format!("invalid agent service endpoint: {endpoint}"))?;
        Ok(Self { http, base, api_key })
    }

    fn url(&self, path: &str) -> anyhow::Result<Url> {
        self.base
            .join(path)
            .with_context(|| format!("failed to build agent service URL for {path}"))
    }

    fn auth_headers(&self) -> anyhow::Result<HeaderMap> {
        let mut h = HeaderMap::new();
        if let Some(key) = &self.api_key {
            let v = HeaderValue::from_str(&format!("Bearer {key}")).map_err(|e| anyhow!(e))?;
            h.insert(AUTHORIZATION, v);
        }
        Ok(h)
    }

    pub async fn get_agent(&self, agent_id: &str) -> anyhow::Result<AgentInfo> {
        let resp = self
            .http
            .get(self.url(&format!("agents/{agent_id}"))?)
            .headers(self.auth_headers()?)
            .send()
            .await
            .context("failed to reach the agent service")?;
        read_json(resp, "agent lookup").await
    }

    /// Create a conversation thread seeded with a single user message.
    pub async fn create_thread(&self, content: String) -> anyhow::Result<ThreadInfo> {
        let body = CreateThreadRequest {
            messages: vec![ThreadMessage {
                role: "user",
                content,
            }],
        };
        let resp = self
            .http
            .post(self.url("threads")?)
            .headers(self.auth_headers()?)
            .json(&body)
            .send()
            .await
            .context("failed to create thread")?;
        read_json(resp, "thread creation").await
    }

    /// Start a streaming run and surface its events as a typed stream.
    ///
    /// A non-2xx status before the stream starts is an error carrying the
    /// status and body. The stream ends after the provider's `done`
    /// marker; unknown event kinds are skipped.
    pub async fn stream_run(
        &self,
        thread_id: &str,
        agent_id: &str,
    ) -> anyhow::Result<BoxStream<'static, anyhow::Result<RunEvent>>> {
        let mut headers = self.auth_headers()?;
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));

        let resp = self
            .http
            .post(self.url(&format!("threads/{thread_id}/runs"))?)
            .headers(headers)
            .json(&CreateRunRequest {
                agent_id,
                stream: true,
            })
            .send()
            .await
            .context("failed to start agent run")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("agent run failed: HTTP {status}: {text}"));
        }

        let (tx, rx) = mpsc::channel::<anyhow::Result<RunEvent>>(64);

        tokio::spawn(async move {
            let mut stream = resp.bytes_stream();
            let mut parser = EventParser::new();

            while let Some(item) = stream.next().await {
                let bytes = match item {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(anyhow!(e).context("network stream error")))
                            .await;
                        return;
                    }
                };

                for msg in parser.push(&bytes) {
                    let msg = match msg {
                        Ok(m) => m,
                        Err(e) => {
                            let _ = tx.send(Err(e)).await;
                            return;
                        }
                    };
                    match map_event(msg.event.as_deref(), &msg.data) {
                        Ok(Some(ev)) => {
                            let terminal = ev == RunEvent::Done;
                            if tx.send(Ok(ev)).await.is_err() {
                                return;
                            }
                            if terminal {
                                return;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            let _ = tx.send(Err(e)).await;
                            return;
                        }
                    }
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)) as BoxStream<'static, anyhow::Result<RunEvent>>)
    }

    /// Upload an in-memory file with purpose `assistants`.
    pub async fn upload_file(&self, bytes: Vec<u8>, filename: String) -> anyhow::Result<FileInfo> {
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(filename)
            .mime_str("application/json")
            .context("failed to build upload part")?;
        let form = reqwest::multipart::Form::new()
            .text("purpose", "assistants")
            .part("file", part);

        let resp = self
            .http
            .post(self.url("files")?)
            .headers(self.auth_headers()?)
            .multipart(form)
            .send()
            .await
            .context("failed to upload file")?;
        read_json(resp, "file upload").await
    }

    /// Create a vector store over the given file ids. Stores expire after
    /// seven days of inactivity.
    pub async fn create_vector_store(
        &self,
        name: &str,
        file_ids: Vec<String>,
    ) -> anyhow::Result<VectorStoreInfo> {
        let body = CreateVectorStoreRequest {
            name,
            file_ids,
            expires_after: ExpiresAfter {
                anchor: "last_active_at",
                days: 7,
            },
        };
        let resp = self
            .http
            .post(self.url("vector_stores")?)
            .headers(self.auth_headers()?)
            .json(&body)
            .send()
            .await
            .context("failed to create vector store")?;
        read_json(resp, "vector store creation").await
    }

    /// Point the agent's file-search tool at the given vector store.
    pub async fn attach_vector_store(
        &self,
        agent_id: &str,
        vector_store_id: &str,
    ) -> anyhow::Result<()> {
        let body = UpdateAgentRequest {
            tool_resources: ToolResources {
                file_search: FileSearchResources {
                    vector_store_ids: vec![vector_store_id.to_string()],
                },
            },
        };
        let resp = self
            .http
            .post(self.url(&format!("agents/{agent_id}"))?)
            .headers(self.auth_headers()?)
            .json(&body)
            .send()
            .await
            .context("failed to update agent")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("agent update failed: HTTP {status}: {text}"));
        }
        Ok(())
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(
    resp: reqwest::Response,
    what: &str,
) -> anyhow::Result<T> {
    let status = resp.status();
    let body = resp
        .bytes()
        .await
        .with_context(|| format!("failed to read {what} response"))?;
    if !status.is_success() {
        return Err(anyhow!(
            "{what} failed: HTTP {status}: {}",
            String::from_utf8_lossy(&body)
        ));
    }
    serde_json::from_slice(&body).with_context(|| format!("failed to parse {what} JSON"))
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentInfo {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThreadInfo {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileInfo {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VectorStoreInfo {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct CreateThreadRequest {
    messages: Vec<ThreadMessage>,
}

#[derive(Debug, Clone, Serialize)]
struct ThreadMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Clone, Serialize)]
struct CreateRunRequest<'a> {
    agent_id: &'a str,
    stream: bool,
}

#[derive(Debug, Clone, Serialize)]
struct CreateVectorStoreRequest<'a> {
    name: &'a str,
    file_ids: Vec<String>,
    expires_after: ExpiresAfter,
}

#[derive(Debug, Clone, Serialize)]
struct ExpiresAfter {
    anchor: &'static str,
    days: u32,
}

#[derive(Debug, Clone, Serialize)]
struct UpdateAgentRequest {
    tool_resources: ToolResources,
}

#[derive(Debug, Clone, Serialize)]
struct ToolResources {
    file_search: FileSearchResources,
}

#[derive(Debug, Clone, Serialize)]
struct FileSearchResources {
    vector_store_ids: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct MessageDeltaChunk {
    delta: MessageDelta,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct MessageDelta {
    #[serde(default)]
    content: Vec<DeltaContentPart>,
}

#[derive(Debug, Clone, Deserialize)]
struct DeltaContentPart {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: Option<DeltaText>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct DeltaText {
    #[serde(default)]
    value: Option<String>,
}

/// Map one SSE message to the closed set of run events. Unknown event
/// names yield None.
fn map_event(event: Option<&str>, data: &str) -> anyhow::Result<Option<RunEvent>> {
    match event.unwrap_or("") {
        "thread.run.created" => Ok(Some(RunEvent::Created)),
        "thread.message.delta" => {
            let chunk: MessageDeltaChunk =
                serde_json::from_str(data).context("failed to parse message delta JSON")?;
            let mut parts = Vec::new();
            for part in chunk.delta.content {
                if part.kind != "text" {
                    continue;
                }
                if let Some(value) = part.text.and_then(|t| t.value) {
                    if !value.is_empty() {
                        parts.push(value);
                    }
                }
            }
            Ok(Some(RunEvent::Delta(parts)))
        }
        "thread.run.completed" => Ok(Some(RunEvent::Completed)),
        "error" => Ok(Some(RunEvent::Failed(data.to_string()))),
        "done" => Ok(Some(RunEvent::Done)),
        "" if data.trim() == "[DONE]" => Ok(Some(RunEvent::Done)),
        _ => Ok(None),
    }
}

#[derive(Debug, Clone)]
struct SseMessage {
    event: Option<String>,
    data: String,
}

/// Field-level SSE parser for the provider's event stream.
///
/// - Collects UTF-8 lines, CR-tolerant
/// - Tracks the `event:` field alongside accumulated `data:` lines
/// - Emits one message per blank line
struct EventParser {
    buf: Vec<u8>,
    cur_event: Option<String>,
    cur_data: String,
}

impl EventParser {
    fn new() -> Self {
        Self {
            buf: Vec::new(),
            cur_event: None,
            cur_data: String::new(),
        }
    }

    fn push(&mut self, chunk: &[u8]) -> Vec<anyhow::Result<SseMessage>> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();

        loop {
            let Some(pos) = self.buf.iter().position(|&b| b == b'\n') else {
                break;
            };
            let mut line = self.buf.drain(..=pos).collect::<Vec<u8>>();
            line.pop();
            if line.ends_with(b"\r") {
                line.pop();
            }

            if line.is_empty() {
                if self.cur_event.is_some() || !self.cur_data.is_empty() {
                    // Data accumulation adds one newline per line; drop
                    // the trailing one.
                    if self.cur_data.ends_with('\n') {
                        self.cur_data.pop();
                    }
                    out.push(Ok(SseMessage {
                        event: self.cur_event.take(),
                        data: std::mem::take(&mut self.cur_data),
                    }));
                }
                continue;
            }

            let s = match std::str::from_utf8(&line) {
                Ok(s) => s,
                Err(e) => {
                    out.push(Err(anyhow!(e).context("SSE line is not valid UTF-8")));
                    continue;
                }
            };

            if let Some(rest) = s.strip_prefix("data:") {
                let rest = rest.strip_prefix(' ').unwrap_or(rest);
                self.cur_data.push_str(rest);
                self.cur_data.push('\n');
            } else if let Some(rest) = s.strip_prefix("event:") {
                self.cur_event = Some(rest.trim().to_string());
            }
            // Other fields (id:, retry:, comments) are ignored.
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn messages(input: &[u8]) -> Vec<SseMessage> {
        let mut parser = EventParser::new();
        parser.push(input).into_iter().map(|m| m.unwrap()).collect()
    }

    #[test]
    fn parses_event_and_data_fields() {
        let msgs = messages(b"event: thread.run.created\ndata: {}\n\n");
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].event.as_deref(), Some("thread.run.created"));
        assert_eq!(msgs[0].data, "{}");
    }

    #[test]
    fn crlf_lines_are_accepted() {
        let msgs = messages(b"event: done\r\ndata: [DONE]\r\n\r\n");
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].event.as_deref(), Some("done"));
        assert_eq!(msgs[0].data, "[DONE]");
    }

    #[test]
    fn partial_reads_reassemble() {
        let input: &[u8] = b"event: thread.run.completed\ndata: {}\n\n";
        let mut parser = EventParser::new();
        let mut msgs = Vec::new();
        for half in input.chunks(7) {
            msgs.extend(parser.push(half).into_iter().map(|m| m.unwrap()));
        }
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].event.as_deref(), Some("thread.run.completed"));
    }

    #[test]
    fn delta_event_extracts_text_parts_in_order() {
        let data = r#"{"delta":{"content":[
            {"type":"text","text":{"value":"Hel"}},
            {"type":"image_file"},
            {"type":"text","text":{"value":"lo"}},
            {"type":"text","text":{"value":""}}
        ]}}"#;
        let ev = map_event(Some("thread.message.delta"), data).unwrap();
        assert_eq!(
            ev,
            Some(RunEvent::Delta(vec!["Hel".to_string(), "lo".to_string()]))
        );
    }

    #[test]
    fn unknown_events_are_skipped() {
        assert_eq!(map_event(Some("thread.run.step.created"), "{}").unwrap(), None);
    }

    #[test]
    fn done_marker_maps_with_and_without_event_name() {
        assert_eq!(map_event(Some("done"), "[DONE]").unwrap(), Some(RunEvent::Done));
        assert_eq!(map_event(None, "[DONE]").unwrap(), Some(RunEvent::Done));
    }

    #[test]
    fn error_event_carries_its_data() {
        let ev = map_event(Some("error"), "rate limited").unwrap();
        assert_eq!(ev, Some(RunEvent::Failed("rate limited".to_string())));
    }

    #[test]
    fn malformed_delta_is_an_error() {
        assert!(map_event(Some("thread.message.delta"), "not json").is_err());
    }
}
