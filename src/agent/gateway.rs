use super::provider::{AgentsClient, RunEvent};
use super::{ConnectionReport, GatewayError, TurnEvent, TurnRequest};
use anyhow::Context;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use uuid::Uuid;

/// Inline error shown when the gateway has no endpoint or agent id.
/// Single newlines only: a chunk must never contain the frame delimiter.
const CONFIG_ERROR_TEXT: &str = "\u{274c} **Configuration Error**\n\
    The agent service is not configured. Set these values and restart:\n\
    - endpoint (`AGENTCHAT_ENDPOINT`)\n\
    - agent id (`AGENTCHAT_AGENT_ID`)";

const AGENT_ERROR_TEXT: &str = "\u{274c} **Agent Error**\n\
    Sorry, something went wrong while talking to the agent service. \
    Please try again in a moment.\nError details: ";

/// Resolved gateway settings. `endpoint` and `agent_id` may be absent;
/// every operation degrades softly when they are.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// Agent service base URL (project connection string).
    pub endpoint: Option<String>,
    /// Hosted agent id.
    pub agent_id: Option<String>,
    /// Optional bearer credential.
    pub api_key: Option<String>,
    /// Display name for context vector stores.
    pub store_name: String,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            agent_id: None,
            api_key: None,
            store_name: "Context Store".to_string(),
        }
    }
}

/// Translates one chat turn into a provider run, surfacing only text
/// chunks and a completion signal. Holds no mutable state: per-turn
/// provisioning lives in locals, so concurrent turns cannot interfere.
#[derive(Debug, Clone)]
pub struct AgentGateway {
    http: reqwest::Client,
    settings: GatewaySettings,
}

impl AgentGateway {
    pub fn new(http: reqwest::Client, settings: GatewaySettings) -> Self {
        Self { http, settings }
    }

    fn client(&self) -> Result<(AgentsClient, &str), GatewayError> {
        let (Some(endpoint), Some(agent_id)) = (&self.settings.endpoint, &self.settings.agent_id)
        else {
            return Err(GatewayError::NotConfigured);
        };
        let client = AgentsClient::new(self.http.clone(), endpoint, self.settings.api_key.clone())?;
        Ok((client, agent_id))
    }

    /// Probe the provider. Never errors: failures come back as a report.
    pub async fn test_connection(&self) -> ConnectionReport {
        match self.try_connection().await {
            Ok(message) => ConnectionReport {
                success: true,
                message,
            },
            Err(GatewayError::NotConfigured) => ConnectionReport {
                success: false,
                message: "Agent service is not configured. Check the endpoint and agent id \
                          settings."
                    .to_string(),
            },
            Err(GatewayError::Other(e)) => ConnectionReport {
                success: false,
                message: format!("Connection failed: {e:#}"),
            },
        }
    }

    async fn try_connection(&self) -> Result<String, GatewayError> {
        let (client, agent_id) = self.client()?;
        let agent = client.get_agent(agent_id).await?;
        let name = agent.name.unwrap_or(agent.id);
        tracing::info!(agent = %name, "connected to agent");
        Ok(format!("Connected to agent: {name}"))
    }

    /// Run one chat turn, emitting chunks and exactly one completion on
    /// `events`. Never errors to the caller: every failure is folded into
    /// the event stream as readable chunk text.
    pub async fn stream_chat_response(&self, request: TurnRequest, events: mpsc::Sender<TurnEvent>) {
        if let Err(e) = self.run_turn(&request, &events).await {
            let text = match e {
                GatewayError::NotConfigured => CONFIG_ERROR_TEXT.to_string(),
                GatewayError::Other(e) => {
                    tracing::error!(error = ?e, "chat turn failed");
                    format!("{AGENT_ERROR_TEXT}{e:#}")
                }
            };
            let _ = events.send(TurnEvent::Chunk(text)).await;
            let _ = events.send(TurnEvent::Complete).await;
        }
    }

    async fn run_turn(
        &self,
        request: &TurnRequest,
        events: &mpsc::Sender<TurnEvent>,
    ) -> Result<(), GatewayError> {
        let (client, agent_id) = self.client()?;

        // Context attachment is best-effort: a failed upload must not
        // block the turn.
        if let Some(context) = &request.json_context {
            if let Err(e) = self.provision_context(&client, agent_id, context).await {
                tracing::warn!(
                    error = ?e,
                    "json context provisioning failed; continuing without file search"
                );
            }
        }

        tracing::debug!(history_len = request.history.len(), "starting chat turn");

        let thread = client.create_thread(request.message.clone()).await?;
        let mut stream = client.stream_run(&thread.id, agent_id).await?;

        let mut completed = false;
        while let Some(item) = stream.next().await {
            match item? {
                RunEvent::Created => tracing::debug!(thread = %thread.id, "run created"),
                RunEvent::Delta(parts) => {
                    for text in parts {
                        if events.send(TurnEvent::Chunk(text)).await.is_err() {
                            // Receiver gone: the client dropped the
                            // response. Nothing left to do for this turn.
                            return Ok(());
                        }
                    }
                }
                RunEvent::Completed => {
                    completed = true;
                    let _ = events.send(TurnEvent::Complete).await;
                    break;
                }
                RunEvent::Failed(data) => {
                    tracing::error!(%data, "provider reported a run error");
                }
                RunEvent::Done => break,
            }
        }

        // A stream that ends without run-completed would otherwise leave
        // the HTTP response open forever.
        if !completed {
            let _ = events.send(TurnEvent::Complete).await;
        }
        Ok(())
    }

    async fn provision_context(
        &self,
        client: &AgentsClient,
        agent_id: &str,
        context: &serde_json::Value,
    ) -> anyhow::Result<()> {
        let bytes =
            serde_json::to_vec_pretty(context).context("failed to serialize json context")?;
        let filename = format!("context-{}.json", Uuid::new_v4());

        let file = client.upload_file(bytes, filename).await?;
        let store = client
            .create_vector_store(&self.settings.store_name, vec![file.id])
            .await?;
        client.attach_vector_store(agent_id, &store.id).await?;

        tracing::info!(
            store = %store.id,
            name = store.name.as_deref().unwrap_or(&self.settings.store_name),
            "json context attached for file search"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_gateway_emits_one_config_error_chunk_then_complete() {
        let gateway = AgentGateway::new(reqwest::Client::new(), GatewaySettings::default());
        let (tx, mut rx) = mpsc::channel(16);

        gateway
            .stream_chat_response(
                TurnRequest {
                    message: "hi".into(),
                    json_context: None,
                    history: Vec::new(),
                },
                tx,
            )
            .await;

        match rx.recv().await.expect("first event") {
            TurnEvent::Chunk(text) => {
                assert!(text.contains("Configuration Error"));
                assert!(!text.contains("\n\n"), "chunk must not contain the frame delimiter");
            }
            other => panic!("expected a chunk, got {other:?}"),
        }
        assert_eq!(rx.recv().await.expect("second event"), TurnEvent::Complete);
        assert!(rx.recv().await.is_none(), "no events after completion");
    }

    #[tokio::test]
    async fn unconfigured_test_connection_fails_softly() {
        let gateway = AgentGateway::new(reqwest::Client::new(), GatewaySettings::default());
        let report = gateway.test_connection().await;
        assert!(!report.success);
        assert!(report.message.contains("not configured"));
    }
}
