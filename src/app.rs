use crate::agent::{AgentGateway, GatewaySettings, TurnRequest};
use crate::{client, config, server};
use anyhow::Context;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;

pub const DEFAULT_LISTEN: &str = "127.0.0.1:8787";
pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8787";

/// Resolve gateway settings: environment wins over config.toml.
pub fn gateway_settings(cfg: Option<&config::Config>) -> GatewaySettings {
    GatewaySettings {
        endpoint: std::env::var("AGENTCHAT_ENDPOINT")
            .ok()
            .or_else(|| cfg.and_then(|c| c.endpoint.clone())),
        agent_id: std::env::var("AGENTCHAT_AGENT_ID")
            .ok()
            .or_else(|| cfg.and_then(|c| c.agent_id.clone())),
        api_key: std::env::var("AGENTCHAT_API_KEY")
            .ok()
            .or_else(|| cfg.and_then(|c| c.api_key.clone())),
        store_name: cfg
            .and_then(|c| c.store_name.clone())
            .unwrap_or_else(|| "Context Store".to_string()),
    }
}

pub fn listen_addr(cfg: Option<&config::Config>, cli: Option<String>) -> String {
    cli.or_else(|| std::env::var("AGENTCHAT_LISTEN").ok())
        .or_else(|| cfg.and_then(|c| c.listen.clone()))
        .unwrap_or_else(|| DEFAULT_LISTEN.to_string())
}

pub fn server_url(cfg: Option<&config::Config>, cli: Option<String>) -> String {
    cli.or_else(|| std::env::var("AGENTCHAT_SERVER_URL").ok())
        .or_else(|| cfg.and_then(|c| c.server_url.clone()))
        .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string())
}

pub fn load_context(path: &Path) -> anyhow::Result<serde_json::Value> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to read context file: {}", path.display()))?;
    serde_json::from_slice(&bytes)
        .with_context(|| format!("context file is not valid JSON: {}", path.display()))
}

pub async fn cmd_serve(
    http: &reqwest::Client,
    cfg: Option<&config::Config>,
    listen: Option<String>,
) -> anyhow::Result<()> {
    let gateway = Arc::new(AgentGateway::new(http.clone(), gateway_settings(cfg)));
    server::serve(&listen_addr(cfg, listen), gateway).await
}

pub async fn cmd_test(http: &reqwest::Client, server_url: &str) -> anyhow::Result<()> {
    let report = client::test_connection(http, server_url).await?;
    if report.success {
        println!("ok: {}", report.message);
        Ok(())
    } else {
        anyhow::bail!("{}", report.message)
    }
}

/// One-shot chat: stream the answer to stdout as it arrives.
pub async fn cmd_chat(
    http: reqwest::Client,
    server_url: String,
    message: String,
    json_context: Option<serde_json::Value>,
) -> anyhow::Result<()> {
    use std::io::Write;

    let request = TurnRequest {
        message,
        json_context,
        history: Vec::new(),
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<client::ClientEvent>();
    let driver =
        tokio::spawn(async move { client::stream_to_agent(&http, &server_url, &request, &tx).await });

    while let Some(event) = rx.recv().await {
        match event {
            client::ClientEvent::Accepted => {}
            client::ClientEvent::Chunk(text) => {
                print!("{text}");
                std::io::stdout().flush().ok();
            }
            client::ClientEvent::Done => break,
        }
    }
    println!();

    driver.await.context("chat task panicked")?
}
