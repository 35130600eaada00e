mod agent;
mod app;
mod cli;
mod client;
mod config;
mod paths;
mod server;
mod sse;

#[cfg(feature = "tui")]
mod tui;

use anyhow::Context;
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = cli::Args::parse();

    let config_dir = paths::config_dir()?;
    let cfg = config::Config::load_optional(config_dir.join("config.toml"))?;
    tracing::debug!(?config_dir, ?cfg, "resolved config");

    let http = reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")?;

    match args.cmd {
        Some(cli::Command::Serve { listen }) => {
            return app::cmd_serve(&http, cfg.as_ref(), listen).await;
        }
        Some(cli::Command::Test) => {
            let server_url = app::server_url(cfg.as_ref(), args.server);
            return app::cmd_test(&http, &server_url).await;
        }
        #[cfg(feature = "tui")]
        Some(cli::Command::Tui) => {
            let server_url = app::server_url(cfg.as_ref(), args.server);
            return tui::run_tui(http, server_url).await;
        }
        None => {}
    }

    let prompt = args.prompt.join(" ");
    if prompt.trim().is_empty() {
        anyhow::bail!("No prompt provided. Try: agentchat \"Hello\" or `agentchat tui` (feature flag)");
    }

    let json_context = match &args.context {
        Some(path) => Some(app::load_context(path)?),
        None => None,
    };

    let server_url = app::server_url(cfg.as_ref(), args.server);
    app::cmd_chat(http, server_url, prompt, json_context).await
}
