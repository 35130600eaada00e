#![cfg(feature = "tui")]

use crate::agent::{ChatTurn, Role, TurnRequest};
use crate::client::{self, ClientEvent};
use anyhow::Context;
use crossterm::event::{Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Modifier, Style};
use ratatui::text::{Line, Text};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};
use ratatui::Terminal;
use std::io;
use std::path::Path;
use tokio::sync::mpsc;

/// Fixed error turn shown when the send path fails.
const SEND_ERROR_TEXT: &str = "Sorry, I encountered an error while connecting to the agent \
    service. Please check your configuration and try again.";

const THINKING_TEXT: &str = "Agent is thinking\u{2026}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionStatus {
    Unknown,
    Testing,
    Connected,
    Error,
}

impl ConnectionStatus {
    fn label(self) -> &'static str {
        match self {
            ConnectionStatus::Unknown => "starting",
            ConnectionStatus::Testing => "testing connection\u{2026}",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Error => "connection error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VectorStoreStatus {
    None,
    Creating,
    Ready,
    Error,
}

impl VectorStoreStatus {
    fn label(self) -> Option<&'static str> {
        match self {
            VectorStoreStatus::None => None,
            VectorStoreStatus::Creating => Some("creating vector store\u{2026}"),
            VectorStoreStatus::Ready => Some("context ready"),
            VectorStoreStatus::Error => Some("context error"),
        }
    }
}

#[derive(Debug)]
enum StreamMsg {
    Accepted,
    Chunk(String),
    Done,
    Failed(String),
}

struct ChatUi {
    turns: Vec<ChatTurn>,
    input: String,
    pending_context: Option<serde_json::Value>,
    /// Live buffer for the in-flight assistant turn.
    streaming: String,
    thinking: bool,
    connection: ConnectionStatus,
    store: VectorStoreStatus,
    notice: Option<String>,
}

impl ChatUi {
    fn new() -> Self {
        Self {
            turns: Vec::new(),
            input: String::new(),
            pending_context: None,
            streaming: String::new(),
            thinking: false,
            connection: ConnectionStatus::Unknown,
            store: VectorStoreStatus::None,
            notice: Some(
                "Type a message and press Enter. Commands: /quit, /clear, /context <file>"
                    .to_string(),
            ),
        }
    }

    fn load_context(&mut self, path: &Path) {
        match crate::app::load_context(path) {
            Ok(value) => {
                self.pending_context = Some(value);
                self.store = VectorStoreStatus::Ready;
                self.notice = Some(format!("context loaded: {}", path.display()));
            }
            Err(e) => {
                self.store = VectorStoreStatus::Error;
                self.notice = Some(format!("{e:#}"));
            }
        }
    }

    /// Start one turn: append the user turn, show the thinking
    /// placeholder, and spawn the relay call. Returns the turn's event
    /// receiver.
    fn send(
        &mut self,
        message: String,
        http: &reqwest::Client,
        server_url: &str,
    ) -> mpsc::UnboundedReceiver<StreamMsg> {
        // History snapshot excludes the turn being sent, as the browser
        // controller did.
        let history = self.turns.clone();
        self.turns
            .push(ChatTurn::user(message.clone(), self.pending_context.clone()));
        self.thinking = true;
        self.streaming.clear();
        self.notice = None;
        if self.pending_context.is_some() {
            self.store = VectorStoreStatus::Creating;
        }

        let request = TurnRequest {
            message,
            json_context: self.pending_context.clone(),
            history,
        };

        let (tx, rx) = mpsc::unbounded_channel::<StreamMsg>();
        let http = http.clone();
        let server_url = server_url.to_string();

        tokio::spawn(async move {
            let (client_tx, mut client_rx) = mpsc::unbounded_channel::<ClientEvent>();
            let driver = tokio::spawn(async move {
                client::stream_to_agent(&http, &server_url, &request, &client_tx).await
            });

            while let Some(event) = client_rx.recv().await {
                let msg = match event {
                    ClientEvent::Accepted => StreamMsg::Accepted,
                    ClientEvent::Chunk(text) => StreamMsg::Chunk(text),
                    ClientEvent::Done => StreamMsg::Done,
                };
                if tx.send(msg).is_err() {
                    return;
                }
            }

            match driver.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    let _ = tx.send(StreamMsg::Failed(format!("{e:#}")));
                }
                Err(e) => {
                    let _ = tx.send(StreamMsg::Failed(format!("chat task failed: {e}")));
                }
            }
        });

        rx
    }

    /// Fold one stream message into the UI state. Returns true when the
    /// turn is over and the stream should be dropped.
    fn apply(&mut self, msg: StreamMsg) -> bool {
        match msg {
            StreamMsg::Accepted => {
                // Request acknowledged: the placeholder goes away and the
                // pending context is consumed by this turn.
                self.thinking = false;
                self.pending_context = None;
                self.store = VectorStoreStatus::None;
                false
            }
            StreamMsg::Chunk(text) => {
                self.streaming.push_str(&text);
                false
            }
            StreamMsg::Done => {
                // Freeze the accumulated text into a permanent turn.
                self.turns
                    .push(ChatTurn::assistant(std::mem::take(&mut self.streaming)));
                true
            }
            StreamMsg::Failed(e) => {
                tracing::error!(error = %e, "send failed");
                self.thinking = false;
                self.streaming.clear();
                self.turns.push(ChatTurn::assistant(SEND_ERROR_TEXT));
                true
            }
        }
    }
}

pub async fn run_tui(http: reqwest::Client, server_url: String) -> anyhow::Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).context("enter alt screen")?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;

    let (ev_tx, mut ev_rx) = mpsc::unbounded_channel::<Event>();
    std::thread::spawn(move || loop {
        match crossterm::event::read() {
            Ok(ev) => {
                if ev_tx.send(ev).is_err() {
                    break;
                }
            }
            Err(_) => break,
        }
    });

    let mut ui = ChatUi::new();

    // Startup probe drives the connection badge.
    ui.connection = ConnectionStatus::Testing;
    let (conn_tx, mut conn_rx) = mpsc::unbounded_channel::<ConnectionStatus>();
    {
        let http = http.clone();
        let server_url = server_url.clone();
        tokio::spawn(async move {
            let status = match client::test_connection(&http, &server_url).await {
                Ok(report) if report.success => ConnectionStatus::Connected,
                Ok(report) => {
                    tracing::warn!(message = %report.message, "connection test failed");
                    ConnectionStatus::Error
                }
                Err(e) => {
                    tracing::warn!(error = ?e, "connection test failed");
                    ConnectionStatus::Error
                }
            };
            let _ = conn_tx.send(status);
        });
    }

    let mut active_stream: Option<mpsc::UnboundedReceiver<StreamMsg>> = None;
    let mut ticker = tokio::time::interval(std::time::Duration::from_millis(33));

    let res = loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = draw(&mut terminal, &ui) {
                    break Err(e);
                }
            }
            Some(status) = conn_rx.recv() => {
                ui.connection = status;
            }
            Some(ev) = ev_rx.recv() => {
                if let Event::Key(key) = ev {
                    if handle_key(key, &mut ui, &http, &server_url, &mut active_stream) {
                        break Ok(());
                    }
                }
            }
            Some(msg) = async {
                match &mut active_stream {
                    Some(rx) => rx.recv().await,
                    None => None,
                }
            } => {
                if ui.apply(msg) {
                    active_stream = None;
                }
            }
        }
    };

    disable_raw_mode().ok();
    execute!(terminal.backend_mut(), LeaveAlternateScreen).ok();
    terminal.show_cursor().ok();

    res
}

fn handle_key(
    key: KeyEvent,
    ui: &mut ChatUi,
    http: &reqwest::Client,
    server_url: &str,
    active_stream: &mut Option<mpsc::UnboundedReceiver<StreamMsg>>,
) -> bool {
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return true;
    }

    match key.code {
        KeyCode::Esc => return true,
        KeyCode::Char(c) => ui.input.push(c),
        KeyCode::Backspace => {
            ui.input.pop();
        }
        KeyCode::Enter => {
            let msg = ui.input.trim().to_string();
            ui.input.clear();
            if msg.is_empty() {
                return false;
            }

            if msg == "/quit" {
                return true;
            }
            if msg == "/clear" {
                ui.turns.clear();
                ui.notice = None;
                return false;
            }
            if let Some(rest) = msg.strip_prefix("/context ") {
                ui.load_context(Path::new(rest.trim()));
                return false;
            }

            if active_stream.is_some() {
                ui.notice = Some("(turn in progress; wait for completion)".to_string());
                return false;
            }

            *active_stream = Some(ui.send(msg, http, server_url));
        }
        _ => {}
    }

    false
}

fn draw(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    ui: &ChatUi,
) -> anyhow::Result<()> {
    terminal.draw(|f| {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(1), Constraint::Length(3)])
            .split(f.area());

        let mut text = Text::default();
        for turn in &ui.turns {
            let (role, style) = match turn.role {
                Role::User => ("you: ", Style::default().add_modifier(Modifier::BOLD)),
                Role::Assistant => ("agent: ", Style::default()),
            };
            text.lines.push(Line::styled(role, style));
            text.lines.extend(Text::from(turn.content.clone()).lines);
            text.lines.push(Line::from(""));
        }
        if ui.thinking {
            text.lines.push(Line::styled(
                THINKING_TEXT,
                Style::default().add_modifier(Modifier::ITALIC),
            ));
            text.lines.push(Line::from(""));
        }
        if !ui.streaming.is_empty() {
            text.lines.push(Line::from("agent: "));
            text.lines.extend(Text::from(ui.streaming.clone()).lines);
        }

        let mut title = format!("agentchat — {}", ui.connection.label());
        if let Some(store) = ui.store.label() {
            title.push_str(" — ");
            title.push_str(store);
        }

        let chat = Paragraph::new(text)
            .block(Block::default().borders(Borders::ALL).title(title))
            .wrap(Wrap { trim: false });

        let input_title = ui.notice.clone().unwrap_or_else(|| "input".to_string());
        let input_w = Paragraph::new(ui.input.clone())
            .block(Block::default().borders(Borders::ALL).title(input_title));

        f.render_widget(chat, chunks[0]);
        f.render_widget(input_w, chunks[1]);

        let x = chunks[1].x + 1 + ui.input.chars().count() as u16;
        let y = chunks[1].y + 1;
        f.set_cursor_position((x.min(chunks[1].x + chunks[1].width.saturating_sub(2)), y));
    })?;
    Ok(())
}
