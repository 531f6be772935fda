mod common;

use anyhow::Context as _;
use common::{API_KEY, call_tool, request, spawn_weather_upstream, tool_payload, weather_engine};
use futures::StreamExt as _;
use restbridge_adapter::config::Config;
use restbridge_adapter::sse::{SseSettings, SseState, serve};
use serde_json::{Value, json};
use std::pin::Pin;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt as _, BufReader};
use tokio::net::TcpListener;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct SseEvent {
    event: String,
    data: String,
}

/// Reads `event:`/`data:` blocks from an open `GET /sse` response.
struct EventReader {
    lines: tokio::io::Lines<Pin<Box<dyn AsyncBufRead + Send>>>,
}

impl EventReader {
    fn new(resp: reqwest::Response) -> Self {
        let stream = resp
            .bytes_stream()
            .map(|chunk| chunk.map_err(std::io::Error::other));
        let reader: Pin<Box<dyn AsyncBufRead + Send>> =
            Box::pin(BufReader::new(StreamReader::new(stream)));
        Self {
            lines: reader.lines(),
        }
    }

    async fn next(&mut self) -> anyhow::Result<Option<SseEvent>> {
        let mut event = String::new();
        let mut data = Vec::new();
        while let Some(line) = self.lines.next_line().await? {
            if line.is_empty() {
                if data.is_empty() && event.is_empty() {
                    continue;
                }
                return Ok(Some(SseEvent {
                    event,
                    data: data.join("\n"),
                }));
            }
            if let Some(v) = line.strip_prefix("event:") {
                event = v.trim_start().to_string();
            } else if let Some(v) = line.strip_prefix("data:") {
                data.push(v.strip_prefix(' ').unwrap_or(v).to_string());
            }
        }
        Ok(None)
    }

    async fn next_named(&mut self, name: &str, within: Duration) -> anyhow::Result<SseEvent> {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            let ev = tokio::time::timeout_at(deadline, self.next())
                .await
                .with_context(|| format!("no '{name}' event within {within:?}"))??
                .context("event stream ended")?;
            if ev.event == name {
                return Ok(ev);
            }
        }
    }
}

struct Server {
    base: String,
    shutdown: CancellationToken,
    task: tokio::task::JoinHandle<restbridge_adapter::error::Result<()>>,
    _upstream: common::Upstream,
}

async fn start(settings: SseSettings) -> anyhow::Result<Server> {
    let upstream = spawn_weather_upstream().await?;
    let shutdown = CancellationToken::new();
    let mut config = Config::default();
    config.server.mode = restbridge_adapter::config::Mode::Sse;
    let engine = weather_engine(
        &upstream,
        &config,
        &[("APIKEYAUTH_API_KEY", API_KEY)],
        shutdown.clone(),
    )?;

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let base = format!("http://{}", listener.local_addr()?);
    let task = tokio::spawn(serve(
        listener,
        SseState::new(engine, settings, shutdown.clone()),
    ));
    common::wait_for_health(&base, Duration::from_secs(5)).await?;
    Ok(Server {
        base,
        shutdown,
        task,
        _upstream: upstream,
    })
}

async fn connect(base: &str) -> anyhow::Result<(EventReader, String)> {
    let resp = reqwest::get(format!("{base}/sse")).await?;
    anyhow::ensure!(resp.status().is_success(), "GET /sse returned {}", resp.status());
    let mut events = EventReader::new(resp);
    let endpoint = events
        .next_named("endpoint", Duration::from_secs(5))
        .await?
        .data;
    Ok((events, endpoint))
}

#[tokio::test]
async fn session_messages_round_trip_through_event_stream() -> anyhow::Result<()> {
    let server = start(SseSettings::default()).await?;
    let (mut events, endpoint) = connect(&server.base).await?;
    assert!(endpoint.starts_with("/messages/?session_id="), "{endpoint}");

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}{endpoint}", server.base))
        .body(request(1, "initialize", json!({})))
        .send()
        .await?;
    assert_eq!(resp.status().as_u16(), 202);
    assert_eq!(resp.json::<Value>().await?, json!({"status": "Accepted"}));

    let init: Value = serde_json::from_str(
        &events
            .next_named("message", Duration::from_secs(5))
            .await?
            .data,
    )?;
    assert_eq!(init["id"], 1);
    assert_eq!(init["result"]["serverInfo"]["name"], "restbridge-sse");

    let resp = client
        .post(format!("{}{endpoint}", server.base))
        .body(call_tool(2, "getCurrentJson", json!({"q": "Lima"})))
        .send()
        .await?;
    assert_eq!(resp.status().as_u16(), 202);
    let call: Value = serde_json::from_str(
        &events
            .next_named("message", Duration::from_secs(5))
            .await?
            .data,
    )?;
    assert_eq!(call["id"], 2);
    assert_eq!(tool_payload(&call)?["location"]["name"], "Lima");

    let health: Value = reqwest::get(format!("{}/health", server.base))
        .await?
        .json()
        .await?;
    assert_eq!(health, json!({"status": "ok", "sessions": 1}));

    server.shutdown.cancel();
    Ok(())
}

#[tokio::test]
async fn unknown_or_missing_session_is_rejected() -> anyhow::Result<()> {
    let server = start(SseSettings::default()).await?;
    let (_events, endpoint) = connect(&server.base).await?;
    let client = reqwest::Client::new();

    let wrong = client
        .post(format!("{}/messages/?session_id=deadbeef", server.base))
        .body(request(1, "tools/list", json!({})))
        .send()
        .await?;
    assert_eq!(wrong.status().as_u16(), 400);
    assert_eq!(wrong.text().await?, "Invalid session_id");

    let missing = client
        .post(format!("{}/messages", server.base))
        .body(request(1, "tools/list", json!({})))
        .send()
        .await?;
    assert_eq!(missing.status().as_u16(), 400);
    assert_eq!(missing.text().await?, "Missing session_id");

    let right = client
        .post(format!("{}{endpoint}", server.base))
        .body(request(1, "tools/list", json!({})))
        .send()
        .await?;
    assert_eq!(right.status().as_u16(), 202);

    server.shutdown.cancel();
    Ok(())
}

#[tokio::test]
async fn notifications_are_accepted_without_a_push() -> anyhow::Result<()> {
    let server = start(SseSettings {
        heartbeat: Duration::from_millis(200),
        max_request_bytes: None,
    })
    .await?;
    let (mut events, endpoint) = connect(&server.base).await?;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}{endpoint}", server.base))
        .body(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
        .send()
        .await?;
    assert_eq!(resp.status().as_u16(), 202);

    // The next event must be a heartbeat, not a message.
    let next = tokio::time::timeout(Duration::from_secs(5), events.next())
        .await??
        .context("stream ended")?;
    assert_eq!(next.event, "heartbeat");
    let beat: Value = serde_json::from_str(&next.data)?;
    assert!(endpoint.ends_with(beat["session_id"].as_str().unwrap_or_default()));
    assert!(beat["timestamp"].is_string());

    server.shutdown.cancel();
    Ok(())
}

#[tokio::test]
async fn disconnect_removes_session() -> anyhow::Result<()> {
    let server = start(SseSettings::default()).await?;
    let (events, endpoint) = connect(&server.base).await?;
    drop(events);

    let client = reqwest::Client::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let health: Value = client
            .get(format!("{}/health", server.base))
            .send()
            .await?
            .json()
            .await?;
        if health["sessions"] == 0 {
            break;
        }
        anyhow::ensure!(tokio::time::Instant::now() < deadline, "session never removed");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let stale = client
        .post(format!("{}{endpoint}", server.base))
        .body(request(1, "tools/list", json!({})))
        .send()
        .await?;
    assert_eq!(stale.status().as_u16(), 400);

    server.shutdown.cancel();
    Ok(())
}

#[tokio::test]
async fn oversized_bodies_are_refused() -> anyhow::Result<()> {
    let server = start(SseSettings {
        heartbeat: Duration::from_secs(30),
        max_request_bytes: Some(64),
    })
    .await?;
    let (_events, endpoint) = connect(&server.base).await?;

    let resp = reqwest::Client::new()
        .post(format!("{}{endpoint}", server.base))
        .body(call_tool(1, "getCurrentJson", json!({"q": "x".repeat(256)})))
        .send()
        .await?;
    assert_eq!(resp.status().as_u16(), 413);

    server.shutdown.cancel();
    Ok(())
}

#[tokio::test]
async fn shutdown_ends_streams_and_server() -> anyhow::Result<()> {
    let server = start(SseSettings::default()).await?;
    let (mut events, _endpoint) = connect(&server.base).await?;

    server.shutdown.cancel();
    let end = tokio::time::timeout(Duration::from_secs(5), events.next()).await?;
    assert!(matches!(end, Ok(None) | Err(_)));
    tokio::time::timeout(Duration::from_secs(5), server.task).await???;
    Ok(())
}
