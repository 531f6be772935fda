//! Newline-delimited JSON-RPC over a byte stream (normally stdin/stdout).
//!
//! One reader task feeds a bounded queue drained by a fixed pool of workers. Responses are
//! written whole, one per line, in completion order. When the queue is full the reader handles
//! the line itself, which applies backpressure to the client instead of dropping requests.

use crate::protocol::{Peer, ProtocolEngine};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt as _, AsyncWrite, AsyncWriteExt as _};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy)]
pub struct StdioSettings {
    pub workers: usize,
    pub queue: usize,
}

impl Default for StdioSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            queue: 100,
        }
    }
}

/// Serve one peer until EOF, a write failure, or `shutdown`.
///
/// Cancels `shutdown` on the way out so the rest of the process stops with it.
pub async fn serve<R, W>(
    engine: Arc<ProtocolEngine>,
    reader: R,
    writer: W,
    settings: StdioSettings,
    shutdown: CancellationToken,
) where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let peer = Arc::new(Peer::new("stdio"));
    let writer = Arc::new(Mutex::new(writer));
    let (tx, rx) = mpsc::channel::<String>(settings.queue.max(1));
    let rx = Arc::new(Mutex::new(rx));

    let mut workers = JoinSet::new();
    for worker in 0..settings.workers.max(1) {
        let engine = engine.clone();
        let peer = peer.clone();
        let writer = writer.clone();
        let rx = rx.clone();
        let shutdown = shutdown.clone();
        workers.spawn(async move {
            loop {
                let next = rx.lock().await.recv().await;
                let Some(line) = next else {
                    break;
                };
                process_line(&engine, &peer, &writer, &line, &shutdown).await;
            }
            tracing::trace!(worker, "stdio worker stopped");
        });
    }

    let mut lines = reader.lines();
    loop {
        let line = tokio::select! {
            () = shutdown.cancelled() => break,
            line = lines.next_line() => line,
        };
        match line {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match tx.try_send(line) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(line)) => {
                        tracing::debug!("stdio queue full; handling request inline");
                        process_line(&engine, &peer, &writer, &line, &shutdown).await;
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                }
            }
            Ok(None) => {
                tracing::info!("stdin closed");
                break;
            }
            Err(e) => {
                tracing::warn!(error = %e, "stdin read failed");
                break;
            }
        }
    }

    drop(tx);
    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            tracing::warn!(error = %e, "stdio worker failed");
        }
    }
    peer.close();
    shutdown.cancel();
}

async fn process_line<W>(
    engine: &ProtocolEngine,
    peer: &Peer,
    writer: &Mutex<W>,
    line: &str,
    shutdown: &CancellationToken,
) where
    W: AsyncWrite + Unpin,
{
    let Some(response) = engine.handle(peer, line).await else {
        return;
    };
    let mut out = response.to_line();
    out.push('\n');

    let mut writer = writer.lock().await;
    let written = async {
        writer.write_all(out.as_bytes()).await?;
        writer.flush().await
    }
    .await;
    if let Err(e) = written {
        tracing::warn!(error = %e, "stdout write failed; shutting down");
        shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::invoker::ToolInvoker;
    use crate::protocol::EngineSettings;
    use async_trait::async_trait;
    use restbridge_http::client::{HttpRequest, HttpResponse, OutboundClient, OutboundError};
    use restbridge_openapi::index::OperationIndex;
    use serde_json::Value;
    use std::collections::{HashMap, HashSet};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt as _, BufReader};

    struct SlowClient;

    #[async_trait]
    impl OutboundClient for SlowClient {
        async fn send(
            &self,
            request: HttpRequest,
            _timeout: Duration,
        ) -> Result<HttpResponse, OutboundError> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(HttpResponse {
                status: 200,
                body: format!(r#"{{"path":"{}"}}"#, request.url.path()).into_bytes(),
            })
        }
    }

    fn engine(shutdown: &CancellationToken) -> Arc<ProtocolEngine> {
        let spec = serde_yaml::from_str(
            r#"
openapi: "3.0.0"
info: { title: t, version: "1" }
servers: [ { url: "http://upstream.test" } ]
paths:
  /items/{id}:
    get:
      operationId: getItem
      parameters: [ { name: id, in: path, required: true, schema: { type: string } } ]
      responses: { "200": { description: ok } }
"#,
        )
        .expect("spec");
        let index = Arc::new(OperationIndex::from_spec(&spec).expect("index"));
        let invoker = ToolInvoker::new(
            &Config::default(),
            index,
            Arc::new(SlowClient),
            Arc::new(HashMap::<String, String>::new()),
        )
        .expect("invoker");
        Arc::new(ProtocolEngine::new(
            Arc::new(invoker),
            EngineSettings {
                server_name: "restbridge-stdio".to_string(),
                server_version: "test".to_string(),
                tool_prefix: "mcp_".to_string(),
            },
            shutdown.clone(),
        ))
    }

    async fn run(input: String, settings: StdioSettings) -> Vec<Value> {
        let shutdown = CancellationToken::new();
        let engine = engine(&shutdown);
        let (out_writer, mut out_reader) = tokio::io::duplex(1 << 20);
        let reader = BufReader::new(std::io::Cursor::new(input.into_bytes()));

        serve(engine, reader, out_writer, settings, shutdown.clone()).await;
        assert!(shutdown.is_cancelled());

        let mut output = String::new();
        out_reader
            .read_to_string(&mut output)
            .await
            .expect("read output");
        output
            .lines()
            .map(|l| serde_json::from_str(l).expect("each line is one JSON document"))
            .collect()
    }

    #[tokio::test]
    async fn answers_every_request_once_and_skips_notifications() {
        let mut input = String::new();
        input.push_str(r#"{"jsonrpc":"2.0","id":0,"method":"initialize","params":{}}"#);
        input.push('\n');
        input.push_str(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#);
        input.push_str("\n\n");
        for i in 1..=20 {
            input.push_str(&format!(
                r#"{{"jsonrpc":"2.0","id":{i},"method":"tools/call","params":{{"name":"getItem","arguments":{{"id":"{i}"}}}}}}"#
            ));
            input.push('\n');
        }

        let responses = run(input, StdioSettings::default()).await;
        assert_eq!(responses.len(), 21);
        let ids: HashSet<i64> = responses.iter().filter_map(|r| r["id"].as_i64()).collect();
        assert_eq!(ids, (0..=20).collect());
        for r in responses.iter().filter(|r| r["id"] != 0) {
            assert_eq!(r["result"]["isError"], Value::Bool(false), "{r}");
        }
    }

    #[tokio::test]
    async fn full_queue_falls_back_to_inline_handling() {
        let input: String = (1..=10)
            .map(|i| {
                format!(
                    "{{\"jsonrpc\":\"2.0\",\"id\":{i},\"method\":\"tools/call\",\"params\":{{\"name\":\"getItem\",\"arguments\":{{\"id\":\"x\"}}}}}}\n"
                )
            })
            .collect();
        let responses = run(input, StdioSettings { workers: 1, queue: 1 }).await;
        let ids: HashSet<i64> = responses.iter().filter_map(|r| r["id"].as_i64()).collect();
        assert_eq!(ids, (1..=10).collect());
    }

    #[tokio::test]
    async fn malformed_lines_get_parse_errors() {
        let responses = run("not json\n".to_string(), StdioSettings::default()).await;
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0]["id"], Value::Null);
        assert_eq!(responses[0]["error"]["code"], -32700);
    }

    #[tokio::test]
    async fn exit_stops_the_reader() {
        let shutdown = CancellationToken::new();
        let engine = engine(&shutdown);
        let (mut client, server) = tokio::io::duplex(1 << 16);
        let (server_read, server_write) = tokio::io::split(server);

        let task = tokio::spawn(serve(
            engine,
            BufReader::new(server_read),
            server_write,
            StdioSettings::default(),
            shutdown.clone(),
        ));

        tokio::io::AsyncWriteExt::write_all(
            &mut client,
            b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"exit\"}\n",
        )
        .await
        .expect("write");

        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("serve returns after exit")
            .expect("join");

        let mut buf = vec![0u8; 256];
        let n = client.read(&mut buf).await.expect("read");
        let line = String::from_utf8_lossy(&buf[..n]);
        assert!(line.starts_with(r#"{"jsonrpc":"2.0","id":1,"result":null}"#), "{line}");
    }
}
