mod common;

use anyhow::Context as _;
use common::{BridgeProcess, call_tool, request, spawn_restbridge, spawn_weather_upstream, weather_spec};
use serde_json::{Value, json};
use std::io::{BufRead as _, BufReader, Write as _};
use std::time::Duration;

fn exchange(child: &mut BridgeProcess, lines: &[String], expect: usize) -> anyhow::Result<Vec<Value>> {
    let (mut stdin, stdout) = child.take_stdio()?;
    for line in lines {
        writeln!(stdin, "{line}")?;
    }
    stdin.flush()?;

    let mut reader = BufReader::new(stdout);
    let mut out = Vec::new();
    for _ in 0..expect {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        out.push(serde_json::from_str(line.trim_end())?);
    }
    // Keep stdin open until the responses are in so EOF can't race `exit`.
    drop(stdin);
    Ok(out)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stdio_binary_serves_calls_and_exits_cleanly() -> anyhow::Result<()> {
    let upstream = spawn_weather_upstream().await?;
    let dir = tempfile::tempdir()?;
    let spec = dir.path().join("weather.yaml");
    std::fs::write(&spec, weather_spec(&upstream.base))?;
    let env_file = dir.path().join("secrets.env");
    std::fs::write(&env_file, format!("APIKEYAUTH_API_KEY={}\n", common::API_KEY))?;

    let spec_arg = spec.display().to_string();
    let env_arg = env_file.display().to_string();
    let responses = tokio::task::spawn_blocking(move || -> anyhow::Result<_> {
        let mut child = spawn_restbridge(
            &["--spec", &spec_arg, "--env-file", &env_arg, "--mode", "stdio"],
            &[],
        )?;
        let responses = exchange(
            &mut child,
            &[
                request(1, "initialize", json!({"protocolVersion": "2024-11-05"})),
                call_tool(2, "getCurrentJson", json!({"q": "Nairobi"})),
            ],
            2,
        )?;
        Ok((child, responses))
    })
    .await??;
    let (mut child, responses) = responses;

    assert_eq!(responses.len(), 2);
    let init = responses
        .iter()
        .find(|r| r["id"] == 1)
        .context("initialize response")?;
    assert_eq!(init["result"]["serverInfo"]["name"], "restbridge-stdio");
    let call = responses
        .iter()
        .find(|r| r["id"] == 2)
        .context("call response")?;
    assert_eq!(call["result"]["isError"], false);

    let status = tokio::task::spawn_blocking(move || child.wait_exit(Duration::from_secs(10)))
        .await??;
    assert!(status.success(), "exit status {status:?}");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn exit_method_stops_the_process_with_status_zero() -> anyhow::Result<()> {
    let upstream = spawn_weather_upstream().await?;
    let dir = tempfile::tempdir()?;
    let spec = dir.path().join("weather.json");
    let doc: Value = serde_yaml::from_str(&weather_spec(&upstream.base))?;
    std::fs::write(&spec, serde_json::to_vec(&doc)?)?;
    let env_file = dir.path().join("empty.env");
    std::fs::write(&env_file, "")?;

    let spec_arg = spec.display().to_string();
    let env_arg = env_file.display().to_string();
    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        let mut child = spawn_restbridge(
            &["--spec", &spec_arg, "--env-file", &env_arg, "--mode", "stdio"],
            &[],
        )?;
        let (mut stdin, stdout) = child.take_stdio()?;
        writeln!(stdin, "{}", request(1, "exit", json!({})))?;
        stdin.flush()?;

        let mut line = String::new();
        BufReader::new(stdout).read_line(&mut line)?;
        let resp: Value = serde_json::from_str(line.trim_end())?;
        assert_eq!(resp, json!({"jsonrpc": "2.0", "id": 1, "result": null}));

        // stdin is still open: the process must stop on its own.
        let status = child.wait_exit(Duration::from_secs(10))?;
        assert!(status.success(), "exit status {status:?}");
        drop(stdin);
        Ok(())
    })
    .await??;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sse_binary_reports_health() -> anyhow::Result<()> {
    let upstream = spawn_weather_upstream().await?;
    let dir = tempfile::tempdir()?;
    let spec = dir.path().join("weather.yaml");
    std::fs::write(&spec, weather_spec(&upstream.base))?;
    let config = dir.path().join("restbridge.yaml");
    std::fs::write(&config, "server:\n  heartbeatSecs: 1\nglobal:\n  timeout: 5\n")?;
    let env_file = dir.path().join("empty.env");
    std::fs::write(&env_file, "")?;

    let port = common::free_local_port()?;
    let port_arg = port.to_string();
    let _child = spawn_restbridge(
        &[
            "--spec",
            &spec.display().to_string(),
            "--config",
            &config.display().to_string(),
            "--env-file",
            &env_file.display().to_string(),
            "--host",
            "127.0.0.1",
            "--port",
            &port_arg,
        ],
        &[],
    )?;

    let health = common::wait_for_health(&format!("http://127.0.0.1:{port}"), Duration::from_secs(15)).await?;
    assert_eq!(health, json!({"status": "ok", "sessions": 0}));
    Ok(())
}

#[test]
fn startup_failure_exits_non_zero() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let spec = dir.path().join("missing.yaml");
    let env_file = dir.path().join("empty.env");
    std::fs::write(&env_file, "")?;

    let mut child = spawn_restbridge(
        &[
            "--spec",
            &spec.display().to_string(),
            "--env-file",
            &env_file.display().to_string(),
            "--mode",
            "stdio",
        ],
        &[],
    )?;
    let status = child.wait_exit(Duration::from_secs(10))?;
    assert!(!status.success());
    Ok(())
}

#[test]
fn duplicate_operation_ids_fail_startup() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let spec = dir.path().join("dup.yaml");
    std::fs::write(
        &spec,
        r#"
openapi: "3.0.0"
info: { title: dup, version: "1" }
servers: [ { url: "http://127.0.0.1:9" } ]
paths:
  /a: { get: { operationId: same, responses: { "200": { description: ok } } } }
  /b: { get: { operationId: same, responses: { "200": { description: ok } } } }
"#,
    )?;
    let env_file = dir.path().join("empty.env");
    std::fs::write(&env_file, "")?;

    let mut child = spawn_restbridge(
        &[
            "--spec",
            &spec.display().to_string(),
            "--env-file",
            &env_file.display().to_string(),
            "--mode",
            "stdio",
        ],
        &[],
    )?;
    let status = child.wait_exit(Duration::from_secs(10))?;
    assert!(!status.success());
    Ok(())
}
