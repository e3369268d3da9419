//! Integration tests for `ProcessClient`
//!
//! Each test drives a small `sh` script that plays the agent side of the
//! line protocol.

#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use kodegen_rpc_bridge::{
    BridgeConfig, BridgeError, ClientState, LineObserver, ProcessClient, PromptPayload,
};
use parking_lot::Mutex;
use serde_json::json;
use tokio_test::{assert_err, assert_ok};

const MARKER: &str = r#"{"type":"agent_end"}"#;

/// Replies to every prompt with just the turn-complete marker
const MARKER_ONLY: &str = r#"while IFS= read -r line; do echo '{"type":"agent_end"}'; done"#;

/// Echoes every prompt line back, then ends the turn
const ECHO: &str = r#"while IFS= read -r line; do printf '%s\n' "$line"; echo '{"type":"agent_end"}'; done"#;

/// Reads prompts and never answers
const SILENT: &str = "while IFS= read -r line; do :; done";

const LONG: Duration = Duration::from_secs(10);

fn agent(script: &str) -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), script.to_string()]
}

fn client(script: &str) -> Arc<ProcessClient> {
    client_with(script, BridgeConfig::default())
}

fn client_with(script: &str, config: BridgeConfig) -> Arc<ProcessClient> {
    let _ = env_logger::builder().is_test(true).try_init();
    Arc::new(ProcessClient::new(agent(script), None, config).unwrap())
}

async fn wait_until_busy(client: &ProcessClient) {
    for _ in 0..200 {
        if client.is_busy() && client.status().pid.is_some() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("client never became busy");
}

#[tokio::test]
async fn test_marker_only_turn() {
    let client = client(MARKER_ONLY);
    assert_eq!(client.status().state, ClientState::NotStarted);

    let output = assert_ok!(client.call("hi", LONG, None).await);

    assert_eq!(output.stdout, MARKER);
    assert_eq!(output.code, Some(0));
    assert_eq!(output.signal, None);
    assert!(!output.killed);

    let status = client.status();
    assert_eq!(status.state, ClientState::Idle);
    assert!(status.pid.is_some());
    assert!(status.spawned_at.is_some());
    assert_eq!(status.calls_completed, 1);
}

#[tokio::test]
async fn test_prompt_envelope_reaches_the_agent() {
    let client = client(ECHO);

    let output = assert_ok!(client.call("hello", LONG, None).await);
    let lines: Vec<&str> = output.stdout.lines().collect();
    assert_eq!(lines, vec![r#"{"type":"prompt","message":"hello"}"#, MARKER]);
}

#[tokio::test]
async fn test_coerced_prompt_is_sent_as_text() {
    let client = client(ECHO);
    let payload: PromptPayload = json!({
        "role": "user",
        "content": [{"type": "text", "text": "abc"}, "line two"]
    })
    .into();

    let output = assert_ok!(client.call(payload, LONG, None).await);
    let first = output.stdout.lines().next().unwrap();
    let envelope: serde_json::Value = serde_json::from_str(first).unwrap();
    assert_eq!(envelope, json!({"type": "prompt", "message": "abc\nline two"}));
}

#[tokio::test]
async fn test_observer_sees_lines_in_order_before_resolution() {
    let script = r#"while IFS= read -r line; do
        echo 'Loading model...'
        echo '{"type":"message_update","delta":"4"}'
        echo '{"type":"agent_end"}'
    done"#;
    let client = client(script);

    let seen = Arc::new(Mutex::new(Vec::<String>::new()));
    let sink = Arc::clone(&seen);
    let observer: LineObserver = Arc::new(move |line: &str| sink.lock().push(line.to_string()));

    let output = assert_ok!(client.call("2+2?", LONG, Some(observer)).await);

    let expected = vec![
        "Loading model...".to_string(),
        r#"{"type":"message_update","delta":"4"}"#.to_string(),
        MARKER.to_string(),
    ];
    assert_eq!(*seen.lock(), expected);
    assert_eq!(output.stdout, expected.join("\n"));
    assert_eq!(output.code, Some(0));
}

#[tokio::test]
async fn test_subprocess_is_reused_across_calls() {
    let script = r#"n=0; while IFS= read -r line; do
        n=$((n+1))
        echo "{\"turn\":$n}"
        echo '{"type":"agent_end"}'
    done"#;
    let client = client(script);

    let first = assert_ok!(client.call("one", LONG, None).await);
    let pid = client.status().pid;
    let second = assert_ok!(client.call("two", LONG, None).await);

    assert_eq!(first.stdout, format!("{{\"turn\":1}}\n{MARKER}"));
    assert_eq!(second.stdout, format!("{{\"turn\":2}}\n{MARKER}"));
    assert_eq!(client.status().pid, pid);
    assert_eq!(client.status().calls_completed, 2);
}

#[tokio::test]
async fn test_exit_before_marker_resolves_with_exit_code() {
    let script = "IFS= read -r line; echo partial; echo 'something broke' >&2; exit 2";
    let client = client(script);

    let output = assert_ok!(client.call("go", LONG, None).await);

    assert_eq!(output.code, Some(2));
    assert_eq!(output.stdout, "partial");
    assert!(output.stderr.contains("something broke"));
    assert_eq!(output.signal, None);
    assert!(!output.killed);
    assert_eq!(client.status().state, ClientState::Terminated);
}

#[tokio::test]
async fn test_next_call_after_exit_respawns() {
    let script = r#"IFS= read -r line; echo '{"type":"agent_end"}'; exit 0"#;
    let client = client(script);

    assert_ok!(client.call("one", LONG, None).await);

    // Wait for the exit supervisor to drop the dead handle
    for _ in 0..200 {
        if client.status().state == ClientState::Terminated {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(client.status().state, ClientState::Terminated);

    let output = assert_ok!(client.call("two", LONG, None).await);
    assert_eq!(output.stdout, MARKER);
}

#[tokio::test]
async fn test_timeout_kills_subprocess() {
    let client = client(SILENT);

    let err = assert_err!(client.call("hello?", Duration::from_millis(200), None).await);

    assert!(err.is_timeout());
    assert!(matches!(err, BridgeError::Timeout { timeout_ms: 200 }));
    assert!(!client.is_busy());

    let status = client.status();
    assert_eq!(status.state, ClientState::Terminated);
    assert_eq!(status.pid, None);
    assert_eq!(status.calls_completed, 0);
}

#[tokio::test]
async fn test_timeout_is_capped_by_ceiling() {
    let config = BridgeConfig::builder()
        .timeout_ceiling(Duration::from_millis(200))
        .build();
    let client = client_with(SILENT, config);

    let started = tokio::time::Instant::now();
    let err = assert_err!(client.call("hello?", Duration::from_secs(60), None).await);

    assert!(matches!(err, BridgeError::Timeout { timeout_ms: 200 }));
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn test_call_after_timeout_uses_fresh_subprocess() {
    let script = r#"while IFS= read -r line; do
        case "$line" in
            *slow*) ;;
            *) echo '{"type":"agent_end"}' ;;
        esac
    done"#;
    let client = client(script);

    assert_err!(client.call("slow", Duration::from_millis(200), None).await);
    let output = assert_ok!(client.call("fast", LONG, None).await);

    assert_eq!(output.stdout, MARKER);
    assert_eq!(output.code, Some(0));
}

#[tokio::test]
async fn test_second_call_while_pending_is_rejected() {
    let script = r#"while IFS= read -r line; do sleep 0.3; echo '{"type":"agent_end"}'; done"#;
    let client = client(script);

    let first = tokio::spawn({
        let client = Arc::clone(&client);
        async move { client.call("first", LONG, None).await }
    });
    wait_until_busy(&client).await;
    assert_eq!(client.status().state, ClientState::AwaitingResponse);

    let err = assert_err!(client.call("second", LONG, None).await);
    assert!(err.is_busy());

    let output = assert_ok!(first.await.unwrap());
    assert_eq!(output.stdout, MARKER);
    assert_eq!(output.code, Some(0));
    assert!(!client.is_busy());
}

#[tokio::test]
async fn test_dispose_while_pending_reports_kill() {
    let client = client(SILENT);

    let pending = tokio::spawn({
        let client = Arc::clone(&client);
        async move { client.call("hello?", LONG, None).await }
    });
    wait_until_busy(&client).await;

    client.dispose().await;

    let output = assert_ok!(pending.await.unwrap());
    assert!(output.killed);
    assert_eq!(output.code, None);
    assert_eq!(output.signal.as_deref(), Some("SIGKILL"));
    assert_eq!(client.status().state, ClientState::Terminated);
}

#[tokio::test]
async fn test_dropped_call_releases_the_client() {
    let client = client(MARKER_ONLY);

    let abandoned = tokio::time::timeout(
        Duration::from_millis(1),
        client.call("ignored", LONG, None),
    )
    .await;
    drop(abandoned);
    assert!(!client.is_busy());

    assert_ok!(client.call("next", LONG, None).await);
}

#[tokio::test]
async fn test_missing_program_is_reported_and_client_stays_usable() {
    let _ = env_logger::builder().is_test(true).try_init();
    let client = ProcessClient::new(
        vec!["kodegen-no-such-agent-binary".to_string()],
        None,
        BridgeConfig::default(),
    )
    .unwrap();

    let err = assert_err!(client.call("hi", LONG, None).await);
    assert!(matches!(err, BridgeError::ProgramNotFound(ref name) if name == "kodegen-no-such-agent-binary"));
    assert!(!client.is_busy());
    assert_eq!(client.status().state, ClientState::NotStarted);
}

#[tokio::test]
async fn test_missing_cwd_is_a_spawn_error() {
    let _ = env_logger::builder().is_test(true).try_init();
    let client = ProcessClient::new(
        agent(MARKER_ONLY),
        Some("/definitely/not/a/real/dir".into()),
        BridgeConfig::default(),
    )
    .unwrap();

    let err = assert_err!(client.call("hi", LONG, None).await);
    assert!(matches!(err, BridgeError::Spawn(ref msg) if msg.contains("does not exist")));
    assert!(!client.is_busy());
}

#[tokio::test]
async fn test_zero_timeout_is_rejected() {
    let client = client(MARKER_ONLY);

    let err = assert_err!(client.call("hi", Duration::ZERO, None).await);
    assert!(matches!(err, BridgeError::InvalidConfig(_)));
    assert_eq!(client.status().state, ClientState::NotStarted);
}

#[tokio::test]
async fn test_empty_argv_is_rejected() {
    let err = assert_err!(ProcessClient::new(Vec::new(), None, BridgeConfig::default()));
    assert!(matches!(err, BridgeError::InvalidConfig(_)));
}

#[tokio::test]
async fn test_subprocess_runs_in_cwd() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().unwrap();
    let client = ProcessClient::new(
        agent(r#"while IFS= read -r line; do pwd; echo '{"type":"agent_end"}'; done"#),
        Some(dir.path().to_path_buf()),
        BridgeConfig::default(),
    )
    .unwrap();

    let output = assert_ok!(client.call("where?", LONG, None).await);
    let reported = output.stdout.lines().next().unwrap();

    assert_eq!(
        std::fs::canonicalize(reported).unwrap(),
        dir.path().canonicalize().unwrap()
    );
    client.dispose().await;
}

#[tokio::test]
async fn test_configured_env_is_passed_and_filtered() {
    let script = r#"while IFS= read -r line; do
        echo "mode=$AGENT_MODE"
        echo "version=$KODEGEN_BRIDGE_VERSION"
        echo "preload=${LD_PRELOAD:-unset}"
        echo '{"type":"agent_end"}'
    done"#;
    let config = BridgeConfig::builder()
        .env("AGENT_MODE", "rpc")
        .env("LD_PRELOAD", "/tmp/evil.so")
        .build();
    let client = client_with(script, config);

    let output = assert_ok!(client.call("env?", LONG, None).await);
    let lines: Vec<&str> = output.stdout.lines().collect();

    assert_eq!(lines[0], "mode=rpc");
    assert_eq!(lines[1], format!("version={}", kodegen_rpc_bridge::VERSION));
    assert!(!lines[2].contains("evil"));
}

#[tokio::test]
async fn test_stderr_is_capped_to_tail() {
    let script = r#"IFS= read -r line; i=0; while [ $i -lt 50 ]; do echo "err-$i" >&2; i=$((i+1)); done; exit 1"#;
    let config = BridgeConfig::builder().max_stderr_size(16).build();
    let client = client_with(script, config);

    let output = assert_ok!(client.call("go", LONG, None).await);

    assert_eq!(output.code, Some(1));
    assert!(output.stderr.len() <= 16);
    assert!(output.stderr.ends_with("err-49\n"));
}

#[tokio::test]
async fn test_dropping_client_kills_subprocess() {
    let client = client(SILENT);

    // Start the subprocess with a call, then abandon it
    let pending = tokio::spawn({
        let client = Arc::clone(&client);
        async move { client.call("hello?", LONG, None).await }
    });
    wait_until_busy(&client).await;
    let pid = client.status().pid.unwrap();

    pending.abort();
    let _ = pending.await;
    drop(client);

    let mut alive = true;
    for _ in 0..200 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        let status = std::process::Command::new("kill")
            .args(["-0", &pid.to_string()])
            .status()
            .unwrap();
        if !status.success() {
            alive = false;
            break;
        }
    }
    assert!(!alive, "subprocess {pid} outlived its client");
}

#[tokio::test]
async fn test_stderr_keeps_characters_split_across_reads() {
    // 4095 ASCII bytes put the two bytes of `é` on either side of a 4096-byte read
    let script = r#"IFS= read -r line
        pad=$(head -c 4095 /dev/zero | tr '\0' a)
        printf '%sé\n' "$pad" >&2
        exit 1"#;
    let client = client(script);

    let output = assert_ok!(client.call("go", LONG, None).await);

    assert_eq!(output.code, Some(1));
    assert_eq!(output.stderr.len(), 4095 + "é\n".len());
    assert!(output.stderr.ends_with("aé\n"));
    assert!(!output.stderr.contains('\u{FFFD}'));
}

#[tokio::test]
async fn test_stderr_tail_never_starts_mid_character() {
    let script = r#"IFS= read -r line; printf 'ééééé\n' >&2; exit 1"#;
    let config = BridgeConfig::builder().max_stderr_size(4).build();
    let client = client_with(script, config);

    let output = assert_ok!(client.call("go", LONG, None).await);

    // 11 bytes trimmed to 4 would cut inside an `é`; the tail skips ahead instead
    assert_eq!(output.stderr, "é\n");
}

#[tokio::test]
async fn test_startup_output_belongs_to_first_call() {
    let script = r#"echo 'agent ready'
        while IFS= read -r line; do echo '{"type":"agent_end"}'; done"#;
    let client = client(script);

    let output = assert_ok!(client.call("hi", LONG, None).await);

    assert_eq!(output.stdout, format!("agent ready\n{MARKER}"));
    assert_eq!(client.status().state, ClientState::Idle);
}

#[tokio::test]
async fn test_exit_during_output_drain_is_not_a_timeout() {
    // The agent exits at once, but a background child holds stdout/stderr open
    // past the caller's deadline while the exit supervisor drains them.
    let script = "IFS= read -r line; echo partial; sleep 1 & exit 4";
    let config = BridgeConfig::builder()
        .exit_drain_grace(Duration::from_secs(3))
        .build();
    let client = client_with(script, config);

    let output = assert_ok!(client.call("go", Duration::from_millis(300), None).await);

    assert_eq!(output.code, Some(4));
    assert_eq!(output.stdout, "partial");
    assert!(!output.killed);
    assert!(!client.is_busy());
}

#[tokio::test]
async fn test_long_structured_prompt_is_coerced_to_json() {
    use kodegen_rpc_bridge::normalize;
    use kodegen_rpc_bridge::prompt::{PREVIEW_CHARS, preview};

    let client = client(ECHO);
    let payload: PromptPayload = json!({
        "tool": "summarize",
        "args": {"document": "x".repeat(2000)}
    })
    .into();

    let normalized = normalize(&payload);
    assert!(normalized.coerced);
    assert_eq!(preview(&payload, PREVIEW_CHARS).chars().count(), PREVIEW_CHARS);

    let output = assert_ok!(client.call(payload.clone(), LONG, None).await);
    let first = output.stdout.lines().next().unwrap();
    let envelope: serde_json::Value = serde_json::from_str(first).unwrap();

    assert_eq!(envelope["type"], json!("prompt"));
    assert_eq!(envelope["message"], json!(normalized.text));
    assert_eq!(
        serde_json::from_str::<serde_json::Value>(&normalized.text).unwrap(),
        payload.into_value()
    );
}
