//! Error alerts delivered to a live webhook endpoint.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Semaphore};
use vigil_telemetry::config::AlertConfig;
use vigil_telemetry::model::{AlertRule, Category, SiteDraft};
use vigil_telemetry::{Site, TelemetryEnvelope};

use common::{base_config, object, TestEngine};

/// Webhook that reports each POST body on a channel, then answers once a
/// permit is released.
struct Webhook {
    url: String,
    bodies: mpsc::UnboundedReceiver<Value>,
    answers: Arc<Semaphore>,
}

impl Webhook {
    async fn start(answer_immediately: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/hook", listener.local_addr().unwrap());
        let (tx, bodies) = mpsc::unbounded_channel();
        let answers = Arc::new(Semaphore::new(if answer_immediately {
            Semaphore::MAX_PERMITS
        } else {
            0
        }));

        let gate = Arc::clone(&answers);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let tx = tx.clone();
                let gate = Arc::clone(&gate);
                tokio::spawn(serve(stream, tx, gate));
            }
        });

        Self {
            url,
            bodies,
            answers,
        }
    }

    fn answer(&self) {
        self.answers.add_permits(1);
    }
}

async fn serve(mut stream: TcpStream, tx: mpsc::UnboundedSender<Value>, gate: Arc<Semaphore>) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = stream.read(&mut chunk).await.unwrap();
        if n == 0 {
            return;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_ascii_lowercase();
    let length = head
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < header_end + length {
        let n = stream.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let body: Value = serde_json::from_slice(&buf[header_end..header_end + length]).unwrap();
    let _ = tx.send(body);

    let _permit = gate.acquire().await.unwrap();
    let _ = stream
        .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok")
        .await;
}

fn alerting_engine() -> TestEngine {
    TestEngine::with_config(vigil_telemetry::TelemetryConfig {
        alerts: AlertConfig {
            enabled: true,
            timeout_ms: 10_000,
            ..AlertConfig::default()
        },
        ..base_config()
    })
}

async fn alerting_site(env: &TestEngine, hook: &Webhook, rules: Vec<AlertRule>) -> Site {
    env.engine
        .sites()
        .create(SiteDraft {
            alert_url: Some(hook.url.clone()),
            alert_rules: rules,
            ..SiteDraft::named("shop")
        })
        .await
        .unwrap()
}

fn error_envelope(site: &Site, payload: Value) -> TelemetryEnvelope {
    TelemetryEnvelope::new(Category::Error, site.id.as_str())
        .with_user("u-1")
        .with_reports_type("js")
        .with_payload(object(payload))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn suppressed_errors_send_nothing() {
    let env = alerting_engine();
    let mut hook = Webhook::start(true).await;
    let site = alerting_site(
        &env,
        &hook,
        vec![AlertRule {
            ignore: true,
            ..AlertRule::for_pattern("/health")
        }],
    )
    .await;

    let dispatcher = env.engine.dispatcher();
    dispatcher
        .ingest(error_envelope(
            &site,
            json!({
                "errorType": "HttpError",
                "value": "503",
                "meta": {"url": "https://api.test/health"}
            }),
        ))
        .await
        .unwrap();
    dispatcher
        .ingest(error_envelope(
            &site,
            json!({"errorType": "Error", "value": "Request failed with status 0"}),
        ))
        .await
        .unwrap();

    env.engine.shutdown().await;
    assert!(hook.bodies.try_recv().is_err());
    assert_eq!(env.database.memory_collection("error_logs").len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unsuppressed_error_posts_one_markdown_message() {
    let env = alerting_engine();
    let mut hook = Webhook::start(true).await;
    let site = alerting_site(&env, &hook, Vec::new()).await;

    env.engine
        .dispatcher()
        .ingest(error_envelope(
            &site,
            json!({"errorType": "TypeError", "value": "cart is undefined"}),
        ))
        .await
        .unwrap();

    env.engine.shutdown().await;
    let body = hook.bodies.try_recv().unwrap();
    assert_eq!(body["msgtype"], json!("markdown"));
    let content = body["markdown"]["content"].as_str().unwrap();
    assert!(content.contains("shop"));
    assert!(content.contains("cart is undefined"));
    assert!(hook.bodies.try_recv().is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ingest_returns_before_webhook_answers() {
    let env = alerting_engine();
    let mut hook = Webhook::start(false).await;
    let site = alerting_site(&env, &hook, Vec::new()).await;

    let receipt = tokio::time::timeout(
        Duration::from_secs(5),
        env.engine.dispatcher().ingest(error_envelope(
            &site,
            json!({"errorType": "TypeError", "value": "checkout crashed"}),
        )),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(receipt.category, Category::Error);

    // The POST arrives only after ingest has already returned, and stays
    // unanswered until released.
    let body = tokio::time::timeout(Duration::from_secs(5), hook.bodies.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(body["msgtype"], json!("markdown"));
    assert_eq!(env.engine.pool().stats().completed, 0);

    hook.answer();
    env.engine.shutdown().await;
    assert_eq!(env.engine.pool().stats().completed, 1);
    assert!(hook.bodies.try_recv().is_err());
}
