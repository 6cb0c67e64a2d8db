//! Secure event logger against a local plain-HTTP collector

mod common;

use common::ScriptedResolver;
use recon_transfer::audit::{
    AuditForwarder, DomainValidationError, DomainValidator, EventDetail, EventFields,
    EventLoggerSettings, EventPostError, EventType, SecureEventLogger, Severity, SourceType,
};
use recon_transfer::constants::events;
use recon_transfer::events::EventPublisher;
use recon_transfer::storage::TaskId;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// One-status HTTP collector; every request body is sent to the returned channel.
/// Connections closed without a request (domain validation probes) are ignored.
async fn collector(status: u16) -> (String, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = listener.local_addr().unwrap().to_string();
    let (sender, receiver) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let sender = sender.clone();
            tokio::spawn(async move {
                if let Some(request) = read_request(stream, status).await {
                    let _ = sender.send(request);
                }
            });
        }
    });

    (endpoint, receiver)
}

async fn read_request(mut stream: TcpStream, status: u16) -> Option<String> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    let body_start = loop {
        let read = stream.read(&mut chunk).await.ok()?;
        if read == 0 {
            return None;
        }
        buffer.extend_from_slice(&chunk[..read]);
        if let Some(position) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
            break position + 4;
        }
    };

    let head = String::from_utf8_lossy(&buffer[..body_start]).to_lowercase();
    let length = head
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buffer.len() < body_start + length {
        let read = stream.read(&mut chunk).await.ok()?;
        if read == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..read]);
    }

    let response = format!("HTTP/1.1 {status} Status\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
    stream.write_all(response.as_bytes()).await.ok()?;
    stream.shutdown().await.ok();

    Some(String::from_utf8_lossy(&buffer).into_owned())
}

fn plain_http_logger(resolver: ScriptedResolver) -> SecureEventLogger {
    let settings = EventLoggerSettings {
        source_id: "scanner-7".to_string(),
        source_type: SourceType::Client,
        post_timeout: Duration::from_secs(2),
        use_tls: false,
        ..EventLoggerSettings::default()
    };
    let validator = DomainValidator::new(Arc::new(resolver), Duration::from_secs(1));
    SecureEventLogger::new(settings, validator).unwrap()
}

fn same_domain_resolver() -> ScriptedResolver {
    ScriptedResolver::new(&[("127.0.0.1", "collector.clinic.org")])
}

fn transfer_event() -> EventFields {
    EventFields::new(EventType::Transfer, EventDetail::End, Severity::Success)
        .with_info("upload complete")
        .with_data("abc-123")
}

#[tokio::test]
async fn validated_server_accepts_events() {
    let (endpoint, mut requests) = collector(200).await;
    let logger = plain_http_logger(same_domain_resolver());

    assert!(logger.configure(&endpoint).await);
    assert!(logger.is_configured());

    let outcome = logger
        .post_event_sync(transfer_event(), Duration::from_secs(2))
        .await;
    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(outcome.http_status, Some(200));

    let request = requests.recv().await.unwrap();
    assert!(request.starts_with("POST /Events"));
    assert!(request.contains("source_id=scanner-7"));
    assert!(request.contains("type=4"));
    assert!(request.contains("data=abc-123"));
}

#[tokio::test]
async fn server_errors_are_reported() {
    let (endpoint, _requests) = collector(500).await;
    let logger = plain_http_logger(same_domain_resolver());
    assert!(logger.configure(&endpoint).await);

    let outcome = logger
        .post_event_sync(transfer_event(), Duration::from_secs(2))
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.http_status, Some(500));
    assert!(matches!(
        outcome.error,
        Some(EventPostError::HttpStatus { status: 500 })
    ));
}

#[tokio::test]
async fn server_outside_domain_is_refused() {
    let (endpoint, mut requests) = collector(200).await;
    let port = endpoint.rsplit(':').next().unwrap();
    let resolver = ScriptedResolver::new(&[
        ("127.0.0.1", "ws-12.clinic.org"),
        ("::1", "ws-12.clinic.org"),
        ("localhost", "collector.elsewhere.net"),
    ]);
    let logger = plain_http_logger(resolver);

    assert!(!logger.configure(&format!("localhost:{port}")).await);
    assert!(logger.is_configuration_error());
    assert!(matches!(
        logger.last_error(),
        Some(DomainValidationError::OutsideDomain { .. })
    ));

    let outcome = logger
        .post_event_sync(transfer_event(), Duration::from_millis(200))
        .await;
    assert!(matches!(outcome.error, Some(EventPostError::NotConfigured)));
    assert!(requests.try_recv().is_err());
}

#[tokio::test]
async fn unresolvable_local_name_is_refused() {
    let (endpoint, _requests) = collector(200).await;
    let logger = plain_http_logger(ScriptedResolver::default());

    assert!(!logger.configure(&endpoint).await);
    assert_eq!(
        logger.last_error().map(|e| e.to_string()).as_deref(),
        Some("Unable to resolve local hostname.")
    );
}

#[tokio::test]
async fn forwarder_posts_lifecycle_events() {
    let (endpoint, mut requests) = collector(200).await;
    let logger = plain_http_logger(same_domain_resolver());
    assert!(logger.configure(&endpoint).await);

    let publisher = EventPublisher::default();
    let forwarder = AuditForwarder::new(logger).spawn(&publisher);

    let id = TaskId::parse("abc-123").unwrap();
    publisher.publish(events::TASK_ARCHIVED, Some(&id), json!({ "result": "Success" }));

    let request = tokio::time::timeout(Duration::from_secs(5), requests.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(request.contains("info=task.archived"));
    assert!(request.contains("type=7"));

    drop(publisher);
    tokio::time::timeout(Duration::from_secs(2), forwarder)
        .await
        .unwrap()
        .unwrap();
}
