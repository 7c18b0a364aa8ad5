//! Scenario 4 from SPEC_FULL §8, exercised against a live-bound server
//! rather than the in-process `tower::oneshot` unit tests in `src/api.rs`.

use agent_supervisor::{serve_control_api, AgentRouter, NullRetriever, Supervisor, ThreadName, ThreadRegistry};
use std::sync::Arc;
use tempfile::tempdir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

#[tokio::test]
async fn test_message_to_unknown_agent_is_404_with_available_list() {
    let dir = tempdir().unwrap();
    let registry = ThreadRegistry::with_threads_root(dir.path().join("threads"));
    let supervisor = Arc::new(Supervisor::new(dir.path().to_path_buf(), registry, Arc::new(NullRetriever)));
    let router = Arc::new(AgentRouter::new(supervisor.clone()));

    let t1 = ThreadName::new("t1").unwrap();
    let t2 = ThreadName::new("t2").unwrap();
    supervisor.ensure_thread(&t1).await.unwrap();
    supervisor.ensure_thread(&t2).await.unwrap();

    let (addr, _handle) = serve_control_api(router).await.unwrap();

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let body = r#"{"message":"hi","sender":"t1"}"#;
    let request = format!(
        "POST /api/agents/ghost/message HTTP/1.1\r\n\
         Host: 127.0.0.1\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\r\n\
         {body}",
        body.len()
    );
    stream.write_all(request.as_bytes()).await.unwrap();
    stream.shutdown().await.unwrap();

    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();

    assert!(response.starts_with("HTTP/1.1 404"), "unexpected status line: {response}");
    let (_, json_body) = response.split_once("\r\n\r\n").expect("response has a body");
    let parsed: serde_json::Value = serde_json::from_str(json_body.trim()).unwrap();
    assert_eq!(parsed["delivered"], false);
    assert_eq!(parsed["error"], "Agent \"ghost\" not found");
    let mut available: Vec<String> =
        parsed["available"].as_array().unwrap().iter().map(|v| v.as_str().unwrap().to_string()).collect();
    available.sort();
    assert_eq!(available, vec!["t1".to_string(), "t2".to_string()]);
}
