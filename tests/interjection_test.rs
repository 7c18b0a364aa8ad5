//! Scenario 3 from SPEC_FULL §8: injecting into a thread with a turn in
//! flight kills that turn and starts a fresh one, rather than queuing or
//! racing the two.

mod common;

use agent_supervisor::{AgentRouter, Event, NullRetriever, Supervisor, ThreadName, ThreadRegistry};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

const POLL_INTERVAL: Duration = Duration::from_millis(20);
const POLL_TIMEOUT: Duration = Duration::from_secs(3);

#[tokio::test]
async fn test_injecting_into_running_thread_kills_and_restarts() {
    let dir = tempdir().unwrap();
    let registry = ThreadRegistry::with_threads_root(dir.path().join("threads"));
    let supervisor = Arc::new(Supervisor::new(dir.path().to_path_buf(), registry, Arc::new(NullRetriever)));
    let router = AgentRouter::new(supervisor.clone());
    let name = ThreadName::new("t1").unwrap();

    let long_running = common::fake_cli_sleeping_then_emitting(dir.path(), 5000, "");
    unsafe {
        std::env::set_var("AGENT_SUPERVISOR_CLI_PATH", &long_running);
    }

    let mut subscription = supervisor.subscribe(&name).await;

    let first_turn = {
        let supervisor = supervisor.clone();
        let name = name.clone();
        tokio::spawn(async move { supervisor.send_message(&name, "start", Vec::new()).await })
    };

    let deadline = tokio::time::Instant::now() + POLL_TIMEOUT;
    let mut became_streaming = false;
    while tokio::time::Instant::now() < deadline {
        if supervisor.is_streaming(name.as_str()).await {
            became_streaming = true;
            break;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    assert!(became_streaming, "original turn never registered as streaming");

    // Swap the CLI fixture before the injected turn spawns a fresh child,
    // so the second turn completes quickly instead of sleeping 5s too.
    let quick = common::fake_cli_emitting(
        dir.path(),
        "{\"type\":\"assistant\",\"message\":{\"content\":[{\"type\":\"text\",\"text\":\"ack\"}]}}\n",
    );
    unsafe {
        std::env::set_var("AGENT_SUPERVISOR_CLI_PATH", &quick);
    }

    router.inject_message(&name, "please stop", "t2").await.unwrap();

    let deadline = tokio::time::Instant::now() + POLL_TIMEOUT;
    let mut saw_injected_message = false;
    while tokio::time::Instant::now() < deadline {
        let history = supervisor.get_history(&name, 0).await.unwrap();
        if history.iter().any(|m| m.content.starts_with("[From agent \"t2\"]:\nplease stop")) {
            saw_injected_message = true;
            break;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    assert!(saw_injected_message, "injected message never appended to history");

    // Drain events until we've seen the injected turn's own StreamEnd.
    let deadline = tokio::time::Instant::now() + POLL_TIMEOUT;
    let mut seen_injected_user_message = false;
    let mut saw_second_stream_end = false;
    'outer: while tokio::time::Instant::now() < deadline {
        while let Ok(event) = tokio::time::timeout(Duration::from_millis(50), subscription.recv()).await {
            match event {
                Some(Event::UserMessageAppended { message }) if message.content.starts_with("[From agent \"t2\"]") => {
                    seen_injected_user_message = true;
                }
                Some(Event::StreamEnd { .. }) if seen_injected_user_message => {
                    saw_second_stream_end = true;
                    break 'outer;
                }
                Some(_) => {}
                None => break 'outer,
            }
        }
    }
    assert!(saw_second_stream_end, "never observed the injected turn's StreamEnd");

    let final_history = supervisor.get_history(&name, 0).await.unwrap();
    assert!(final_history.iter().any(|m| m.content == "ack"));

    first_turn.abort();
    unsafe {
        std::env::remove_var("AGENT_SUPERVISOR_CLI_PATH");
    }
}
