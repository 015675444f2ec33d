//! End-to-end scenarios over the wired-up `DispatchCore`: §8 scenarios
//! S1 (basic turn), S2 (5:1 distribution), S6 (memory trigger cadence), and
//! the shutdown-liveness invariant.

use dispatch_runtime::config::{Config, Credentials, LaneConfig};
use dispatch_runtime::llm::test_double::ScriptedLlmClient;
use dispatch_runtime::store::InMemoryStore;
use dispatch_runtime::types::Mode;
use dispatch_runtime::DispatchCore;
use std::sync::Arc;
use std::time::Duration;

fn fast_config() -> Config {
    Config {
        chat_lane: LaneConfig {
            rpm: 6000,
            capacity: 1000,
            timeout: Duration::from_secs(30),
        },
        memory_lane: LaneConfig {
            rpm: 6000,
            capacity: 1000,
            timeout: Duration::from_secs(30),
        },
        worker_pool_size: 32,
        credentials: Credentials {
            main_api_key: "main".into(),
            backup_api_key: "backup".into(),
            memory_api_key: None,
        },
        max_history_rounds: 3,
        memory_trigger_every_n_turns: 3,
        embedding_dim: 8,
    }
}

#[tokio::test]
async fn s1_basic_turn_produces_one_release_and_two_history_entries() {
    let config = fast_config();
    let llm = Arc::new(ScriptedLlmClient::new(config.embedding_dim));
    llm.chat_replies.lock().push("hi back".to_string());
    let store = Arc::new(InMemoryStore::new());
    let core = DispatchCore::new(&config, llm, store);
    core.start();

    let reply = core.chat("u1", "hi").await.unwrap();
    assert_eq!(reply, "hi back");

    let stats = core.dispatcher.stats();
    assert_eq!(stats.chat_lane.released, 1);

    let messages = core.history.get("u1").await.unwrap();
    assert_eq!(messages.len(), 2);

    core.stop().await;
}

#[tokio::test]
async fn s2_twelve_turns_follow_the_five_to_one_pattern() {
    let config = fast_config();
    let llm = Arc::new(ScriptedLlmClient::new(config.embedding_dim));
    for _ in 0..12 {
        llm.chat_replies.lock().push("ack".to_string());
    }
    let store = Arc::new(InMemoryStore::new());
    let core = DispatchCore::new(&config, llm, store);
    core.start();

    for i in 0..12 {
        let user_id = format!("user-{i}");
        core.chat(&user_id, "hello").await.unwrap();
    }

    let stats = core.dispatcher.stats();
    let main = stats
        .credentials
        .get(&dispatch_runtime::CredentialKind::Main)
        .cloned()
        .unwrap_or_default();
    let backup = stats
        .credentials
        .get(&dispatch_runtime::CredentialKind::Backup)
        .cloned()
        .unwrap_or_default();
    assert_eq!(main.total_calls, 10);
    assert_eq!(backup.total_calls, 2);

    core.stop().await;
}

#[tokio::test]
async fn s6_nine_turns_spawn_exactly_three_memory_jobs() {
    let config = fast_config();
    let llm = Arc::new(ScriptedLlmClient::new(config.embedding_dim));
    for _ in 0..9 {
        llm.chat_replies.lock().push("ack".to_string());
    }
    let store = Arc::new(InMemoryStore::new());
    let core = DispatchCore::new(&config, llm.clone(), store);
    core.start();

    for _ in 0..9 {
        core.chat("u1", "tell me more").await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    // 9 user-turn chat calls + 3 memory-extraction chat calls = 12.
    assert_eq!(
        llm.chat_calls.load(std::sync::atomic::Ordering::SeqCst),
        12
    );
    assert_eq!(llm.embedding_call_count(), 3);

    core.stop().await;
}

#[tokio::test]
async fn shutdown_resolves_outstanding_admissions_promptly() {
    let config = fast_config();
    let llm = Arc::new(ScriptedLlmClient::new(config.embedding_dim));
    llm.chat_replies.lock().push("reply".to_string());
    let store = Arc::new(InMemoryStore::new());
    let core = DispatchCore::new(&config, llm, store);
    core.start();

    let dispatcher = core.dispatcher.clone();
    let in_flight = tokio::spawn(async move {
        dispatcher
            .run_chat(
                vec![dispatch_runtime::conversation::ConversationMessage::user("hi")],
                None,
            )
            .await
    });
    tokio::time::sleep(Duration::from_millis(5)).await;

    core.stop().await;
    let result = in_flight.await.unwrap();
    assert!(result.is_ok() || matches!(result, Err(dispatch_runtime::DispatchError::ShuttingDown)));

    let err = core
        .dispatcher
        .run_chat(
            vec![dispatch_runtime::conversation::ConversationMessage::user("too late")],
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, dispatch_runtime::DispatchError::ShuttingDown));
}

#[tokio::test]
async fn eval_mode_does_not_touch_chat_trigger_cadence() {
    let config = fast_config();
    let llm = Arc::new(ScriptedLlmClient::new(config.embedding_dim));
    for _ in 0..3 {
        llm.chat_replies.lock().push("eval".to_string());
    }
    let store = Arc::new(InMemoryStore::new());
    let core = DispatchCore::new(&config, llm.clone(), store);
    core.start();

    for _ in 0..3 {
        core.agent
            .run("u1", "grade this", None, None, Mode::Eval)
            .await
            .unwrap();
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Eval turns are never counted by the hook (only the `chat()` convenience
    // path calls `maybe_spawn`), so no memory job should have run.
    assert_eq!(llm.embedding_call_count(), 0);

    core.stop().await;
}
