//! End-to-end dispatch loop behavior against a mock platform.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;

use live_courier::client::classifier::{Classifier, ClassifierVerdict};
use live_courier::client::{Platform, RejectCode, SendReply};
use live_courier::config::EngineConfig;
use live_courier::engine::outcome::{Attempt, EngineEvent, SendResult};
use live_courier::engine::session::{Status, StopReason};
use live_courier::engine::{Engine, EngineDeps};
use live_courier::error::{ClassifierError, SendError};
use live_courier::store::{keys, ConfigStore, MemoryStore};

const WAIT: Duration = Duration::from_secs(5);

/// Scripted platform: pops replies from a queue, then accepts everything.
struct MockPlatform {
    sends: Mutex<Vec<String>>,
    replies: Mutex<VecDeque<Result<SendReply, SendError>>>,
    resolve_calls: AtomicUsize,
}

impl MockPlatform {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            sends: Mutex::new(Vec::new()),
            replies: Mutex::new(VecDeque::new()),
            resolve_calls: AtomicUsize::new(0),
        })
    }

    fn script(&self, reply: Result<SendReply, SendError>) {
        self.replies.lock().unwrap().push_back(reply);
    }

    fn sent(&self) -> Vec<String> {
        self.sends.lock().unwrap().clone()
    }
}

#[async_trait]
impl Platform for MockPlatform {
    async fn resolve_room(&self, _room: &str) -> Result<u64, SendError> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        Ok(42)
    }

    async fn send_message(&self, _room_id: u64, text: &str) -> Result<SendReply, SendError> {
        self.sends.lock().unwrap().push(text.to_string());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(SendReply::Accepted))
    }

    async fn set_color(&self, _room_id: u64, _color: &str) -> Result<(), SendError> {
        Ok(())
    }
}

/// Classifier that always flags the given tokens.
struct FlaggingClassifier(Vec<String>);

#[async_trait]
impl Classifier for FlaggingClassifier {
    async fn inspect(&self, _text: &str) -> Result<ClassifierVerdict, ClassifierError> {
        Ok(ClassifierVerdict {
            flagged: self.0.clone(),
        })
    }
}

async fn seeded_store(template: &str, settings: serde_json::Value) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store
        .set(keys::TEMPLATES, serde_json::json!([template]))
        .await
        .unwrap();
    store
        .set(keys::ACTIVE_TEMPLATE_INDEX, serde_json::json!(0))
        .await
        .unwrap();
    store.set(keys::SETTINGS, settings).await.unwrap();
    store
}

async fn spawn_engine(
    store: Arc<MemoryStore>,
    platform: Arc<MockPlatform>,
    classifier: Option<Arc<dyn Classifier>>,
) -> Engine {
    let config = EngineConfig {
        room: "1".to_string(),
        rules_url: None,
        ..Default::default()
    };
    let store: Arc<dyn ConfigStore> = store;
    let platform: Arc<dyn Platform> = platform;
    Engine::spawn(
        config,
        EngineDeps {
            store,
            platform,
            classifier,
        },
    )
    .await
    .unwrap()
}

/// Wait for the first event `matcher` maps to `Some`.
async fn wait_for<T>(
    events: &mut tokio::sync::broadcast::Receiver<EngineEvent>,
    mut matcher: impl FnMut(&EngineEvent) -> Option<T>,
) -> T {
    timeout(WAIT, async {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some(found) = matcher(&event) {
                        return found;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("event stream closed: {e}"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

#[tokio::test]
async fn empty_template_start_is_rejected_without_network() {
    let platform = MockPlatform::new();
    let store = Arc::new(MemoryStore::new());
    let engine = spawn_engine(store, Arc::clone(&platform), None).await;
    let mut events = engine.events();

    engine.start();
    let reason = wait_for(&mut events, |event| match event {
        EngineEvent::ValidationFailed { reason } => Some(reason.clone()),
        _ => None,
    })
    .await;
    assert!(reason.contains("template"));

    assert_eq!(engine.status(), Status::Idle);
    assert!(platform.sent().is_empty());
    assert_eq!(platform.resolve_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn rounds_send_chunks_and_increment_counter() {
    let platform = MockPlatform::new();
    let store = seeded_store("abcdefghij", serde_json::json!({"msgSendInterval": 0})).await;
    let engine = spawn_engine(store, Arc::clone(&platform), None).await;
    let mut events = engine.events();

    engine.start();
    wait_for(&mut events, |event| match event {
        EngineEvent::Started => Some(()),
        _ => None,
    })
    .await;

    let round = wait_for(&mut events, |event| match event {
        EngineEvent::RoundCompleted { round, sent } => Some((*round, *sent)),
        _ => None,
    })
    .await;
    assert_eq!(round.1, 1);
    assert!(round.0 >= 1);

    engine.stop();
    wait_for(&mut events, |event| match event {
        EngineEvent::Stopped {
            reason: StopReason::Requested,
        } => Some(()),
        _ => None,
    })
    .await;
    assert_eq!(engine.status(), Status::Idle);

    let sent = platform.sent();
    assert!(!sent.is_empty());
    assert!(sent.iter().all(|s| s == "abcdefghij"));
    // Room resolution happens exactly once per session.
    assert_eq!(platform.resolve_calls.load(Ordering::SeqCst), 1);

    // No further sends once idle.
    let count = platform.sent().len();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(platform.sent().len(), count);
}

#[tokio::test]
async fn substitution_applies_to_outgoing_text() {
    let platform = MockPlatform::new();
    let store = seeded_store("AB", serde_json::json!({"msgSendInterval": 0})).await;
    let engine = spawn_engine(store, Arc::clone(&platform), None).await;
    engine.add_rule("AB", "X").await.unwrap();
    let mut events = engine.events();

    engine.start();
    let outcome = wait_for(&mut events, |event| match event {
        EngineEvent::Sent(outcome) => Some(outcome.clone()),
        _ => None,
    })
    .await;
    engine.stop();

    assert_eq!(outcome.original, "AB");
    assert_eq!(outcome.sent, "X");
    assert!(outcome.replaced());
    assert_eq!(platform.sent()[0], "X");
}

#[tokio::test]
async fn rejection_triggers_single_evasion_retry() {
    let platform = MockPlatform::new();
    platform.script(Ok(SendReply::Rejected(RejectCode::new("f"))));

    let store = seeded_store(
        "so bad",
        serde_json::json!({"msgSendInterval": 0, "aiEvasion": true}),
    )
    .await;
    let classifier: Arc<dyn Classifier> = Arc::new(FlaggingClassifier(vec!["bad".to_string()]));
    let engine = spawn_engine(store, Arc::clone(&platform), Some(classifier)).await;
    let mut events = engine.events();

    engine.start();
    let retry = wait_for(&mut events, |event| match event {
        EngineEvent::Sent(outcome) if outcome.attempt == Attempt::Retry => Some(outcome.clone()),
        _ => None,
    })
    .await;
    engine.stop();

    assert!(matches!(retry.result, SendResult::Accepted));
    assert!(retry.sent.contains('\u{200D}'));

    let sent = platform.sent();
    assert_eq!(sent[0], "so bad");
    assert!(sent[1].contains('\u{200D}'));
    let stripped: String = sent[1].chars().filter(|&c| c != '\u{200D}').collect();
    assert_eq!(stripped, "so bad");
}

#[tokio::test]
async fn emptied_template_auto_stops_with_distinct_reason() {
    let platform = MockPlatform::new();
    let store = seeded_store("hello", serde_json::json!({"msgSendInterval": 0})).await;
    let engine = spawn_engine(store, Arc::clone(&platform), None).await;
    let mut events = engine.events();

    engine.start();
    wait_for(&mut events, |event| match event {
        EngineEvent::Started => Some(()),
        _ => None,
    })
    .await;

    engine.edit_active_template("").await.unwrap();
    wait_for(&mut events, |event| match event {
        EngineEvent::Stopped {
            reason: StopReason::TemplateEmpty,
        } => Some(()),
        _ => None,
    })
    .await;
    assert_eq!(engine.status(), Status::Idle);
}

#[tokio::test]
async fn missing_credential_stops_session() {
    let platform = MockPlatform::new();
    platform.script(Err(SendError::MissingCredential));

    let store = seeded_store("hello", serde_json::json!({"msgSendInterval": 0})).await;
    let engine = spawn_engine(store, Arc::clone(&platform), None).await;
    let mut events = engine.events();

    engine.start();
    wait_for(&mut events, |event| match event {
        EngineEvent::Stopped {
            reason: StopReason::AuthRequired,
        } => Some(()),
        _ => None,
    })
    .await;
    assert_eq!(engine.status(), Status::Idle);
    assert_eq!(platform.sent().len(), 1);
}

#[tokio::test]
async fn transport_failure_reports_and_round_proceeds() {
    let platform = MockPlatform::new();
    platform.script(Err(SendError::Transport("connection reset".into())));

    // Two lines → two chunks; the first fails, the second still goes out.
    let store = seeded_store("one\ntwo", serde_json::json!({"msgSendInterval": 0})).await;
    let engine = spawn_engine(store, Arc::clone(&platform), None).await;
    let mut events = engine.events();

    engine.start();
    let failed = wait_for(&mut events, |event| match event {
        EngineEvent::Sent(outcome) => match &outcome.result {
            SendResult::Failed(error) => Some(error.clone()),
            _ => None,
        },
        _ => None,
    })
    .await;
    assert!(failed.contains("connection reset"));

    wait_for(&mut events, |event| match event {
        EngineEvent::RoundCompleted { sent, .. } => Some(*sent),
        _ => None,
    })
    .await;
    engine.stop();

    let sent = platform.sent();
    assert_eq!(&sent[..2], &["one".to_string(), "two".to_string()]);
}

#[tokio::test]
async fn manual_send_applies_rules_and_reports() {
    let platform = MockPlatform::new();
    let store = Arc::new(MemoryStore::new());
    let engine = spawn_engine(store, Arc::clone(&platform), None).await;
    engine.add_rule("secret", "s-cret").await.unwrap();
    let mut events = engine.events();

    engine.send_once("my secret plan");
    let outcome = wait_for(&mut events, |event| match event {
        EngineEvent::Sent(outcome) if outcome.attempt == Attempt::Manual => Some(outcome.clone()),
        _ => None,
    })
    .await;

    assert_eq!(outcome.sent, "my s-cret plan");
    assert!(outcome.succeeded());
    assert_eq!(engine.status(), Status::Idle);
    assert_eq!(platform.sent(), vec!["my s-cret plan".to_string()]);
}

#[tokio::test]
async fn shutdown_terminates_the_loop() {
    let platform = MockPlatform::new();
    let store = Arc::new(MemoryStore::new());
    let engine = spawn_engine(store, platform, None).await;

    engine.shutdown();
    timeout(WAIT, engine.join()).await.expect("join timed out");
}
