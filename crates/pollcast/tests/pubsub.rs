//! Integration tests for the pub-sub facade against the in-memory engine.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;

use pollcast::memory::{MemoryEngine, SessionCall};
use pollcast::{
    Error, Listener, Payload, ProcessIdSource, PubSub, PubSubConfig, DEFAULT_SENTINEL_CHANNEL,
};

type Log = Arc<Mutex<Vec<(&'static str, Payload)>>>;

fn recorder(log: &Log, name: &'static str) -> Listener {
    let log = log.clone();
    Listener::new(move |_, payload| log.lock().push((name, payload.clone())))
}

fn names(log: &Log) -> Vec<&'static str> {
    log.lock().iter().map(|(name, _)| *name).collect()
}

struct TestContext {
    engine: MemoryEngine,
    pubsub: PubSub,
    pid: Arc<AtomicU32>,
    log: Log,
}

impl TestContext {
    fn new() -> Self {
        Self::with_config(PubSubConfig::new())
    }

    fn with_config(config: PubSubConfig) -> Self {
        let engine = MemoryEngine::new();
        let pid = Arc::new(AtomicU32::new(1000));
        let source = {
            let pid = pid.clone();
            ProcessIdSource::from_fn(move || pid.load(Ordering::SeqCst))
        };
        let pubsub =
            PubSub::with_config(engine.clone(), config.with_process_id(source)).unwrap();

        Self {
            engine,
            pubsub,
            pid,
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn fork(&self) {
        self.pid.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_first_listener_issues_single_listen() {
    let ctx = TestContext::new();

    ctx.pubsub.listen("foo", recorder(&ctx.log, "a")).unwrap();
    ctx.pubsub.listen("foo", recorder(&ctx.log, "b")).unwrap();

    assert_eq!(ctx.engine.listen_count("foo"), 1);
    assert_eq!(ctx.engine.listen_count(DEFAULT_SENTINEL_CHANNEL), 1);
    assert_eq!(ctx.engine.open_count(), 1);
}

#[test]
fn test_emptying_channel_issues_single_unlisten() {
    let ctx = TestContext::new();
    let a = ctx.pubsub.listen("foo", recorder(&ctx.log, "a")).unwrap();
    let b = ctx.pubsub.listen("foo", recorder(&ctx.log, "b")).unwrap();

    ctx.pubsub.unlisten("foo", Some(&a)).unwrap();
    assert_eq!(ctx.engine.unlisten_count("foo"), 0);

    ctx.pubsub.unlisten("foo", Some(&b)).unwrap();
    assert_eq!(ctx.engine.unlisten_count("foo"), 1);

    ctx.pubsub.unlisten("foo", Some(&b)).unwrap();
    ctx.pubsub.unlisten("foo", None).unwrap();
    assert_eq!(ctx.engine.unlisten_count("foo"), 1);
}

#[test]
fn test_duplicate_listener_fires_twice() {
    let ctx = TestContext::new();
    let a = recorder(&ctx.log, "a");
    ctx.pubsub.listen("foo", a.clone()).unwrap();
    ctx.pubsub.listen("foo", a).unwrap();

    ctx.pubsub.notify("foo", "hi").unwrap();

    assert_eq!(names(&ctx.log), vec!["a", "a"]);
    assert_eq!(ctx.engine.listen_count("foo"), 1);
}

#[test]
fn test_unlisten_without_listener_removes_all() {
    let ctx = TestContext::new();
    ctx.pubsub.listen("foo", recorder(&ctx.log, "a")).unwrap();
    ctx.pubsub.listen("foo", recorder(&ctx.log, "b")).unwrap();

    ctx.pubsub.unlisten("foo", None).unwrap();
    ctx.pubsub.notify("foo", "hi").unwrap();

    assert!(ctx.log.lock().is_empty());
    assert_eq!(ctx.engine.unlisten_count("foo"), 1);
    assert!(ctx.pubsub.channels().is_empty());
}

#[test]
fn test_targeted_unlisten_keeps_others() {
    let ctx = TestContext::new();
    let a = recorder(&ctx.log, "a");
    ctx.pubsub.listen("foo", a.clone()).unwrap();
    ctx.pubsub.listen("foo", recorder(&ctx.log, "b")).unwrap();
    ctx.pubsub.listen("foo", a.clone()).unwrap();

    ctx.pubsub.unlisten("foo", Some(&a)).unwrap();
    ctx.pubsub.notify("foo", "hi").unwrap();

    assert_eq!(names(&ctx.log), vec!["b"]);
    assert_eq!(ctx.pubsub.listener_count("foo"), 1);
}

#[test]
fn test_end_to_end() {
    let ctx = TestContext::new();
    let a = ctx.pubsub.listen("foo", recorder(&ctx.log, "a")).unwrap();
    ctx.pubsub.listen("foo", recorder(&ctx.log, "b")).unwrap();

    ctx.pubsub.notify("foo", "hi").unwrap();
    assert_eq!(
        *ctx.log.lock(),
        vec![("a", Payload::from("hi")), ("b", Payload::from("hi"))]
    );

    ctx.log.lock().clear();
    ctx.pubsub.unlisten("foo", Some(&a)).unwrap();
    ctx.pubsub.notify("foo", "bye").unwrap();
    assert_eq!(*ctx.log.lock(), vec![("b", Payload::from("bye"))]);
}

#[test]
fn test_plain_text_is_unmodified() {
    let ctx = TestContext::new();
    ctx.pubsub.listen("foo", recorder(&ctx.log, "a")).unwrap();

    ctx.pubsub.notify("foo", r#"{"looks": "like json"}"#).unwrap();

    assert_eq!(ctx.engine.notified("foo"), vec![r#"{"looks": "like json"}"#]);
    assert_eq!(
        ctx.log.lock()[0].1,
        Payload::from(r#"{"looks": "like json"}"#)
    );
}

#[test]
fn test_json_round_trip_through_engine() {
    let ctx = TestContext::new();
    ctx.pubsub.json("events");
    ctx.pubsub.listen("events", recorder(&ctx.log, "a")).unwrap();

    let values = vec![
        json!("text"),
        json!(3),
        json!({"id": 7, "name": "ada"}),
        json!([1, 2, 3]),
        json!(null),
    ];
    for value in &values {
        ctx.pubsub.notify("events", value.clone()).unwrap();
    }

    let received: Vec<Payload> = ctx.log.lock().iter().map(|(_, p)| p.clone()).collect();
    let expected: Vec<Payload> = values.into_iter().map(Payload::Json).collect();
    assert_eq!(received, expected);
}

#[test]
fn test_notify_json_serializes_structs() {
    #[derive(serde::Serialize)]
    struct Job<'a> {
        id: u32,
        state: &'a str,
    }

    let ctx = TestContext::new();
    ctx.pubsub.json("jobs");
    ctx.pubsub
        .notify_json("jobs", &Job { id: 1, state: "done" })
        .unwrap();

    let sent = ctx.engine.notified("jobs");
    let decoded: serde_json::Value = serde_json::from_str(&sent[0]).unwrap();
    assert_eq!(decoded, json!({"id": 1, "state": "done"}));
}

#[test]
fn test_encode_error_happens_before_io() {
    let ctx = TestContext::new();
    ctx.pubsub.json("jobs");

    let mut bad_keys = std::collections::HashMap::new();
    bad_keys.insert((1, 2), "tuple keys are not JSON");
    let err = ctx.pubsub.notify_json("jobs", &bad_keys).unwrap_err();

    assert!(matches!(err, Error::Encode { .. }));
    assert_eq!(ctx.engine.open_count(), 0);
}

#[test]
fn test_structured_payload_on_plain_channel() {
    let ctx = TestContext::new();
    let err = ctx.pubsub.notify("plain", json!({"a": 1})).unwrap_err();
    assert!(matches!(err, Error::PayloadNotText(_)));
    assert_eq!(ctx.engine.open_count(), 0);
}

#[test]
fn test_listener_receives_instance() {
    let ctx = TestContext::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let listener = {
        let seen = seen.clone();
        Listener::new(move |pubsub, _| seen.lock().push(pubsub.listener_count("foo")))
    };
    ctx.pubsub.listen("foo", listener).unwrap();

    ctx.pubsub.notify("foo", "hi").unwrap();

    assert_eq!(*seen.lock(), vec![1]);
}

#[test]
fn test_fork_clears_subscriptions() {
    let ctx = TestContext::new();
    ctx.pubsub.listen("foo", recorder(&ctx.log, "a")).unwrap();
    let before = ctx.pubsub.connection().unwrap();

    ctx.fork();
    let after = ctx.pubsub.connection().unwrap();

    assert_ne!(before.generation(), after.generation());
    assert!(ctx.pubsub.channels().is_empty());
    assert_eq!(ctx.engine.listen_count("foo"), 1);

    let old = ctx.engine.session(1).unwrap();
    assert_eq!(old.handler_count(), 0);
    assert!(!ctx.engine.session(2).unwrap().is_listening("foo"));

    ctx.pubsub.notify("foo", "lost").unwrap();
    assert!(ctx.log.lock().is_empty());
}

#[test]
fn test_listen_after_fork_is_first_registration() {
    let ctx = TestContext::new();
    ctx.pubsub.listen("foo", recorder(&ctx.log, "a")).unwrap();

    ctx.fork();
    ctx.pubsub.listen("foo", recorder(&ctx.log, "b")).unwrap();

    assert_eq!(ctx.engine.open_count(), 2);
    assert_eq!(ctx.engine.listen_count("foo"), 2);
    assert_eq!(ctx.pubsub.listener_count("foo"), 1);

    ctx.pubsub.notify("foo", "hi").unwrap();
    assert_eq!(names(&ctx.log), vec!["b"]);
}

#[test]
fn test_close_reconnects_and_resubscribes() {
    let ctx = TestContext::new();
    let mut reconnects = ctx.pubsub.subscribe_reconnect();
    ctx.pubsub.listen("foo", recorder(&ctx.log, "a")).unwrap();
    ctx.pubsub.listen("bar", recorder(&ctx.log, "b")).unwrap();
    let first = reconnects.try_recv().unwrap();

    ctx.engine.clear_calls();
    first.session().close();

    let second = reconnects.try_recv().unwrap();
    assert_eq!(second.generation(), first.generation() + 1);
    assert!(ctx.pubsub.is_connected());

    let session = ctx.engine.session(2).unwrap();
    assert!(session.is_listening("foo"));
    assert!(session.is_listening("bar"));
    assert!(session.is_listening(DEFAULT_SENTINEL_CHANNEL));
    assert_eq!(ctx.engine.listen_count("foo"), 1);

    ctx.pubsub.notify("foo", "again").unwrap();
    assert_eq!(names(&ctx.log), vec!["a"]);
}

#[test]
fn test_failed_reconnect_retries_lazily() {
    let ctx = TestContext::new();
    ctx.pubsub.listen("foo", recorder(&ctx.log, "a")).unwrap();
    let first = ctx.pubsub.connection().unwrap();

    ctx.engine.fail_next_opens(1);
    first.session().close();

    assert!(!ctx.pubsub.is_connected());
    assert_eq!(ctx.pubsub.listener_count("foo"), 1);

    ctx.pubsub.notify("foo", "recovered").unwrap();
    assert_eq!(ctx.engine.open_count(), 2);
    assert_eq!(names(&ctx.log), vec!["a"]);
}

#[test]
fn test_connection_creation_error_surfaces() {
    let ctx = TestContext::new();
    ctx.engine.fail_next_opens(1);

    let err = ctx
        .pubsub
        .listen("foo", recorder(&ctx.log, "a"))
        .unwrap_err();
    assert!(matches!(err, Error::ConnectionCreation(_)));
    assert_eq!(ctx.pubsub.listener_count("foo"), 0);

    ctx.pubsub.listen("foo", recorder(&ctx.log, "a")).unwrap();
    assert_eq!(ctx.pubsub.listener_count("foo"), 1);
}

#[test]
fn test_stale_close_is_ignored() {
    let ctx = TestContext::new();
    let first = ctx.pubsub.connection().unwrap();

    ctx.fork();
    let second = ctx.pubsub.connection().unwrap();
    first.session().close();

    let current = ctx.pubsub.connection().unwrap();
    assert_eq!(current.generation(), second.generation());
    assert_eq!(ctx.engine.open_count(), 2);
}

#[test]
fn test_poll_interval_forwarded() {
    let ctx = TestContext::with_config(
        PubSubConfig::new().with_poll_interval(Duration::from_millis(1500)),
    );
    ctx.pubsub.connection().unwrap();

    assert!(ctx.engine.calls().contains(&SessionCall::SetPollInterval {
        session: 1,
        interval: Duration::from_millis(1500),
    }));
}

#[test]
fn test_dispose_then_reuse() {
    let ctx = TestContext::new();
    ctx.pubsub.listen("foo", recorder(&ctx.log, "a")).unwrap();

    ctx.pubsub.dispose();

    assert!(!ctx.pubsub.is_connected());
    assert!(ctx.pubsub.channels().is_empty());
    assert!(ctx.engine.session(1).unwrap().is_closed());

    ctx.pubsub.listen("foo", recorder(&ctx.log, "b")).unwrap();
    ctx.pubsub.notify("foo", "hi").unwrap();
    assert_eq!(names(&ctx.log), vec!["b"]);
}

#[test]
fn test_instances_are_isolated() {
    let engine = MemoryEngine::new();
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let first = PubSub::new(engine.clone());
    let second = PubSub::new(engine.clone());

    first.listen("foo", recorder(&log, "first")).unwrap();
    second.listen("bar", recorder(&log, "second")).unwrap();

    assert_eq!(engine.open_count(), 2);
    assert_eq!(first.channels(), vec!["foo".to_string()]);
    assert_eq!(second.channels(), vec!["bar".to_string()]);

    second.notify("foo", "cross").unwrap();
    assert_eq!(names(&log), vec!["first"]);
}
