use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use telegraph_server::broker::Broker;
use telegraph_server::config::{Config, SignatureDigest};
use telegraph_server::error::Error;
use telegraph_server::keys::{generate_keypair, KeyRegistry, Signer};
use telegraph_server::message::{Headers, Telegram};
use telegraph_server::registry::{AccountRegistry, User};

const DOMAIN: &str = "test.local";

fn test_config(domain: &str) -> Config {
    Config {
        domain: domain.to_string(),
        port: 8080,
        socket_port: 8081,
        config_dir: PathBuf::from("."),
        session_ttl_secs: 3600,
        worker_capacity: 64,
        federation_timeout_secs: 5,
        signature_digest: SignatureDigest::Sha1,
        rust_log: "info".to_string(),
    }
}

fn keyless_user() -> User {
    User {
        fullname: None,
        email: None,
        admin: false,
        private_key: String::new(),
        public_key: String::new(),
    }
}

fn registry_of(usernames: &[&str]) -> Arc<AccountRegistry> {
    let mut users = HashMap::new();
    for name in usernames {
        users.insert(name.to_string(), keyless_user());
    }
    Arc::new(AccountRegistry::from_users(users))
}

fn local_broker(usernames: &[&str]) -> Arc<Broker> {
    Broker::new(&test_config(DOMAIN), registry_of(usernames)).unwrap()
}

fn headers(from: &str, to: &str) -> Headers {
    let mut headers = Headers::new();
    headers.insert("x-telegram-from".to_string(), from.to_string());
    headers.insert("x-telegram-to".to_string(), to.to_string());
    headers.insert("content-type".to_string(), "text/plain".to_string());
    headers
}

/// Routing runs on pooled workers, so tests poll for the outcome instead of
/// assuming the post call already routed.
async fn fetch_eventually(broker: &Broker, username: &str) -> Option<Telegram> {
    for _ in 0..200 {
        if let Some(telegram) = broker.fetch(username).await.unwrap() {
            return Some(telegram);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    None
}

/// Grace period for pipelines that are expected to drop their input.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(200)).await;
}

#[tokio::test]
async fn local_post_queues_when_no_listener() {
    let broker = local_broker(&["a", "b"]);

    broker
        .post(headers("a", "b@test.local"), "hello".to_string(), false)
        .unwrap();

    let telegram = fetch_eventually(&broker, "b").await.expect("message queued");
    assert_eq!(
        telegram.headers.get("x-telegram-from").map(String::as_str),
        Some("a")
    );
    assert_eq!(telegram.body, "hello");

    // the inbox held exactly one message
    assert!(broker.fetch("b").await.unwrap().is_none());
}

#[tokio::test]
async fn bare_receiver_defaults_to_own_domain() {
    let broker = local_broker(&["a", "b"]);

    broker
        .post(headers("a", "b"), "hi".to_string(), false)
        .unwrap();

    assert!(fetch_eventually(&broker, "b").await.is_some());
}

#[tokio::test]
async fn missing_to_header_is_dropped() {
    let broker = local_broker(&["a", "b"]);

    let mut incomplete = Headers::new();
    incomplete.insert("x-telegram-from".to_string(), "a".to_string());
    incomplete.insert("content-type".to_string(), "text/plain".to_string());

    broker.post(incomplete, "orphan".to_string(), false).unwrap();
    settle().await;

    assert!(broker.fetch("a").await.unwrap().is_none());
    assert!(broker.fetch("b").await.unwrap().is_none());
}

#[tokio::test]
async fn wrong_content_type_is_dropped() {
    let broker = local_broker(&["a", "b"]);

    let mut bad = headers("a", "b@test.local");
    bad.insert("content-type".to_string(), "application/json".to_string());

    broker.post(bad, "{}".to_string(), false).unwrap();
    settle().await;

    assert!(broker.fetch("b").await.unwrap().is_none());
}

#[tokio::test]
async fn unknown_recipient_is_dropped() {
    let broker = local_broker(&["a"]);

    broker
        .post(headers("a", "ghost@test.local"), "boo".to_string(), false)
        .unwrap();
    settle().await;

    assert!(broker.fetch("a").await.unwrap().is_none());
}

#[tokio::test]
async fn fetch_without_inbox_is_a_precondition_failure() {
    let broker = local_broker(&["a"]);

    assert!(matches!(broker.fetch("ghost").await, Err(Error::Routing(_))));
}

fn registry_with_keypair(signing_user: &str, extra: &[&str]) -> Arc<AccountRegistry> {
    let (private_key, public_key) = generate_keypair().unwrap();
    let mut users = HashMap::new();
    users.insert(
        signing_user.to_string(),
        User {
            fullname: None,
            email: None,
            admin: false,
            private_key,
            public_key,
        },
    );
    for name in extra {
        users.insert(name.to_string(), keyless_user());
    }
    Arc::new(AccountRegistry::from_users(users))
}

fn foreign_headers(from: &str, to: &str, signature: &str) -> Headers {
    let mut headers = headers(from, to);
    headers.insert("x-telegram-sign-method".to_string(), "RSA".to_string());
    headers.insert("x-telegram-sign".to_string(), signature.to_string());
    headers
}

#[tokio::test]
async fn foreign_post_with_bad_signature_is_dropped() {
    let registry = registry_with_keypair("alice", &["bob"]);
    let broker = Broker::new(&test_config(DOMAIN), registry).unwrap();

    broker
        .post(
            foreign_headers("alice", "bob@test.local", "bm90LWEtc2lnbmF0dXJl"),
            "forged".to_string(),
            true,
        )
        .unwrap();
    settle().await;

    assert!(broker.fetch("bob").await.unwrap().is_none());
}

#[tokio::test]
async fn foreign_post_with_valid_signature_is_delivered() {
    let registry = registry_with_keypair("alice", &["bob"]);
    let broker = Broker::new(&test_config(DOMAIN), registry.clone()).unwrap();

    let keys = Arc::new(
        KeyRegistry::new(DOMAIN, registry, Duration::from_secs(5)).unwrap(),
    );
    let signer = Signer::new(keys, SignatureDigest::Sha1);
    let signature = signer.sign("alice", "authentic").await.unwrap();

    broker
        .post(
            foreign_headers("alice", "bob@test.local", &signature),
            "authentic".to_string(),
            true,
        )
        .unwrap();

    let telegram = fetch_eventually(&broker, "bob").await.expect("delivered");
    assert_eq!(telegram.body, "authentic");
}

#[tokio::test]
async fn foreign_post_without_signature_is_dropped() {
    let registry = registry_with_keypair("alice", &["bob"]);
    let broker = Broker::new(&test_config(DOMAIN), registry).unwrap();

    broker
        .post(headers("alice", "bob@test.local"), "bare".to_string(), true)
        .unwrap();
    settle().await;

    assert!(broker.fetch("bob").await.unwrap().is_none());
}

#[tokio::test]
async fn foreign_post_with_unqualified_receiver_is_dropped() {
    let registry = registry_with_keypair("alice", &["bob"]);
    let broker = Broker::new(&test_config(DOMAIN), registry.clone()).unwrap();

    let keys = Arc::new(
        KeyRegistry::new(DOMAIN, registry, Duration::from_secs(5)).unwrap(),
    );
    let signer = Signer::new(keys, SignatureDigest::Sha1);
    let signature = signer.sign("alice", "unqualified").await.unwrap();

    broker
        .post(
            foreign_headers("alice", "bob", &signature),
            "unqualified".to_string(),
            true,
        )
        .unwrap();
    settle().await;

    assert!(broker.fetch("bob").await.unwrap().is_none());
}

#[tokio::test]
async fn foreign_post_with_unknown_sign_method_is_dropped() {
    let registry = registry_with_keypair("alice", &["bob"]);
    let broker = Broker::new(&test_config(DOMAIN), registry).unwrap();

    let mut bad_method = foreign_headers("alice", "bob@test.local", "c2ln");
    bad_method.insert("x-telegram-sign-method".to_string(), "HMAC".to_string());

    broker.post(bad_method, "hm".to_string(), true).unwrap();
    settle().await;

    assert!(broker.fetch("bob").await.unwrap().is_none());
}

#[tokio::test]
async fn listener_receives_before_inbox() {
    let broker = local_broker(&["a", "u"]);

    let (tx, mut rx) = mpsc::unbounded_channel();
    broker.listen("u", tx).await;

    broker
        .post(headers("a", "u@test.local"), "live".to_string(), false)
        .unwrap();

    let pushed = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("push within deadline")
        .expect("channel open");
    assert_eq!(pushed.body, "live");

    settle().await;
    assert!(broker.fetch("u").await.unwrap().is_none());
}

#[tokio::test]
async fn all_listeners_receive_the_message() {
    let broker = local_broker(&["a", "u"]);

    let (tx1, mut rx1) = mpsc::unbounded_channel();
    let (tx2, mut rx2) = mpsc::unbounded_channel();
    broker.listen("u", tx1).await;
    broker.listen("u", tx2).await;

    broker
        .post(headers("a", "u@test.local"), "fanout".to_string(), false)
        .unwrap();

    let first = tokio::time::timeout(Duration::from_secs(2), rx1.recv())
        .await
        .unwrap()
        .unwrap();
    let second = tokio::time::timeout(Duration::from_secs(2), rx2.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.body, "fanout");
    assert_eq!(second.body, "fanout");

    settle().await;
    assert!(broker.fetch("u").await.unwrap().is_none());
}

#[tokio::test]
async fn unlistened_user_falls_back_to_inbox() {
    let broker = local_broker(&["a", "u"]);

    let (tx, _rx) = mpsc::unbounded_channel();
    let id = broker.listen("u", tx).await;
    broker.unlisten("u", id).await;

    broker
        .post(headers("a", "u@test.local"), "offline".to_string(), false)
        .unwrap();

    let telegram = fetch_eventually(&broker, "u").await.expect("queued");
    assert_eq!(telegram.body, "offline");
}

#[tokio::test]
async fn dead_listener_does_not_swallow_messages() {
    let broker = local_broker(&["a", "u"]);

    let (tx, rx) = mpsc::unbounded_channel();
    broker.listen("u", tx).await;
    drop(rx);

    broker
        .post(headers("a", "u@test.local"), "resilient".to_string(), false)
        .unwrap();

    let telegram = fetch_eventually(&broker, "u").await.expect("queued");
    assert_eq!(telegram.body, "resilient");
}

#[tokio::test]
async fn outbound_from_unknown_sender_is_dropped() {
    let broker = local_broker(&["a"]);

    broker
        .post(
            headers("stranger", "bob@elsewhere.example"),
            "hello".to_string(),
            false,
        )
        .unwrap();
    settle().await;

    assert!(broker.fetch("a").await.unwrap().is_none());
}

#[tokio::test]
async fn saturated_pool_rejects_new_work() {
    let mut config = test_config(DOMAIN);
    config.worker_capacity = 0;
    let broker = Broker::new(&config, registry_of(&["a", "b"])).unwrap();

    let result = broker.post(headers("a", "b@test.local"), "full".to_string(), false);
    assert!(matches!(result, Err(Error::Exhausted(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_posts_are_all_retrievable() {
    for n in [1usize, 10, 1000] {
        let broker = local_broker(&["a", "sink"]);

        let mut handles = Vec::with_capacity(n);
        for i in 0..n {
            let broker = broker.clone();
            handles.push(tokio::spawn(async move {
                let body = format!("message-{i}");
                loop {
                    match broker.post(headers("a", "sink@test.local"), body.clone(), false) {
                        Ok(()) => break,
                        Err(Error::Exhausted(_)) => {
                            tokio::time::sleep(Duration::from_millis(1)).await;
                        }
                        Err(err) => panic!("unexpected post error: {err}"),
                    }
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let mut received = HashSet::new();
        while received.len() < n {
            match fetch_eventually(&broker, "sink").await {
                Some(telegram) => {
                    assert!(received.insert(telegram.body), "duplicate delivery");
                }
                None => panic!("lost messages: got {} of {}", received.len(), n),
            }
        }

        let expected: HashSet<String> = (0..n).map(|i| format!("message-{i}")).collect();
        assert_eq!(received, expected);
        assert!(broker.fetch("sink").await.unwrap().is_none());
    }
}

#[tokio::test]
async fn body_is_sanitized_before_delivery() {
    let broker = local_broker(&["a", "b"]);

    broker
        .post(
            headers("a", "b@test.local"),
            "hello <b>world</b>".to_string(),
            false,
        )
        .unwrap();

    let telegram = fetch_eventually(&broker, "b").await.expect("delivered");
    assert_eq!(telegram.body, "hello world");
}

#[tokio::test]
async fn foreign_headers_are_whitelisted_before_queuing() {
    let broker = local_broker(&["a", "b"]);

    let mut noisy = headers("a", "b@test.local");
    noisy.insert("x-forwarded-for".to_string(), "10.0.0.1".to_string());
    noisy.insert("authorization".to_string(), "Bearer sneak".to_string());

    broker.post(noisy, "clean".to_string(), false).unwrap();

    let telegram = fetch_eventually(&broker, "b").await.expect("delivered");
    assert!(!telegram.headers.contains_key("x-forwarded-for"));
    assert!(!telegram.headers.contains_key("authorization"));
}
