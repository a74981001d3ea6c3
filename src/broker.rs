use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, RwLock, Semaphore, TryAcquireError};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::keys::{KeyRegistry, Signer, Verifier};
use crate::message::{
    clean_headers, Address, Headers, Telegram, HEADER_FROM, HEADER_SIGN, HEADER_SIGN_METHOD,
    SIGN_METHOD_RSA,
};
use crate::metrics;
use crate::registry::AccountRegistry;
use crate::sanitize::sanitize_body;

pub type ListenerId = u64;

/// Push handle for one live connection: a non-blocking sender feeding the
/// connection's outbound loop.
pub type Push = mpsc::UnboundedSender<Telegram>;

struct Listener {
    id: ListenerId,
    push: Push,
}

/// The broker core for one domain.
///
/// Accepts messages via `post`, routes them off the caller's task through a
/// bounded worker pool, and either delivers locally (live listeners first,
/// inbox fallback) or signs and forwards to the receiver's broker. Routing
/// failures are logged and counted, never surfaced to the `post` caller.
pub struct Broker {
    domain: String,
    inboxes: Mutex<HashMap<String, VecDeque<Telegram>>>,
    listeners: RwLock<HashMap<String, Vec<Listener>>>,
    workers: Arc<Semaphore>,
    registry: Arc<AccountRegistry>,
    signer: Signer,
    verifier: Verifier,
    http: reqwest::Client,
    next_listener_id: AtomicU64,
}

impl Broker {
    pub fn new(config: &Config, registry: Arc<AccountRegistry>) -> Result<Arc<Self>> {
        let timeout = Duration::from_secs(config.federation_timeout_secs);
        let keys = Arc::new(KeyRegistry::new(
            config.domain.clone(),
            registry.clone(),
            timeout,
        )?);

        let mut inboxes = HashMap::new();
        for username in registry.usernames() {
            inboxes.insert(username.to_string(), VecDeque::new());
        }
        tracing::info!(domain = %config.domain, inboxes = inboxes.len(), "broker ready");

        Ok(Arc::new(Self {
            domain: config.domain.clone(),
            inboxes: Mutex::new(inboxes),
            listeners: RwLock::new(HashMap::new()),
            workers: Arc::new(Semaphore::new(config.worker_capacity)),
            registry: registry.clone(),
            signer: Signer::new(keys.clone(), config.signature_digest),
            verifier: Verifier::new(keys, config.signature_digest),
            http: reqwest::Client::builder().timeout(timeout).build()?,
            next_listener_id: AtomicU64::new(0),
        }))
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Provisions an empty inbox for `username`. Inboxes normally come from
    /// the account registry at construction time.
    pub async fn create_inbox(&self, username: &str) {
        self.inboxes
            .lock()
            .await
            .entry(username.to_string())
            .or_default();
    }

    /// Accepts a message for routing. Headers are normalized, the body is
    /// sanitized and the routing pipeline runs on a pooled worker; the call
    /// returns as soon as the work is admitted. Header presence is checked
    /// inside the pipeline, not here. The only synchronous failure is pool
    /// saturation.
    pub fn post(self: &Arc<Self>, headers: Headers, body: String, foreign: bool) -> Result<()> {
        let headers = clean_headers(headers);
        let body = sanitize_body(&body);

        let permit = match self.workers.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::NoPermits) => {
                return Err(Error::exhausted("routing worker pool is saturated"));
            }
            Err(TryAcquireError::Closed) => {
                return Err(Error::exhausted("routing worker pool is closed"));
            }
        };

        metrics::MESSAGES_POSTED_TOTAL.inc();
        let broker = Arc::clone(self);
        tokio::spawn(async move {
            let _permit = permit;
            if let Err(err) = broker.sort(Telegram::new(headers, body), foreign).await {
                match &err {
                    Error::Delivery(_) => metrics::DELIVERY_FAILURES_TOTAL.inc(),
                    _ => metrics::MESSAGES_DROPPED_TOTAL.inc(),
                }
                err.log();
            }
        });

        Ok(())
    }

    /// Non-blocking pop of the oldest queued message for `username`.
    /// `Ok(None)` for an empty inbox; an error when no inbox exists at all.
    pub async fn fetch(&self, username: &str) -> Result<Option<Telegram>> {
        let mut inboxes = self.inboxes.lock().await;
        let inbox = inboxes
            .get_mut(username)
            .ok_or_else(|| Error::routing(format!("no inbox for user \"{username}\"")))?;
        Ok(inbox.pop_front())
    }

    /// Registers a push handle for `username`. Multiple listeners per user
    /// fan out; the returned id must be passed to `unlisten` when the
    /// connection ends.
    pub async fn listen(&self, username: &str, push: Push) -> ListenerId {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .write()
            .await
            .entry(username.to_string())
            .or_default()
            .push(Listener { id, push });
        tracing::debug!(user = %username, listener = id, "registered listener");
        id
    }

    /// Removes one listener registration.
    pub async fn unlisten(&self, username: &str, id: ListenerId) {
        let mut listeners = self.listeners.write().await;
        if let Some(entries) = listeners.get_mut(username) {
            entries.retain(|listener| listener.id != id);
            if entries.is_empty() {
                listeners.remove(username);
            }
            tracing::debug!(user = %username, listener = id, "removed listener");
        }
    }

    /// The routing pipeline. Runs on a pooled worker.
    async fn sort(&self, telegram: Telegram, foreign: bool) -> Result<()> {
        let sender = telegram
            .sender()
            .ok_or_else(|| Error::validation("missing header x-telegram-from"))?
            .to_string();
        let receiver = telegram
            .receiver()
            .ok_or_else(|| Error::validation("missing header x-telegram-to"))?
            .to_string();

        if !telegram.content_type().starts_with("text/plain") {
            return Err(Error::validation(format!(
                "unsupported content-type \"{}\"",
                telegram.content_type()
            )));
        }

        if foreign {
            if telegram.sign_method() != SIGN_METHOD_RSA {
                return Err(Error::validation(format!(
                    "unsupported signing method \"{}\"",
                    telegram.sign_method()
                )));
            }
            let signature = telegram
                .signature()
                .filter(|s| !s.is_empty())
                .ok_or_else(|| Error::validation("missing header x-telegram-sign"))?;
            if !receiver.contains('@') {
                return Err(Error::validation(
                    "foreign receiver must be fully qualified",
                ));
            }
            if !self.verifier.verify(&sender, signature, &telegram.body).await {
                return Err(Error::verification(format!(
                    "cannot verify message from {sender}"
                )));
            }
        }

        let recv = Address::parse(&receiver, &self.domain);
        let send = Address::parse(&sender, &self.domain);

        if recv.domain == self.domain {
            self.deliver_inbound(&recv.user, telegram).await
        } else {
            self.deliver_outbound(&send, &recv, telegram).await
        }
    }

    /// Local delivery: every registered listener gets an independent push
    /// attempt; the message is queued iff no listener accepted it.
    async fn deliver_inbound(&self, username: &str, telegram: Telegram) -> Result<()> {
        if !self.inboxes.lock().await.contains_key(username) {
            return Err(Error::routing(format!(
                "no such user or group \"{username}\" on this domain"
            )));
        }

        let delivered = self.push_to_listeners(username, &telegram).await;

        if delivered == 0 {
            self.inboxes
                .lock()
                .await
                .entry(username.to_string())
                .or_default()
                .push_back(telegram);
            metrics::MESSAGES_QUEUED_TOTAL.inc();
            tracing::debug!(user = %username, "queued message");
        } else {
            metrics::MESSAGES_DELIVERED_LIVE_TOTAL.inc();
            tracing::debug!(user = %username, listeners = delivered, "pushed message live");
        }

        Ok(())
    }

    /// Attempts a non-blocking push to every listener for `username` and
    /// returns the number of successful deliveries. Listeners whose
    /// connection is gone are pruned on the spot.
    async fn push_to_listeners(&self, username: &str, telegram: &Telegram) -> usize {
        let mut listeners = self.listeners.write().await;
        let Some(entries) = listeners.get_mut(username) else {
            return 0;
        };

        let mut delivered = 0;
        entries.retain(|listener| match listener.push.send(telegram.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(_) => {
                tracing::debug!(user = %username, listener = listener.id, "pruning dead listener");
                false
            }
        });
        if entries.is_empty() {
            listeners.remove(username);
        }

        delivered
    }

    /// Federation delivery: sign the body with the local sender's key and
    /// hand the message to the receiver's broker. Failures are logged by
    /// the worker wrapper and never retried.
    async fn deliver_outbound(
        &self,
        sender: &Address,
        receiver: &Address,
        telegram: Telegram,
    ) -> Result<()> {
        if sender.domain != self.domain || !self.registry.contains(&sender.user) {
            return Err(Error::routing(format!(
                "sender \"{sender}\" is not a local account"
            )));
        }

        let signature = self
            .signer
            .sign(&sender.user, &telegram.body)
            .await
            .ok_or_else(|| {
                Error::verification(format!("no signing key for {}", sender.user))
            })?;

        let mut headers = telegram.headers;
        headers.insert(HEADER_SIGN_METHOD.to_string(), SIGN_METHOD_RSA.to_string());
        headers.insert(HEADER_SIGN.to_string(), signature);
        headers.insert(
            HEADER_FROM.to_string(),
            format!("{}@{}", sender.user, self.domain),
        );

        let url = format!("https://{}/send", receiver.domain);
        let mut request = self.http.post(&url);
        for (name, value) in &headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .body(telegram.body)
            .send()
            .await
            .map_err(|e| Error::delivery(format!("POST {url} failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::delivery(format!(
                "POST {url} returned {}",
                response.status()
            )));
        }

        metrics::MESSAGES_FORWARDED_TOTAL.inc();
        tracing::info!(receiver = %receiver, "forwarded message");
        Ok(())
    }
}
