//! Payment session manager.
//!
//! Owns the session lifecycle for every namespace:
//!
//! ```text
//! NONE → CREATING → {waiting, processing, sending} → {finished, failed, rejected}
//!                    any non-terminal ──cancel──→ cancelled
//! ```
//!
//! At most one non-terminal session exists per [`SessionKey`]. Creation is
//! serialized per namespace so concurrent requests for the same key reuse
//! the first session instead of creating a second payment.

use crate::catalog;
use crate::config::CallbackConfig;
use crate::error::PaymentError;
use crate::money;
use crate::notify::{EventDetails, NotificationSink, PaymentEvent};
use crate::poller::PollHandle;
use crate::provider::{CreatePayment, PaymentProvider};
use rust_decimal::Decimal;
use session_store::{
    now_millis, Namespace, PackageType, PaymentSession, PaymentStatus, SessionKey, SessionStore,
    StatusUpdate, StoredSessions,
};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, instrument, warn};

/// Default delay between status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// A request for a payment session.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub crypto_id: String,
    pub network_id: Option<String>,
    pub package_type: PackageType,
    pub usd_amount: Decimal,
    pub description: String,
}

/// Result of [`SessionManager::request_session`].
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOutcome {
    pub session: PaymentSession,
    /// True when an existing active session was returned.
    pub reused: bool,
}

/// Result of one status poll.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// The status advanced and was persisted.
    Changed {
        previous: PaymentStatus,
        session: PaymentSession,
    },
    /// The provider reported nothing newer than the stored status.
    Unchanged(PaymentStatus),
    /// The session is terminal or gone; the provider was not consulted or its answer dropped.
    Skipped,
    /// The provider could not be queried. The next poll retries.
    Failed(String),
}

impl PollOutcome {
    /// Whether polling this session again is pointless.
    pub fn is_final(&self) -> bool {
        match self {
            PollOutcome::Changed { session, .. } => session.is_terminal(),
            PollOutcome::Skipped => true,
            PollOutcome::Unchanged(_) | PollOutcome::Failed(_) => false,
        }
    }
}

/// URLs handed to the provider on payment creation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallbackUrls {
    pub ipn_callback_url: Option<String>,
    pub success_url: Option<String>,
    pub cancel_url: Option<String>,
}

impl CallbackUrls {
    pub fn from_config(config: &CallbackConfig) -> Self {
        let public = config
            .public_url
            .as_deref()
            .map(|url| url.trim_end_matches('/'));

        Self {
            ipn_callback_url: public.map(|url| format!("{}/api/payment-callback", url)),
            success_url: config
                .success_url
                .clone()
                .or_else(|| public.map(|url| format!("{}/success", url))),
            cancel_url: config
                .cancel_url
                .clone()
                .or_else(|| public.map(String::from)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PollKey {
    namespace: Namespace,
    key: SessionKey,
}

/// Per-namespace locks for read-modify-write sections.
///
/// An entry lives only while some task holds or waits for it.
#[derive(Default)]
struct NamespaceLocks {
    entries: std::sync::Mutex<HashMap<Namespace, Arc<Mutex<()>>>>,
}

impl NamespaceLocks {
    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<Namespace, Arc<Mutex<()>>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn lock(&self, namespace: &Namespace) -> NamespaceGuard<'_> {
        let lock = self.entries().entry(namespace.clone()).or_default().clone();
        let guard = lock.lock_owned().await;

        NamespaceGuard {
            locks: self,
            namespace: namespace.clone(),
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries().len()
    }
}

struct NamespaceGuard<'a> {
    locks: &'a NamespaceLocks,
    namespace: Namespace,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for NamespaceGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());

        // Clones are only taken under the map lock, so a count of one means
        // no other task holds or awaits this namespace.
        let mut entries = self.locks.entries();
        if entries
            .get(&self.namespace)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            entries.remove(&self.namespace);
        }
    }
}

/// Creates, polls, and cancels payment sessions.
pub struct SessionManager {
    store: SessionStore,
    provider: Arc<dyn PaymentProvider>,
    notifier: Arc<dyn NotificationSink>,
    callbacks: CallbackUrls,
    poll_interval: Duration,
    locks: NamespaceLocks,
    pollers: Mutex<HashMap<PollKey, PollHandle>>,
}

impl SessionManager {
    pub fn new(
        store: SessionStore,
        provider: Arc<dyn PaymentProvider>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            store,
            provider,
            notifier,
            callbacks: CallbackUrls::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            locks: NamespaceLocks::default(),
            pollers: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_callbacks(mut self, callbacks: CallbackUrls) -> Self {
        self.callbacks = callbacks;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub async fn provider_healthy(&self) -> bool {
        self.provider.health_check().await
    }

    /// Return the active session for the request's key, or create one.
    ///
    /// Provider failures leave nothing persisted and are returned as
    /// [`PaymentError::Provider`]. A failed save after a successful creation
    /// is logged; the created session is still returned.
    #[instrument(skip(self, request), fields(namespace = %namespace, crypto = %request.crypto_id, package = %request.package_type))]
    pub async fn request_session(
        &self,
        namespace: &Namespace,
        request: SessionRequest,
    ) -> Result<SessionOutcome, PaymentError> {
        let currency = catalog::resolve(&request.crypto_id, request.network_id.as_deref())?;
        let key = SessionKey::new(
            currency.crypto.id,
            currency.network.map(|n| n.id),
            request.package_type,
        );

        let guard = self.locks.lock(namespace).await;

        let mut stored = self.store.load(namespace).await;
        if let Some(existing) = stored.active(&key) {
            info!("Reusing active session {} for {}", existing.payment_id, key);
            return Ok(SessionOutcome {
                session: existing.clone(),
                reused: true,
            });
        }

        let pay_currency = currency.pay_currency;
        let pay_amount = if catalog::is_stablecoin(pay_currency) {
            debug!("{} is a stablecoin, paying the USD price 1:1", pay_currency);
            money::to_plain(request.usd_amount)
        } else {
            self.provider
                .estimate(request.usd_amount, pay_currency)
                .await
                .inspect_err(|e| warn!("Estimate failed for {}: {}", pay_currency, e))?
        };

        let created_at = now_millis();
        let order_id = format!("ORDER-{}", created_at);

        let payment = self
            .provider
            .create_payment(CreatePayment {
                usd_amount: request.usd_amount,
                pay_currency: pay_currency.to_string(),
                order_id: order_id.clone(),
                description: request.description.clone(),
                ipn_callback_url: self.callbacks.ipn_callback_url.clone(),
                success_url: self.callbacks.success_url.clone(),
                cancel_url: self.callbacks.cancel_url.clone(),
            })
            .await
            .inspect_err(|e| warn!("Payment creation failed for {}: {}", key, e))?;

        let session = PaymentSession {
            crypto_id: key.crypto_id.clone(),
            network_id: key.network_id.clone(),
            package_type: key.package_type,
            payment_id: payment.payment_id,
            pay_address: payment.pay_address,
            pay_amount,
            pay_currency: pay_currency.to_string(),
            order_id,
            qr_url: payment.qr_url,
            status: payment.status,
            created_at,
        };

        stored.insert(session.clone());
        if let Err(e) = self.store.save(namespace, &stored).await {
            error!("Failed to persist session {}: {}", session.payment_id, e);
        }
        drop(guard);

        info!(
            "Created payment {} for {} ({} {})",
            session.payment_id, key, session.pay_amount, session.pay_currency
        );

        let details = EventDetails::new(
            &session.payment_id,
            payment.pay_amount.unwrap_or_else(|| session.pay_amount.clone()),
            currency.label(),
        )
        .with_network(currency.network.map(|n| n.name))
        .with_username(namespace.username())
        .with_order_description(request.description)
        .with_pay_address(&session.pay_address);
        self.notifier.notify(PaymentEvent::PaymentCreated(details)).await;

        Ok(SessionOutcome {
            session,
            reused: false,
        })
    }

    /// Poll the provider once for `session` and apply a newer status.
    ///
    /// Terminal or missing sessions are skipped without a provider call.
    /// The provider is called outside the namespace lock; its answer is
    /// applied only if it advances the stored status.
    #[instrument(skip(self, session), fields(namespace = %namespace, payment_id = %session.payment_id))]
    pub async fn poll_status(&self, namespace: &Namespace, session: &PaymentSession) -> PollOutcome {
        let stored = self.store.load(namespace).await;
        match stored.find_by_payment_id(&session.payment_id) {
            Some(current) if !current.is_terminal() => {}
            _ => {
                debug!("Session is no longer active, skipping poll");
                return PollOutcome::Skipped;
            }
        }

        let status = match self.provider.get_status(&session.payment_id).await {
            Ok(status) => status,
            Err(e) if e.is_transient() => {
                warn!("Status poll failed, retrying next cycle: {}", e);
                return PollOutcome::Failed(e.to_string());
            }
            Err(e) => {
                error!("Provider refused status poll: {}", e);
                return PollOutcome::Failed(e.to_string());
            }
        };

        let guard = self.locks.lock(namespace).await;

        let mut stored = self.store.load(namespace).await;
        let update = stored.apply_status(&session.payment_id, status);
        if matches!(update, StatusUpdate::Applied { .. }) {
            if let Err(e) = self.store.save(namespace, &stored).await {
                error!("Failed to persist status of {}: {}", session.payment_id, e);
            }
        }
        drop(guard);

        match update {
            StatusUpdate::Applied { previous, session } => {
                info!(
                    "Payment {} moved {} -> {}",
                    session.payment_id, previous, session.status
                );

                self.notifier
                    .notify(PaymentEvent::PaymentStatusChanged {
                        details: session_details(namespace, &session),
                        status: session.status.to_string(),
                    })
                    .await;

                PollOutcome::Changed { previous, session }
            }
            StatusUpdate::Stale(current) if current.is_terminal() => PollOutcome::Skipped,
            StatusUpdate::Stale(current) => {
                if current.status != status {
                    debug!("Ignoring stale status {} (stored {})", status, current.status);
                }
                PollOutcome::Unchanged(current.status)
            }
            StatusUpdate::NotFound => PollOutcome::Skipped,
        }
    }

    /// Cancel the active session for `key`. No-op when none is active.
    #[instrument(skip(self), fields(namespace = %namespace, key = %key))]
    pub async fn cancel(&self, namespace: &Namespace, key: &SessionKey) -> Option<PaymentSession> {
        let guard = self.locks.lock(namespace).await;

        let mut stored = self.store.load(namespace).await;
        let payment_id = stored.active(key)?.payment_id.clone();

        let StatusUpdate::Applied { session, .. } =
            stored.apply_status(&payment_id, PaymentStatus::Cancelled)
        else {
            return None;
        };

        if let Err(e) = self.store.save(namespace, &stored).await {
            error!("Failed to persist cancellation of {}: {}", payment_id, e);
        }
        drop(guard);

        self.stop_polling(namespace, key).await;
        info!("Cancelled payment {}", payment_id);

        self.notifier
            .notify(PaymentEvent::PaymentCancelled(session_details(
                namespace, &session,
            )))
            .await;

        Some(session)
    }

    /// Stop the namespace's pollers and delete all of its sessions.
    #[instrument(skip(self), fields(namespace = %namespace))]
    pub async fn clear_all(&self, namespace: &Namespace) -> Result<(), PaymentError> {
        self.stop_namespace_polling(namespace).await;

        let _guard = self.locks.lock(namespace).await;

        self.store.clear(namespace).await?;
        info!("Cleared all sessions");
        Ok(())
    }

    /// Active sessions and history of a namespace.
    pub async fn sessions(&self, namespace: &Namespace) -> StoredSessions {
        self.store.load(namespace).await
    }

    /// The non-terminal session for `key`, if any.
    pub async fn active_session(
        &self,
        namespace: &Namespace,
        key: &SessionKey,
    ) -> Option<PaymentSession> {
        self.store.load(namespace).await.active(key).cloned()
    }

    /// Start polling the session for `key` every poll interval.
    ///
    /// Returns false if a poller for that key is already running. The poller
    /// stops on its own once the session is terminal or gone.
    pub async fn start_polling(self: &Arc<Self>, namespace: &Namespace, key: &SessionKey) -> bool {
        let poll_key = PollKey {
            namespace: namespace.clone(),
            key: key.clone(),
        };

        let mut pollers = self.pollers.lock().await;
        if pollers.get(&poll_key).is_some_and(|h| !h.is_finished()) {
            return false;
        }

        let handle = PollHandle::spawn(
            Arc::downgrade(self),
            namespace.clone(),
            key.clone(),
            self.poll_interval,
        );
        pollers.insert(poll_key, handle);

        debug!("Started polling {} in {}", key, namespace);
        true
    }

    /// Stop the poller for `key`. An in-flight poll still completes.
    pub async fn stop_polling(&self, namespace: &Namespace, key: &SessionKey) -> bool {
        let poll_key = PollKey {
            namespace: namespace.clone(),
            key: key.clone(),
        };

        match self.pollers.lock().await.remove(&poll_key) {
            Some(handle) => {
                handle.stop();
                true
            }
            None => false,
        }
    }

    /// Forget the poller `id` for `key` once its task has ended. A newer
    /// poller for the same key is left alone.
    pub(crate) async fn poller_finished(&self, namespace: &Namespace, key: &SessionKey, id: u64) {
        let poll_key = PollKey {
            namespace: namespace.clone(),
            key: key.clone(),
        };

        let mut pollers = self.pollers.lock().await;
        if pollers.get(&poll_key).is_some_and(|h| h.id() == id) {
            pollers.remove(&poll_key);
        }
    }

    async fn stop_namespace_polling(&self, namespace: &Namespace) {
        self.pollers.lock().await.retain(|poll_key, handle| {
            if poll_key.namespace == *namespace {
                handle.stop();
                false
            } else {
                true
            }
        });
    }

    /// Keys currently being polled.
    pub async fn active_polls(&self) -> Vec<(Namespace, SessionKey)> {
        let mut pollers = self.pollers.lock().await;
        pollers.retain(|_, handle| !handle.is_finished());
        pollers
            .keys()
            .map(|k| (k.namespace.clone(), k.key.clone()))
            .collect()
    }

    /// Stop every poller.
    pub async fn shutdown(&self) {
        let mut pollers = self.pollers.lock().await;
        for handle in pollers.values() {
            handle.stop();
        }
        info!("Stopped {} pollers", pollers.len());
        pollers.clear();
    }
}

/// Event fields for a stored session, with catalog display names.
fn session_details(namespace: &Namespace, session: &PaymentSession) -> EventDetails {
    let crypto = catalog::find_crypto(&session.crypto_id);
    let currency = crypto
        .map(|c| c.symbol.to_string())
        .unwrap_or_else(|| session.crypto_id.to_uppercase());
    let network = session.network_id.as_deref().map(|id| {
        crypto
            .and_then(|c| c.network(id))
            .map(|n| n.name.to_string())
            .unwrap_or_else(|| id.to_string())
    });

    EventDetails::new(&session.payment_id, &session.pay_amount, currency)
        .with_network(network)
        .with_username(namespace.username())
        .with_pay_address(&session.pay_address)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{MockPaymentProvider, ProviderError, ProviderPayment};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingSink {
        events: std::sync::Mutex<Vec<PaymentEvent>>,
    }

    impl RecordingSink {
        fn kinds(&self) -> Vec<&'static str> {
            self.events.lock().unwrap().iter().map(|e| e.kind()).collect()
        }

        fn last(&self) -> PaymentEvent {
            self.events.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn notify(&self, event: PaymentEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    fn payment(id: &str) -> ProviderPayment {
        ProviderPayment {
            payment_id: id.into(),
            pay_address: format!("addr-{}", id),
            pay_amount: None,
            status: PaymentStatus::Waiting,
            qr_url: None,
        }
    }

    fn request(crypto: &str, network: Option<&str>, package_type: PackageType) -> SessionRequest {
        SessionRequest {
            crypto_id: crypto.into(),
            network_id: network.map(String::from),
            package_type,
            usd_amount: Decimal::new(29999, 2),
            description: "Panel Access".into(),
        }
    }

    fn setup(provider: MockPaymentProvider, store: SessionStore) -> (Arc<SessionManager>, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let manager = SessionManager::new(store, Arc::new(provider), sink.clone())
            .with_poll_interval(Duration::from_millis(10));
        (Arc::new(manager), sink)
    }

    fn btc_provider() -> MockPaymentProvider {
        let mut provider = MockPaymentProvider::new();
        provider
            .expect_estimate()
            .returning(|_, _| Ok("0.0045".to_string()));
        provider
    }

    fn alice() -> Namespace {
        Namespace::for_user(Some("alice"))
    }

    #[tokio::test]
    async fn test_request_creates_and_persists_session() {
        let mut provider = btc_provider();
        provider
            .expect_create_payment()
            .withf(|req| req.pay_currency == "btc" && req.order_id.starts_with("ORDER-"))
            .times(1)
            .returning(|_| Ok(payment("p1")));

        let (manager, sink) = setup(provider, SessionStore::memory());
        let outcome = manager
            .request_session(&alice(), request("btc", None, PackageType::Full))
            .await
            .unwrap();

        assert!(!outcome.reused);
        assert_eq!(outcome.session.payment_id, "p1");
        assert_eq!(outcome.session.pay_amount, "0.0045");
        assert_eq!(outcome.session.status, PaymentStatus::Waiting);

        let key = SessionKey::new("btc", None, PackageType::Full);
        let stored = manager.active_session(&alice(), &key).await.unwrap();
        assert_eq!(stored, outcome.session);

        match sink.last() {
            PaymentEvent::PaymentCreated(details) => {
                assert_eq!(details.currency, "BTC");
                assert_eq!(details.username.as_deref(), Some("alice"));
                assert_eq!(details.pay_address.as_deref(), Some("addr-p1"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_repeat_request_reuses_active_session() {
        let mut provider = btc_provider();
        provider
            .expect_create_payment()
            .times(1)
            .returning(|_| Ok(payment("p1")));

        let (manager, sink) = setup(provider, SessionStore::memory());
        let first = manager
            .request_session(&alice(), request("btc", None, PackageType::Full))
            .await
            .unwrap();
        let second = manager
            .request_session(&alice(), request("BTC", None, PackageType::Full))
            .await
            .unwrap();

        assert!(second.reused);
        assert_eq!(second.session, first.session);
        assert_eq!(sink.kinds(), vec!["created"]);
    }

    #[tokio::test]
    async fn test_concurrent_requests_create_one_payment() {
        let mut provider = btc_provider();
        provider
            .expect_create_payment()
            .times(1)
            .returning(|_| Ok(payment("p1")));

        let (manager, _sink) = setup(provider, SessionStore::memory());
        let ns = alice();
        let (a, b) = tokio::join!(
            manager.request_session(&ns, request("btc", None, PackageType::Full)),
            manager.request_session(&ns, request("btc", None, PackageType::Full)),
        );

        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.session.payment_id, b.session.payment_id);
        assert!(a.reused != b.reused);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let mut provider = btc_provider();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        provider.expect_create_payment().times(2).returning(move |_| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Ok(payment(&format!("p{}", n)))
        });

        let (manager, _sink) = setup(provider, SessionStore::memory());
        let full = manager
            .request_session(&alice(), request("btc", None, PackageType::Full))
            .await
            .unwrap();
        let single = manager
            .request_session(&alice(), request("btc", None, PackageType::Single))
            .await
            .unwrap();

        assert_ne!(full.session.payment_id, single.session.payment_id);
        assert_eq!(manager.sessions(&alice()).await.active_sessions().count(), 2);
    }

    #[tokio::test]
    async fn test_stablecoin_uses_usd_amount_without_estimate() {
        let mut provider = MockPaymentProvider::new();
        provider.expect_estimate().never();
        provider
            .expect_create_payment()
            .withf(|req| req.pay_currency == "usdttrc20")
            .returning(|_| Ok(payment("p1")));

        let (manager, sink) = setup(provider, SessionStore::memory());
        let mut req = request("usdt", Some("trc20"), PackageType::Single);
        req.usd_amount = Decimal::new(9999, 2);

        let outcome = manager.request_session(&Namespace::guest(), req).await.unwrap();

        assert_eq!(outcome.session.pay_amount, "99.99");
        assert_eq!(outcome.session.network_id.as_deref(), Some("trc20"));
        match sink.last() {
            PaymentEvent::PaymentCreated(details) => {
                assert_eq!(details.amount, "99.99");
                assert_eq!(details.network.as_deref(), Some("Tron (TRC20)"));
                assert_eq!(details.username, None);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_crypto_makes_no_provider_call() {
        let mut provider = MockPaymentProvider::new();
        provider.expect_estimate().never();
        provider.expect_create_payment().never();

        let (manager, _sink) = setup(provider, SessionStore::memory());
        let result = manager
            .request_session(&alice(), request("doge", None, PackageType::Full))
            .await;

        assert!(matches!(result, Err(PaymentError::UnsupportedCrypto(_))));
    }

    #[tokio::test]
    async fn test_provider_failure_persists_nothing() {
        let mut provider = btc_provider();
        provider.expect_create_payment().times(1).returning(|_| {
            Err(ProviderError::Rejected {
                status: 400,
                message: "amountTo is too small".into(),
            })
        });

        let (manager, sink) = setup(provider, SessionStore::memory());
        let result = manager
            .request_session(&alice(), request("btc", None, PackageType::Full))
            .await;

        match result {
            Err(PaymentError::Provider(e)) => assert!(e.to_string().contains("amountTo is too small")),
            other => panic!("unexpected result {:?}", other),
        }
        assert!(manager.sessions(&alice()).await.is_empty());
        assert!(sink.kinds().is_empty());
    }

    #[tokio::test]
    async fn test_terminal_status_archives_and_allows_new_session() {
        let mut provider = btc_provider();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        provider.expect_create_payment().times(2).returning(move |_| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Ok(payment(&format!("p{}", n)))
        });
        provider
            .expect_get_status()
            .times(1)
            .returning(|_| Ok(PaymentStatus::Finished));

        let (manager, sink) = setup(provider, SessionStore::memory());
        let ns = alice();
        let first = manager
            .request_session(&ns, request("btc", None, PackageType::Full))
            .await
            .unwrap();

        let outcome = manager.poll_status(&ns, &first.session).await;
        assert!(outcome.is_final());
        assert!(matches!(
            outcome,
            PollOutcome::Changed { previous: PaymentStatus::Waiting, .. }
        ));

        // Terminal sessions are never polled again.
        assert_eq!(manager.poll_status(&ns, &first.session).await, PollOutcome::Skipped);

        let stored = manager.sessions(&ns).await;
        assert_eq!(stored.active_sessions().count(), 0);
        assert_eq!(stored.history.len(), 1);
        assert_eq!(stored.history[0].status, PaymentStatus::Finished);

        let second = manager
            .request_session(&ns, request("btc", None, PackageType::Full))
            .await
            .unwrap();
        assert!(!second.reused);
        assert_ne!(second.session.payment_id, first.session.payment_id);
        assert_eq!(sink.kinds(), vec!["created", "status_changed", "created"]);
    }

    #[tokio::test]
    async fn test_status_never_regresses() {
        let mut provider = btc_provider();
        provider
            .expect_create_payment()
            .returning(|_| Ok(payment("p1")));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        provider.expect_get_status().returning(move |_| {
            match counter.fetch_add(1, Ordering::SeqCst) {
                0 => Ok(PaymentStatus::Processing),
                _ => Ok(PaymentStatus::Waiting),
            }
        });

        let (manager, sink) = setup(provider, SessionStore::memory());
        let ns = alice();
        let created = manager
            .request_session(&ns, request("btc", None, PackageType::Full))
            .await
            .unwrap();

        assert!(matches!(
            manager.poll_status(&ns, &created.session).await,
            PollOutcome::Changed { .. }
        ));
        assert_eq!(
            manager.poll_status(&ns, &created.session).await,
            PollOutcome::Unchanged(PaymentStatus::Processing)
        );

        let key = created.session.key();
        let stored = manager.active_session(&ns, &key).await.unwrap();
        assert_eq!(stored.status, PaymentStatus::Processing);
        assert_eq!(sink.kinds(), vec!["created", "status_changed"]);
    }

    #[tokio::test]
    async fn test_poll_failure_keeps_session() {
        let mut provider = btc_provider();
        provider
            .expect_create_payment()
            .returning(|_| Ok(payment("p1")));
        provider
            .expect_get_status()
            .returning(|_| Err(ProviderError::Network("connection refused".into())));

        let (manager, _sink) = setup(provider, SessionStore::memory());
        let ns = alice();
        let created = manager
            .request_session(&ns, request("btc", None, PackageType::Full))
            .await
            .unwrap();

        let outcome = manager.poll_status(&ns, &created.session).await;
        assert!(matches!(outcome, PollOutcome::Failed(_)));
        assert!(!outcome.is_final());

        let stored = manager.active_session(&ns, &created.session.key()).await.unwrap();
        assert_eq!(stored.status, PaymentStatus::Waiting);
    }

    #[tokio::test]
    async fn test_rejected_poll_keeps_session() {
        let mut provider = btc_provider();
        provider
            .expect_create_payment()
            .returning(|_| Ok(payment("p1")));
        provider.expect_get_status().returning(|_| {
            Err(ProviderError::Rejected {
                status: 404,
                message: "Payment not found".into(),
            })
        });

        let (manager, sink) = setup(provider, SessionStore::memory());
        let ns = alice();
        let created = manager
            .request_session(&ns, request("btc", None, PackageType::Full))
            .await
            .unwrap();

        match manager.poll_status(&ns, &created.session).await {
            PollOutcome::Failed(message) => assert!(message.contains("Payment not found")),
            other => panic!("unexpected outcome {:?}", other),
        }

        let stored = manager.active_session(&ns, &created.session.key()).await.unwrap();
        assert_eq!(stored.status, PaymentStatus::Waiting);
        assert_eq!(sink.kinds(), vec!["created"]);
    }

    #[tokio::test]
    async fn test_cancel_then_poll_is_noop() {
        let mut provider = btc_provider();
        provider
            .expect_create_payment()
            .returning(|_| Ok(payment("p1")));
        provider.expect_get_status().never();

        let (manager, sink) = setup(provider, SessionStore::memory());
        let ns = alice();
        let created = manager
            .request_session(&ns, request("eth", Some("arbitrum"), PackageType::Full))
            .await
            .unwrap();
        let key = created.session.key();

        let cancelled = manager.cancel(&ns, &key).await.unwrap();
        assert_eq!(cancelled.status, PaymentStatus::Cancelled);
        assert_eq!(manager.poll_status(&ns, &created.session).await, PollOutcome::Skipped);
        assert!(manager.cancel(&ns, &key).await.is_none());

        match sink.last() {
            PaymentEvent::PaymentCancelled(details) => {
                assert_eq!(details.currency, "ETH");
                assert_eq!(details.network.as_deref(), Some("Arbitrum"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_namespace_locks_are_released() {
        let (manager, _sink) = setup(MockPaymentProvider::new(), SessionStore::memory());
        let key = SessionKey::new("btc", None, PackageType::Full);

        for i in 0..1_000 {
            let ns = Namespace::for_user(Some(format!("user{}", i).as_str()));
            assert!(manager.cancel(&ns, &key).await.is_none());
        }
        manager.clear_all(&alice()).await.unwrap();

        assert_eq!(manager.locks.len(), 0);
    }

    #[tokio::test]
    async fn test_namespace_lock_kept_while_contended() {
        let (manager, _sink) = setup(MockPaymentProvider::new(), SessionStore::memory());
        let ns = alice();

        let held = manager.locks.lock(&ns).await;
        let waiter = {
            let manager = manager.clone();
            let ns = ns.clone();
            tokio::spawn(async move {
                let _guard = manager.locks.lock(&ns).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        drop(held);
        assert_eq!(manager.locks.len(), 1);

        waiter.await.unwrap();
        assert_eq!(manager.locks.len(), 0);
    }

    #[tokio::test]
    async fn test_poller_runs_until_terminal() {
        let mut provider = btc_provider();
        provider
            .expect_create_payment()
            .returning(|_| Ok(payment("p1")));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        provider.expect_get_status().returning(move |_| {
            match counter.fetch_add(1, Ordering::SeqCst) {
                0 => Ok(PaymentStatus::Waiting),
                1 => Ok(PaymentStatus::Sending),
                _ => Ok(PaymentStatus::Finished),
            }
        });

        let (manager, sink) = setup(provider, SessionStore::memory());
        let ns = alice();
        let created = manager
            .request_session(&ns, request("btc", None, PackageType::Full))
            .await
            .unwrap();
        let key = created.session.key();

        assert!(manager.start_polling(&ns, &key).await);
        assert!(!manager.start_polling(&ns, &key).await);

        tokio::time::timeout(Duration::from_secs(5), async {
            while !manager.pollers.lock().await.is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("finished poller was not removed");

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(manager.active_session(&ns, &key).await.is_none());
        assert_eq!(
            sink.kinds(),
            vec!["created", "status_changed", "status_changed"]
        );
    }

    #[tokio::test]
    async fn test_clear_all_stops_polling_and_deletes() {
        let mut provider = btc_provider();
        provider
            .expect_create_payment()
            .returning(|_| Ok(payment("p1")));
        provider
            .expect_get_status()
            .returning(|_| Ok(PaymentStatus::Waiting));

        let (manager, _sink) = setup(provider, SessionStore::memory());
        let ns = alice();
        let created = manager
            .request_session(&ns, request("btc", None, PackageType::Full))
            .await
            .unwrap();
        manager.start_polling(&ns, &created.session.key()).await;

        manager.clear_all(&ns).await.unwrap();

        assert!(manager.active_polls().await.is_empty());
        assert!(manager.sessions(&ns).await.is_empty());
    }

    #[tokio::test]
    async fn test_expired_session_is_replaced() {
        let mut provider = btc_provider();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        provider.expect_create_payment().times(2).returning(move |_| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Ok(payment(&format!("p{}", n)))
        });

        let store = SessionStore::memory().with_retention(Duration::from_millis(20));
        let (manager, _sink) = setup(provider, store);
        let ns = alice();

        let first = manager
            .request_session(&ns, request("btc", None, PackageType::Full))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        let second = manager
            .request_session(&ns, request("btc", None, PackageType::Full))
            .await
            .unwrap();

        assert!(!second.reused);
        assert_ne!(first.session.payment_id, second.session.payment_id);
    }

    #[tokio::test]
    async fn test_sessions_survive_restart() {
        let dir = tempfile::tempdir().unwrap();

        let mut provider = btc_provider();
        provider
            .expect_create_payment()
            .times(1)
            .returning(|_| Ok(payment("p1")));
        let (manager, _sink) = setup(provider, SessionStore::file(dir.path()));
        manager
            .request_session(&alice(), request("btc", None, PackageType::Full))
            .await
            .unwrap();
        drop(manager);

        let mut provider = MockPaymentProvider::new();
        provider.expect_create_payment().never();
        let (manager, _sink) = setup(provider, SessionStore::file(dir.path()));
        let outcome = manager
            .request_session(&alice(), request("btc", None, PackageType::Full))
            .await
            .unwrap();

        assert!(outcome.reused);
        assert_eq!(outcome.session.payment_id, "p1");
    }

    #[test]
    fn test_callback_urls_from_public_url() {
        let urls = CallbackUrls::from_config(&CallbackConfig {
            public_url: Some("https://pay.example.com/".into()),
            success_url: None,
            cancel_url: Some("https://example.com/back".into()),
        });

        assert_eq!(
            urls.ipn_callback_url.as_deref(),
            Some("https://pay.example.com/api/payment-callback")
        );
        assert_eq!(urls.success_url.as_deref(), Some("https://pay.example.com/success"));
        assert_eq!(urls.cancel_url.as_deref(), Some("https://example.com/back"));
        assert_eq!(CallbackUrls::from_config(&CallbackConfig::default()), CallbackUrls::default());
    }
}
