//! Refresh coordination.
//!
//! The coordinator owns the decision "serve local data as-is, or refresh
//! over the network first". Refreshes are single-flighted per cache key:
//! while one is executing, every further caller for the same key attaches
//! to the in-flight ticket and observes the same outcome instead of
//! issuing a second request. A successful refresh commits the fetch
//! definition's reset+write pair in one store transaction and marks the
//! key valid; a failure changes nothing locally.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::stream::{self, StreamExt};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::store::EntityStore;
use crate::sync::{CacheKey, CacheValidityRegistry, FetchDefinition};
use crate::transport::Transport;

/// Buffer size for the sync event channel.
/// 32 is sufficient for a full-screen refresh burst with headroom.
const SYNC_EVENT_BUFFER: usize = 32;

/// Maximum concurrent refreshes in `refresh_many`.
/// Limits parallel requests to avoid overwhelming the server or hitting rate limits.
const DEFAULT_MAX_CONCURRENT_REFRESHES: usize = 5;

/// Upper bound on pages drained from one paginated response chain.
/// Guards against a server handing back a cyclic continuation link.
const MAX_RESPONSE_PAGES: usize = 50;

/// The one outcome every waiter on a refresh ticket observes
pub type RefreshOutcome = Result<(), SyncError>;

/// Coordinator state transitions, observed by live results
#[derive(Debug, Clone)]
pub enum SyncEvent {
    RefreshStarted(CacheKey),
    RefreshSucceeded(CacheKey),
    RefreshFailed { key: CacheKey, error: SyncError },
}

type TicketTable = HashMap<CacheKey, broadcast::Sender<RefreshOutcome>>;

/// Refresh coordinator with injected store and transport.
/// Clone is cheap - all state is shared behind `Arc`s.
#[derive(Clone)]
pub struct SyncCoordinator {
    store: Arc<dyn EntityStore>,
    transport: Arc<dyn Transport>,
    registry: Arc<CacheValidityRegistry>,
    tickets: Arc<Mutex<TicketTable>>,
    events: broadcast::Sender<SyncEvent>,
    offline: Arc<AtomicBool>,
    max_concurrent_refreshes: usize,
}

impl SyncCoordinator {
    pub fn new(
        store: Arc<dyn EntityStore>,
        transport: Arc<dyn Transport>,
        registry: Arc<CacheValidityRegistry>,
    ) -> Self {
        let (events, _) = broadcast::channel(SYNC_EVENT_BUFFER);
        Self {
            store,
            transport,
            registry,
            tickets: Arc::new(Mutex::new(HashMap::new())),
            events,
            offline: Arc::new(AtomicBool::new(false)),
            max_concurrent_refreshes: DEFAULT_MAX_CONCURRENT_REFRESHES,
        }
    }

    pub fn with_max_concurrent_refreshes(mut self, limit: usize) -> Self {
        self.max_concurrent_refreshes = limit.max(1);
        self
    }

    pub fn registry(&self) -> &Arc<CacheValidityRegistry> {
        &self.registry
    }

    pub(crate) fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    /// Subscribe to coordinator state transitions
    pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Mark a cache key untrusted so the next access re-fetches.
    /// Used for cross-key dependencies, e.g. invalidating each course's
    /// tab list after the course list itself refreshes.
    pub fn invalidate(&self, key: &CacheKey) {
        self.registry.invalidate(key);
    }

    /// Is a refresh for this key currently executing?
    pub fn is_refreshing(&self, key: &CacheKey) -> bool {
        self.lock_tickets().contains_key(key)
    }

    /// While offline, every dataset is served from local storage as-is
    /// and no network calls are made.
    pub fn set_offline(&self, offline: bool) {
        info!(offline = offline, "Offline mode changed");
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }

    /// Guarantee the dataset is fresh enough to display.
    ///
    /// Returns without a network call when the cache key is already valid
    /// (unless `force`), or immediately in offline mode. Otherwise joins
    /// the in-flight refresh for the key, or starts one. The returned
    /// outcome is shared by every caller that waited on the same ticket.
    pub async fn ensure_fresh(&self, definition: &FetchDefinition, force: bool) -> RefreshOutcome {
        if self.is_offline() {
            debug!(request = ?definition.request, "Offline - serving local data");
            return Ok(());
        }

        let Some(key) = definition.cache_key.clone() else {
            // Uncached datasets refresh on every access and never touch
            // the validity registry.
            return Self::perform_refresh(&*self.transport, &*self.store, definition).await;
        };

        if !force && self.registry.is_valid(&key) {
            debug!(key = %key, "Cache valid - serving local data");
            return Ok(());
        }

        let mut outcome_rx = self.join_or_start(key, definition);
        match outcome_rx.recv().await {
            Ok(outcome) => outcome,
            Err(_) => Err(SyncError::Transport(
                "refresh ended without reporting an outcome".to_string(),
            )),
        }
    }

    /// `ensure_fresh` under the name screens use
    pub async fn refresh(&self, definition: &FetchDefinition, force: bool) -> RefreshOutcome {
        self.ensure_fresh(definition, force).await
    }

    /// Refresh a batch of datasets with bounded concurrency, returning
    /// one outcome per definition in input order.
    pub async fn refresh_many(
        &self,
        definitions: &[FetchDefinition],
        force: bool,
    ) -> Vec<RefreshOutcome> {
        stream::iter(definitions)
            .map(|definition| self.ensure_fresh(definition, force))
            .buffered(self.max_concurrent_refreshes)
            .collect()
            .await
    }

    /// Attach to the key's in-flight ticket, or create one and start the
    /// refresh. The refresh runs in a spawned task: no single caller owns
    /// it, so a caller dropping its future cancels nothing for the rest.
    fn join_or_start(
        &self,
        key: CacheKey,
        definition: &FetchDefinition,
    ) -> broadcast::Receiver<RefreshOutcome> {
        let mut tickets = self.lock_tickets();
        if let Some(ticket) = tickets.get(&key) {
            debug!(key = %key, "Joining in-flight refresh");
            return ticket.subscribe();
        }

        let (ticket, outcome_rx) = broadcast::channel(1);
        tickets.insert(key.clone(), ticket);
        drop(tickets);

        if self.events.send(SyncEvent::RefreshStarted(key.clone())).is_err() {
            debug!(key = %key, "No subscribers for refresh start");
        }

        let transport = Arc::clone(&self.transport);
        let store = Arc::clone(&self.store);
        let registry = Arc::clone(&self.registry);
        let tickets = Arc::clone(&self.tickets);
        let events = self.events.clone();
        let definition = definition.clone();
        tokio::spawn(async move {
            Self::run_refresh(transport, store, registry, tickets, events, key, definition).await;
        });

        outcome_rx
    }

    /// Execute one refresh and resolve every waiter with its outcome.
    /// Runs in a spawned Tokio task.
    async fn run_refresh(
        transport: Arc<dyn Transport>,
        store: Arc<dyn EntityStore>,
        registry: Arc<CacheValidityRegistry>,
        tickets: Arc<Mutex<TicketTable>>,
        events: broadcast::Sender<SyncEvent>,
        key: CacheKey,
        definition: FetchDefinition,
    ) {
        debug!(key = %key, "Refresh started");
        let outcome = Self::perform_refresh(&*transport, &*store, &definition).await;

        match &outcome {
            Ok(()) => {
                registry.mark_valid(&key);
                info!(key = %key, "Refresh complete");
            }
            Err(error) => {
                warn!(key = %key, error = %error, "Refresh failed");
            }
        }

        // The ticket must be gone before the outcome is resolved; a
        // caller arriving after this point starts a fresh refresh.
        let ticket = tickets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&key);

        let event = match &outcome {
            Ok(()) => SyncEvent::RefreshSucceeded(key.clone()),
            Err(error) => SyncEvent::RefreshFailed {
                key: key.clone(),
                error: error.clone(),
            },
        };
        if events.send(event).is_err() {
            debug!(key = %key, "No subscribers for refresh outcome event");
        }

        if let Some(ticket) = ticket {
            if ticket.send(outcome).is_err() {
                debug!(key = %key, "No waiters for refresh outcome");
            }
        }
    }

    /// Drain every response page, then commit reset+write as one store
    /// transaction. A failure at any point leaves the store untouched:
    /// the staged transaction is dropped without saving.
    async fn perform_refresh(
        transport: &dyn Transport,
        store: &dyn EntityStore,
        definition: &FetchDefinition,
    ) -> RefreshOutcome {
        let mut pages = Vec::new();
        let mut next = Some(definition.request.clone());
        while let Some(request) = next {
            if pages.len() >= MAX_RESPONSE_PAGES {
                return Err(SyncError::Transport(format!(
                    "response exceeded {} pages",
                    MAX_RESPONSE_PAGES
                )));
            }
            let response = transport
                .execute(&request)
                .await
                .map_err(|e| SyncError::Transport(e.to_string()))?;
            next = response.next.clone();
            pages.push(response);
        }

        debug!(
            collection = %definition.scope.collection,
            pages = pages.len(),
            "Writing refreshed data"
        );

        let mut txn = store.begin();
        definition.reset(txn.as_mut())?;
        definition.write(&pages, txn.as_mut())?;
        txn.save()?;
        Ok(())
    }

    fn lock_tickets(&self) -> MutexGuard<'_, TicketTable> {
        self.tickets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemStore, Scope};
    use crate::transport::{RequestDescriptor, Response, TransportError};
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Semaphore;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Tab {
        course_id: i64,
        label: String,
    }

    /// Transport double: canned responses by path, optional failure,
    /// optional gate that holds every request until permits arrive.
    struct MockTransport {
        calls: AtomicUsize,
        responses: Mutex<HashMap<String, Response>>,
        fail_with: Option<String>,
        gate: Option<Arc<Semaphore>>,
    }

    impl MockTransport {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                responses: Mutex::new(HashMap::new()),
                fail_with: None,
                gate: None,
            }
        }

        fn failing(message: &str) -> Self {
            Self {
                fail_with: Some(message.to_string()),
                ..Self::new()
            }
        }

        fn gated(gate: Arc<Semaphore>) -> Self {
            Self {
                gate: Some(gate),
                ..Self::new()
            }
        }

        fn respond(self, path: &str, response: Response) -> Self {
            self.responses.lock().unwrap().insert(path.to_string(), response);
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn execute(&self, request: &RequestDescriptor) -> Result<Response, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                let _permit = gate.acquire().await.expect("gate closed");
            }
            if let Some(message) = &self.fail_with {
                return Err(TransportError::ServerError(message.clone()));
            }
            let responses = self.responses.lock().unwrap();
            Ok(responses
                .get(&request.path)
                .cloned()
                .unwrap_or_else(|| Response::single(json!([]))))
        }
    }

    fn tabs_definition(course_id: i64) -> FetchDefinition {
        FetchDefinition::list::<Tab>(
            Some(CacheKey::new(format!("courses/{}/tabs", course_id))),
            Scope::collection("tabs").filter_field_eq("course_id", course_id),
            RequestDescriptor::get(format!("courses/{}/tabs", course_id)),
        )
    }

    /// Opt-in test logging via RUST_LOG
    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }

    fn coordinator_with(transport: Arc<MockTransport>) -> (SyncCoordinator, MemStore) {
        init_tracing();
        let store = MemStore::new();
        let coordinator = SyncCoordinator::new(
            Arc::new(store.clone()),
            transport,
            Arc::new(CacheValidityRegistry::new()),
        );
        (coordinator, store)
    }

    #[tokio::test]
    async fn first_access_refreshes_exactly_once() {
        let transport = Arc::new(MockTransport::new().respond(
            "courses/1/tabs",
            Response::single(json!([{"course_id": 1, "label": "Grades"}])),
        ));
        let (coordinator, store) = coordinator_with(transport.clone());
        let definition = tabs_definition(1);
        let key = definition.cache_key.clone().unwrap();

        coordinator.ensure_fresh(&definition, false).await.unwrap();
        assert_eq!(transport.calls(), 1);
        assert!(coordinator.registry().is_valid(&key));
        assert_eq!(store.fetch(&definition.scope).unwrap().len(), 1);

        // Valid key: served locally, zero further network calls
        coordinator.ensure_fresh(&definition, false).await.unwrap();
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_network_call() {
        let gate = Arc::new(Semaphore::new(0));
        let transport = Arc::new(MockTransport::gated(gate.clone()));
        let (coordinator, _store) = coordinator_with(transport.clone());
        let definition = tabs_definition(1);

        // The forced caller joins the same in-flight ticket; force only
        // bypasses the validity short-circuit for new decisions.
        let (a, b, c, ()) = tokio::join!(
            coordinator.ensure_fresh(&definition, false),
            coordinator.ensure_fresh(&definition, false),
            coordinator.ensure_fresh(&definition, true),
            async {
                gate.add_permits(1);
            },
        );

        assert_eq!(transport.calls(), 1);
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert!(!coordinator.is_refreshing(&definition.cache_key.clone().unwrap()));
    }

    #[tokio::test]
    async fn joined_callers_observe_the_same_error() {
        let gate = Arc::new(Semaphore::new(0));
        let transport = Arc::new(MockTransport {
            fail_with: Some("boom".to_string()),
            ..MockTransport::gated(gate.clone())
        });
        let (coordinator, _store) = coordinator_with(transport.clone());
        let definition = tabs_definition(1);

        let (a, b, ()) = tokio::join!(
            coordinator.ensure_fresh(&definition, false),
            coordinator.ensure_fresh(&definition, false),
            async {
                gate.add_permits(1);
            },
        );

        assert_eq!(transport.calls(), 1);
        let a = a.unwrap_err();
        let b = b.unwrap_err();
        assert_eq!(a, b);
        assert!(matches!(a, SyncError::Transport(_)));
        assert!(!coordinator
            .registry()
            .is_valid(&definition.cache_key.clone().unwrap()));
    }

    #[tokio::test]
    async fn failed_refresh_leaves_store_and_registry_untouched() {
        let transport = Arc::new(MockTransport::failing("server on fire"));
        let (coordinator, store) = coordinator_with(transport.clone());
        store.seed("tabs", vec![json!({"course_id": 1, "label": "Grades"})]);
        let definition = tabs_definition(1);

        let err = coordinator.ensure_fresh(&definition, false).await.unwrap_err();
        assert!(matches!(err, SyncError::Transport(_)));
        assert!(!coordinator
            .registry()
            .is_valid(&definition.cache_key.clone().unwrap()));
        assert_eq!(
            store.fetch(&definition.scope).unwrap(),
            vec![json!({"course_id": 1, "label": "Grades"})]
        );
    }

    #[tokio::test]
    async fn failing_write_rolls_back_the_whole_transaction() {
        let transport = Arc::new(MockTransport::new());
        let (coordinator, store) = coordinator_with(transport.clone());
        let before = vec![
            json!({"course_id": 1, "label": "Grades"}),
            json!({"course_id": 1, "label": "People"}),
        ];
        store.seed("tabs", before.clone());

        let scope = Scope::collection("tabs").filter_field_eq("course_id", 1);
        let reset_scope = scope.clone();
        let definition = FetchDefinition::new(
            Some(CacheKey::from("courses/1/tabs")),
            scope.clone(),
            RequestDescriptor::get("courses/1/tabs"),
            move |txn| {
                txn.delete_where(&reset_scope.collection, &|e| reset_scope.matches(e));
                Ok(())
            },
            |_pages, _txn| Err(SyncError::Decode("bad payload".to_string())),
        );

        let err = coordinator.ensure_fresh(&definition, false).await.unwrap_err();
        assert!(matches!(err, SyncError::Decode(_)));

        // The reset ran inside the dropped transaction, so nothing changed
        assert_eq!(store.fetch(&scope).unwrap(), before);
    }

    #[tokio::test]
    async fn invalidation_forces_the_next_access_to_refetch() {
        let transport = Arc::new(MockTransport::new());
        let (coordinator, _store) = coordinator_with(transport.clone());
        let definition = tabs_definition(1);
        let key = definition.cache_key.clone().unwrap();

        coordinator.ensure_fresh(&definition, false).await.unwrap();
        assert_eq!(transport.calls(), 1);

        coordinator.invalidate(&key);
        coordinator.ensure_fresh(&definition, false).await.unwrap();
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn sibling_refresh_can_invalidate_a_downstream_key() {
        let transport = Arc::new(MockTransport::new());
        let (coordinator, _store) = coordinator_with(transport.clone());

        let tabs = tabs_definition(1);
        let tabs_key = tabs.cache_key.clone().unwrap();
        coordinator.ensure_fresh(&tabs, false).await.unwrap();
        assert!(coordinator.registry().is_valid(&tabs_key));

        // A course-list refresh supersedes whatever each course's tab
        // list said; the caller expresses that dependency by hand.
        let courses = FetchDefinition::list::<Tab>(
            Some(CacheKey::from("courses")),
            Scope::collection("courses"),
            RequestDescriptor::get("courses"),
        );
        coordinator.ensure_fresh(&courses, false).await.unwrap();
        coordinator.invalidate(&tabs_key);

        let calls_before = transport.calls();
        coordinator.ensure_fresh(&tabs, false).await.unwrap();
        assert_eq!(transport.calls(), calls_before + 1);
    }

    #[tokio::test]
    async fn force_bypasses_a_valid_cache_key() {
        let transport = Arc::new(MockTransport::new());
        let (coordinator, _store) = coordinator_with(transport.clone());
        let definition = tabs_definition(1);

        coordinator.ensure_fresh(&definition, false).await.unwrap();
        coordinator.ensure_fresh(&definition, true).await.unwrap();
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn uncached_definitions_refresh_every_time() {
        let transport = Arc::new(MockTransport::new());
        let (coordinator, _store) = coordinator_with(transport.clone());
        let definition = FetchDefinition::list::<Tab>(
            None,
            Scope::collection("tabs"),
            RequestDescriptor::get("search/tabs"),
        );

        coordinator.ensure_fresh(&definition, false).await.unwrap();
        coordinator.ensure_fresh(&definition, false).await.unwrap();
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn offline_mode_never_touches_the_network() {
        let transport = Arc::new(MockTransport::new());
        let (coordinator, _store) = coordinator_with(transport.clone());
        coordinator.set_offline(true);

        let definition = tabs_definition(1);
        coordinator.ensure_fresh(&definition, false).await.unwrap();
        coordinator.ensure_fresh(&definition, true).await.unwrap();
        assert_eq!(transport.calls(), 0);

        coordinator.set_offline(false);
        coordinator.ensure_fresh(&definition, false).await.unwrap();
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn refresh_many_reports_one_outcome_per_definition() {
        let transport = Arc::new(MockTransport::new());
        let (coordinator, _store) = coordinator_with(transport.clone());
        let definitions: Vec<_> = (1..=3).map(tabs_definition).collect();

        let outcomes = coordinator.refresh_many(&definitions, false).await;
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.iter().all(|o| o.is_ok()));
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn refresh_many_respects_its_concurrency_bound() {
        /// Counts how many requests are in flight at once
        struct CountingTransport {
            active: AtomicUsize,
            peak: AtomicUsize,
        }

        #[async_trait]
        impl Transport for CountingTransport {
            async fn execute(
                &self,
                _request: &RequestDescriptor,
            ) -> Result<Response, TransportError> {
                let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(active, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                self.active.fetch_sub(1, Ordering::SeqCst);
                Ok(Response::single(json!([])))
            }
        }

        let transport = Arc::new(CountingTransport {
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let coordinator = SyncCoordinator::new(
            Arc::new(MemStore::new()),
            transport.clone(),
            Arc::new(CacheValidityRegistry::new()),
        )
        .with_max_concurrent_refreshes(2);

        let definitions: Vec<_> = (1..=8).map(tabs_definition).collect();
        let outcomes = coordinator.refresh_many(&definitions, false).await;
        assert!(outcomes.iter().all(|o| o.is_ok()));
        assert!(transport.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn paginated_responses_commit_as_one_write() {
        let transport = Arc::new(
            MockTransport::new()
                .respond(
                    "courses/1/tabs",
                    Response {
                        body: json!([{"course_id": 1, "label": "Grades"}]),
                        next: Some(RequestDescriptor::get("courses/1/tabs?page=2")),
                    },
                )
                .respond(
                    "courses/1/tabs?page=2",
                    Response::single(json!([{"course_id": 1, "label": "People"}])),
                ),
        );
        let (coordinator, store) = coordinator_with(transport.clone());
        let definition = tabs_definition(1);

        coordinator.ensure_fresh(&definition, false).await.unwrap();
        assert_eq!(transport.calls(), 2);
        assert_eq!(store.fetch(&definition.scope).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn cyclic_pagination_links_fail_instead_of_spinning() {
        let transport = Arc::new(MockTransport::new().respond(
            "courses/1/tabs",
            Response {
                body: json!([]),
                next: Some(RequestDescriptor::get("courses/1/tabs")),
            },
        ));
        let (coordinator, _store) = coordinator_with(transport.clone());
        let definition = tabs_definition(1);

        let err = coordinator.ensure_fresh(&definition, false).await.unwrap_err();
        assert!(matches!(err, SyncError::Transport(_)));
    }
}
