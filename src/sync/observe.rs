//! Live results over the local store.
//!
//! Subscribing to a fetch definition returns an [`ObservableResult`]
//! populated immediately from whatever local storage holds, then
//! re-emitted whenever a committed transaction touches the scope's
//! collection or the coordinator's refresh state changes. The result is
//! independent of any single refresh: dropping it stops re-emission and
//! nothing else.

use serde::de::DeserializeOwned;
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

use crate::store::{Entity, EntityStore, Scope, StoreChange};
use crate::sync::{CacheKey, FetchDefinition, SyncCoordinator, SyncEvent};

/// Display status accompanying the current items
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState {
    /// Local read is empty and a refresh is pending
    Loading,
    /// Local records are available
    Data,
    /// Local read is empty and nothing is pending
    Empty,
    /// The last refresh for this dataset failed; items are the last
    /// local read, which may be stale
    Error(String),
}

/// One contiguous run of records sharing a section title
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub title: String,
    pub start: usize,
    pub len: usize,
}

/// What a screen renders: typed records in display order, section
/// bounds when the scope groups, and the current status.
#[derive(Debug, Clone)]
pub struct Snapshot<T> {
    pub items: Vec<T>,
    pub sections: Vec<Section>,
    pub state: LoadState,
}

/// Live view over a scoped local read.
/// Clone shares the same underlying subscription.
pub struct ObservableResult<T> {
    rx: watch::Receiver<Snapshot<T>>,
}

impl<T: Clone> ObservableResult<T> {
    pub fn current(&self) -> Snapshot<T> {
        self.rx.borrow().clone()
    }

    pub fn state(&self) -> LoadState {
        self.rx.borrow().state.clone()
    }

    pub fn items(&self) -> Vec<T> {
        self.rx.borrow().items.clone()
    }

    /// Wait for the next re-emission. Returns false once the
    /// subscription has ended.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}

impl<T> Clone for ObservableResult<T> {
    fn clone(&self) -> Self {
        Self {
            rx: self.rx.clone(),
        }
    }
}

impl SyncCoordinator {
    /// Subscribe a screen to a dataset.
    ///
    /// Performs an immediate local read, then keeps the result current in
    /// the background. Also kicks off the refresh decision for the
    /// definition - a valid cache key means no network traffic.
    pub fn subscribe<T>(&self, definition: &FetchDefinition) -> ObservableResult<T>
    where
        T: DeserializeOwned + Clone + Send + Sync + 'static,
    {
        // Both receivers exist before the initial read and before the
        // refresh is kicked off, so the observer cannot miss a commit or
        // a refresh outcome that lands while the subscription settles.
        let store_changes = self.store().changes();
        let events = self.events();

        let refresh_expected = !self.is_offline()
            && match &definition.cache_key {
                Some(key) => !self.registry().is_valid(key) || self.is_refreshing(key),
                None => true,
            };
        let initial =
            read_snapshot::<T>(self.store().as_ref(), &definition.scope, refresh_expected, None);
        let (tx, rx) = watch::channel(initial);
        tokio::spawn(observer_loop::<T>(
            tx,
            self.clone(),
            definition.scope.clone(),
            definition.cache_key.clone(),
            store_changes,
            events,
        ));

        let coordinator = self.clone();
        let definition = definition.clone();
        tokio::spawn(async move {
            if let Err(error) = coordinator.ensure_fresh(&definition, false).await {
                debug!(error = %error, "Background refresh after subscribe failed");
            }
        });

        ObservableResult { rx }
    }
}

async fn observer_loop<T>(
    tx: watch::Sender<Snapshot<T>>,
    coordinator: SyncCoordinator,
    scope: Scope,
    key: Option<CacheKey>,
    mut store_changes: broadcast::Receiver<StoreChange>,
    mut events: broadcast::Receiver<SyncEvent>,
) where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    let mut last_error: Option<String> = None;
    loop {
        tokio::select! {
            _ = tx.closed() => break,
            change = store_changes.recv() => match change {
                Ok(change) if change.collection == scope.collection => {
                    // Fresh local data supersedes a stale error banner
                    last_error = None;
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
            event = events.recv() => match event {
                Ok(event) => {
                    let Some(key) = &key else { continue };
                    match event {
                        SyncEvent::RefreshStarted(started) if &started == key => {}
                        SyncEvent::RefreshSucceeded(succeeded) if &succeeded == key => {
                            last_error = None;
                        }
                        SyncEvent::RefreshFailed { key: failed, error } if &failed == key => {
                            last_error = Some(error.to_string());
                        }
                        _ => continue,
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }

        let pending = key.as_ref().is_some_and(|key| coordinator.is_refreshing(key));
        let snapshot = read_snapshot::<T>(
            coordinator.store().as_ref(),
            &scope,
            pending,
            last_error.clone(),
        );
        if tx.send(snapshot).is_err() {
            break;
        }
    }
}

fn read_snapshot<T: DeserializeOwned>(
    store: &dyn EntityStore,
    scope: &Scope,
    refresh_pending: bool,
    error: Option<String>,
) -> Snapshot<T> {
    let entities = match store.fetch(scope) {
        Ok(entities) => entities,
        Err(store_error) => {
            warn!(collection = %scope.collection, error = %store_error, "Local read failed");
            return Snapshot {
                items: Vec::new(),
                sections: Vec::new(),
                state: LoadState::Error(store_error.to_string()),
            };
        }
    };

    // Records that fail to decode are skipped rather than failing the
    // whole result; sections are computed over what survives.
    let mut kept: Vec<Entity> = Vec::with_capacity(entities.len());
    let mut items: Vec<T> = Vec::with_capacity(entities.len());
    for entity in entities {
        match serde_json::from_value::<T>(entity.clone()) {
            Ok(item) => {
                items.push(item);
                kept.push(entity);
            }
            Err(e) => {
                warn!(collection = %scope.collection, error = %e, "Skipping undecodable record");
            }
        }
    }
    let sections = section_bounds(scope, &kept);

    let state = if let Some(message) = error {
        LoadState::Error(message)
    } else if !items.is_empty() {
        LoadState::Data
    } else if refresh_pending {
        LoadState::Loading
    } else {
        LoadState::Empty
    };

    Snapshot {
        items,
        sections,
        state,
    }
}

fn section_bounds(scope: &Scope, entities: &[Entity]) -> Vec<Section> {
    if !scope.is_sectioned() {
        return Vec::new();
    }
    let mut sections: Vec<Section> = Vec::new();
    for (index, entity) in entities.iter().enumerate() {
        let title = scope.section_title(entity).unwrap_or_default();
        match sections.last_mut() {
            Some(last) if last.title == title => last.len += 1,
            _ => sections.push(Section {
                title,
                start: index,
                len: 1,
            }),
        }
    }
    sections
}
