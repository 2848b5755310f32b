use std::cmp::Ordering;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use core_lib::domain::{name_cmp, Entity, Garden, ShoppingItem, Task};
use core_lib::{CollectionEvent, CollectionSubscription, Document, DocumentStore, Filter};

use crate::tenant::Scope;

/// Derived state of one live, tenant-scoped collection. Each snapshot fully
/// replaces `items`; consumers must not assume incremental patches.
#[derive(Debug, Clone)]
pub struct LiveState<T> {
    pub items: Vec<T>,
    pub loading: bool,
    pub error: Option<String>,
}

impl<T> Default for LiveState<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            loading: false,
            error: None,
        }
    }
}

pub type SortFn<T> = fn(&T, &T) -> Ordering;

/// How to scope and order one entity collection.
pub struct SubscribeSpec<T> {
    /// Scope -> store-side filter predicate.
    pub filter: fn(&Scope) -> Filter,
    /// Applied after every snapshot; the store guarantees no order.
    pub sort: Option<SortFn<T>>,
}

impl<T> SubscribeSpec<T> {
    /// The common case: every document of the collection that carries the
    /// active tenant id.
    pub fn tenant_scoped() -> Self {
        Self {
            filter: |scope| Filter::field_equals("tenantId", scope.tenant_id.clone()),
            sort: None,
        }
    }
}

/// Applies snapshots to the published state, discarding anything stamped with
/// a generation older than the current subscription. A late callback from a
/// previous tenant's subscription must never reach consumers.
struct Collector<T> {
    generation: u64,
    sort: Option<SortFn<T>>,
    tx: watch::Sender<LiveState<T>>,
}

impl<T: Entity> Collector<T> {
    fn new(sort: Option<SortFn<T>>, tx: watch::Sender<LiveState<T>>) -> Self {
        Self {
            generation: 0,
            sort,
            tx,
        }
    }

    /// Invalidate everything stamped with an older generation and return the
    /// stamp for the next subscription.
    fn advance(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    /// Out of scope: empty result set immediately, not loading.
    fn clear(&self) {
        self.tx.send_replace(LiveState::default());
    }

    fn begin_loading(&self) {
        self.tx.send_replace(LiveState {
            items: Vec::new(),
            loading: true,
            error: None,
        });
    }

    fn apply_snapshot(&self, generation: u64, docs: &[Document]) -> bool {
        if generation != self.generation {
            debug!(
                collection = T::COLLECTION,
                generation, current = self.generation, "discarding stale snapshot"
            );
            return false;
        }
        let mut items: Vec<T> = docs
            .iter()
            .filter_map(|doc| match T::from_document(doc) {
                Ok(item) => Some(item),
                Err(e) => {
                    warn!(collection = T::COLLECTION, doc = %doc.id, error = %e, "skipping undecodable document");
                    None
                }
            })
            .collect();
        if let Some(cmp) = self.sort {
            items.sort_by(cmp);
        }
        self.tx.send_replace(LiveState {
            items,
            loading: false,
            error: None,
        });
        true
    }

    /// A failed subscription keeps its last items but stops loading; there is
    /// no automatic retry.
    fn apply_error(&self, generation: u64, message: &str) -> bool {
        if generation != self.generation {
            return false;
        }
        self.tx.send_modify(|state| {
            state.loading = false;
            state.error = Some(message.to_string());
        });
        true
    }
}

/// One live, tenant-scoped entity collection. Re-subscribes whenever the
/// scope changes, tearing the previous subscription down first so no result
/// set from the old tenant is delivered after the switch begins.
pub struct LiveCollection<T: Entity> {
    state_rx: watch::Receiver<LiveState<T>>,
    task: JoinHandle<()>,
}

impl<T: Entity> LiveCollection<T> {
    pub fn spawn(
        store: Arc<dyn DocumentStore>,
        scope_rx: watch::Receiver<Option<Scope>>,
        spec: SubscribeSpec<T>,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(LiveState::default());
        let collector = Collector::new(spec.sort, state_tx);
        let task = tokio::spawn(run(store, scope_rx, spec.filter, collector));
        Self { state_rx, task }
    }

    pub fn state(&self) -> watch::Receiver<LiveState<T>> {
        self.state_rx.clone()
    }
}

impl<T: Entity> Drop for LiveCollection<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run<T: Entity>(
    store: Arc<dyn DocumentStore>,
    mut scope_rx: watch::Receiver<Option<Scope>>,
    filter: fn(&Scope) -> Filter,
    mut collector: Collector<T>,
) {
    loop {
        let scope = scope_rx.borrow_and_update().clone();

        // Drop the previous subscription before establishing the new one.
        let mut sub: Option<CollectionSubscription> = None;
        let generation = collector.advance();

        match &scope {
            None => collector.clear(),
            Some(scope) => {
                collector.begin_loading();
                sub = Some(store.subscribe_collection(T::COLLECTION, filter(scope)));
            }
        }

        loop {
            tokio::select! {
                changed = scope_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    break;
                }
                event = async { sub.as_mut().expect("guarded by arm condition").events.recv().await },
                    if sub.is_some() =>
                {
                    match event {
                        Some(CollectionEvent::Snapshot(docs)) => {
                            collector.apply_snapshot(generation, &docs);
                        }
                        Some(CollectionEvent::Error(msg)) => {
                            warn!(collection = T::COLLECTION, error = %msg, "subscription failed");
                            collector.apply_error(generation, &msg);
                        }
                        None => {
                            // Stream closed by the store; hold current state
                            // until the scope changes (manual re-mount).
                            sub = None;
                        }
                    }
                }
            }
        }
    }
}

/// Gardens for the active tenant, stably sorted by name with locale-aware
/// comparison after each snapshot.
pub fn gardens(
    store: Arc<dyn DocumentStore>,
    scope_rx: watch::Receiver<Option<Scope>>,
) -> LiveCollection<Garden> {
    LiveCollection::spawn(
        store,
        scope_rx,
        SubscribeSpec {
            sort: Some(|a: &Garden, b: &Garden| name_cmp(&a.name, &b.name)),
            ..SubscribeSpec::tenant_scoped()
        },
    )
}

/// Tasks for the active tenant, in arrival order.
pub fn tasks(
    store: Arc<dyn DocumentStore>,
    scope_rx: watch::Receiver<Option<Scope>>,
) -> LiveCollection<Task> {
    LiveCollection::spawn(store, scope_rx, SubscribeSpec::tenant_scoped())
}

/// Shopping items for the active tenant, in arrival order.
pub fn shopping_items(
    store: Arc<dyn DocumentStore>,
    scope_rx: watch::Receiver<Option<Scope>>,
) -> LiveCollection<ShoppingItem> {
    LiveCollection::spawn(store, scope_rx, SubscribeSpec::tenant_scoped())
}
