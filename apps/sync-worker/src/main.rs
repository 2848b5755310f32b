use std::env;
use std::sync::Arc;

use dotenvy::dotenv;
use futures_util::StreamExt;
use serde_json::{json, Map, Value};
use tokio_stream::wrappers::WatchStream;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use core_lib::adapters::{InMemoryDocumentStore, InMemoryIdentity, InMemoryPreferences};
use core_lib::{DocumentStore, IdentityProvider, PreferenceStore, Principal};
use live_query::{
    gardens, shopping_items, tasks, Dashboard, OperatorAllowList, TenantResolver,
};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// `RUST_LOG` when set, otherwise `info` so state transitions are visible by
/// default.
fn log_filter(spec: Option<&str>) -> EnvFilter {
    match spec {
        Some(spec) => EnvFilter::new(spec),
        None => EnvFilter::new("info"),
    }
}

fn fields(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Demo data so the worker has something to resolve and aggregate. A remote
/// store adapter would replace this wholesale.
fn seed_demo_data(store: &InMemoryDocumentStore) {
    store.seed(
        "workspaces",
        "ws-demo",
        fields(json!({
            "name": "demo crew",
            "owner": "demo@example.com",
            "ownerId": "demo-user",
            "members": {
                "demo-user": { "role": "admin", "email": "demo@example.com" }
            }
        })),
    );
    store.seed(
        "gardens",
        "garden-1",
        fields(json!({
            "tenantId": "ws-demo",
            "name": "rose garden",
            "address": "12 Main St",
            "day": "monday",
            "requiresAttention": [
                { "id": "issue-1", "text": "broken sprinkler", "resolved": false }
            ]
        })),
    );
    store.seed(
        "tasks",
        "task-1",
        fields(json!({
            "tenantId": "ws-demo",
            "userId": "demo-user",
            "title": "order mulch",
            "done": false
        })),
    );
    store.seed(
        "shopping",
        "item-1",
        fields(json!({
            "tenantId": "ws-demo",
            "userId": "demo-user",
            "title": "work gloves",
            "qty": 2
        })),
    );
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    dotenv().ok();

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(log_filter(env::var("RUST_LOG").ok().as_deref()))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting Sync Worker v{}...", env!("CARGO_PKG_VERSION"));

    // --- Configuration ---
    let allow_list = match env::var("OPERATOR_EMAILS") {
        Ok(raw) => OperatorAllowList::from_env_value(&raw),
        Err(_) => {
            warn!("OPERATOR_EMAILS not set; no operator access");
            OperatorAllowList::default()
        }
    };

    // --- Adapters ---
    let store = Arc::new(InMemoryDocumentStore::new());
    let identity = InMemoryIdentity::new();
    let prefs = Arc::new(InMemoryPreferences::new());
    seed_demo_data(&store);
    info!("In-memory store seeded with demo data.");

    // --- Tenant resolution and live collections ---
    let resolver = TenantResolver::spawn(
        Arc::clone(&store) as Arc<dyn DocumentStore>,
        identity.principal(),
        Arc::clone(&prefs) as Arc<dyn PreferenceStore>,
        allow_list,
    );

    let doc_store = Arc::clone(&store) as Arc<dyn DocumentStore>;
    let garden_feed = gardens(Arc::clone(&doc_store), resolver.scope());
    let task_feed = tasks(Arc::clone(&doc_store), resolver.scope());
    let shopping_feed = shopping_items(Arc::clone(&doc_store), resolver.scope());
    let dashboard = Dashboard::spawn(garden_feed.state(), task_feed.state(), shopping_feed.state());

    identity.sign_in(Principal {
        uid: "demo-user".to_string(),
        email: "demo@example.com".to_string(),
        display_name: "Demo User".to_string(),
    });
    info!("Demo principal signed in. Listening for dashboard changes...");

    let mut dashboard_stream = WatchStream::new(dashboard.state());
    let mut tenant_stream = WatchStream::new(resolver.state());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received.");
                break;
            }
            Some(state) = tenant_stream.next() => {
                info!(
                    active = ?state.active,
                    workspaces = state.workspaces.len(),
                    loading = state.loading,
                    "tenant state changed"
                );
            }
            Some(state) = dashboard_stream.next() => {
                info!(
                    badge = state.counts.total_badge(),
                    gardens = state.counts.gardens,
                    unfinished_tasks = state.counts.unfinished_tasks,
                    unresolved_issues = state.counts.unresolved_issues,
                    shopping_items = state.counts.shopping_items,
                    worklist = state.worklist.len(),
                    "dashboard recomputed"
                );
            }
        }
    }

    info!("Sync Worker stopped.");
    Ok(())
}
