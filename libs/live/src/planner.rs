use std::sync::Arc;

use tokio::sync::watch;

use core_lib::domain::WeekPlan;
use core_lib::{DocumentStore, Filter};

use crate::collection::{LiveCollection, SubscribeSpec};
use crate::tenant::Scope;

/// Weekly plans belong to their author, not to the whole tenant, so the feed
/// is scoped by both ids. Newest week first.
pub fn week_plans(
    store: Arc<dyn DocumentStore>,
    scope_rx: watch::Receiver<Option<Scope>>,
) -> LiveCollection<WeekPlan> {
    LiveCollection::spawn(
        store,
        scope_rx,
        SubscribeSpec {
            filter: |scope| {
                Filter::And(vec![
                    Filter::field_equals("tenantId", scope.tenant_id.clone()),
                    Filter::field_equals("userId", scope.uid.clone()),
                ])
            },
            sort: Some(|a: &WeekPlan, b: &WeekPlan| b.week_start_date.cmp(&a.week_start_date)),
        },
    )
}
