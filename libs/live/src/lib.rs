//! The live layer: tenant resolution, scoped collection subscriptions,
//! client-side aggregation, and the write-side action facade.
//!
//! Everything here consumes the capability ports defined in `core-lib`; the
//! remote document store and identity provider stay behind those traits.

pub mod actions;
pub mod aggregate;
pub mod collection;
pub mod detail;
pub mod planner;
pub mod tenant;

pub use actions::Actions;
pub use aggregate::{
    combined_worklist, gardens_by_day, BadgeCounts, Dashboard, DashboardState, IssueCard,
    WorkItem,
};
pub use collection::{gardens, shopping_items, tasks, LiveCollection, LiveState, SubscribeSpec};
pub use detail::{GardenDetailState, GardenProjection};
pub use planner::week_plans;
pub use tenant::{
    OperatorAllowList, Scope, TenantResolver, TenantState, SELECTED_WORKSPACE_KEY,
};
