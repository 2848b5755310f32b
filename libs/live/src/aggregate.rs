use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use core_lib::domain::{Garden, ShoppingItem, Task, Weekday};

use crate::collection::LiveState;

/// Per-domain attention counters, recomputed client-side from the live
/// collections. The total is what drives the app badge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BadgeCounts {
    pub gardens: usize,
    pub unfinished_tasks: usize,
    pub unresolved_issues: usize,
    pub shopping_items: usize,
}

impl BadgeCounts {
    pub fn derive(gardens: &[Garden], tasks: &[Task], shopping: &[ShoppingItem]) -> Self {
        Self {
            gardens: gardens.len(),
            unfinished_tasks: tasks.iter().filter(|t| !t.done).count(),
            unresolved_issues: gardens.iter().map(Garden::unresolved_issue_count).sum(),
            shopping_items: shopping.len(),
        }
    }

    /// Open work only: unfinished tasks plus unresolved issues.
    pub fn total_badge(&self) -> usize {
        self.unfinished_tasks + self.unresolved_issues
    }
}

/// An unresolved issue lifted out of its garden for display in the combined
/// worklist, tagged with the garden it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct IssueCard {
    pub id: String,
    pub garden_id: String,
    pub garden_name: String,
    pub text: String,
    pub created_at: Option<DateTime<Utc>>,
}

/// One entry of the combined worklist. Tasks and garden issues render in a
/// single list but remain distinguishable for routing edits back.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkItem {
    Task(Task),
    Issue(IssueCard),
}

/// Tasks first, ordered by priority band (`c` first, unleveled last, stable
/// within a band), then every unresolved issue flattened out of the gardens,
/// each tagged with its origin garden.
pub fn combined_worklist(tasks: &[Task], gardens: &[Garden]) -> Vec<WorkItem> {
    let mut ordered: Vec<&Task> = tasks.iter().collect();
    ordered.sort_by_key(|t| t.level.map_or(u8::MAX, |l| l.rank()));
    let mut items: Vec<WorkItem> = ordered
        .into_iter()
        .cloned()
        .map(WorkItem::Task)
        .collect();
    for garden in gardens {
        for issue in garden.unresolved_issues() {
            items.push(WorkItem::Issue(IssueCard {
                id: issue.id.clone(),
                garden_id: garden.id.clone(),
                garden_name: garden.name.clone(),
                text: issue.text.clone(),
                created_at: issue.created_at,
            }));
        }
    }
    items
}

/// Gardens grouped by their assigned visit day. Gardens with no day are
/// absent from the map; relative order within a day is preserved.
pub fn gardens_by_day(gardens: &[Garden]) -> BTreeMap<Weekday, Vec<Garden>> {
    let mut by_day: BTreeMap<Weekday, Vec<Garden>> = BTreeMap::new();
    for garden in gardens {
        if let Some(day) = garden.day {
            by_day.entry(day).or_default().push(garden.clone());
        }
    }
    by_day
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DashboardState {
    pub counts: BadgeCounts,
    pub worklist: Vec<WorkItem>,
}

/// Joins the three live collections into one derived dashboard cell,
/// recomputing whenever any input changes. Between an input snapshot and the
/// recompute the cell is briefly stale; it never mixes tenants because all
/// three inputs are scoped by the same channel.
pub struct Dashboard {
    state_rx: watch::Receiver<DashboardState>,
    task: JoinHandle<()>,
}

impl Dashboard {
    pub fn spawn(
        gardens_rx: watch::Receiver<LiveState<Garden>>,
        tasks_rx: watch::Receiver<LiveState<Task>>,
        shopping_rx: watch::Receiver<LiveState<ShoppingItem>>,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(DashboardState::default());
        let task = tokio::spawn(run(gardens_rx, tasks_rx, shopping_rx, state_tx));
        Self { state_rx, task }
    }

    pub fn state(&self) -> watch::Receiver<DashboardState> {
        self.state_rx.clone()
    }
}

impl Drop for Dashboard {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(
    mut gardens_rx: watch::Receiver<LiveState<Garden>>,
    mut tasks_rx: watch::Receiver<LiveState<Task>>,
    mut shopping_rx: watch::Receiver<LiveState<ShoppingItem>>,
    state_tx: watch::Sender<DashboardState>,
) {
    loop {
        let next = {
            let gardens = gardens_rx.borrow_and_update();
            let tasks = tasks_rx.borrow_and_update();
            let shopping = shopping_rx.borrow_and_update();
            DashboardState {
                counts: BadgeCounts::derive(&gardens.items, &tasks.items, &shopping.items),
                worklist: combined_worklist(&tasks.items, &gardens.items),
            }
        };
        state_tx.send_if_modified(|state| {
            if *state == next {
                false
            } else {
                debug!(badge = next.counts.total_badge(), "dashboard recomputed");
                *state = next;
                true
            }
        });

        tokio::select! {
            changed = gardens_rx.changed() => if changed.is_err() { return },
            changed = tasks_rx.changed() => if changed.is_err() { return },
            changed = shopping_rx.changed() => if changed.is_err() { return },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_lib::domain::Entity;
    use core_lib::Document;
    use serde_json::json;

    fn garden(id: &str, name: &str, issues: serde_json::Value) -> Garden {
        let fields = json!({ "tenantId": "t1", "name": name, "requiresAttention": issues });
        let doc = Document::new(id, fields.as_object().unwrap().clone());
        Garden::from_document(&doc).unwrap()
    }

    fn task(id: &str, title: &str, done: bool) -> Task {
        let fields = json!({ "tenantId": "t1", "userId": "u1", "title": title, "done": done });
        let doc = Document::new(id, fields.as_object().unwrap().clone());
        Task::from_document(&doc).unwrap()
    }

    fn item(id: &str, title: &str) -> ShoppingItem {
        let fields = json!({ "tenantId": "t1", "userId": "u1", "title": title });
        let doc = Document::new(id, fields.as_object().unwrap().clone());
        ShoppingItem::from_document(&doc).unwrap()
    }

    #[test]
    fn badge_counts_unfinished_tasks_plus_unresolved_issues() {
        let gardens = vec![
            garden(
                "g1",
                "a",
                json!([
                    { "id": "i1", "text": "x", "resolved": false },
                    { "id": "i2", "text": "y", "resolved": true }
                ]),
            ),
            garden("g2", "b", json!([{ "id": "i3", "text": "z" }])),
        ];
        let tasks = vec![task("t1", "mow", false), task("t2", "prune", true)];
        let shopping = vec![item("s1", "gloves")];

        let counts = BadgeCounts::derive(&gardens, &tasks, &shopping);
        assert_eq!(counts.gardens, 2);
        assert_eq!(counts.unfinished_tasks, 1);
        assert_eq!(counts.unresolved_issues, 2);
        assert_eq!(counts.shopping_items, 1);
        assert_eq!(counts.total_badge(), 3);
    }

    #[test]
    fn badge_of_nothing_is_zero() {
        let counts = BadgeCounts::derive(&[], &[], &[]);
        assert_eq!(counts, BadgeCounts::default());
        assert_eq!(counts.total_badge(), 0);
    }

    #[test]
    fn worklist_tags_issues_with_origin_garden() {
        let gardens = vec![garden(
            "g1",
            "rose",
            json!([
                { "id": "i1", "text": "leak", "resolved": false },
                { "id": "i2", "text": "done", "resolved": true }
            ]),
        )];
        let tasks = vec![task("t1", "mow", false)];

        let worklist = combined_worklist(&tasks, &gardens);
        assert_eq!(worklist.len(), 2);
        assert!(matches!(&worklist[0], WorkItem::Task(t) if t.title == "mow"));
        match &worklist[1] {
            WorkItem::Issue(card) => {
                assert_eq!(card.garden_id, "g1");
                assert_eq!(card.garden_name, "rose");
                assert_eq!(card.text, "leak");
            }
            other => panic!("expected issue, got {other:?}"),
        }
    }

    #[test]
    fn worklist_orders_tasks_by_priority_band() {
        let leveled = |id: &str, title: &str, level: Option<&str>| -> Task {
            let fields = json!({
                "tenantId": "t1",
                "userId": "u1",
                "title": title,
                "level": level,
            });
            let doc = Document::new(id, fields.as_object().unwrap().clone());
            Task::from_document(&doc).unwrap()
        };
        let tasks = vec![
            leveled("t1", "low", Some("a")),
            leveled("t2", "urgent", Some("c")),
            leveled("t3", "unranked", None),
            leveled("t4", "medium", Some("b")),
        ];

        let worklist = combined_worklist(&tasks, &[]);
        let titles: Vec<&str> = worklist
            .iter()
            .map(|item| match item {
                WorkItem::Task(t) => t.title.as_str(),
                WorkItem::Issue(_) => panic!("no issues expected"),
            })
            .collect();
        assert_eq!(titles, vec!["urgent", "medium", "low", "unranked"]);
    }

    #[test]
    fn worklist_keeps_finished_tasks() {
        // Display filtering is the caller's concern; the join keeps every task.
        let tasks = vec![task("t1", "mow", true)];
        let worklist = combined_worklist(&tasks, &[]);
        assert_eq!(worklist.len(), 1);
    }

    #[test]
    fn gardens_group_by_assigned_day() {
        let mut g1 = garden("g1", "a", json!([]));
        g1.day = Some(Weekday::Monday);
        let mut g2 = garden("g2", "b", json!([]));
        g2.day = Some(Weekday::Monday);
        let g3 = garden("g3", "c", json!([]));

        let by_day = gardens_by_day(&[g1, g2, g3]);
        assert_eq!(by_day.len(), 1);
        let monday = &by_day[&Weekday::Monday];
        assert_eq!(monday.len(), 2);
        assert_eq!(monday[0].id, "g1");
        assert_eq!(monday[1].id, "g2");
    }

    #[tokio::test]
    async fn dashboard_recomputes_on_input_change() {
        let (gardens_tx, gardens_rx) = watch::channel(LiveState::default());
        let (_tasks_tx, tasks_rx) = watch::channel(LiveState::default());
        let (_shopping_tx, shopping_rx) = watch::channel(LiveState::default());
        let dashboard = Dashboard::spawn(gardens_rx, tasks_rx, shopping_rx);
        let mut state_rx = dashboard.state();

        gardens_tx.send_replace(LiveState {
            items: vec![garden("g1", "a", json!([{ "id": "i1", "text": "x" }]))],
            loading: false,
            error: None,
        });

        tokio::time::timeout(std::time::Duration::from_millis(100), async {
            loop {
                if state_rx.borrow().counts.unresolved_issues == 1 {
                    break;
                }
                state_rx.changed().await.unwrap();
            }
        })
        .await
        .unwrap();

        assert_eq!(state_rx.borrow().counts.gardens, 1);
        assert_eq!(state_rx.borrow().worklist.len(), 1);
    }
}
