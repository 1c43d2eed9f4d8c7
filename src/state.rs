//! UI-side restaurant state.
//!
//! [`RestaurantState`] is owned by the UI layer and changes only by applying
//! [`Snapshot`] messages from the subscription manager. A collection is
//! `None` until its first snapshot arrives, which the screens show as
//! loading. Drafts handed out by [`RestaurantState::draft_for_table`] are
//! copies; later snapshots never touch a draft being edited.

use chrono::FixedOffset;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::draft::OrderDraft;
use crate::expenses::{expenses_by_day, ExpenseDay};
use crate::feed::{CollectionSnapshot, Snapshot};
use crate::identity::OwnerId;
use crate::menu::products_in_category;
use crate::models::{Category, DiningTable, Expense, OrderLine, Product};
use crate::sales::{daily_sales, DailySales};

/// Lines shown under a table card.
const PREVIEW_LINES: usize = 2;

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestaurantState {
    owner_id: String,
    pub tables: Option<Vec<DiningTable>>,
    pub categories: Option<Vec<Category>>,
    pub products: Option<Vec<Product>>,
    pub order_lines: Option<Vec<OrderLine>>,
    pub expenses: Option<Vec<Expense>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSummary {
    pub table: DiningTable,
    pub occupied: bool,
    pub total: f64,
    pub preview: Vec<OrderLine>,
}

impl RestaurantState {
    pub fn new(owner: &OwnerId) -> Self {
        Self {
            owner_id: owner.as_str().to_string(),
            ..Self::default()
        }
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Replace one collection. Snapshots for another owner are ignored and
    /// reported as `false`.
    pub fn apply(&mut self, snapshot: Snapshot) -> bool {
        if snapshot.owner_id != self.owner_id {
            warn!(
                expected = %self.owner_id,
                got = %snapshot.owner_id,
                "Ignoring snapshot for another owner"
            );
            return false;
        }
        let collection = snapshot.data.collection();
        let records = snapshot.data.len();
        match snapshot.data {
            CollectionSnapshot::Tables(v) => self.tables = Some(v),
            CollectionSnapshot::Categories(v) => self.categories = Some(v),
            CollectionSnapshot::Products(v) => self.products = Some(v),
            CollectionSnapshot::OrderLines(v) => self.order_lines = Some(v),
            CollectionSnapshot::Expenses(v) => self.expenses = Some(v),
        }
        debug!(?collection, records, "State updated");
        true
    }

    /// Apply every snapshot already waiting on `rx` without blocking.
    pub fn apply_pending(&mut self, rx: &mut mpsc::Receiver<Snapshot>) -> usize {
        let mut applied = 0;
        while let Ok(snapshot) = rx.try_recv() {
            if self.apply(snapshot) {
                applied += 1;
            }
        }
        applied
    }

    pub fn is_loaded(&self) -> bool {
        self.tables.is_some()
            && self.categories.is_some()
            && self.products.is_some()
            && self.order_lines.is_some()
            && self.expenses.is_some()
    }

    pub fn table(&self, table_id: &str) -> Option<&DiningTable> {
        self.tables.as_deref()?.iter().find(|t| t.id == table_id)
    }

    /// Not-yet-completed lines of a table.
    pub fn open_lines(&self, table_id: &str) -> Vec<&OrderLine> {
        self.order_lines
            .as_deref()
            .unwrap_or_default()
            .iter()
            .filter(|l| l.table_id == table_id && !l.completed)
            .collect()
    }

    pub fn table_summaries(&self) -> Vec<TableSummary> {
        self.tables
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|table| {
                let open = self.open_lines(&table.id);
                TableSummary {
                    table: table.clone(),
                    occupied: !open.is_empty(),
                    total: open.iter().map(|l| l.subtotal()).sum(),
                    preview: open.into_iter().take(PREVIEW_LINES).cloned().collect(),
                }
            })
            .collect()
    }

    /// Fresh draft for the order-entry screen, or `None` when the table is
    /// unknown (or tables are still loading).
    pub fn draft_for_table(&self, table_id: &str) -> Option<OrderDraft> {
        self.table(table_id)?;
        Some(OrderDraft::load(
            table_id,
            self.order_lines.as_deref().unwrap_or_default(),
        ))
    }

    pub fn products_for(&self, selected_category: Option<&str>) -> Vec<&Product> {
        products_in_category(self.products.as_deref().unwrap_or_default(), selected_category)
    }

    pub fn daily_sales(&self, offset: FixedOffset) -> Vec<DailySales> {
        daily_sales(self.order_lines.as_deref().unwrap_or_default(), offset)
    }

    pub fn expense_days(&self, offset: FixedOffset) -> Vec<ExpenseDay> {
        expenses_by_day(self.expenses.as_deref().unwrap_or_default(), offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::draft::tests::stored_line;
    use chrono::Utc;

    fn owner() -> OwnerId {
        OwnerId::new("u1").unwrap()
    }

    fn table(id: &str, name: &str) -> DiningTable {
        DiningTable {
            id: id.into(),
            owner_id: "u1".into(),
            name: name.into(),
            created_at: Utc::now(),
        }
    }

    fn snap(data: CollectionSnapshot) -> Snapshot {
        Snapshot {
            owner_id: "u1".into(),
            data,
        }
    }

    fn loaded_state() -> RestaurantState {
        let mut state = RestaurantState::new(&owner());
        let mut done = stored_line("l9", "t1", "p9", 1);
        done.completed = true;
        state.apply(snap(CollectionSnapshot::Tables(vec![
            table("t1", "Mesa 1"),
            table("t2", "Mesa 2"),
        ])));
        state.apply(snap(CollectionSnapshot::OrderLines(vec![
            stored_line("l1", "t1", "p1", 2),
            stored_line("l2", "t1", "p2", 1),
            stored_line("l3", "t1", "p3", 1),
            done,
        ])));
        state
    }

    #[test]
    fn test_loading_until_every_collection_arrives() {
        let mut state = RestaurantState::new(&owner());
        assert!(!state.is_loaded());
        assert!(state.table_summaries().is_empty());

        state.apply(snap(CollectionSnapshot::Tables(vec![])));
        state.apply(snap(CollectionSnapshot::Categories(vec![])));
        state.apply(snap(CollectionSnapshot::Products(vec![])));
        state.apply(snap(CollectionSnapshot::OrderLines(vec![])));
        assert!(!state.is_loaded());
        state.apply(snap(CollectionSnapshot::Expenses(vec![])));
        assert!(state.is_loaded());
    }

    #[test]
    fn test_foreign_snapshot_ignored() {
        let mut state = RestaurantState::new(&owner());
        let applied = state.apply(Snapshot {
            owner_id: "u2".into(),
            data: CollectionSnapshot::Tables(vec![table("t1", "Mesa 1")]),
        });
        assert!(!applied);
        assert!(state.tables.is_none());
    }

    #[test]
    fn test_table_summaries() {
        let summaries = loaded_state().table_summaries();
        assert_eq!(summaries.len(), 2);

        let t1 = &summaries[0];
        assert!(t1.occupied);
        assert_eq!(t1.total, 40.0);
        assert_eq!(t1.preview.len(), 2);
        assert_eq!(t1.preview[0].id, "l1");

        assert!(!summaries[1].occupied);
        assert_eq!(summaries[1].total, 0.0);
    }

    #[test]
    fn test_draft_for_table() {
        let state = loaded_state();
        let draft = state.draft_for_table("t1").unwrap();
        assert_eq!(draft.len(), 3);
        assert!(state.draft_for_table("t2").unwrap().is_empty());
        assert!(state.draft_for_table("missing").is_none());
    }

    #[test]
    fn test_draft_not_touched_by_later_snapshots() {
        let mut state = loaded_state();
        let draft = state.draft_for_table("t1").unwrap();
        state.apply(snap(CollectionSnapshot::OrderLines(vec![])));
        assert_eq!(draft.len(), 3);
        assert!(state.open_lines("t1").is_empty());
    }

    #[tokio::test]
    async fn test_apply_pending_drains_channel() {
        let (tx, mut rx) = mpsc::channel(8);
        tx.send(snap(CollectionSnapshot::Tables(vec![table("t1", "Mesa 1")])))
            .await
            .unwrap();
        tx.send(snap(CollectionSnapshot::Expenses(vec![])))
            .await
            .unwrap();

        let mut state = RestaurantState::new(&owner());
        assert_eq!(state.apply_pending(&mut rx), 2);
        assert_eq!(state.apply_pending(&mut rx), 0);
        assert!(state.table("t1").is_some());
        assert_eq!(state.expenses.as_deref(), Some(&[][..]));
    }
}
