//! Commit: turn an [`OrderDraft`] into order-line writes.
//!
//! [`plan`] is pure and decides which operations a save needs; [`execute`]
//! runs them concurrently against a [`LineStore`]. A failed operation fails
//! the whole commit but never undoes its siblings.

use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::draft::{DraftItem, OrderDraft, PersistedTag};
use crate::error::{PosError, PosResult};
use crate::identity::OwnerId;
use crate::models::{NewOrderLine, OrderLinePatch};
use crate::persistence::LineStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitMode {
    /// Nothing in the draft was loaded from storage.
    PureInsert,
    /// At least one item maps to a stored line.
    Editing,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum LineOp {
    Insert(NewOrderLine),
    Update {
        line_id: String,
        patch: OrderLinePatch,
    },
    Delete {
        line_id: String,
    },
}

impl LineOp {
    fn describe(&self) -> String {
        match self {
            Self::Insert(line) => format!("insert {}", line.product_id),
            Self::Update { line_id, .. } => format!("update {line_id}"),
            Self::Delete { line_id } => format!("delete {line_id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitPlan {
    pub mode: CommitMode,
    pub ops: Vec<LineOp>,
}

impl CommitPlan {
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitReport {
    pub mode: Option<CommitMode>,
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Set when a completion was requested but nothing had a positive
    /// quantity, so the draft was saved open instead.
    pub completion_skipped: bool,
}

impl CommitReport {
    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }
}

fn insert_op(table_id: &str, item: &DraftItem, completed: bool) -> LineOp {
    LineOp::Insert(NewOrderLine {
        table_id: table_id.to_string(),
        product_id: item.product_id().to_string(),
        name: item.name().to_string(),
        price: item.unit_price(),
        quantity: item.quantity(),
        completed,
    })
}

/// Operations needed to save `draft` with the given completion flag.
pub fn plan(draft: &OrderDraft, completed: bool) -> CommitPlan {
    let mode = if draft.has_persisted_items() {
        CommitMode::Editing
    } else {
        CommitMode::PureInsert
    };
    let table_id = draft.table_id();

    let ops = match mode {
        CommitMode::PureInsert => draft
            .items()
            .iter()
            .map(|item| insert_op(table_id, item, completed))
            .collect(),
        CommitMode::Editing => draft
            .items()
            .iter()
            .filter_map(|item| match item {
                DraftItem::Local(_) => Some(insert_op(table_id, item, completed)),
                DraftItem::Persisted(p) => match p.tag {
                    PersistedTag::Modified => Some(LineOp::Update {
                        line_id: p.line_id.clone(),
                        patch: OrderLinePatch {
                            quantity: Some(p.quantity),
                            completed,
                        },
                    }),
                    PersistedTag::MarkedDeleted => Some(LineOp::Delete {
                        line_id: p.line_id.clone(),
                    }),
                    PersistedTag::Unchanged if completed => Some(LineOp::Update {
                        line_id: p.line_id.clone(),
                        patch: OrderLinePatch {
                            quantity: None,
                            completed: true,
                        },
                    }),
                    PersistedTag::Unchanged => None,
                },
            })
            .collect(),
    };

    CommitPlan { mode, ops }
}

/// Run every operation of `plan` concurrently and wait for all of them.
pub async fn execute<S: LineStore>(
    store: Arc<S>,
    owner: &OwnerId,
    plan: CommitPlan,
) -> PosResult<CommitReport> {
    let mut report = CommitReport {
        mode: Some(plan.mode),
        ..CommitReport::default()
    };
    if plan.is_empty() {
        return Ok(report);
    }

    let total = plan.ops.len();
    let mut set = JoinSet::new();
    for op in plan.ops {
        let store = store.clone();
        let owner = owner.clone();
        set.spawn_blocking(move || {
            let result = match &op {
                LineOp::Insert(line) => store.insert_line(&owner, line).map(|_| ()),
                LineOp::Update { line_id, patch } => store.update_line(&owner, line_id, *patch),
                LineOp::Delete { line_id } => store.delete_line(&owner, line_id),
            };
            (op, result)
        });
    }

    let mut messages = Vec::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((op, Ok(()))) => match op {
                LineOp::Insert(_) => report.inserted += 1,
                LineOp::Update { .. } => report.updated += 1,
                LineOp::Delete { .. } => report.deleted += 1,
            },
            Ok((op, Err(e))) => {
                let what = op.describe();
                error!(owner_id = %owner, op = %what, "order line operation failed: {e}");
                messages.push(format!("{what}: {e}"));
            }
            Err(e) => {
                error!(owner_id = %owner, "order line task failed: {e}");
                messages.push(PosError::from(e).to_string());
            }
        }
    }

    if messages.is_empty() {
        Ok(report)
    } else {
        Err(PosError::Commit {
            failed: messages.len(),
            total,
            messages,
        })
    }
}

/// Save `draft`, marking every written line `completed` when asked.
pub async fn commit<S: LineStore>(
    store: Arc<S>,
    owner: &OwnerId,
    draft: &OrderDraft,
    completed: bool,
) -> PosResult<CommitReport> {
    let plan = plan(draft, completed);
    debug!(
        table_id = draft.table_id(),
        mode = ?plan.mode,
        ops = plan.ops.len(),
        completed,
        "Committing order draft"
    );
    let report = execute(store, owner, plan).await?;
    info!(
        table_id = draft.table_id(),
        inserted = report.inserted,
        updated = report.updated,
        deleted = report.deleted,
        completed,
        "Order draft committed"
    );
    Ok(report)
}

/// Commit with `completed = true`. With nothing of positive quantity the
/// draft is saved open instead and the report says so. An empty draft is a
/// no-op and reports nothing skipped.
pub async fn complete_order<S: LineStore>(
    store: Arc<S>,
    owner: &OwnerId,
    draft: &OrderDraft,
) -> PosResult<CommitReport> {
    if draft.is_empty() {
        debug!(table_id = draft.table_id(), "Nothing to complete");
        return Ok(CommitReport::default());
    }
    if draft.has_positive_quantity() {
        return commit(store, owner, draft, true).await;
    }
    warn!(
        table_id = draft.table_id(),
        "Completion requested with no positive quantities; saving open"
    );
    let mut report = commit(store, owner, draft, false).await?;
    report.completion_skipped = true;
    Ok(report)
}
