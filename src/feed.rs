//! Change feed: full collection snapshots pushed after every mutation.
//!
//! Subscribers receive every snapshot for every owner and filter by owner
//! id themselves (see [`crate::subscription`]). A slow subscriber that falls
//! more than the channel capacity behind gets a `Lagged` error and is
//! expected to re-read the collections.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::models::{Category, DiningTable, Expense, OrderLine, Product};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Tables,
    Categories,
    Products,
    OrderLines,
    Expenses,
}

impl Collection {
    pub const ALL: [Collection; 5] = [
        Collection::Tables,
        Collection::Categories,
        Collection::Products,
        Collection::OrderLines,
        Collection::Expenses,
    ];
}

/// Current contents of one collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "collection", content = "records", rename_all = "snake_case")]
pub enum CollectionSnapshot {
    Tables(Vec<DiningTable>),
    Categories(Vec<Category>),
    Products(Vec<Product>),
    OrderLines(Vec<OrderLine>),
    Expenses(Vec<Expense>),
}

impl CollectionSnapshot {
    pub fn collection(&self) -> Collection {
        match self {
            Self::Tables(_) => Collection::Tables,
            Self::Categories(_) => Collection::Categories,
            Self::Products(_) => Collection::Products,
            Self::OrderLines(_) => Collection::OrderLines,
            Self::Expenses(_) => Collection::Expenses,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Tables(v) => v.len(),
            Self::Categories(v) => v.len(),
            Self::Products(v) => v.len(),
            Self::OrderLines(v) => v.len(),
            Self::Expenses(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub owner_id: String,
    #[serde(flatten)]
    pub data: CollectionSnapshot,
}

pub struct ChangeFeed {
    tx: broadcast::Sender<Snapshot>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Snapshot> {
        self.tx.subscribe()
    }

    pub fn publish(&self, snapshot: Snapshot) {
        let collection = snapshot.data.collection();
        let records = snapshot.data.len();
        // No receivers is not an error: nobody is watching right now.
        let delivered = self.tx.send(snapshot).unwrap_or(0);
        trace!(?collection, records, delivered, "Published snapshot");
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
