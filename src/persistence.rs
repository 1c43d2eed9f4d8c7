//! Persistence seams.
//!
//! [`LineStore`] is the narrow interface the commit step writes through; the
//! SQLite-backed [`DbState`] implements it, tests substitute fakes. The
//! snapshot helpers read a whole collection for one owner and push it onto
//! the change feed after every mutation, while the writer still holds the
//! connection lock.

use rusqlite::Connection;
use tracing::warn;

use crate::db::DbState;
use crate::error::PosResult;
use crate::expenses;
use crate::feed::{Collection, CollectionSnapshot, Snapshot};
use crate::identity::OwnerId;
use crate::menu;
use crate::models::{NewOrderLine, OrderLine, OrderLinePatch};
use crate::orders;
use crate::tables;

/// Per-line writes issued by a commit. Calls for distinct lines may run
/// concurrently.
pub trait LineStore: Send + Sync + 'static {
    fn insert_line(&self, owner: &OwnerId, line: &NewOrderLine) -> PosResult<OrderLine>;
    fn update_line(&self, owner: &OwnerId, line_id: &str, patch: OrderLinePatch) -> PosResult<()>;
    fn delete_line(&self, owner: &OwnerId, line_id: &str) -> PosResult<()>;
}

impl LineStore for DbState {
    fn insert_line(&self, owner: &OwnerId, line: &NewOrderLine) -> PosResult<OrderLine> {
        orders::insert_line(self, owner, line)
    }

    fn update_line(&self, owner: &OwnerId, line_id: &str, patch: OrderLinePatch) -> PosResult<()> {
        orders::update_line(self, owner, line_id, patch)
    }

    fn delete_line(&self, owner: &OwnerId, line_id: &str) -> PosResult<()> {
        orders::delete_line(self, owner, line_id)
    }
}

/// Read the current contents of one collection for `owner`.
pub fn snapshot(
    db: &DbState,
    owner: &OwnerId,
    collection: Collection,
) -> PosResult<CollectionSnapshot> {
    let conn = db.lock()?;
    read_collection(&conn, owner, collection)
}

fn read_collection(
    conn: &Connection,
    owner: &OwnerId,
    collection: Collection,
) -> PosResult<CollectionSnapshot> {
    Ok(match collection {
        Collection::Tables => CollectionSnapshot::Tables(tables::query_tables(conn, owner)?),
        Collection::Categories => {
            CollectionSnapshot::Categories(menu::query_categories(conn, owner)?)
        }
        Collection::Products => CollectionSnapshot::Products(menu::query_products(conn, owner)?),
        Collection::OrderLines => CollectionSnapshot::OrderLines(orders::query_lines(conn, owner)?),
        Collection::Expenses => CollectionSnapshot::Expenses(expenses::query_expenses(conn, owner)?),
    })
}

/// Snapshots of every collection, in [`Collection::ALL`] order, read under
/// one lock.
pub fn full_snapshot(db: &DbState, owner: &OwnerId) -> PosResult<Vec<Snapshot>> {
    let conn = db.lock()?;
    Collection::ALL
        .iter()
        .map(|&collection| {
            Ok(Snapshot {
                owner_id: owner.as_str().to_string(),
                data: read_collection(&conn, owner, collection)?,
            })
        })
        .collect()
}

/// Publish fresh snapshots of `collections`.
///
/// `conn` must be the guarded connection the mutation just wrote through:
/// reading and broadcasting under the same lock keeps the feed in write
/// order, so the last snapshot a subscriber sees is the current one. A read
/// failure is logged and skipped; the write already succeeded.
pub(crate) fn publish(
    db: &DbState,
    conn: &Connection,
    owner: &OwnerId,
    collections: &[Collection],
) {
    for &collection in collections {
        match read_collection(conn, owner, collection) {
            Ok(data) => db.feed.publish(Snapshot {
                owner_id: owner.as_str().to_string(),
                data,
            }),
            Err(e) => warn!(owner_id = %owner, ?collection, "snapshot for change feed failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::task::JoinSet;

    fn open_line(product_id: String) -> NewOrderLine {
        NewOrderLine {
            table_id: "t1".into(),
            product_id,
            name: "Taco".into(),
            price: 15.0,
            quantity: 1,
            completed: false,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writes_publish_in_write_order() {
        for _ in 0..50 {
            let db = Arc::new(DbState::open_in_memory(64).unwrap());
            let owner = OwnerId::new("u1").unwrap();
            let mut rx = db.feed.subscribe();

            let mut set = JoinSet::new();
            for i in 0..8 {
                let db = db.clone();
                let owner = owner.clone();
                set.spawn_blocking(move || orders::insert_line(&db, &owner, &open_line(format!("p{i}"))));
            }
            while let Some(joined) = set.join_next().await {
                joined.unwrap().unwrap();
            }

            let mut sizes = Vec::new();
            while let Ok(snap) = rx.try_recv() {
                if let CollectionSnapshot::OrderLines(lines) = snap.data {
                    sizes.push(lines.len());
                }
            }
            // Each snapshot reflects exactly the writes before it, so the
            // last one holds every line.
            assert_eq!(sizes, (1..=8).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_full_snapshot_sees_latest_write() {
        let db = DbState::open_in_memory(8).unwrap();
        let owner = OwnerId::new("u1").unwrap();
        orders::insert_line(&db, &owner, &open_line("p1".into())).unwrap();
        let snaps = full_snapshot(&db, &owner).unwrap();
        let lines = snaps
            .iter()
            .find(|s| s.data.collection() == Collection::OrderLines)
            .unwrap();
        assert_eq!(lines.data.len(), 1);
    }

    #[tokio::test]
    async fn test_mutation_publishes_owner_snapshot() {
        let db = DbState::open_in_memory(8).unwrap();
        let owner = OwnerId::new("u1").unwrap();
        let mut rx = db.feed.subscribe();

        tables::create_table(&db, &owner, None).unwrap();

        let snap = rx.recv().await.unwrap();
        assert_eq!(snap.owner_id, "u1");
        match snap.data {
            CollectionSnapshot::Tables(tables) => {
                assert_eq!(tables.len(), 1);
                assert_eq!(tables[0].name, "Mesa 1");
            }
            other => panic!("unexpected snapshot {other:?}"),
        }
    }

    #[test]
    fn test_full_snapshot_covers_every_collection() {
        let db = DbState::open_in_memory(8).unwrap();
        let owner = OwnerId::new("u1").unwrap();
        let snaps = full_snapshot(&db, &owner).unwrap();
        let kinds: Vec<Collection> = snaps.iter().map(|s| s.data.collection()).collect();
        assert_eq!(kinds, Collection::ALL.to_vec());
        assert!(snaps.iter().all(|s| s.data.is_empty()));
    }

    #[test]
    fn test_line_store_for_db_state() {
        let db = DbState::open_in_memory(8).unwrap();
        let owner = OwnerId::new("u1").unwrap();
        let store: &dyn LineStore = &db;
        let line = store
            .insert_line(
                &owner,
                &NewOrderLine {
                    table_id: "t1".into(),
                    product_id: "p1".into(),
                    name: "Taco".into(),
                    price: 15.0,
                    quantity: 1,
                    completed: false,
                },
            )
            .unwrap();
        store
            .update_line(
                &owner,
                &line.id,
                OrderLinePatch {
                    quantity: Some(3),
                    completed: false,
                },
            )
            .unwrap();
        store.delete_line(&owner, &line.id).unwrap();
        assert!(orders::list_order_lines(&db, &owner).unwrap().is_empty());
    }
}
