//! Dining tables.
//!
//! Deleting a table also removes its open order lines; completed lines stay
//! in the sales history.

use chrono::Utc;
use rusqlite::{params, Connection};
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{self, DbState};
use crate::error::{PosError, PosResult};
use crate::feed::Collection;
use crate::identity::OwnerId;
use crate::models::DiningTable;
use crate::persistence::publish;
use crate::validation;

pub(crate) fn query_tables(conn: &Connection, owner: &OwnerId) -> PosResult<Vec<DiningTable>> {
    let mut stmt = conn.prepare(
        "SELECT id, owner_id, name, created_at FROM dining_tables
         WHERE owner_id = ?1 ORDER BY created_at, rowid",
    )?;
    let rows = stmt
        .query_map(params![owner.as_str()], |row| {
            Ok(DiningTable {
                id: row.get(0)?,
                owner_id: row.get(1)?,
                name: row.get(2)?,
                created_at: db::get_ts(row, 3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn list_tables(db: &DbState, owner: &OwnerId) -> PosResult<Vec<DiningTable>> {
    let conn = db.lock()?;
    query_tables(&conn, owner)
}

/// Create a table. Without a name it is called `Mesa N`, N being one more
/// than the current number of tables.
pub fn create_table(db: &DbState, owner: &OwnerId, name: Option<&str>) -> PosResult<DiningTable> {
    let table = {
        let conn = db.lock()?;
        let name = match name {
            Some(n) => validation::required_name("name", n)?,
            None => {
                let count = db::count_owned(&conn, "dining_tables", owner.as_str())?;
                format!("Mesa {}", count + 1)
            }
        };
        let table = DiningTable {
            id: Uuid::new_v4().to_string(),
            owner_id: owner.as_str().to_string(),
            name,
            created_at: Utc::now(),
        };
        conn.execute(
            "INSERT INTO dining_tables (id, owner_id, name, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                table.id,
                table.owner_id,
                table.name,
                db::ts_to_sql(&table.created_at)
            ],
        )?;
        publish(db, &conn, owner, &[Collection::Tables]);
        table
    };
    info!(owner_id = %owner, table_id = %table.id, name = %table.name, "Table created");
    Ok(table)
}

pub fn rename_table(db: &DbState, owner: &OwnerId, table_id: &str, name: &str) -> PosResult<()> {
    let name = validation::required_name("name", name)?;
    {
        let conn = db.lock()?;
        let changed = conn.execute(
            "UPDATE dining_tables SET name = ?1 WHERE id = ?2 AND owner_id = ?3",
            params![name, table_id, owner.as_str()],
        )?;
        if changed == 0 {
            warn!(table_id, "Rename of unknown table");
            return Err(PosError::not_found(format!("table {table_id}")));
        }
        publish(db, &conn, owner, &[Collection::Tables]);
    }
    Ok(())
}

/// Delete a table and its open lines. Returns how many open lines went with
/// it.
pub fn delete_table(db: &DbState, owner: &OwnerId, table_id: &str) -> PosResult<usize> {
    let removed_lines = {
        let conn = db.lock()?;
        let removed_lines = db::with_transaction(&conn, |tx| {
            let changed = tx.execute(
                "DELETE FROM dining_tables WHERE id = ?1 AND owner_id = ?2",
                params![table_id, owner.as_str()],
            )?;
            if changed == 0 {
                return Err(PosError::not_found(format!("table {table_id}")));
            }
            Ok(tx.execute(
                "DELETE FROM order_lines
                 WHERE table_id = ?1 AND owner_id = ?2 AND completed = 0",
                params![table_id, owner.as_str()],
            )?)
        })?;
        if removed_lines > 0 {
            publish(db, &conn, owner, &[Collection::Tables, Collection::OrderLines]);
        } else {
            publish(db, &conn, owner, &[Collection::Tables]);
        }
        removed_lines
    };
    info!(owner_id = %owner, table_id, removed_lines, "Table deleted");
    Ok(removed_lines)
}
