//! Stored order lines.
//!
//! One row per product per table. A line is *open* until it is committed
//! with `completed = true`, after which it belongs to the sales history.

use chrono::Utc;
use rusqlite::{params, Connection, Row};
use tracing::{debug, error};
use uuid::Uuid;

use crate::db::{self, DbState};
use crate::error::{PosError, PosResult};
use crate::feed::Collection;
use crate::identity::OwnerId;
use crate::models::{NewOrderLine, OrderLine, OrderLinePatch};
use crate::persistence::publish;

const LINE_COLUMNS: &str = "id, owner_id, table_id, product_id, name, price, quantity, completed,
     created_at, completed_at";

fn line_from_row(row: &Row<'_>) -> rusqlite::Result<OrderLine> {
    Ok(OrderLine {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        table_id: row.get(2)?,
        product_id: row.get(3)?,
        name: row.get(4)?,
        price: row.get(5)?,
        quantity: row.get(6)?,
        completed: row.get(7)?,
        created_at: db::get_ts(row, 8)?,
        completed_at: db::get_opt_ts(row, 9)?,
    })
}

pub(crate) fn query_lines(conn: &Connection, owner: &OwnerId) -> PosResult<Vec<OrderLine>> {
    let sql = format!(
        "SELECT {LINE_COLUMNS} FROM order_lines WHERE owner_id = ?1 ORDER BY created_at, rowid"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![owner.as_str()], line_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn list_order_lines(db: &DbState, owner: &OwnerId) -> PosResult<Vec<OrderLine>> {
    let conn = db.lock()?;
    query_lines(&conn, owner)
}

/// Open (not completed) lines of one table.
pub fn open_lines_for_table(
    db: &DbState,
    owner: &OwnerId,
    table_id: &str,
) -> PosResult<Vec<OrderLine>> {
    let conn = db.lock()?;
    let sql = format!(
        "SELECT {LINE_COLUMNS} FROM order_lines
         WHERE owner_id = ?1 AND table_id = ?2 AND completed = 0
         ORDER BY created_at, rowid"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![owner.as_str(), table_id], line_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn insert_line(db: &DbState, owner: &OwnerId, new: &NewOrderLine) -> PosResult<OrderLine> {
    if new.quantity == 0 {
        return Err(PosError::validation("quantity", "must be positive"));
    }
    let now = Utc::now();
    let line = OrderLine {
        id: Uuid::new_v4().to_string(),
        owner_id: owner.as_str().to_string(),
        table_id: new.table_id.clone(),
        product_id: new.product_id.clone(),
        name: new.name.clone(),
        price: new.price,
        quantity: new.quantity,
        completed: new.completed,
        created_at: now,
        completed_at: new.completed.then_some(now),
    };
    {
        let conn = db.lock()?;
        conn.execute(
            "INSERT INTO order_lines (
                id, owner_id, table_id, product_id, name, price, quantity,
                completed, created_at, completed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                line.id,
                line.owner_id,
                line.table_id,
                line.product_id,
                line.name,
                line.price,
                line.quantity,
                line.completed,
                db::ts_to_sql(&line.created_at),
                line.completed_at.as_ref().map(db::ts_to_sql),
            ],
        )
        .map_err(|e| {
            error!(table_id = %line.table_id, product_id = %line.product_id, "insert order line: {e}");
            PosError::from(e)
        })?;
        publish(db, &conn, owner, &[Collection::OrderLines]);
    }
    debug!(line_id = %line.id, quantity = line.quantity, completed = line.completed, "Order line inserted");
    Ok(line)
}

/// Apply a partial update. Completing a line stamps `completed_at` the first
/// time; reopening it clears the stamp.
pub fn update_line(
    db: &DbState,
    owner: &OwnerId,
    line_id: &str,
    patch: OrderLinePatch,
) -> PosResult<()> {
    if patch.quantity == Some(0) {
        return Err(PosError::validation("quantity", "must be positive"));
    }
    {
        let conn = db.lock()?;
        let now = db::ts_to_sql(&Utc::now());
        let changed = conn
            .execute(
                "UPDATE order_lines SET
                    quantity = COALESCE(?1, quantity),
                    completed = ?2,
                    completed_at = CASE WHEN ?2 THEN COALESCE(completed_at, ?3) ELSE NULL END
                 WHERE id = ?4 AND owner_id = ?5",
                params![patch.quantity, patch.completed, now, line_id, owner.as_str()],
            )
            .map_err(|e| {
                error!(line_id, "update order line: {e}");
                PosError::from(e)
            })?;
        if changed == 0 {
            return Err(PosError::not_found(format!("order line {line_id}")));
        }
        publish(db, &conn, owner, &[Collection::OrderLines]);
    }
    debug!(line_id, quantity = ?patch.quantity, completed = patch.completed, "Order line updated");
    Ok(())
}

pub fn delete_line(db: &DbState, owner: &OwnerId, line_id: &str) -> PosResult<()> {
    {
        let conn = db.lock()?;
        let changed = conn
            .execute(
                "DELETE FROM order_lines WHERE id = ?1 AND owner_id = ?2",
                params![line_id, owner.as_str()],
            )
            .map_err(|e| {
                error!(line_id, "delete order line: {e}");
                PosError::from(e)
            })?;
        if changed == 0 {
            return Err(PosError::not_found(format!("order line {line_id}")));
        }
        publish(db, &conn, owner, &[Collection::OrderLines]);
    }
    debug!(line_id, "Order line deleted");
    Ok(())
}
