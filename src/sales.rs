//! Completed-sales history: daily totals per product, chart series, and
//! clearing the history.

use chrono::{FixedOffset, NaiveDate};
use rusqlite::params;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::info;

use crate::db::DbState;
use crate::error::PosResult;
use crate::feed::Collection;
use crate::identity::OwnerId;
use crate::models::OrderLine;
use crate::persistence::publish;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductSales {
    pub product_id: String,
    pub name: String,
    pub quantity: u64,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailySales {
    pub date: NaiveDate,
    /// In order of first sale that day.
    pub products: Vec<ProductSales>,
    pub total: f64,
}

/// One chart point: units sold per selected product on one day.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesPoint {
    pub date: NaiveDate,
    pub quantities: BTreeMap<String, u64>,
}

fn completed_by_day<'a>(
    lines: &'a [OrderLine],
    offset: FixedOffset,
) -> BTreeMap<NaiveDate, Vec<&'a OrderLine>> {
    let mut completed: Vec<&OrderLine> = lines.iter().filter(|l| l.completed).collect();
    completed.sort_by_key(|l| l.sold_at());

    let mut days: BTreeMap<NaiveDate, Vec<&OrderLine>> = BTreeMap::new();
    for line in completed {
        let date = line.sold_at().with_timezone(&offset).date_naive();
        days.entry(date).or_default().push(line);
    }
    days
}

/// Completed sales grouped by day then product, newest day first.
pub fn daily_sales(lines: &[OrderLine], offset: FixedOffset) -> Vec<DailySales> {
    completed_by_day(lines, offset)
        .into_iter()
        .rev()
        .map(|(date, day_lines)| {
            let mut products: Vec<ProductSales> = Vec::new();
            for line in day_lines {
                match products.iter_mut().find(|p| p.product_id == line.product_id) {
                    Some(entry) => {
                        entry.quantity += u64::from(line.quantity);
                        entry.total += line.subtotal();
                    }
                    None => products.push(ProductSales {
                        product_id: line.product_id.clone(),
                        name: line.name.clone(),
                        quantity: u64::from(line.quantity),
                        total: line.subtotal(),
                    }),
                }
            }
            let total = products.iter().map(|p| p.total).sum();
            DailySales {
                date,
                products,
                total,
            }
        })
        .collect()
}

/// Distinct product names with at least one completed sale, first-sold
/// first. These are the choices offered for the chart.
pub fn products_with_sales(lines: &[OrderLine]) -> Vec<String> {
    let mut completed: Vec<&OrderLine> = lines.iter().filter(|l| l.completed).collect();
    completed.sort_by_key(|l| l.sold_at());
    let mut names: Vec<String> = Vec::new();
    for line in completed {
        if !names.iter().any(|n| n == &line.name) {
            names.push(line.name.clone());
        }
    }
    names
}

/// Units sold per day for each selected product name, oldest day first.
/// Every selected name appears on every point, with 0 when unsold.
pub fn sales_series(
    lines: &[OrderLine],
    selected: &[String],
    offset: FixedOffset,
) -> Vec<SeriesPoint> {
    completed_by_day(lines, offset)
        .into_iter()
        .map(|(date, day_lines)| {
            let mut quantities: BTreeMap<String, u64> =
                selected.iter().map(|name| (name.clone(), 0)).collect();
            for line in day_lines {
                if let Some(q) = quantities.get_mut(&line.name) {
                    *q += u64::from(line.quantity);
                }
            }
            SeriesPoint { date, quantities }
        })
        .collect()
}

/// Delete every completed line of the owner. Open orders are untouched.
pub fn clear_sales(db: &DbState, owner: &OwnerId) -> PosResult<usize> {
    let removed = {
        let conn = db.lock()?;
        let removed = conn.execute(
            "DELETE FROM order_lines WHERE owner_id = ?1 AND completed = 1",
            params![owner.as_str()],
        )?;
        publish(db, &conn, owner, &[Collection::OrderLines]);
        removed
    };
    info!(owner_id = %owner, removed, "Completed sales cleared");
    Ok(removed)
}
