//! Expense tracking.

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::db::{self, DbState};
use crate::error::{PosError, PosResult};
use crate::feed::Collection;
use crate::identity::OwnerId;
use crate::models::{Expense, ExpenseInput};
use crate::persistence::publish;
use crate::validation;

pub(crate) fn query_expenses(conn: &Connection, owner: &OwnerId) -> PosResult<Vec<Expense>> {
    let mut stmt = conn.prepare(
        "SELECT id, owner_id, name, cost, spent_at FROM expenses
         WHERE owner_id = ?1 ORDER BY spent_at, rowid",
    )?;
    let rows = stmt
        .query_map(params![owner.as_str()], |row| {
            Ok(Expense {
                id: row.get(0)?,
                owner_id: row.get(1)?,
                name: row.get(2)?,
                cost: row.get(3)?,
                spent_at: db::get_ts(row, 4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn list_expenses(db: &DbState, owner: &OwnerId) -> PosResult<Vec<Expense>> {
    let conn = db.lock()?;
    query_expenses(&conn, owner)
}

/// Record an expense from the form input, dated now.
pub fn add_expense(db: &DbState, owner: &OwnerId, input: &ExpenseInput) -> PosResult<Expense> {
    add_expense_at(db, owner, input, Utc::now())
}

pub fn add_expense_at(
    db: &DbState,
    owner: &OwnerId,
    input: &ExpenseInput,
    spent_at: DateTime<Utc>,
) -> PosResult<Expense> {
    let valid = validation::expense(input)?;
    let expense = Expense {
        id: Uuid::new_v4().to_string(),
        owner_id: owner.as_str().to_string(),
        name: valid.name,
        cost: valid.cost,
        spent_at,
    };
    {
        let conn = db.lock()?;
        conn.execute(
            "INSERT INTO expenses (id, owner_id, name, cost, spent_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                expense.id,
                expense.owner_id,
                expense.name,
                expense.cost,
                db::ts_to_sql(&expense.spent_at)
            ],
        )?;
        publish(db, &conn, owner, &[Collection::Expenses]);
    }
    info!(owner_id = %owner, expense_id = %expense.id, cost = expense.cost, "Expense added");
    Ok(expense)
}

pub fn delete_expense(db: &DbState, owner: &OwnerId, expense_id: &str) -> PosResult<()> {
    {
        let conn = db.lock()?;
        let changed = conn.execute(
            "DELETE FROM expenses WHERE id = ?1 AND owner_id = ?2",
            params![expense_id, owner.as_str()],
        )?;
        if changed == 0 {
            return Err(PosError::not_found(format!("expense {expense_id}")));
        }
        publish(db, &conn, owner, &[Collection::Expenses]);
    }
    info!(owner_id = %owner, expense_id, "Expense deleted");
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpenseDay {
    pub date: NaiveDate,
    pub expenses: Vec<Expense>,
    pub total: f64,
}

/// Group expenses by calendar day in `offset`, oldest day first.
pub fn expenses_by_day(expenses: &[Expense], offset: FixedOffset) -> Vec<ExpenseDay> {
    let mut sorted: Vec<&Expense> = expenses.iter().collect();
    sorted.sort_by_key(|e| e.spent_at);

    let mut days: Vec<ExpenseDay> = Vec::new();
    for expense in sorted {
        let date = expense.spent_at.with_timezone(&offset).date_naive();
        match days.last_mut() {
            Some(day) if day.date == date => {
                day.total += expense.cost;
                day.expenses.push(expense.clone());
            }
            _ => days.push(ExpenseDay {
                date,
                expenses: vec![expense.clone()],
                total: expense.cost,
            }),
        }
    }
    days
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn setup() -> (DbState, OwnerId) {
        (
            DbState::open_in_memory(8).unwrap(),
            OwnerId::new("u1").unwrap(),
        )
    }

    fn input(name: &str, cost: &str) -> ExpenseInput {
        ExpenseInput {
            name: name.into(),
            cost: cost.into(),
        }
    }

    #[test]
    fn test_add_list_delete() {
        let (db, owner) = setup();
        let gas = add_expense(&db, &owner, &input("Gas", "350")).unwrap();
        add_expense(&db, &owner, &input("Tortillas", "120.5")).unwrap();

        let listed = list_expenses(&db, &owner).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].name, "Gas");
        assert_eq!(listed[1].cost, 120.5);

        delete_expense(&db, &owner, &gas.id).unwrap();
        assert_eq!(list_expenses(&db, &owner).unwrap().len(), 1);
        assert!(matches!(
            delete_expense(&db, &owner, &gas.id),
            Err(PosError::NotFound(_))
        ));
    }

    #[test]
    fn test_invalid_cost_never_stored() {
        let (db, owner) = setup();
        let err = add_expense(&db, &owner, &input("Gas", "mucho")).unwrap_err();
        assert!(matches!(err, PosError::Validation { field: "cost", .. }));
        assert!(list_expenses(&db, &owner).unwrap().is_empty());
    }

    #[test]
    fn test_group_by_day_oldest_first() {
        let (db, owner) = setup();
        let day2 = Utc.with_ymd_and_hms(2026, 5, 2, 15, 0, 0).unwrap();
        let day1_late = Utc.with_ymd_and_hms(2026, 5, 1, 20, 0, 0).unwrap();
        let day1_early = Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap();
        add_expense_at(&db, &owner, &input("Hielo", "40"), day2).unwrap();
        add_expense_at(&db, &owner, &input("Gas", "300"), day1_late).unwrap();
        add_expense_at(&db, &owner, &input("Carne", "500"), day1_early).unwrap();

        let expenses = list_expenses(&db, &owner).unwrap();
        let utc = FixedOffset::east_opt(0).unwrap();
        let days = expenses_by_day(&expenses, utc);
        assert_eq!(days.len(), 2);
        assert_eq!(days[0].date, NaiveDate::from_ymd_opt(2026, 5, 1).unwrap());
        assert_eq!(days[0].total, 800.0);
        assert_eq!(days[0].expenses[0].name, "Carne");
        assert_eq!(days[1].total, 40.0);
    }

    #[test]
    fn test_group_respects_offset() {
        let (db, owner) = setup();
        // 02:00 UTC is still the previous evening at UTC-6.
        let ts = Utc.with_ymd_and_hms(2026, 5, 2, 2, 0, 0).unwrap();
        add_expense_at(&db, &owner, &input("Gas", "300"), ts).unwrap();
        let expenses = list_expenses(&db, &owner).unwrap();

        let mexico = FixedOffset::west_opt(6 * 3600).unwrap();
        let days = expenses_by_day(&expenses, mexico);
        assert_eq!(days[0].date, NaiveDate::from_ymd_opt(2026, 5, 1).unwrap());
    }
}
