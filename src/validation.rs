//! Form input validation.
//!
//! Runs before any persistence call: a rejected form never reaches the
//! database. Each check reports the offending field so the caller can render
//! the message next to it.

use crate::error::{PosError, PosResult};
use crate::models::{ExpenseInput, ProductInput};

const MAX_NAME_LEN: usize = 120;

/// Trim and require a non-empty name.
pub fn required_name(field: &'static str, value: &str) -> PosResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(PosError::validation(field, "is required"));
    }
    if trimmed.chars().count() > MAX_NAME_LEN {
        return Err(PosError::validation(
            field,
            format!("must be at most {MAX_NAME_LEN} characters"),
        ));
    }
    Ok(trimmed.to_string())
}

/// Parse a required, non-negative amount typed into a text field.
pub fn required_amount(field: &'static str, value: &str) -> PosResult<f64> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(PosError::validation(field, "is required"));
    }
    let numeric = trimmed
        .chars()
        .all(|c| c.is_ascii_digit() || c == '.')
        && trimmed.chars().any(|c| c.is_ascii_digit());
    if !numeric {
        return Err(PosError::validation(field, "only numbers are allowed"));
    }
    let amount: f64 = trimmed
        .parse()
        .map_err(|_| PosError::validation(field, "only numbers are allowed"))?;
    if !amount.is_finite() {
        return Err(PosError::validation(field, "only numbers are allowed"));
    }
    Ok(amount)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidProduct {
    pub name: String,
    pub price: f64,
    pub category_ids: Vec<String>,
    pub image_url: Option<String>,
}

pub fn product(input: &ProductInput) -> PosResult<ValidProduct> {
    let name = required_name("name", &input.name)?;
    let price = required_amount("price", &input.price)?;

    let mut category_ids: Vec<String> = Vec::with_capacity(input.category_ids.len());
    for id in &input.category_ids {
        let id = id.trim();
        if !id.is_empty() && !category_ids.iter().any(|c| c == id) {
            category_ids.push(id.to_string());
        }
    }

    let image_url = input
        .image_url
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .map(ToString::to_string);

    Ok(ValidProduct {
        name,
        price,
        category_ids,
        image_url,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidExpense {
    pub name: String,
    pub cost: f64,
}

pub fn expense(input: &ExpenseInput) -> PosResult<ValidExpense> {
    Ok(ValidExpense {
        name: required_name("name", &input.name)?,
        cost: required_amount("cost", &input.cost)?,
    })
}
