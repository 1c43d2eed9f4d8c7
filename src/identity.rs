//! Signed-in owner identity and the restaurant record behind it.
//!
//! The sign-in flow lives outside this crate; it hands us a stable owner id
//! that scopes every stored record.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

use crate::db::{self, DbState};
use crate::error::{PosError, PosResult};
use crate::models::Restaurant;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> PosResult<Self> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(PosError::NotAuthenticated);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Source of the current owner id.
pub trait Identity: Send + Sync {
    fn owner_id(&self) -> Option<OwnerId>;

    fn require_owner(&self) -> PosResult<OwnerId> {
        self.owner_id().ok_or(PosError::NotAuthenticated)
    }
}

/// Identity fixed at construction; `None` means signed out.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity(Option<OwnerId>);

impl StaticIdentity {
    pub fn signed_in(owner: OwnerId) -> Self {
        Self(Some(owner))
    }

    pub fn signed_out() -> Self {
        Self(None)
    }
}

impl Identity for StaticIdentity {
    fn owner_id(&self) -> Option<OwnerId> {
        self.0.clone()
    }
}

/// Return the owner's restaurant record, registering it on first sign-in.
pub fn ensure_restaurant(
    db: &DbState,
    owner: &OwnerId,
    display_name: Option<&str>,
    email: Option<&str>,
) -> PosResult<Restaurant> {
    let conn = db.lock()?;
    let existing = conn
        .query_row(
            "SELECT id, display_name, email, created_at FROM restaurants WHERE id = ?1",
            params![owner.as_str()],
            |row| {
                Ok(Restaurant {
                    id: row.get(0)?,
                    display_name: row.get(1)?,
                    email: row.get(2)?,
                    created_at: db::get_ts(row, 3)?,
                })
            },
        )
        .optional()?;
    if let Some(restaurant) = existing {
        return Ok(restaurant);
    }

    let restaurant = Restaurant {
        id: owner.as_str().to_string(),
        display_name: display_name.map(ToString::to_string),
        email: email.map(ToString::to_string),
        created_at: Utc::now(),
    };
    conn.execute(
        "INSERT INTO restaurants (id, display_name, email, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![
            restaurant.id,
            restaurant.display_name,
            restaurant.email,
            db::ts_to_sql(&restaurant.created_at),
        ],
    )?;
    info!(owner_id = %owner, "Registered restaurant");
    Ok(restaurant)
}
