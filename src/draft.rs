//! Order draft: the cashier's unsaved edits for one table.
//!
//! A draft is seeded from the table's open (not completed) order lines and
//! then mutated by quantity deltas. Every item remembers whether it came from
//! the database, which decides how it is saved:
//!
//! - [`LocalItem`]: never persisted. Always tagged [`Tag::New`]. Dropping its
//!   quantity to zero removes it from the draft outright.
//! - [`PersistedItem`]: carries the stored line id. A quantity change tags it
//!   [`Tag::Modified`]; dropping to zero keeps the row at quantity 0 tagged
//!   [`Tag::MarkedDeleted`] so the screen still shows it until save.
//!
//! Nothing returns to [`Tag::Unchanged`] without loading a fresh draft.

use serde::Serialize;
use std::num::NonZeroU32;

use crate::models::{OrderLine, Product};

/// Lifecycle marker deciding what a commit does with an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tag {
    New,
    Unchanged,
    Modified,
    MarkedDeleted,
}

/// Tags a persisted item can carry. `New` is reserved for local items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistedTag {
    Unchanged,
    Modified,
    MarkedDeleted,
}

impl From<PersistedTag> for Tag {
    fn from(tag: PersistedTag) -> Self {
        match tag {
            PersistedTag::Unchanged => Tag::Unchanged,
            PersistedTag::Modified => Tag::Modified,
            PersistedTag::MarkedDeleted => Tag::MarkedDeleted,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalItem {
    pub product_id: String,
    pub name: String,
    pub unit_price: f64,
    pub quantity: NonZeroU32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedItem {
    pub line_id: String,
    pub product_id: String,
    pub name: String,
    pub unit_price: f64,
    pub quantity: u32,
    pub tag: PersistedTag,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "origin", rename_all = "snake_case")]
pub enum DraftItem {
    Local(LocalItem),
    Persisted(PersistedItem),
}

impl DraftItem {
    pub fn product_id(&self) -> &str {
        match self {
            Self::Local(item) => &item.product_id,
            Self::Persisted(item) => &item.product_id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Local(item) => &item.name,
            Self::Persisted(item) => &item.name,
        }
    }

    pub fn unit_price(&self) -> f64 {
        match self {
            Self::Local(item) => item.unit_price,
            Self::Persisted(item) => item.unit_price,
        }
    }

    pub fn quantity(&self) -> u32 {
        match self {
            Self::Local(item) => item.quantity.get(),
            Self::Persisted(item) => item.quantity,
        }
    }

    pub fn tag(&self) -> Tag {
        match self {
            Self::Local(_) => Tag::New,
            Self::Persisted(item) => item.tag.into(),
        }
    }

    /// Stored line id, present only for items loaded from the database.
    pub fn persisted_id(&self) -> Option<&str> {
        match self {
            Self::Local(_) => None,
            Self::Persisted(item) => Some(&item.line_id),
        }
    }

    pub fn subtotal(&self) -> f64 {
        self.unit_price() * f64::from(self.quantity())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDraft {
    table_id: String,
    items: Vec<DraftItem>,
}

impl OrderDraft {
    pub fn empty(table_id: impl Into<String>) -> Self {
        Self {
            table_id: table_id.into(),
            items: Vec::new(),
        }
    }

    /// Seed a draft from the stored lines of `table_id` that are still open.
    pub fn load(table_id: &str, lines: &[OrderLine]) -> Self {
        let items = lines
            .iter()
            .filter(|line| line.table_id == table_id && !line.completed)
            .map(|line| {
                DraftItem::Persisted(PersistedItem {
                    line_id: line.id.clone(),
                    product_id: line.product_id.clone(),
                    name: line.name.clone(),
                    unit_price: line.price,
                    quantity: line.quantity,
                    tag: PersistedTag::Unchanged,
                })
            })
            .collect();
        Self {
            table_id: table_id.to_string(),
            items,
        }
    }

    pub fn table_id(&self) -> &str {
        &self.table_id
    }

    pub fn items(&self) -> &[DraftItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn item(&self, product_id: &str) -> Option<&DraftItem> {
        self.items.iter().find(|i| i.product_id() == product_id)
    }

    /// Counter shown next to a product; 0 when it is not in the draft.
    pub fn quantity_of(&self, product_id: &str) -> u32 {
        self.item(product_id).map_or(0, DraftItem::quantity)
    }

    /// Rows for the receipt list: anything with a positive quantity.
    pub fn visible_items(&self) -> impl Iterator<Item = &DraftItem> {
        self.items.iter().filter(|i| i.quantity() > 0)
    }

    pub fn has_positive_quantity(&self) -> bool {
        self.items.iter().any(|i| i.quantity() > 0)
    }

    /// Any item at all, including zero-quantity rows pending deletion.
    pub fn is_occupied(&self) -> bool {
        !self.items.is_empty()
    }

    pub fn has_persisted_items(&self) -> bool {
        self.items
            .iter()
            .any(|i| matches!(i, DraftItem::Persisted(_)))
    }

    pub fn total(&self) -> f64 {
        self.items.iter().map(DraftItem::subtotal).sum()
    }

    /// Add `delta` units of `product` (negative to remove).
    ///
    /// A zero delta is a no-op.
    pub fn apply_delta(&mut self, product: &Product, delta: i64) {
        if delta == 0 {
            return;
        }

        let Some(pos) = self.items.iter().position(|i| i.product_id() == product.id) else {
            if delta > 0 {
                self.items.push(DraftItem::Local(LocalItem {
                    product_id: product.id.clone(),
                    name: product.name.clone(),
                    unit_price: product.price,
                    quantity: clamp_positive(delta),
                }));
            }
            return;
        };

        let new_quantity = i64::from(self.items[pos].quantity()).saturating_add(delta);
        if new_quantity <= 0 && matches!(self.items[pos], DraftItem::Local(_)) {
            self.items.remove(pos);
            return;
        }

        match &mut self.items[pos] {
            DraftItem::Local(item) => {
                item.quantity = clamp_positive(new_quantity);
            }
            DraftItem::Persisted(item) => {
                if new_quantity <= 0 {
                    item.quantity = 0;
                    item.tag = PersistedTag::MarkedDeleted;
                } else {
                    item.quantity = clamp_positive(new_quantity).get();
                    item.tag = PersistedTag::Modified;
                }
            }
        }
    }

    /// By-value form of [`Self::apply_delta`]; `self` is left untouched.
    pub fn with_delta(&self, product: &Product, delta: i64) -> Self {
        let mut next = self.clone();
        next.apply_delta(product, delta);
        next
    }

    /// Drop every local item and zero out every persisted one, so that a
    /// commit deletes all stored lines of the table.
    pub fn reset(&mut self) {
        self.items.retain(|i| matches!(i, DraftItem::Persisted(_)));
        for item in &mut self.items {
            if let DraftItem::Persisted(p) = item {
                p.quantity = 0;
                p.tag = PersistedTag::MarkedDeleted;
            }
        }
    }
}

/// `value` must be positive; saturates at `u32::MAX`.
fn clamp_positive(value: i64) -> NonZeroU32 {
    let clamped = u32::try_from(value).unwrap_or(u32::MAX);
    NonZeroU32::new(clamped).unwrap_or(NonZeroU32::MIN)
}
