//! Product catalog: categories and products.
//!
//! Products keep their category ids as a JSON array column. Deleting a
//! category strips its id from every product of the owner in the same
//! transaction.

use chrono::Utc;
use rusqlite::{params, Connection, Row};
use std::collections::HashSet;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{self, DbState};
use crate::error::{PosError, PosResult};
use crate::feed::Collection;
use crate::identity::OwnerId;
use crate::models::{Category, Product, ProductInput};
use crate::persistence::publish;
use crate::validation;

// ---------------------------------------------------------------------------
// Categories
// ---------------------------------------------------------------------------

pub(crate) fn query_categories(conn: &Connection, owner: &OwnerId) -> PosResult<Vec<Category>> {
    let mut stmt = conn.prepare(
        "SELECT id, owner_id, name, created_at FROM categories
         WHERE owner_id = ?1 ORDER BY name COLLATE NOCASE, rowid",
    )?;
    let rows = stmt
        .query_map(params![owner.as_str()], |row| {
            Ok(Category {
                id: row.get(0)?,
                owner_id: row.get(1)?,
                name: row.get(2)?,
                created_at: db::get_ts(row, 3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn list_categories(db: &DbState, owner: &OwnerId) -> PosResult<Vec<Category>> {
    let conn = db.lock()?;
    query_categories(&conn, owner)
}

pub fn create_category(db: &DbState, owner: &OwnerId, name: &str) -> PosResult<Category> {
    let category = Category {
        id: Uuid::new_v4().to_string(),
        owner_id: owner.as_str().to_string(),
        name: validation::required_name("name", name)?,
        created_at: Utc::now(),
    };
    {
        let conn = db.lock()?;
        conn.execute(
            "INSERT INTO categories (id, owner_id, name, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                category.id,
                category.owner_id,
                category.name,
                db::ts_to_sql(&category.created_at)
            ],
        )?;
        publish(db, &conn, owner, &[Collection::Categories]);
    }
    info!(owner_id = %owner, category_id = %category.id, "Category created");
    Ok(category)
}

pub fn rename_category(
    db: &DbState,
    owner: &OwnerId,
    category_id: &str,
    name: &str,
) -> PosResult<()> {
    let name = validation::required_name("name", name)?;
    {
        let conn = db.lock()?;
        let changed = conn.execute(
            "UPDATE categories SET name = ?1 WHERE id = ?2 AND owner_id = ?3",
            params![name, category_id, owner.as_str()],
        )?;
        if changed == 0 {
            return Err(PosError::not_found(format!("category {category_id}")));
        }
        publish(db, &conn, owner, &[Collection::Categories]);
    }
    Ok(())
}

/// Delete a category and detach it from products. Returns the number of
/// products that referenced it.
pub fn delete_category(db: &DbState, owner: &OwnerId, category_id: &str) -> PosResult<usize> {
    let detached = {
        let conn = db.lock()?;
        let detached = db::with_transaction(&conn, |tx| {
            let changed = tx.execute(
                "DELETE FROM categories WHERE id = ?1 AND owner_id = ?2",
                params![category_id, owner.as_str()],
            )?;
            if changed == 0 {
                return Err(PosError::not_found(format!("category {category_id}")));
            }

            let mut detached = 0;
            for mut product in query_products(tx, owner)? {
                let before = product.category_ids.len();
                product.category_ids.retain(|c| c != category_id);
                if product.category_ids.len() != before {
                    tx.execute(
                        "UPDATE products SET category_ids = ?1 WHERE id = ?2",
                        params![serde_json::to_string(&product.category_ids)?, product.id],
                    )?;
                    detached += 1;
                }
            }
            Ok(detached)
        })?;
        publish(db, &conn, owner, &[Collection::Categories, Collection::Products]);
        detached
    };
    info!(owner_id = %owner, category_id, detached, "Category deleted");
    Ok(detached)
}

// ---------------------------------------------------------------------------
// Products
// ---------------------------------------------------------------------------

fn product_from_row(row: &Row<'_>) -> rusqlite::Result<Product> {
    let raw_categories: String = row.get(4)?;
    let category_ids: Vec<String> = serde_json::from_str(&raw_categories).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Product {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        name: row.get(2)?,
        price: row.get(3)?,
        category_ids,
        image_url: row.get(5)?,
        created_at: db::get_ts(row, 6)?,
    })
}

pub(crate) fn query_products(conn: &Connection, owner: &OwnerId) -> PosResult<Vec<Product>> {
    let mut stmt = conn.prepare(
        "SELECT id, owner_id, name, price, category_ids, image_url, created_at FROM products
         WHERE owner_id = ?1 ORDER BY name COLLATE NOCASE, rowid",
    )?;
    let rows = stmt
        .query_map(params![owner.as_str()], product_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn list_products(db: &DbState, owner: &OwnerId) -> PosResult<Vec<Product>> {
    let conn = db.lock()?;
    query_products(&conn, owner)
}

/// Every referenced category must belong to the owner.
fn check_categories(conn: &Connection, owner: &OwnerId, ids: &[String]) -> PosResult<()> {
    if ids.is_empty() {
        return Ok(());
    }
    let known: HashSet<String> = query_categories(conn, owner)?
        .into_iter()
        .map(|c| c.id)
        .collect();
    match ids.iter().find(|id| !known.contains(*id)) {
        Some(missing) => {
            warn!(category_id = %missing, "Product references unknown category");
            Err(PosError::not_found(format!("category {missing}")))
        }
        None => Ok(()),
    }
}

pub fn create_product(db: &DbState, owner: &OwnerId, input: &ProductInput) -> PosResult<Product> {
    let valid = validation::product(input)?;
    let product = Product {
        id: Uuid::new_v4().to_string(),
        owner_id: owner.as_str().to_string(),
        name: valid.name,
        price: valid.price,
        category_ids: valid.category_ids,
        image_url: valid.image_url,
        created_at: Utc::now(),
    };
    {
        let conn = db.lock()?;
        check_categories(&conn, owner, &product.category_ids)?;
        conn.execute(
            "INSERT INTO products (id, owner_id, name, price, category_ids, image_url, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                product.id,
                product.owner_id,
                product.name,
                product.price,
                serde_json::to_string(&product.category_ids)?,
                product.image_url,
                db::ts_to_sql(&product.created_at),
            ],
        )?;
        publish(db, &conn, owner, &[Collection::Products]);
    }
    info!(owner_id = %owner, product_id = %product.id, name = %product.name, "Product created");
    Ok(product)
}

/// Replace a product's editable fields. Open order lines keep the name and
/// price they were rung up with.
pub fn update_product(
    db: &DbState,
    owner: &OwnerId,
    product_id: &str,
    input: &ProductInput,
) -> PosResult<()> {
    let valid = validation::product(input)?;
    {
        let conn = db.lock()?;
        check_categories(&conn, owner, &valid.category_ids)?;
        let changed = conn.execute(
            "UPDATE products SET name = ?1, price = ?2, category_ids = ?3, image_url = ?4
             WHERE id = ?5 AND owner_id = ?6",
            params![
                valid.name,
                valid.price,
                serde_json::to_string(&valid.category_ids)?,
                valid.image_url,
                product_id,
                owner.as_str(),
            ],
        )?;
        if changed == 0 {
            return Err(PosError::not_found(format!("product {product_id}")));
        }
        publish(db, &conn, owner, &[Collection::Products]);
    }
    info!(owner_id = %owner, product_id, "Product updated");
    Ok(())
}

pub fn delete_product(db: &DbState, owner: &OwnerId, product_id: &str) -> PosResult<()> {
    {
        let conn = db.lock()?;
        let changed = conn.execute(
            "DELETE FROM products WHERE id = ?1 AND owner_id = ?2",
            params![product_id, owner.as_str()],
        )?;
        if changed == 0 {
            return Err(PosError::not_found(format!("product {product_id}")));
        }
        publish(db, &conn, owner, &[Collection::Products]);
    }
    info!(owner_id = %owner, product_id, "Product deleted");
    Ok(())
}

// ---------------------------------------------------------------------------
// Catalog filter
// ---------------------------------------------------------------------------

/// Clicking the selected category clears the filter; any other selects it.
pub fn toggle_category(selected: Option<&str>, clicked: &str) -> Option<String> {
    match selected {
        Some(current) if current == clicked => None,
        _ => Some(clicked.to_string()),
    }
}

/// Products shown for the current filter; `None` shows everything.
pub fn products_in_category<'a>(
    products: &'a [Product],
    selected: Option<&str>,
) -> Vec<&'a Product> {
    products
        .iter()
        .filter(|p| selected.map_or(true, |c| p.in_category(c)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (DbState, OwnerId) {
        (
            DbState::open_in_memory(8).unwrap(),
            OwnerId::new("u1").unwrap(),
        )
    }

    fn input(name: &str, price: &str, categories: &[&str]) -> ProductInput {
        ProductInput {
            name: name.into(),
            price: price.into(),
            category_ids: categories.iter().map(|c| c.to_string()).collect(),
            image_url: None,
        }
    }

    #[test]
    fn test_products_sorted_by_name() {
        let (db, owner) = setup();
        create_product(&db, &owner, &input("taco de discada", "15", &[])).unwrap();
        create_product(&db, &owner, &input("Coca Cola 500ml", "20", &[])).unwrap();
        let names: Vec<String> = list_products(&db, &owner)
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["Coca Cola 500ml", "taco de discada"]);
    }

    #[test]
    fn test_product_validation_blocks_insert() {
        let (db, owner) = setup();
        let err = create_product(&db, &owner, &input("Taco", "quince", &[])).unwrap_err();
        assert!(err.is_validation());
        assert!(list_products(&db, &owner).unwrap().is_empty());
    }

    #[test]
    fn test_product_unknown_category_rejected() {
        let (db, owner) = setup();
        let err = create_product(&db, &owner, &input("Taco", "15", &["nope"])).unwrap_err();
        assert!(matches!(err, PosError::NotFound(_)));
    }

    #[test]
    fn test_update_product() {
        let (db, owner) = setup();
        let drinks = create_category(&db, &owner, "Bebidas").unwrap();
        let p = create_product(&db, &owner, &input("Agua", "10", &[])).unwrap();
        update_product(
            &db,
            &owner,
            &p.id,
            &ProductInput {
                image_url: Some("https://img.example/agua.png".into()),
                ..input("Agua fresca", "18.5", &[drinks.id.as_str()])
            },
        )
        .unwrap();

        let stored = &list_products(&db, &owner).unwrap()[0];
        assert_eq!(stored.name, "Agua fresca");
        assert_eq!(stored.price, 18.5);
        assert_eq!(stored.category_ids, vec![drinks.id.clone()]);
        assert_eq!(stored.image_url.as_deref(), Some("https://img.example/agua.png"));

        assert!(matches!(
            update_product(&db, &owner, "missing", &input("X", "1", &[])),
            Err(PosError::NotFound(_))
        ));
    }

    #[test]
    fn test_delete_category_detaches_products() {
        let (db, owner) = setup();
        let tacos = create_category(&db, &owner, "Tacos").unwrap();
        let drinks = create_category(&db, &owner, "Bebidas").unwrap();
        create_product(&db, &owner, &input("Taco", "15", &[tacos.id.as_str(), drinks.id.as_str()]))
            .unwrap();
        create_product(&db, &owner, &input("Agua", "10", &[drinks.id.as_str()])).unwrap();

        let detached = delete_category(&db, &owner, &tacos.id).unwrap();
        assert_eq!(detached, 1);

        let categories = list_categories(&db, &owner).unwrap();
        assert_eq!(categories.len(), 1);
        assert_eq!(categories[0].name, "Bebidas");
        for product in list_products(&db, &owner).unwrap() {
            assert_eq!(product.category_ids, vec![drinks.id.clone()]);
        }
    }

    #[test]
    fn test_rename_and_delete_product() {
        let (db, owner) = setup();
        let c = create_category(&db, &owner, "Tacos").unwrap();
        rename_category(&db, &owner, &c.id, "Tacos al pastor").unwrap();
        assert_eq!(list_categories(&db, &owner).unwrap()[0].name, "Tacos al pastor");

        let p = create_product(&db, &owner, &input("Taco", "15", &[])).unwrap();
        delete_product(&db, &owner, &p.id).unwrap();
        assert!(matches!(
            delete_product(&db, &owner, &p.id),
            Err(PosError::NotFound(_))
        ));
    }

    #[test]
    fn test_toggle_category() {
        assert_eq!(toggle_category(None, "c1"), Some("c1".to_string()));
        assert_eq!(toggle_category(Some("c1"), "c1"), None);
        assert_eq!(toggle_category(Some("c1"), "c2"), Some("c2".to_string()));
    }

    #[test]
    fn test_products_in_category() {
        let (db, owner) = setup();
        let tacos = create_category(&db, &owner, "Tacos").unwrap();
        create_product(&db, &owner, &input("Taco", "15", &[tacos.id.as_str()])).unwrap();
        create_product(&db, &owner, &input("Agua", "10", &[])).unwrap();
        let products = list_products(&db, &owner).unwrap();

        assert_eq!(products_in_category(&products, None).len(), 2);
        let filtered = products_in_category(&products, Some(&tacos.id));
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].name, "Taco");
    }
}
