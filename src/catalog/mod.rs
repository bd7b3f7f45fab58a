//! Catalog payload model
//!
//! Turns the catalog API's JSON into something the walker can iterate:
//! - Flattening the category tree into nodes in menu order
//! - Extracting product items from a category page
//! - Canonical product ids
//! - Flat product rows tagged with store and category context

mod product;
mod tree;

pub use product::{
    canonical_id, extract_items, format_captured_at, resume_after, Product, ProductContext,
    ProductRecord,
};
pub use tree::{flatten_tree, leaf_categories, store_tree_path, CatalogNode};

use thiserror::Error;

/// Errors raised by a malformed product item
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("Product item has no id")]
    MissingId,

    #[error("Product id is not a scalar: {0}")]
    NonScalarId(String),

    #[error("Product item is not an object: {0}")]
    NotAnObject(String),
}

/// Returns `value["data"]` when present, otherwise `value` itself
pub(crate) fn unwrap_data(value: &serde_json::Value) -> &serde_json::Value {
    match value.get("data") {
        Some(inner) if inner.is_object() => inner,
        _ => value,
    }
}
