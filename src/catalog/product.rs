use crate::catalog::{unwrap_data, CatalogError, CatalogNode};
use crate::config::{ScalarId, StoreEntry};
use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde_json::{Map, Value};

/// A product document as returned by the API, keys in payload order
pub type Product = Map<String, Value>;

/// Collects product items from a category page
///
/// Only body sections whose `widget_type` is listed in `widgets` and that carry a
/// `list` array contribute.
pub fn extract_items(page: &Value, widgets: &[String]) -> Vec<Value> {
    let Some(body) = unwrap_data(page).get("body").and_then(Value::as_array) else {
        return Vec::new();
    };

    body.iter()
        .filter(|section| {
            section
                .get("widget_type")
                .and_then(Value::as_str)
                .map(|kind| widgets.iter().any(|w| w == kind))
                .unwrap_or(false)
        })
        .filter_map(|section| section.get("list").and_then(Value::as_array))
        .flatten()
        .cloned()
        .collect()
}

/// Canonical string form of an item's `id`
///
/// Strings are kept as is, numbers use their decimal text, booleans their JSON
/// text. Missing, null and non-scalar ids are malformed.
pub fn canonical_id(item: &Value) -> Result<String, CatalogError> {
    match item.get("id") {
        None | Some(Value::Null) => Err(CatalogError::MissingId),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(Value::Bool(b)) => Ok(b.to_string()),
        Some(other) => Err(CatalogError::NonScalarId(other.to_string())),
    }
}

/// Items strictly after the resume marker
///
/// Without a marker every item is returned. A marker that never matches
/// returns nothing.
pub fn resume_after<'a>(items: &'a [Value], marker: Option<&str>) -> &'a [Value] {
    let Some(marker) = marker else {
        return items;
    };
    match items
        .iter()
        .position(|item| canonical_id(item).map(|id| id == marker).unwrap_or(false))
    {
        Some(pos) => &items[pos + 1..],
        None => {
            tracing::warn!(
                "Resume marker {} not found in {} items, emitting nothing",
                marker,
                items.len()
            );
            &[]
        }
    }
}

/// Emission timestamp in the configured offset
pub fn format_captured_at(now: DateTime<Utc>, utc_offset_hours: i32) -> String {
    let offset = FixedOffset::east_opt(utc_offset_hours * 3600).unwrap_or_else(|| Utc.fix());
    now.with_timezone(&offset)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

/// Store and category fields stamped on every row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductContext {
    fields: Vec<(&'static str, String)>,
}

impl ProductContext {
    pub fn new(store: &StoreEntry, leaf: &CatalogNode, source_file_id: Option<&ScalarId>) -> Self {
        let text = |id: Option<&ScalarId>| id.map(ToString::to_string).unwrap_or_default();
        Self {
            fields: vec![
                ("cat_name_org", leaf.parent_name.clone()),
                ("sub_cat_name_org", leaf.name.clone()),
                ("store_name", store.name.clone()),
                ("store_id", store.id.to_string()),
                ("source_file_id", text(source_file_id)),
                ("url_id", text(store.url_id.as_ref())),
                ("currency_id", text(store.currency_id.as_ref())),
                ("area_id", text(store.area_id.as_ref())),
                ("country_id", text(store.country_id.as_ref())),
                ("src_id", text(store.src_id.as_ref())),
            ],
        }
    }

    pub fn fields(&self) -> &[(&'static str, String)] {
        &self.fields
    }
}

/// One flat dataset row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductRecord {
    pub id: String,
    /// Column name and cell text, in column order
    pub fields: Vec<(String, String)>,
}

impl ProductRecord {
    /// Flattens an item and appends context and timestamp columns
    ///
    /// Nested objects become `parent.child` columns; arrays are kept as JSON text.
    /// Context columns replace product fields of the same name.
    pub fn from_item(
        item: &Value,
        context: &ProductContext,
        captured_at: &str,
    ) -> Result<Self, CatalogError> {
        let Value::Object(product) = item else {
            return Err(CatalogError::NotAnObject(item.to_string()));
        };
        let id = canonical_id(item)?;

        let mut fields = Vec::with_capacity(product.len() + context.fields().len() + 1);
        flatten_into(None, product, &mut fields);

        let mut record = Self { id, fields };
        for (name, value) in context.fields() {
            record.set(name, value.clone());
        }
        record.set("captured_at", captured_at.to_string());
        Ok(record)
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value.as_str())
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    fn set(&mut self, column: &str, value: String) {
        match self.fields.iter_mut().find(|(name, _)| name == column) {
            Some((_, existing)) => *existing = value,
            None => self.fields.push((column.to_string(), value)),
        }
    }
}

fn flatten_into(prefix: Option<&str>, object: &Product, out: &mut Vec<(String, String)>) {
    for (key, value) in object {
        let column = match prefix {
            Some(prefix) => format!("{}.{}", prefix, key),
            None => key.clone(),
        };
        match value {
            Value::Object(inner) => flatten_into(Some(&column), inner, out),
            Value::Null => out.push((column, String::new())),
            Value::String(s) => out.push((column, s.clone())),
            other => out.push((column, other.to_string())),
        }
    }
}
