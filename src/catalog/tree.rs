use crate::catalog::unwrap_data;
use serde_json::Value;

/// A category in the store menu
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogNode {
    pub name: String,
    pub link: String,
    /// Empty for top-level categories
    pub parent_name: String,
}

impl CatalogNode {
    /// Only children carry products
    pub fn is_leaf(&self) -> bool {
        !self.parent_name.is_empty()
    }

    /// Request path for the category page (`#/` fragments removed)
    pub fn request_path(&self) -> String {
        self.link.replace("#/", "")
    }
}

/// Flattens a category tree response into nodes, in menu order
///
/// For every menu section with `items`, each item is followed by its `branch`
/// children. Both `{data: {menu}}` and a bare `{menu}` are accepted; anything
/// else yields no nodes.
pub fn flatten_tree(tree: &Value) -> Vec<CatalogNode> {
    let Some(menu) = unwrap_data(tree).get("menu").and_then(Value::as_array) else {
        tracing::warn!("Category tree has no menu");
        return Vec::new();
    };

    let mut nodes = Vec::new();
    for section in menu {
        let Some(items) = section.get("items").and_then(Value::as_array) else {
            continue;
        };
        for item in items {
            let Some(parent) = node_from(item, "") else {
                tracing::debug!("Skipping menu item without name or link");
                continue;
            };
            let children = item
                .get("branch")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default();
            let parent_name = parent.name.clone();
            nodes.push(parent);
            nodes.extend(children.iter().filter_map(|c| node_from(c, &parent_name)));
        }
    }
    nodes
}

/// Leaf categories of a tree, in menu order
pub fn leaf_categories(tree: &Value) -> Vec<CatalogNode> {
    flatten_tree(tree)
        .into_iter()
        .filter(CatalogNode::is_leaf)
        .collect()
}

/// Path of a store's category tree
///
/// Deep links such as `everli://app/stores/12` lose their scheme and host.
pub fn store_tree_path(store_link: &str) -> String {
    let path = match store_link.split_once("://") {
        Some((_, rest)) => rest.split_once('/').map(|(_, p)| p).unwrap_or(""),
        None => store_link,
    };
    format!("{}/categories/tree", path.trim_matches('/'))
}

fn node_from(value: &Value, parent_name: &str) -> Option<CatalogNode> {
    let name = value.get("name")?.as_str()?;
    let link = value.get("link")?.as_str()?;
    Some(CatalogNode {
        name: name.to_string(),
        link: link.to_string(),
        parent_name: parent_name.to_string(),
    })
}
