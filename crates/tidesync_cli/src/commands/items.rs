//! Items command implementation.

use serde::Serialize;
use std::path::Path;
use tidesync_storage::{MemoryStore, PagingItem, PagingStore};

/// Cached items of one collection.
#[derive(Debug, Serialize)]
pub struct ItemsResult {
    /// Collection key.
    pub collection: String,
    /// Latest sync mark of the collection.
    pub latest_sync_mark: Option<u64>,
    /// Items in position order.
    pub items: Vec<PagingItem>,
}

/// Runs the items command.
pub fn run(path: &Path, collection: &str, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = load(path, collection)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }
    Ok(())
}

/// Reads the cached items of a collection without modifying the store.
pub fn load(path: &Path, collection: &str) -> Result<ItemsResult, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No store found at {:?}", path).into());
    }
    let store = MemoryStore::open(path)?;
    let Some(collection_id) = store.find_collection(collection)? else {
        return Err(format!("No collection named {:?}", collection).into());
    };
    Ok(ItemsResult {
        collection: collection.to_string(),
        latest_sync_mark: store.latest_sync_mark(collection_id)?,
        items: store.paging_items(collection_id, 0, usize::MAX)?,
    })
}

fn print_text_output(result: &ItemsResult) {
    println!("Collection: {}", result.collection);
    match result.latest_sync_mark {
        Some(mark) => println!("Latest sync mark: {}", mark),
        None => println!("Latest sync mark: none"),
    }
    println!();
    for item in &result.items {
        println!("  {:>6}  {}  @{}", item.position, item.item_id, item.last_in_sync);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_cached_items() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.tsyn");
        let store = MemoryStore::new();
        let inbox = store.collection_id("inbox").unwrap();
        let mark = store
            .write_page(inbox, 0, &["a".to_string(), "b".to_string()], false)
            .unwrap();
        store.save_to(&path).unwrap();

        let result = load(&path, "inbox").unwrap();
        assert_eq!(result.latest_sync_mark, Some(mark));
        let ids: Vec<_> = result.items.iter().map(|i| i.item_id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
    }

    #[test]
    fn unknown_collection_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.tsyn");
        MemoryStore::new().save_to(&path).unwrap();

        assert!(load(&path, "missing").is_err());
        let store = MemoryStore::open(&path).unwrap();
        assert_eq!(store.find_collection("missing").unwrap(), None);
    }
}
