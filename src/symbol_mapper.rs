//! Correlates LSP locations back to stored entity identities.
//!
//! Grounded in the distilled source's `symbol_mapper.py`: the
//! smallest-containing-span rule for resolving a line to its enclosing
//! entity, and per-file / per-key caches to minimize database round trips.
//!
//! The mapper owns its caches but not the store: each lookup borrows the
//! store only for the duration of that call, so a single long-lived mapper
//! can sit alongside a store the caller also mutates elsewhere (saving a
//! verified relation, a type hint) without the two borrows overlapping.

use crate::error::StoreResult;
use crate::model::{EntityId, Location};
use crate::storage::StoragePort;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
struct EntitySpan {
    id: EntityId,
    line_start: u32,
    line_end: u32,
}

#[derive(Default)]
pub struct SymbolMapper {
    location_cache: HashMap<(String, u32), EntityId>,
    symbol_hash_cache: HashMap<String, String>,
    file_entity_cache: HashMap<String, Vec<EntitySpan>>,
}

impl SymbolMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Among all entities in `file_path` whose `[line_start, line_end]`
    /// contains `line`, returns the one with the smallest span (the
    /// innermost containing method). `None` when `line` lies outside any
    /// entity (module-level code).
    pub fn find_enclosing_entity<S: StoragePort>(
        &mut self,
        store: &S,
        file_path: &str,
        line: u32,
    ) -> StoreResult<Option<EntityId>> {
        if !self.file_entity_cache.contains_key(file_path) {
            let spans = Self::load_file_spans(store, file_path)?;
            self.file_entity_cache.insert(file_path.to_string(), spans);
        }
        let spans = &self.file_entity_cache[file_path];

        let mut best: Option<EntitySpan> = None;
        for span in spans {
            if span.line_start <= line && line <= span.line_end {
                let width = span.line_end - span.line_start;
                let better = match best {
                    None => true,
                    Some(current) => width < current.line_end - current.line_start,
                };
                if better {
                    best = Some(*span);
                }
            }
        }
        Ok(best.map(|s| s.id))
    }

    /// Converts a `file://` URI to a path (prefix-stripped verbatim, no
    /// percent-decoding) and resolves the same way as
    /// [`Self::find_enclosing_entity`], caching `(path, line) -> id`.
    pub fn find_by_location<S: StoragePort>(
        &mut self,
        store: &S,
        location: &Location,
    ) -> StoreResult<Option<EntityId>> {
        let path = location.path().to_string();
        let cache_key = (path.clone(), location.line);
        if let Some(id) = self.location_cache.get(&cache_key) {
            return Ok(Some(*id));
        }

        let found = self.find_enclosing_entity(store, &path, location.line)?;
        if let Some(id) = found {
            self.location_cache.insert(cache_key, id);
        }
        Ok(found)
    }

    /// Deterministic SHA-256 digest over `file_uri + "#" + qualified_name`,
    /// cached by that same key.
    pub fn generate_symbol_hash(&mut self, file_uri: &str, qualified_name: &str) -> String {
        let key = format!("{file_uri}#{qualified_name}");
        if let Some(hash) = self.symbol_hash_cache.get(&key) {
            return hash.clone();
        }
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        let hash = format!("{:x}", hasher.finalize());
        self.symbol_hash_cache.insert(key, hash.clone());
        hash
    }

    pub fn cache_location(&mut self, location: &Location, entity_id: EntityId) {
        let cache_key = (location.path().to_string(), location.line);
        self.location_cache.insert(cache_key, entity_id);
    }

    /// Clears the per-file entity cache, e.g. after a re-scan invalidates spans.
    pub fn clear_file_cache(&mut self, file_path: &str) {
        self.file_entity_cache.remove(file_path);
    }

    pub fn clear_all_caches(&mut self) {
        self.location_cache.clear();
        self.symbol_hash_cache.clear();
        self.file_entity_cache.clear();
    }

    fn load_file_spans<S: StoragePort>(store: &S, file_path: &str) -> StoreResult<Vec<EntitySpan>> {
        let Some(model) = store.get_file(file_path)? else {
            return Ok(Vec::new());
        };
        let mut spans = Vec::new();
        fn collect(entity: &crate::model::Entity, out: &mut Vec<EntitySpan>) {
            out.push(EntitySpan {
                id: entity.id,
                line_start: entity.line_start,
                line_end: entity.line_end,
            });
            for child in &entity.children {
                collect(child, out);
            }
        }
        for entity in &model.entities {
            collect(entity, &mut spans);
        }
        Ok(spans)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Entity, EntityKind, FileModel, Metadata, Visibility};
    use crate::storage::SqliteStore;

    fn store_with_nested_entities() -> (SqliteStore, EntityId, EntityId, String) {
        let class_id = EntityId::new();
        let method_id = EntityId::new();
        let method = Entity {
            id: method_id,
            name: "add".to_string(),
            kind: EntityKind::Function,
            visibility: Visibility::Public,
            parent_id: Some(class_id),
            line_start: 2,
            line_end: 3,
            symbol_hash: None,
            metadata: Metadata::default(),
            children: Vec::new(),
            relations: Vec::new(),
        };
        let class = Entity {
            id: class_id,
            name: "Calculator".to_string(),
            kind: EntityKind::Class,
            visibility: Visibility::Public,
            parent_id: None,
            line_start: 1,
            line_end: 3,
            symbol_hash: None,
            metadata: Metadata::default(),
            children: vec![method],
            relations: Vec::new(),
        };

        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.path().to_str().unwrap().to_string();
        std::fs::write(&path, "class Calculator:\n    def add(self): pass\n").unwrap();
        let mut store = SqliteStore::open_in_memory().unwrap();
        store.upsert_file(&path, &FileModel::new(vec![class])).unwrap();
        // keep the NamedTempFile alive until the caller is done with `path`
        std::mem::forget(file);
        (store, class_id, method_id, path)
    }

    #[test]
    fn find_enclosing_entity_picks_innermost_span() {
        let (store, _class_id, method_id, path) = store_with_nested_entities();
        let mut mapper = SymbolMapper::new();
        let found = mapper.find_enclosing_entity(&store, &path, 2).unwrap();
        assert_eq!(found, Some(method_id));
    }

    #[test]
    fn find_enclosing_entity_outside_any_span_is_none() {
        let (store, _class_id, _method_id, path) = store_with_nested_entities();
        let mut mapper = SymbolMapper::new();
        let found = mapper.find_enclosing_entity(&store, &path, 99).unwrap();
        assert_eq!(found, None);
    }

    #[test]
    fn generate_symbol_hash_is_deterministic_and_cached() {
        let mut mapper = SymbolMapper::new();
        let a = mapper.generate_symbol_hash("file:///a.py", "Calculator.add");
        let b = mapper.generate_symbol_hash("file:///a.py", "Calculator.add");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn find_by_location_strips_uri_prefix_verbatim() {
        let (store, _class_id, method_id, path) = store_with_nested_entities();
        let mut mapper = SymbolMapper::new();
        let location = Location {
            uri: format!("file://{path}"),
            line: 2,
            character: 4,
        };
        let found = mapper.find_by_location(&store, &location).unwrap();
        assert_eq!(found, Some(method_id));
    }

    #[test]
    fn a_single_mapper_reused_across_calls_caches_the_same_location() {
        let (store, _class_id, method_id, path) = store_with_nested_entities();
        let mut mapper = SymbolMapper::new();
        assert_eq!(mapper.find_enclosing_entity(&store, &path, 2).unwrap(), Some(method_id));
        // Second lookup against the same file must not need to reload spans;
        // the cache key is already populated from the first call.
        assert!(mapper.file_entity_cache.contains_key(&path));
        assert_eq!(mapper.find_enclosing_entity(&store, &path, 2).unwrap(), Some(method_id));
    }
}
