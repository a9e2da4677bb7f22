//! Python syntactic extractor: walks a `tree-sitter-python` concrete syntax
//! tree and produces normalized CMM entities and candidate relations.
//!
//! Pure with respect to the store: `scan_file` and `extract_call_sites` have
//! no side effects. Grounded in the distilled source's `parser.py`: the
//! decorator pre-pass, the entity/hierarchy construction, the call-site
//! query, and the fixed built-in stop list.

use crate::error::{IndexError, IndexResult};
use crate::model::{CallSite, Entity, EntityId, EntityKind, FileModel, Metadata, MethodKind, Relation, RelationKind};
use crate::normalizer;
use std::collections::HashSet;
use std::path::Path;
use tree_sitter::{Language, Node, Parser};

/// Recursion guard for the entity/hierarchy walk, independent of the
/// storage layer's insert-depth cutoff.
pub const MAX_WALK_DEPTH: u32 = 500;

/// Python built-ins and conventional receiver identifiers excluded from call
/// dependencies.
const BUILTIN_STOP_LIST: &[&str] = &[
    "self", "cls", "print", "len", "str", "int", "float", "bool", "list", "dict", "set", "tuple",
    "range", "enumerate", "zip", "map", "filter", "sorted", "sum", "min", "max", "abs", "all",
    "any", "isinstance", "issubclass", "hasattr", "getattr", "setattr", "open", "type", "id",
    "hash", "repr", "format", "input", "next", "iter",
];

fn is_builtin(name: &str) -> bool {
    BUILTIN_STOP_LIST.contains(&name)
}

pub struct Extractor {
    parser: Parser,
}

impl Extractor {
    pub fn new() -> IndexResult<Self> {
        let mut parser = Parser::new();
        let language: Language = tree_sitter_python::LANGUAGE.into();
        parser
            .set_language(&language)
            .map_err(|e| IndexError::ConfigError {
                reason: format!("failed to load Python grammar: {e}"),
            })?;
        Ok(Self { parser })
    }

    /// Parse `path` and produce a `FileModel`. Never aborts on a single
    /// file's failure; the caller decides how to handle the error.
    pub fn scan_file(&mut self, path: impl AsRef<Path>) -> IndexResult<FileModel> {
        let path = path.as_ref();
        let source = std::fs::read(path).map_err(|source| IndexError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        let text = std::str::from_utf8(&source).map_err(|_| IndexError::InvalidUtf8 {
            path: path.to_path_buf(),
        })?;

        let tree = self.parser.parse(text, None).ok_or_else(|| IndexError::ParseError {
            path: path.to_path_buf(),
            language: "python".to_string(),
            reason: "tree-sitter returned no tree".to_string(),
        })?;

        let file_path = path.to_string_lossy().to_string();
        let mut walker = Walker {
            source: text.as_bytes(),
            file_path: &file_path,
        };
        let entities = walker.walk_block(tree.root_node(), false, 0);
        Ok(FileModel::new(entities))
    }

    /// A second, narrower pass yielding every call-target identifier with
    /// zero-based `(line, character)`, suitable for an LSP
    /// `textDocument/definition` request. Not run during `scan_file`.
    pub fn extract_call_sites(&mut self, path: impl AsRef<Path>) -> IndexResult<Vec<CallSite>> {
        let path = path.as_ref();
        let source = std::fs::read(path).map_err(|source| IndexError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        let text = std::str::from_utf8(&source).map_err(|_| IndexError::InvalidUtf8 {
            path: path.to_path_buf(),
        })?;
        let tree = self.parser.parse(text, None).ok_or_else(|| IndexError::ParseError {
            path: path.to_path_buf(),
            language: "python".to_string(),
            reason: "tree-sitter returned no tree".to_string(),
        })?;

        let file_uri = format!("file://{}", path.display());
        let mut sites = Vec::new();
        collect_call_sites(tree.root_node(), text.as_bytes(), &file_uri, &mut sites, 0);
        Ok(sites)
    }
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new().expect("tree-sitter-python grammar must load")
    }
}

struct Walker<'a> {
    source: &'a [u8],
    file_path: &'a str,
}

impl<'a> Walker<'a> {
    fn text(&self, node: Node) -> &'a str {
        node.utf8_text(self.source).unwrap_or_default()
    }

    /// Walks the statements of a block (module body or class/function body),
    /// returning the entities created directly within it (classes and
    /// functions only; other statements are not entities).
    fn walk_block(&mut self, block: Node, inside_class: bool, depth: u32) -> Vec<Entity> {
        if depth > MAX_WALK_DEPTH {
            tracing::warn!(
                line = block.start_position().row,
                "entity walk exceeded max depth, skipping subtree"
            );
            return Vec::new();
        }

        let mut entities = Vec::new();
        let mut cursor = block.walk();
        for child in block.children(&mut cursor) {
            match child.kind() {
                "class_definition" => {
                    entities.push(self.build_class(child, depth));
                }
                "function_definition" => {
                    entities.push(self.build_function(child, &[], inside_class, depth));
                }
                "decorated_definition" => {
                    let (decorators, def_node) = self.split_decorated(child);
                    if let Some(def_node) = def_node {
                        match def_node.kind() {
                            "function_definition" => {
                                entities.push(self.build_function(def_node, &decorators, inside_class, depth));
                            }
                            "class_definition" => {
                                entities.push(self.build_class(def_node, depth));
                            }
                            _ => {}
                        }
                    }
                }
                _ => {}
            }
        }
        entities
    }

    fn split_decorated(&self, node: Node<'a>) -> (Vec<String>, Option<Node<'a>>) {
        let mut decorators = Vec::new();
        let mut def_node = None;
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            match child.kind() {
                "decorator" => {
                    if let Some(name_node) = child.child(1) {
                        decorators.push(self.text(name_node).to_string());
                    }
                }
                "function_definition" | "class_definition" => {
                    def_node = Some(child);
                }
                _ => {}
            }
        }
        (decorators, def_node)
    }

    fn build_class(&mut self, node: Node<'a>, depth: u32) -> Entity {
        let name = node
            .child_by_field_name("name")
            .map(|n| self.text(n).to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let id = EntityId::new();

        let mut relations = Vec::new();
        if let Some(superclasses) = node.child_by_field_name("superclasses") {
            let mut cursor = superclasses.walk();
            for child in superclasses.children(&mut cursor) {
                if matches!(child.kind(), "identifier" | "attribute") {
                    relations.push(Relation::unresolved(id, self.text(child), RelationKind::Inherits));
                }
            }
        }

        let docstring = node
            .child_by_field_name("body")
            .and_then(|body| self.leading_docstring(body))
            .unwrap_or_default();

        let children = node
            .child_by_field_name("body")
            .map(|body| self.walk_block(body, true, depth + 1))
            .unwrap_or_default();

        Entity {
            id,
            name: name.clone(),
            kind: EntityKind::Class,
            visibility: normalizer::detect_visibility(&name),
            parent_id: None,
            line_start: node.start_position().row as u32,
            line_end: node.end_position().row as u32,
            symbol_hash: None,
            metadata: Metadata {
                file_path: self.file_path.to_string(),
                raw_docstring: docstring,
                signature: String::new(),
                role: Some(normalizer::detect_role(&name, EntityKind::Class)),
                method_kind: None,
                type_hint: None,
            },
            children,
            relations,
        }
    }

    fn build_function(&mut self, node: Node<'a>, decorators: &[String], is_method: bool, depth: u32) -> Entity {
        let name = node
            .child_by_field_name("name")
            .map(|n| self.text(n).to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let id = EntityId::new();

        let method_kind = if is_method {
            if decorators.iter().any(|d| d == "staticmethod") {
                Some(MethodKind::Static)
            } else if decorators.iter().any(|d| d == "classmethod") {
                Some(MethodKind::Class)
            } else {
                Some(normalizer::default_method_kind())
            }
        } else {
            None
        };

        let docstring = node
            .child_by_field_name("body")
            .and_then(|body| self.leading_docstring(body))
            .unwrap_or_default();

        let mut relations = Vec::new();
        if let Some(body) = node.child_by_field_name("body") {
            let mut seen = HashSet::new();
            collect_calls(body, self.source, &mut |call_name| {
                if !is_builtin(call_name) && seen.insert(call_name.to_string()) {
                    relations.push(Relation::unresolved(id, call_name, RelationKind::Calls));
                }
            });
        }

        // Nested function/class definitions inside a function body are walked
        // too, so decorated inner helpers still surface as entities, though
        // they are registered at module scope per `parent_id = None` above
        // the caller's `walk_block` (nesting functions-in-functions is not a
        // CMM relation kind; only class -> method nesting is represented).

        Entity {
            id,
            name: name.clone(),
            kind: EntityKind::Function,
            visibility: normalizer::detect_visibility(&name),
            parent_id: None,
            line_start: node.start_position().row as u32,
            line_end: node.end_position().row as u32,
            symbol_hash: None,
            metadata: Metadata {
                file_path: self.file_path.to_string(),
                raw_docstring: docstring,
                signature: String::new(),
                role: Some(normalizer::detect_role(&name, EntityKind::Function)),
                method_kind,
                type_hint: None,
            },
            children: Vec::new(),
            relations,
        }
    }

    fn leading_docstring(&self, body: Node<'a>) -> Option<String> {
        let first = body.child(0)?;
        if first.kind() != "expression_statement" {
            return None;
        }
        let string_node = first.child(0)?;
        if string_node.kind() != "string" {
            return None;
        }
        Some(self.text(string_node).to_string())
    }
}

/// Walks a function body collecting call-target identifiers. Plain calls
/// (`helper()`) yield the called identifier; attribute calls (`obj.method()`)
/// yield both the receiver identifier and the method identifier, matching
/// the distilled source's two-capture call query (the built-in stop list is
/// what keeps `self.helper()` from emitting a spurious `self` relation).
fn collect_calls(node: Node, source: &[u8], on_call: &mut dyn FnMut(&str)) {
    visit_calls(node, source, on_call);
}

fn visit_calls(node: Node, source: &[u8], on_call: &mut dyn FnMut(&str)) {
    if node.kind() == "call" {
        if let Some(function) = node.child_by_field_name("function") {
            match function.kind() {
                "identifier" => {
                    if let Ok(text) = function.utf8_text(source) {
                        on_call(text);
                    }
                }
                "attribute" => {
                    if let Some(object) = function.child_by_field_name("object") {
                        if object.kind() == "identifier" {
                            if let Ok(text) = object.utf8_text(source) {
                                on_call(text);
                            }
                        }
                    }
                    if let Some(attribute) = function.child_by_field_name("attribute") {
                        if let Ok(text) = attribute.utf8_text(source) {
                            on_call(text);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    let mut child_cursor = node.walk();
    for child in node.children(&mut child_cursor) {
        visit_calls(child, source, on_call);
    }
}

fn collect_call_sites(node: Node, source: &[u8], file_uri: &str, sites: &mut Vec<CallSite>, depth: u32) {
    if depth > MAX_WALK_DEPTH {
        return;
    }
    if node.kind() == "call" {
        if let Some(function) = node.child_by_field_name("function") {
            match function.kind() {
                "identifier" => push_call_site(function, source, file_uri, sites),
                "attribute" => {
                    if let Some(object) = function.child_by_field_name("object") {
                        if object.kind() == "identifier" {
                            push_call_site(object, source, file_uri, sites);
                        }
                    }
                    if let Some(attribute) = function.child_by_field_name("attribute") {
                        push_call_site(attribute, source, file_uri, sites);
                    }
                }
                _ => {}
            }
        }
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_call_sites(child, source, file_uri, sites, depth + 1);
    }
}

fn push_call_site(node: Node, source: &[u8], file_uri: &str, sites: &mut Vec<CallSite>) {
    let Ok(name) = node.utf8_text(source) else {
        return;
    };
    if is_builtin(name) {
        return;
    }
    let pos = node.start_position();
    sites.push(CallSite {
        name: name.to_string(),
        line: pos.row as u32,
        character: pos.column as u32,
        file_uri: file_uri.to_string(),
    });
}
