//! Canonical Metadata Model: the in-memory entity/relation records produced
//! by the extractor, normalized by the normalizer, and persisted by the store.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Stable opaque identifier for a stored entity, assigned on insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityId(Uuid);

impl EntityId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    pub fn parse(text: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(text).map(Self)
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What kind of declaration an entity represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Module,
    Class,
    Function,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Module => "module",
            Self::Class => "class",
            Self::Function => "function",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "module" => Ok(Self::Module),
            "class" => Ok(Self::Class),
            "function" => Ok(Self::Function),
            other => Err(format!("unknown entity kind '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Public => "public",
            Self::Private => "private",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Visibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Self::Public),
            "private" => Ok(Self::Private),
            other => Err(format!("unknown visibility '{other}'")),
        }
    }
}

/// The abstract function of a method, derived from naming conventions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Constructor,
    Display,
    Equality,
    Comparison,
    Collection,
    Context,
    Callable,
    Destructor,
    Method,
    Class,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Constructor" => Ok(Self::Constructor),
            "Display" => Ok(Self::Display),
            "Equality" => Ok(Self::Equality),
            "Comparison" => Ok(Self::Comparison),
            "Collection" => Ok(Self::Collection),
            "Context" => Ok(Self::Context),
            "Callable" => Ok(Self::Callable),
            "Destructor" => Ok(Self::Destructor),
            "Method" => Ok(Self::Method),
            "Class" => Ok(Self::Class),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MethodKind {
    Instance,
    Class,
    Static,
}

impl fmt::Display for MethodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Instance => "instance",
            Self::Class => "class",
            Self::Static => "static",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for MethodKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "instance" => Ok(Self::Instance),
            "class" => Ok(Self::Class),
            "static" => Ok(Self::Static),
            other => Err(format!("unknown method kind '{other}'")),
        }
    }
}

/// Directed edge type between two entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationKind {
    Calls,
    Inherits,
    /// Reserved in the schema and type system but never emitted by the extractor.
    DependsOn,
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Calls => "calls",
            Self::Inherits => "inherits",
            Self::DependsOn => "depends_on",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for RelationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "calls" => Ok(Self::Calls),
            "inherits" => Ok(Self::Inherits),
            "depends_on" => Ok(Self::DependsOn),
            other => Err(format!("unknown relation kind '{other}'")),
        }
    }
}

/// A named declaration in source, with its source span and nesting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub name: String,
    pub kind: EntityKind,
    pub visibility: Visibility,
    pub parent_id: Option<EntityId>,
    pub line_start: u32,
    pub line_end: u32,
    pub symbol_hash: Option<String>,
    pub metadata: Metadata,
    pub children: Vec<Entity>,
    pub relations: Vec<Relation>,
}

impl Entity {
    pub fn contains_line(&self, line: u32) -> bool {
        self.line_start <= line && line <= self.line_end
    }

    pub fn span(&self) -> u32 {
        self.line_end.saturating_sub(self.line_start)
    }
}

/// Per-entity descriptive data, stored 1:1 with its entity row.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    pub file_path: String,
    pub raw_docstring: String,
    pub signature: String,
    pub role: Option<Role>,
    pub method_kind: Option<MethodKind>,
    pub type_hint: Option<String>,
}

/// A directed edge from a known entity to a name, optionally resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    pub from_id: EntityId,
    pub to_id: Option<EntityId>,
    pub to_name: String,
    pub rel_type: RelationKind,
    pub is_verified: bool,
}

impl Relation {
    pub fn unresolved(from_id: EntityId, to_name: impl Into<String>, rel_type: RelationKind) -> Self {
        Self {
            from_id,
            to_id: None,
            to_name: to_name.into(),
            rel_type,
            is_verified: false,
        }
    }
}

/// A row in the `files` table: tracks a scanned file's content hash and schema version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub file_path: String,
    pub file_hash: String,
    pub schema_version: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Current schema version emitted by the extractor.
pub const CURRENT_SCHEMA_VERSION: &str = "v0.4";

/// The extractor's full output for one file: a forest of root entities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileModel {
    pub schema_version: String,
    pub entities: Vec<Entity>,
}

impl FileModel {
    pub fn new(entities: Vec<Entity>) -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION.to_string(),
            entities,
        }
    }
}

/// A module-rooted tree returned by the store's hierarchical read view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityTree {
    pub id: EntityId,
    pub name: String,
    pub kind: EntityKind,
    pub visibility: Visibility,
    pub docstring: String,
    pub type_hint: Option<String>,
    pub file_path: String,
    pub children: Vec<EntityTree>,
    pub relations: Vec<Relation>,
}

/// A syntactic occurrence of a call target, precise enough for an LSP
/// `textDocument/definition` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallSite {
    pub name: String,
    pub line: u32,
    pub character: u32,
    pub file_uri: String,
}

impl CallSite {
    pub fn file_path(&self) -> &str {
        self.file_uri.strip_prefix("file://").unwrap_or(&self.file_uri)
    }
}

/// An LSP `Location`: a file URI plus a zero-based position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub uri: String,
    pub line: u32,
    pub character: u32,
}

impl Location {
    pub fn path(&self) -> &str {
        self.uri.strip_prefix("file://").unwrap_or(&self.uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_id_roundtrips_through_text() {
        let id = EntityId::new();
        let parsed = EntityId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn entity_kind_roundtrips_through_str() {
        for kind in [EntityKind::Module, EntityKind::Class, EntityKind::Function] {
            let parsed: EntityKind = kind.to_string().parse().unwrap();
            assert_eq!(kind, parsed);
        }
    }

    #[test]
    fn visibility_roundtrips_through_str() {
        assert_eq!("public".parse::<Visibility>().unwrap(), Visibility::Public);
        assert_eq!("private".parse::<Visibility>().unwrap(), Visibility::Private);
        assert!("nonsense".parse::<Visibility>().is_err());
    }

    #[test]
    fn entity_contains_line_is_inclusive_at_both_ends() {
        let entity = Entity {
            id: EntityId::new(),
            name: "f".into(),
            kind: EntityKind::Function,
            visibility: Visibility::Public,
            parent_id: None,
            line_start: 10,
            line_end: 20,
            symbol_hash: None,
            metadata: Metadata::default(),
            children: vec![],
            relations: vec![],
        };
        assert!(entity.contains_line(10));
        assert!(entity.contains_line(20));
        assert!(!entity.contains_line(9));
        assert!(!entity.contains_line(21));
    }

    #[test]
    fn call_site_strips_file_uri_prefix_verbatim() {
        let site = CallSite {
            name: "foo".into(),
            line: 1,
            character: 2,
            file_uri: "file:///home/user/a.py".into(),
        };
        assert_eq!(site.file_path(), "/home/user/a.py");
    }
}
