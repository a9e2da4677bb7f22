//! Schema DDL and the version-stamped migration catalogue.
//!
//! Grounded in the distilled source's `migration_v0.4.sql` script reference
//! and `scripts/fix_db_state.py` repair routine.

/// Full schema as created for a brand-new database (current version).
pub const SCHEMA_V0_4: &str = "
CREATE TABLE IF NOT EXISTS files (
    file_path      TEXT PRIMARY KEY,
    file_hash      TEXT NOT NULL,
    schema_version TEXT NOT NULL,
    created_at     TEXT NOT NULL,
    updated_at     TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS entities (
    id          TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    kind        TEXT NOT NULL,
    visibility  TEXT NOT NULL,
    parent_id   TEXT REFERENCES entities(id) ON DELETE CASCADE,
    line_start  INTEGER NOT NULL DEFAULT 0,
    line_end    INTEGER NOT NULL DEFAULT 0,
    symbol_hash TEXT
);

CREATE INDEX IF NOT EXISTS idx_entities_parent ON entities(parent_id);

CREATE TABLE IF NOT EXISTS metadata (
    entity_id      TEXT PRIMARY KEY REFERENCES entities(id) ON DELETE CASCADE,
    file_path      TEXT NOT NULL,
    raw_docstring  TEXT NOT NULL DEFAULT '',
    signature      TEXT NOT NULL DEFAULT '',
    role           TEXT,
    method_kind    TEXT,
    type_hint      TEXT,
    created_at     TEXT NOT NULL,
    updated_at     TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_metadata_file_path ON metadata(file_path);

CREATE TABLE IF NOT EXISTS relations (
    from_id     TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
    to_id       TEXT REFERENCES entities(id),
    to_name     TEXT NOT NULL,
    rel_type    TEXT NOT NULL,
    is_verified INTEGER NOT NULL DEFAULT 0,
    UNIQUE(from_id, to_name, rel_type)
);
";

/// Baseline pre-migration schema, as produced by a v0.2-era run. A test in
/// `storage::tests` stands up a store on this schema and runs it through
/// [`MIGRATION_V0_2_TO_V0_3`] to confirm the additive columns actually land.
pub const SCHEMA_V0_2: &str = "
CREATE TABLE IF NOT EXISTS files (
    file_path      TEXT PRIMARY KEY,
    file_hash      TEXT NOT NULL,
    schema_version TEXT NOT NULL,
    created_at     TEXT NOT NULL,
    updated_at     TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS entities (
    id          TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    kind        TEXT NOT NULL,
    visibility  TEXT NOT NULL,
    parent_id   TEXT REFERENCES entities(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS metadata (
    entity_id      TEXT PRIMARY KEY REFERENCES entities(id) ON DELETE CASCADE,
    file_path      TEXT NOT NULL,
    raw_docstring  TEXT NOT NULL DEFAULT '',
    signature      TEXT NOT NULL DEFAULT '',
    role           TEXT,
    method_kind    TEXT,
    created_at     TEXT NOT NULL,
    updated_at     TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS relations (
    from_id  TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
    to_name  TEXT NOT NULL,
    rel_type TEXT NOT NULL
);
";

/// `v0.2 -> v0.3`: additive DDL. Adds verified-relation columns, the
/// uniqueness index, and backfills span columns.
pub const MIGRATION_V0_2_TO_V0_3: &str = "
ALTER TABLE relations ADD COLUMN to_id TEXT REFERENCES entities(id);
ALTER TABLE relations ADD COLUMN is_verified INTEGER NOT NULL DEFAULT 0;
CREATE UNIQUE INDEX IF NOT EXISTS idx_relations_unique ON relations(from_id, to_name, rel_type);
ALTER TABLE entities ADD COLUMN line_start INTEGER NOT NULL DEFAULT 0;
ALTER TABLE entities ADD COLUMN line_end INTEGER NOT NULL DEFAULT 0;
";

/// `(from, to)` pairs accepted by [`super::SqliteStore::migrate`]. `v0.3 ->
/// v0.4` is not listed here: it is a backup + rebuild, handled in code
/// rather than by a DDL script.
pub const ADDITIVE_MIGRATIONS: &[(&str, &str, &str)] =
    &[("v0.2", "v0.3", MIGRATION_V0_2_TO_V0_3)];

/// Migrations that require a full backup-and-rescan rather than additive DDL.
pub const REBUILD_MIGRATIONS: &[(&str, &str)] = &[("v0.3", "v0.4")];
