//! Two-pass driver wiring the extractor, store, RPC client, and symbol mapper
//! together. Owns no storage or RPC state of its own beyond what each pass
//! borrows for its duration.

use crate::config::Settings;
use crate::error::IndexResult;
use crate::extractor::Extractor;
use crate::model::RelationKind;
use crate::rpc::LanguageServerClient;
use crate::storage::StoragePort;
use crate::symbol_mapper::SymbolMapper;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Outcome of [`run_pass1`]: how many files were ingested and how many
/// failed to parse (and were skipped, not aborted).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pass1Report {
    pub scanned: usize,
    pub parse_errors: usize,
}

/// Outcome of [`run_pass2`]. `skipped` is true when the language server was
/// unavailable and no resolution was attempted at all.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pass2Report {
    pub resolved: usize,
    pub failed: usize,
    pub external: usize,
    pub skipped: bool,
}

/// Syntactic ingest: parse every file, `upsert_file` its model. A single
/// file's parse failure is logged and counted, never aborts the batch.
///
/// Parsing is CPU-bound and embarrassingly parallel across files; it runs on
/// a rayon pool sized by `indexing.parallel_threads`. Persistence is not:
/// the store is a single connection, so every `upsert_file` call happens
/// back on this thread, in file order, after parsing completes.
pub fn run_pass1<S: StoragePort>(store: &mut S, files: &[PathBuf]) -> IndexResult<Pass1Report> {
    run_pass1_with_threads(store, files, num_cpus::get())
}

/// As [`run_pass1`], with an explicit worker count for the parsing pool.
pub fn run_pass1_with_threads<S: StoragePort>(
    store: &mut S,
    files: &[PathBuf],
    parallel_threads: usize,
) -> IndexResult<Pass1Report> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(parallel_threads.max(1))
        .build()
        .map_err(|e| crate::error::IndexError::ConfigError { reason: e.to_string() })?;

    let parsed: Vec<(PathBuf, IndexResult<crate::model::FileModel>)> = pool.install(|| {
        use rayon::prelude::*;
        files
            .par_iter()
            .map(|path| {
                let mut extractor = Extractor::new()?;
                Ok((path.clone(), extractor.scan_file(path)))
            })
            .collect::<IndexResult<Vec<_>>>()
    })?;

    let mut report = Pass1Report::default();
    for (path, result) in parsed {
        match result {
            Ok(model) => {
                let path_str = path.to_string_lossy();
                store.upsert_file(&path_str, &model)?;
                report.scanned += 1;
                tracing::info!(file = %path_str, "ingested");
            }
            Err(e) => {
                report.parse_errors += 1;
                tracing::warn!(file = %path.display(), error = %e, "parse failed, skipping file");
            }
        }
    }

    Ok(report)
}

/// Semantic resolution: spawn the language server, open every file, and
/// resolve each call site to a verified relation and, when available, a
/// type hint. Returns `skipped = true` without touching the store if the
/// language server is unavailable.
pub fn run_pass2<S: StoragePort>(
    store: &mut S,
    files: &[PathBuf],
    settings: &Settings,
    workspace_root: &Path,
) -> IndexResult<Pass2Report> {
    let mut client = LanguageServerClient::new(
        settings.language_server.command.clone(),
        settings.language_server.args.clone(),
        Duration::from_secs(settings.language_server.probe_timeout_secs),
        workspace_root.to_string_lossy(),
    );

    if !client.start()? {
        tracing::info!("language server unavailable, Pass 2 skipped");
        return Ok(Pass2Report {
            skipped: true,
            ..Default::default()
        });
    }

    let mut extractor = Extractor::new()?;
    let mut report = Pass2Report::default();
    // One mapper for the whole pass: its (path,line) and per-file span
    // caches persist across files, not just within one, so a call site in
    // b.py that lands back on an entity already resolved while walking a.py
    // is a cache hit instead of another `get_file` round trip.
    let mut mapper = SymbolMapper::new();

    for path in files {
        let Ok(source) = std::fs::read_to_string(path) else {
            continue;
        };
        let file_uri = format!("file://{}", path.display());
        client.did_open(&file_uri, &source)?;

        let Ok(call_sites) = extractor.extract_call_sites(path) else {
            continue;
        };

        for site in &call_sites {
            let path_str = path.to_string_lossy().to_string();

            let Some(from_id) = mapper.find_enclosing_entity(store, &path_str, site.line)? else {
                continue; // module-level call, nothing to anchor the relation on
            };

            let Some(location) = client.definition(&site.file_uri, site.line, site.character)? else {
                report.failed += 1;
                continue;
            };

            let Some(to_id) = mapper.find_by_location(store, &location)? else {
                report.external += 1;
                continue;
            };

            store.save_verified_relation(from_id, to_id, RelationKind::Calls)?;
            report.resolved += 1;

            if let Some(signature) = client.hover(&location.uri, location.line, location.character)? {
                store.save_type_hint(to_id, &signature)?;
            }
        }
    }

    client.shutdown();
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStore;
    use std::io::Write;

    #[test]
    fn pass1_ingests_files_and_counts_parse_errors() {
        let mut good = tempfile::NamedTempFile::with_suffix(".py").unwrap();
        write!(good, "class Calculator:\n    def add(self, a, b):\n        return a + b\n").unwrap();

        let mut store = SqliteStore::open_in_memory().unwrap();
        let files = vec![good.path().to_path_buf()];
        let report = run_pass1(&mut store, &files).unwrap();

        assert_eq!(report.scanned, 1);
        assert_eq!(report.parse_errors, 0);

        let model = store.get_file(&good.path().to_string_lossy()).unwrap().unwrap();
        assert_eq!(model.entities[0].name, "Calculator");
    }

    #[test]
    fn pass2_is_skipped_when_language_server_unavailable() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let mut settings = Settings::default();
        settings.language_server.command = "definitely-not-a-real-lsp-binary-xyz".to_string();

        let report = run_pass2(&mut store, &[], &settings, Path::new("/tmp")).unwrap();
        assert!(report.skipped);
        assert_eq!(report.resolved, 0);
    }
}
