use clap::{Parser, Subcommand};
use cmm_indexer::{run_pass1_with_threads, run_pass2, Settings, SqliteStore, StoragePort};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "cmm-index")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Code-intelligence indexer: extracts a cross-referenced declaration graph")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default `.cmm-index/settings.toml`.
    Init {
        /// Overwrite an existing configuration file.
        #[arg(short, long)]
        force: bool,
    },

    /// Scan a file or directory, running Pass 1 (and optionally Pass 2).
    Scan {
        /// File or directory to scan.
        path: PathBuf,

        /// Also run Pass 2 semantic resolution against the configured language server.
        #[arg(long)]
        with_lsp: bool,
    },

    /// Print the stored model for a single file as an indented tree.
    Show {
        /// File path as it was recorded during a scan.
        file: PathBuf,
    },

    /// Apply a catalogued schema migration.
    Migrate {
        from: String,
        to: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = Settings::load().unwrap_or_else(|e| {
        eprintln!("Configuration error: {e}, using defaults");
        Settings::default()
    });
    cmm_indexer::logging::init_with_config(&settings.logging);

    match run(cli, &settings) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            for suggestion in e.recovery_suggestions() {
                eprintln!("  hint: {suggestion}");
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli, settings: &Settings) -> cmm_indexer::IndexResult<()> {
    match cli.command {
        Commands::Init { force } => {
            let path = Settings::init_config_file(force)
                .map_err(|e| cmm_indexer::IndexError::ConfigError { reason: e.to_string() })?;
            println!("Wrote configuration to {}", path.display());
            Ok(())
        }

        Commands::Scan { path, with_lsp } => {
            let files = collect_files(&path, settings)?;
            println!("Scanning {} file(s) under {}", files.len(), path.display());

            let mut store = SqliteStore::open(&settings.database.path)?;

            let pass1 = run_pass1_with_threads(&mut store, &files, settings.indexing.parallel_threads)?;
            println!(
                "Pass 1: {} file(s) ingested, {} parse error(s)",
                pass1.scanned, pass1.parse_errors
            );

            if with_lsp {
                let workspace_root = path.canonicalize().unwrap_or(path.clone());
                let pass2 = run_pass2(&mut store, &files, settings, &workspace_root)?;
                if pass2.skipped {
                    println!("Pass 2: skipped (language server unavailable)");
                } else {
                    println!(
                        "Pass 2: {} resolved, {} failed, {} external",
                        pass2.resolved, pass2.failed, pass2.external
                    );
                }
            }
            Ok(())
        }

        Commands::Show { file } => {
            let store = SqliteStore::open(&settings.database.path)?;
            let file_str = file.to_string_lossy().to_string();
            match store.get_file(&file_str)? {
                Some(model) => {
                    for entity in &model.entities {
                        print_entity(entity, 0);
                    }
                    Ok(())
                }
                None => {
                    println!("No stored model for {}", file.display());
                    Ok(())
                }
            }
        }

        Commands::Migrate { from, to } => {
            let mut store = SqliteStore::open(&settings.database.path)?;
            let db_path = settings.database.path.clone();
            let scan_path = std::env::current_dir().unwrap_or_default();
            let scan_settings = settings.clone();
            store.migrate(&from, &to, &db_path, |store| {
                let files = collect_files(&scan_path, &scan_settings)
                    .map_err(|e| cmm_indexer::StoreError::Integrity { reason: e.to_string() })?;
                let report = run_pass1_with_threads(store, &files, scan_settings.indexing.parallel_threads)
                    .map_err(|e| cmm_indexer::StoreError::Integrity { reason: e.to_string() })?;
                tracing::info!(scanned = report.scanned, "rescan during migration complete");
                Ok(())
            })?;
            println!("Migrated {from} -> {to}");
            Ok(())
        }
    }
}

/// Walks `root` using `.gitignore`-aware rules plus the configured ignore
/// patterns, returning every `.py` file found. A single file path is
/// returned as-is.
fn collect_files(root: &std::path::Path, settings: &Settings) -> cmm_indexer::IndexResult<Vec<PathBuf>> {
    if root.is_file() {
        return Ok(vec![root.to_path_buf()]);
    }

    let mut overrides = ignore::overrides::OverrideBuilder::new(root);
    for pattern in &settings.indexing.ignore_patterns {
        let _ = overrides.add(&format!("!{pattern}"));
    }
    let overrides = overrides
        .build()
        .map_err(|e| cmm_indexer::IndexError::ConfigError { reason: e.to_string() })?;

    let mut files = Vec::new();
    for entry in ignore::WalkBuilder::new(root).overrides(overrides).build() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "walk error, skipping entry");
                continue;
            }
        };
        if entry.file_type().is_some_and(|t| t.is_file())
            && entry.path().extension().is_some_and(|ext| ext == "py")
        {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn print_entity(entity: &cmm_indexer::Entity, depth: usize) {
    let indent = "  ".repeat(depth);
    println!(
        "{indent}{} {} [{}..{}] ({})",
        entity.kind, entity.name, entity.line_start, entity.line_end, entity.visibility
    );
    for relation in &entity.relations {
        let verified = if relation.is_verified { "verified" } else { "unverified" };
        println!("{indent}  -> {} {} ({verified})", relation.rel_type, relation.to_name);
    }
    for child in &entity.children {
        print_entity(child, depth + 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }
}
