pub mod config;
pub mod error;
pub mod extractor;
pub mod logging;
pub mod model;
pub mod normalizer;
pub mod orchestrator;
pub mod rpc;
pub mod storage;
pub mod symbol_mapper;

pub use config::Settings;
pub use error::{ErrorContext, IndexError, IndexResult, RpcError, StoreError, StoreResult};
pub use extractor::Extractor;
pub use model::{
    CallSite, Entity, EntityId, EntityKind, EntityTree, FileModel, FileRecord, Location, Metadata,
    MethodKind, Relation, RelationKind, Role, Visibility,
};
pub use orchestrator::{run_pass1, run_pass1_with_threads, run_pass2, Pass1Report, Pass2Report};
pub use rpc::LanguageServerClient;
pub use storage::{RepairReport, SqliteStore, StoragePort};
pub use symbol_mapper::SymbolMapper;
