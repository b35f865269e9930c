pub mod archive;
pub mod classify;
pub mod fetch;
pub mod pipeline;
pub mod store;
pub mod workspace;

// Re-export domain types for convenience
pub use citesource_core::{Config, PaperId, Reference, Resolution, ResolveFailure, RunLog};

pub use archive::{ExtractionSummary, extract_package};
pub use classify::{ArchiveFormat, PackageKind, classify, describe_bytes, prepare_package};
pub use fetch::{ArchiveSource, FetchError, FetchOutcome, HttpArchiveSource};
pub use pipeline::{PipelineError, ResolveError, ResolveOutcome, Resolver};
pub use store::ArchiveStore;
pub use workspace::Workspace;
