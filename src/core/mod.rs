pub mod engine;
pub mod fetcher;
pub mod integrity;
pub mod ledger;
pub mod manifest;
pub mod publisher;
pub mod retriever;

pub use engine::{ItemOutcome, ItemState, JobReport, JobStatus, SyncEngine, SyncOptions, SyncReport};
pub use fetcher::{ItemDescriptor, ItemFetcher, YtDlpFetcher};
pub use integrity::{calculate_file_hash, calculate_hash};
pub use ledger::{Ledger, LedgerEntry};
pub use manifest::ManifestBuilder;
pub use publisher::{RemotePublisher, StoragePublisher};
pub use retriever::{ContentRetriever, YtDlpRetriever};
