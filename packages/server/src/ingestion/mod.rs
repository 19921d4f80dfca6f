//! End-to-end ingestion pipeline for a single collection run.
//!
//! ```text
//! IngestionEngine.ingest(request)
//!     │
//!     ├─► Asset::get_or_create            (asset_manager)
//!     ├─► narrow window                   (incremental_tracker)
//!     ├─► rate limit + collector.collect  (collectors)
//!     ├─► map frame to canonical rows     (schema_mapper)
//!     ├─► upsert rows                     (data_loader)
//!     └─► CollectionLog + IngestOutcome   (collection_log)
//! ```
//!
//! The engine never returns an error to the scheduler: every run produces an
//! [`IngestOutcome`], failures included.

mod asset_manager;
mod collection_log;
mod data_loader;
mod engine;
mod incremental_tracker;
mod schema_mapper;

pub use asset_manager::Asset;
pub use collection_log::{CollectionLog, CollectionStatus};
pub use data_loader::upsert_batch;
pub use engine::{IngestOutcome, IngestRequest, IngestStatus, IngestionEngine};
pub use incremental_tracker::narrow_window;
pub use schema_mapper::{map_frame, MappedBatch, MappingError, MarketDataRow, RateRow, ValueRow};
