pub mod cli;
pub mod config;
pub mod error;
mod metrics;
pub mod model;
pub mod router;
pub mod store;
pub mod utils;

pub use config::Opts;
pub use error::{BlockedOn, CatalogError, Result};
pub use model::{IngestRecord, PersonSet, Record, Tag, TagFilter, Thumbnail};
pub use router::{Mode, Session, SessionContext, ShareToken};
pub use store::{
    Catalog, CatalogBuilder, Count, Direction, IndexName, PutOutcome, QueryParams, RepairReport,
};

pub use metrics::gather_text as gather_metrics;
