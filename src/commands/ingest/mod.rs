//! Bulk ingestion: CSV rows through the normalizer into a freshly wiped collection.

mod pipeline;
mod run;

pub use run::run;
