pub mod add;
pub mod dedup;
pub mod ingest;
pub mod preview;
pub mod status;
