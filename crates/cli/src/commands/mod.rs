pub mod audit;
pub mod ingest;
pub mod memory;
pub mod onboard;
pub mod query;
pub mod status;
