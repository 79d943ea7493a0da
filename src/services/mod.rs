pub mod coordinator;
pub mod ingest;
pub mod report;
pub mod status_store;
pub mod storage;
pub mod transform;
pub mod worker;
