pub mod api;
pub mod batch;
pub mod job;
pub mod product;
pub mod report;
