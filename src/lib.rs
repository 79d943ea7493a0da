//! Batch image processing
//!
//! Ingests batches of product rows, re-encodes every product's remote images
//! on a bounded worker pool, tracks per-job progress in a status store and
//! writes one consolidated report per batch once every job has finished.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
