//! Batch image-transformation service.
//!
//! Consumes image jobs from RabbitMQ (or urgent HTTP submissions), computes
//! the requested renditions on a bounded worker pool, writes each result to
//! an S3-compatible object store under its canonical key, performs the
//! requested deletions, and acknowledges each delivery according to the
//! outcome.

pub mod app_state;
pub mod config;
pub mod models;
pub mod routes;
pub mod services;
