//! Video processing and adaptive delivery pipeline.
//!
//! An uploaded file is probed, encoded into renditions in parallel, given a
//! poster and preview, and segmented into HLS and DASH streams. A periodic
//! alert engine watches queue depth, error rate, disk and tool health.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod queue;
pub mod repository;
pub mod services;

#[doc(hidden)]
pub mod test_utils;
