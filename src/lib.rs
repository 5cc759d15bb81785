// src/lib.rs

//! catsync: Batch Product Synchronization Engine
//!
//! Periodically reconciles a commerce backend's product catalog with a
//! customer-messaging platform's copy of it. Changed products are fetched,
//! assembled into complete records, and pushed in rate-limited batches; a
//! durable manifest checkpoints progress so a failed run resumes at the
//! batch level instead of restarting.

pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;
