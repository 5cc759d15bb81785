// src/models/mod.rs

//! Domain models for the sync engine.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod catalog;
mod config;
mod manifest;
mod run;

// Re-export all public types
pub use catalog::{
    CategoryKind, CategoryPath, ProductRecord, RawAttributeOption, RawAttributeOptions,
    RawAttributeValue, RawCatalog, RawCategory, RawMediaEntry, RawPrice, RawProduct, Visibility,
};
pub use config::{
    CheckpointConfig, Config, LoggingConfig, NotifyConfig, RetryConfig, SourceConfig, SyncConfig,
    TargetConfig,
};
pub use manifest::{BatchDescriptor, Manifest};
pub use run::{
    Batch, BatchStatus, NotificationPayload, PayloadStatus, RecordRejection, RunRequest,
    SyncMode, SyncResult, SyncStatus,
};
