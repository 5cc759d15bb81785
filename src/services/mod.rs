//! Service layer for the sync engine.
//!
//! This module contains the boundary clients:
//! - Catalog fetching from the commerce backend (`CatalogSource`)
//! - Batch delivery to the messaging platform (`TargetClient`)
//! - Result notification (`Notifier`)

mod notifier;
mod source;
mod target;

pub use notifier::Notifier;
pub use source::{CatalogFeed, CatalogSource, FetchScope};
pub use target::{BatchOutcome, BatchSink, TargetClient};
