//! Staged executor for changing a tenant's primary region without downtime.
//!
//! A migration moves through `pending -> in_progress(10%) -> validated(30%)
//! -> caught_up(60%) -> placement_updated(80%) -> completed(100%)`,
//! persisting its record at each checkpoint so progress survives a restart
//! of the node driving it.

mod error;
mod executor;
mod migration;

pub use error::MigrationError;
pub use executor::{MigrationExecutor, PlacementInvalidator};
pub use migration::{Migration, MigrationState, Stage};
