pub mod cdc;
pub mod config;
pub mod engine;
pub mod entity;
pub mod error;
pub mod fanout;
pub mod flags;
pub mod replicator;
pub mod retry;
pub mod store;
pub mod tags;

pub mod kafka;

pub use config::Config;
pub use engine::{EngineOptions, Outcome, ReconcileEngine};
pub use error::{Error, Result};
pub use replicator::{Disposition, Replicator};
