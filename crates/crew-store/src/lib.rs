pub mod checkpoints;
pub mod database;
pub mod error;
pub mod schema;

pub use checkpoints::{CheckpointRepo, CheckpointSummary};
pub use database::Database;
pub use error::StoreError;
