pub mod database;
pub mod error;
pub mod records;
pub mod row_helpers;
pub mod schedule;
pub mod schema;
pub mod sessions;
pub mod tags;
pub mod tasks;

pub use database::Database;
pub use error::StoreError;
