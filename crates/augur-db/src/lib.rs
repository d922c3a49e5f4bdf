pub mod models;
pub mod repository;
pub mod filter;
pub mod error;

// Re-exports
pub use models::{CollectionStatusRecord, RepoRecord};
pub use repository::Database;
pub use error::{Error, Result};
