pub mod client;
pub mod repository;
pub mod error;

// Re-exports
pub use client::{GitHubClient, OpenActivity};
pub use repository::Repository;
pub use error::{Error, Result};
