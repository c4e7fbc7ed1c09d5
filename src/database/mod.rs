pub mod cache;
pub mod connection;
pub mod memory;
pub mod models;
pub mod repository;
pub mod traits;

pub use cache::TokenCache;
pub use connection::DatabaseConnection;
pub use memory::InMemoryRepository;
pub use models::*;
pub use repository::*;
pub use traits::*;
