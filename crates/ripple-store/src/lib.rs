pub mod database;
pub mod error;
pub mod messages;
pub mod notifications;
pub mod schema;
pub mod typing;
pub mod users;

pub use database::Database;
pub use error::StoreError;
