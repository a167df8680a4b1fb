pub mod connection;
pub mod gateway;
pub mod handlers;
pub mod notify;
pub mod router;
pub mod server;

pub use connection::{Connection, ConnectionRegistry};
pub use notify::Notifier;
pub use router::{EventRouter, GroupRouter};
pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
