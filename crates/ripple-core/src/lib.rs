pub mod auth;
pub mod errors;
pub mod ids;
pub mod presence;
pub mod wire;

pub use auth::{CredentialValidator, IdentityLookup, JwtValidator, UserSummary};
pub use errors::RelayError;
pub use presence::{InMemoryTypingStore, TypingState, TypingStore};
