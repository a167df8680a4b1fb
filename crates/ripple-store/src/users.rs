use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use ripple_core::auth::{IdentityLookup, UserSummary};
use ripple_core::errors::RelayError;
use ripple_core::ids::UserId;

use crate::database::Database;
use crate::error::StoreError;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserRow {
    pub id: UserId,
    pub username: String,
    pub profile_pic: Option<String>,
    pub created_at: String,
}

impl UserRow {
    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id,
            username: self.username.clone(),
            profile_pic: self.profile_pic.clone(),
        }
    }
}

pub struct UserRepo {
    db: Database,
}

impl UserRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a user. Usernames are unique.
    #[instrument(skip(self))]
    pub fn create(&self, username: &str, profile_pic: Option<&str>) -> Result<UserRow, StoreError> {
        let now = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (username, profile_pic, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![username, profile_pic, now],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(inner, _)
                    if inner.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    StoreError::Conflict(format!("username taken: {username}"))
                }
                other => other.into(),
            })?;

            Ok(UserRow {
                id: UserId::new(conn.last_insert_rowid()),
                username: username.to_string(),
                profile_pic: profile_pic.map(str::to_string),
                created_at: now.clone(),
            })
        })
    }

    /// Get a user by id.
    #[instrument(skip(self), fields(user_id = %id))]
    pub fn get(&self, id: UserId) -> Result<UserRow, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT id, username, profile_pic, created_at FROM users WHERE id = ?1",
                [id.raw()],
                |row| {
                    Ok(UserRow {
                        id: UserId::new(row.get(0)?),
                        username: row.get(1)?,
                        profile_pic: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            )
            .map_err(|_| StoreError::NotFound(format!("user {id}")))
        })
    }

    /// Get a user by username.
    #[instrument(skip(self))]
    pub fn get_by_username(&self, username: &str) -> Result<UserRow, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT id, username, profile_pic, created_at FROM users WHERE username = ?1",
                [username],
                |row| {
                    Ok(UserRow {
                        id: UserId::new(row.get(0)?),
                        username: row.get(1)?,
                        profile_pic: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            )
            .map_err(|_| StoreError::NotFound(format!("user {username}")))
        })
    }
}

/// Identity boundary backed by the users table. Unknown ids surface as
/// an auth failure so the gateway closes the handshake.
pub struct SqliteIdentityLookup {
    repo: UserRepo,
}

impl SqliteIdentityLookup {
    pub fn new(db: Database) -> Self {
        Self {
            repo: UserRepo::new(db),
        }
    }
}

#[async_trait]
impl IdentityLookup for SqliteIdentityLookup {
    async fn get_user(&self, id: UserId) -> Result<UserSummary, RelayError> {
        match self.repo.get(id) {
            Ok(row) => Ok(row.summary()),
            Err(StoreError::NotFound(_)) => Err(RelayError::UnknownIdentity(id)),
            Err(e) => Err(RelayError::Store(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_get() {
        let db = Database::in_memory().unwrap();
        let repo = UserRepo::new(db);

        let alice = repo.create("alice", Some("user_avatar/peep-1.jpg")).unwrap();
        let fetched = repo.get(alice.id).unwrap();
        assert_eq!(fetched.username, "alice");
        assert_eq!(fetched.profile_pic.as_deref(), Some("user_avatar/peep-1.jpg"));
    }

    #[test]
    fn duplicate_username_conflicts() {
        let db = Database::in_memory().unwrap();
        let repo = UserRepo::new(db);

        repo.create("alice", None).unwrap();
        let err = repo.create("alice", None).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn get_by_username() {
        let db = Database::in_memory().unwrap();
        let repo = UserRepo::new(db);

        let bob = repo.create("bob", None).unwrap();
        let fetched = repo.get_by_username("bob").unwrap();
        assert_eq!(fetched.id, bob.id);
        assert!(matches!(
            repo.get_by_username("nobody"),
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn identity_lookup_resolves_summary() {
        let db = Database::in_memory().unwrap();
        let alice = UserRepo::new(db.clone()).create("alice", None).unwrap();

        let lookup = SqliteIdentityLookup::new(db);
        let summary = lookup.get_user(alice.id).await.unwrap();
        assert_eq!(summary.username, "alice");
        assert!(summary.profile_pic.is_none());
    }

    #[tokio::test]
    async fn identity_lookup_rejects_unknown_id() {
        let db = Database::in_memory().unwrap();
        let lookup = SqliteIdentityLookup::new(db);

        let err = lookup.get_user(UserId::new(999)).await.unwrap_err();
        assert!(matches!(err, RelayError::UnknownIdentity(_)));
    }
}
