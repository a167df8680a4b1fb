use async_trait::async_trait;
use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::errors::RelayError;
use crate::ids::UserId;
use crate::wire::SenderRef;

/// Minimal identity attached to an authenticated connection.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: UserId,
    pub username: String,
    pub profile_pic: Option<String>,
}

impl UserSummary {
    pub fn sender_ref(&self) -> SenderRef {
        SenderRef {
            username: self.username.clone(),
            profile_pic: self.profile_pic.clone(),
        }
    }
}

/// Validates a bearer credential and resolves it to a user id.
/// Implementations must reject expired, malformed, and unsigned tokens.
#[async_trait]
pub trait CredentialValidator: Send + Sync {
    async fn validate(&self, token: &str) -> Result<UserId, RelayError>;
}

/// Resolves a user id to its summary, failing when the identity
/// does not exist.
#[async_trait]
pub trait IdentityLookup: Send + Sync {
    async fn get_user(&self, id: UserId) -> Result<UserSummary, RelayError>;
}

/// Claims carried by the identity provider's access tokens.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: i64,
    pub exp: u64,
}

/// HS256 bearer-token validator sharing a secret with the identity provider.
pub struct JwtValidator {
    key: DecodingKey,
    validation: Validation,
}

impl JwtValidator {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }
}

#[async_trait]
impl CredentialValidator for JwtValidator {
    async fn validate(&self, token: &str) -> Result<UserId, RelayError> {
        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => RelayError::ExpiredCredential,
                _ => RelayError::InvalidCredential(e.to_string()),
            }
        })?;
        Ok(UserId::new(data.claims.user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "test-secret";

    fn issue(user_id: i64, exp: u64) -> String {
        let claims = Claims { user_id, exp };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    fn now() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs()
    }

    #[tokio::test]
    async fn valid_token_resolves_user_id() {
        let validator = JwtValidator::new(SECRET);
        let token = issue(42, now() + 3600);
        let user_id = validator.validate(&token).await.unwrap();
        assert_eq!(user_id, UserId::new(42));
    }

    #[tokio::test]
    async fn expired_token_is_rejected() {
        let validator = JwtValidator::new(SECRET);
        let token = issue(42, now() - 3600);
        let err = validator.validate(&token).await.unwrap_err();
        assert!(matches!(err, RelayError::ExpiredCredential));
    }

    #[tokio::test]
    async fn garbage_token_is_rejected() {
        let validator = JwtValidator::new(SECRET);
        let err = validator.validate("not-a-jwt").await.unwrap_err();
        assert!(matches!(err, RelayError::InvalidCredential(_)));
    }

    #[tokio::test]
    async fn wrong_secret_is_rejected() {
        let claims = Claims { user_id: 42, exp: now() + 3600 };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"other-secret"),
        )
        .unwrap();

        let validator = JwtValidator::new(SECRET);
        let err = validator.validate(&token).await.unwrap_err();
        assert!(matches!(err, RelayError::InvalidCredential(_)));
    }

    #[tokio::test]
    async fn missing_user_id_claim_is_rejected() {
        #[derive(Serialize)]
        struct BareClaims {
            exp: u64,
        }
        let token = encode(
            &Header::default(),
            &BareClaims { exp: now() + 3600 },
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        let validator = JwtValidator::new(SECRET);
        let err = validator.validate(&token).await.unwrap_err();
        assert!(matches!(err, RelayError::InvalidCredential(_)));
    }
}
