//! Password login and bearer-token sessions.

use chrono::{DateTime, Duration, Utc};
use db::{
    DBService,
    models::{
        api_token::ApiToken,
        organization::ActiveStatus,
        user::{CreateUser, User},
    },
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use ts_rs::TS;
use utils::{
    password::{PasswordError, hash_password, verify_password},
    token::{generate_token, hash_token},
};
use uuid::Uuid;

const SESSION_TTL_DAYS: i64 = 7;
const MIN_PASSWORD_LENGTH: usize = 8;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("Account is inactive")]
    AccountInactive,
    #[error("Unauthenticated")]
    InvalidToken,
    #[error("email is already registered")]
    EmailTaken,
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Password(#[from] PasswordError),
    #[error("password hashing task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Deserialize, TS)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, TS)]
pub struct LoginResponse {
    pub token: String,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
    pub user: User,
}

/// Authenticated caller resolved from a bearer token.
#[derive(Debug, Clone)]
pub struct Session {
    pub user: User,
    pub token_id: Uuid,
}

#[derive(Clone)]
pub struct AuthService {
    db: DBService,
}

impl AuthService {
    pub fn new(db: DBService) -> Self {
        Self { db }
    }

    pub async fn login(&self, req: &LoginRequest) -> Result<LoginResponse, AuthError> {
        let Some(user) = User::find_by_email(&self.db.pool, &req.email).await? else {
            warn!("Login failed: unknown email");
            return Err(AuthError::InvalidCredentials);
        };

        let password = req.password.clone();
        let hash = user.password_hash.clone();
        let verified = tokio::task::spawn_blocking(move || verify_password(&password, &hash)).await?;
        match verified {
            Ok(true) => {}
            Ok(false) => {
                warn!(user_id = %user.id, "Login failed: wrong password");
                return Err(AuthError::InvalidCredentials);
            }
            Err(e) => {
                warn!(user_id = %user.id, error = %e, "Login failed: stored hash unusable");
                return Err(AuthError::InvalidCredentials);
            }
        }
        if user.status != ActiveStatus::Active {
            return Err(AuthError::AccountInactive);
        }

        let token = generate_token();
        let expires_at = Utc::now() + Duration::days(SESSION_TTL_DAYS);
        ApiToken::create(&self.db.pool, user.id, "login", &hash_token(&token), Some(expires_at))
            .await?;
        info!(user_id = %user.id, role = %user.role, "User logged in");

        Ok(LoginResponse {
            token,
            token_type: "Bearer".to_string(),
            expires_at,
            user,
        })
    }

    /// Resolve a raw bearer token to its active user.
    pub async fn authenticate(&self, token: &str) -> Result<Session, AuthError> {
        let api_token = ApiToken::find_active_by_hash(&self.db.pool, &hash_token(token), Utc::now())
            .await?
            .ok_or(AuthError::InvalidToken)?;
        let user = User::find_by_id(&self.db.pool, api_token.user_id)
            .await?
            .ok_or(AuthError::InvalidToken)?;
        if user.status != ActiveStatus::Active {
            return Err(AuthError::AccountInactive);
        }
        ApiToken::touch(&self.db.pool, api_token.id).await?;
        Ok(Session {
            user,
            token_id: api_token.id,
        })
    }

    pub async fn logout(&self, session: &Session) -> Result<(), AuthError> {
        ApiToken::delete(&self.db.pool, session.token_id).await?;
        info!(user_id = %session.user.id, "User logged out");
        Ok(())
    }

    pub async fn create_user(&self, data: &CreateUser) -> Result<User, AuthError> {
        let email = data.email.trim();
        if data.name.trim().is_empty() {
            return Err(AuthError::Validation("name is required".to_string()));
        }
        if !email.contains('@') || email.starts_with('@') || email.ends_with('@') {
            return Err(AuthError::Validation("a valid email is required".to_string()));
        }
        if data.password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(AuthError::Validation(format!(
                "password must be at least {MIN_PASSWORD_LENGTH} characters"
            )));
        }
        if User::find_by_email(&self.db.pool, email).await?.is_some() {
            return Err(AuthError::EmailTaken);
        }

        let password = data.password.clone();
        let hash = tokio::task::spawn_blocking(move || hash_password(&password)).await??;
        let user = User::create(&self.db.pool, data, &hash).await?;
        info!(user_id = %user.id, role = %user.role, "User created");
        Ok(user)
    }
}
