use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

use crate::auth::{hash_password, verify_password, TokenService};
use crate::database::Database;
use crate::errors::{classify_database_error, ApiError, ServiceResult};
use crate::models::{ChangePasswordRequest, CredentialsRequest, UpdateProfileRequest, User};
use crate::upload::{UploadKind, UploadStore};
use crate::{log_service_error, log_service_start, log_service_success, log_service_warn};

pub const MIN_PASSWORD_LEN: usize = 6;
pub const MAX_PASSWORD_LEN: usize = 10;

static EMAIL_RE: OnceLock<Regex> = OnceLock::new();
static PHONE_RE: OnceLock<Regex> = OnceLock::new();

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE
        .get_or_init(|| {
            Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("email pattern compiles")
        })
        .is_match(email)
}

/// Mainland mobile numbers: 11 digits starting with 13-19.
pub fn is_valid_phone(phone: &str) -> bool {
    PHONE_RE
        .get_or_init(|| Regex::new(r"^1[3-9]\d{9}$").expect("phone pattern compiles"))
        .is_match(phone)
}

/// Nickname derived from a username: the local part of an email-like name.
pub fn default_nickname(username: &str) -> &str {
    match username.split_once('@') {
        Some((local, _)) => local,
        None => username,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user_info: User,
}

#[derive(Debug, Clone, Serialize)]
pub struct AvatarResponse {
    pub avatar_url: String,
}

/// Registration, login and the profile of the signed-in user.
#[derive(Clone)]
pub struct AccountService {
    db: Database,
    tokens: TokenService,
}

impl AccountService {
    pub fn new(db: Database, tokens: TokenService) -> Self {
        Self { db, tokens }
    }

    pub async fn register(&self, request: CredentialsRequest) -> ServiceResult<User> {
        let username = request.username.as_deref().unwrap_or_default().trim();
        let password = request.password.as_deref().unwrap_or_default();
        if username.is_empty() || password.trim().is_empty() {
            return Err(ApiError::ValidationError("Please enter username and password".to_string()));
        }
        log_service_start!("account_service", "register");

        if self.db.get_user_by_username(username).await?.is_some() {
            return Err(ApiError::DuplicateResource("Account already exists".to_string()));
        }

        let password_hash = hash_password(password).map_err(|e| ApiError::InternalError(e.to_string()))?;
        let user = self
            .db
            .create_user(username, &password_hash, default_nickname(username))
            .await
            .map_err(|e| match classify_database_error(&e) {
                ApiError::DuplicateResource(_) => ApiError::DuplicateResource("Account already exists".to_string()),
                _ => ApiError::DatabaseError(e),
            })?;

        log_service_success!("account_service", "register", format!("user {} created", user.id));
        Ok(user)
    }

    pub async fn login(&self, request: CredentialsRequest) -> ServiceResult<LoginResponse> {
        let username = request.username.as_deref().unwrap_or_default().trim();
        let password = request.password.as_deref().unwrap_or_default();

        let user = match self.db.get_user_by_username(username).await? {
            Some(user) if verify_password(&user.password_hash, password) => user,
            _ => {
                log_service_warn!("account_service", "login", "rejected credentials");
                return Err(ApiError::ValidationError("Incorrect username or password".to_string()));
            }
        };

        let token = self.tokens.issue(user.id).map_err(|e| ApiError::InternalError(e.to_string()))?;
        log_service_success!("account_service", "login", format!("user {} signed in", user.id));
        Ok(LoginResponse { token, user_info: user })
    }

    /// Applies the present fields; an empty string clears a field.
    pub async fn update_profile(&self, mut user: User, request: UpdateProfileRequest) -> ServiceResult<User> {
        log_service_start!("account_service", "update_profile", user_id = user.id);

        let clean = |value: Option<String>| value.map(|v| Some(v.trim().to_string()).filter(|v| !v.is_empty()));
        let email = clean(request.email);
        let phone = clean(request.phone);

        if let Some(Some(email)) = &email {
            if !is_valid_email(email) {
                return Err(ApiError::ValidationError("Invalid email format".to_string()));
            }
        }
        if let Some(Some(phone)) = &phone {
            if !is_valid_phone(phone) {
                return Err(ApiError::ValidationError("Invalid phone number format".to_string()));
            }
        }

        if let Some(nickname) = clean(request.nickname) {
            user.nickname = nickname;
        }
        if let Some(email) = email {
            user.email = email;
        }
        if let Some(phone) = phone {
            user.phone = phone;
        }
        if let Some(gender) = clean(request.gender) {
            user.gender = gender;
        }
        if let Some(bio) = clean(request.bio) {
            user.bio = bio;
        }

        self.db.update_user_profile(&user).await?;
        let updated = self
            .db
            .get_user_by_id(user.id)
            .await?
            .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

        log_service_success!("account_service", "update_profile", format!("user {}", updated.id));
        Ok(updated)
    }

    pub async fn change_password(&self, user: &User, request: ChangePasswordRequest) -> ServiceResult<()> {
        let old_password = request.old_password.unwrap_or_default();
        let new_password = request.new_password.unwrap_or_default();

        if old_password.is_empty() || new_password.is_empty() {
            return Err(ApiError::ValidationError("Please enter current and new password".to_string()));
        }
        if !verify_password(&user.password_hash, &old_password) {
            return Err(ApiError::ValidationError("Current password is incorrect".to_string()));
        }
        let length = new_password.chars().count();
        if !(MIN_PASSWORD_LEN..=MAX_PASSWORD_LEN).contains(&length) {
            return Err(ApiError::ValidationError(format!(
                "New password must be {}-{} characters",
                MIN_PASSWORD_LEN, MAX_PASSWORD_LEN
            )));
        }

        let password_hash = hash_password(&new_password).map_err(|e| ApiError::InternalError(e.to_string()))?;
        self.db.update_password_hash(user.id, &password_hash).await?;
        log_service_success!("account_service", "change_password", format!("user {}", user.id));
        Ok(())
    }

    pub async fn set_avatar(
        &self,
        user_id: i64,
        uploads: &UploadStore,
        filename: &str,
        bytes: &[u8],
    ) -> ServiceResult<AvatarResponse> {
        let stored = uploads.save(UploadKind::Avatar, filename, bytes).await?;
        if let Err(e) = self.db.update_avatar(user_id, &stored.url).await {
            log_service_error!("account_service", "set_avatar", user_id = user_id, error = e);
            return Err(ApiError::DatabaseError(e));
        }
        Ok(AvatarResponse { avatar_url: stored.url })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_validation() {
        assert!(is_valid_email("student@example.com"));
        assert!(is_valid_email("a.b+c@school.edu.cn"));
        assert!(!is_valid_email("student@example"));
        assert!(!is_valid_email("no-at-sign.com"));
    }

    #[test]
    fn test_phone_validation() {
        assert!(is_valid_phone("13800138000"));
        assert!(!is_valid_phone("12800138000"));
        assert!(!is_valid_phone("1380013800"));
        assert!(!is_valid_phone("138001380001"));
    }

    #[test]
    fn test_default_nickname() {
        assert_eq!(default_nickname("alice@example.com"), "alice");
        assert_eq!(default_nickname("bob"), "bob");
    }

    async fn service() -> AccountService {
        let db = Database::new("sqlite::memory:").await.unwrap();
        AccountService::new(db, TokenService::new("test-secret", 24))
    }

    fn credentials(username: &str, password: &str) -> CredentialsRequest {
        CredentialsRequest {
            username: Some(username.to_string()),
            password: Some(password.to_string()),
        }
    }

    #[tokio::test]
    async fn test_register_and_login() {
        let accounts = service().await;
        let user = accounts.register(credentials("  alice@example.com ", "secret1")).await.unwrap();
        assert_eq!(user.username, "alice@example.com");
        assert_eq!(user.nickname.as_deref(), Some("alice"));
        assert_eq!(user.gender.as_deref(), Some("secret"));

        let duplicate = accounts.register(credentials("alice@example.com", "other")).await;
        assert!(matches!(duplicate, Err(ApiError::DuplicateResource(_))));

        let login = accounts.login(credentials("alice@example.com", "secret1")).await.unwrap();
        assert!(!login.token.is_empty());
        assert_eq!(login.user_info.id, user.id);

        let wrong = accounts.login(credentials("alice@example.com", "nope")).await;
        assert!(matches!(wrong, Err(ApiError::ValidationError(ref m)) if m == "Incorrect username or password"));
    }

    #[tokio::test]
    async fn test_register_requires_credentials() {
        let accounts = service().await;
        assert!(matches!(
            accounts.register(credentials("  ", "secret1")).await,
            Err(ApiError::ValidationError(_))
        ));
        assert!(matches!(
            accounts.register(credentials("bob", "")).await,
            Err(ApiError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn test_profile_update_clears_and_validates() {
        let accounts = service().await;
        let user = accounts.register(credentials("carol", "secret1")).await.unwrap();

        let updated = accounts
            .update_profile(
                user.clone(),
                UpdateProfileRequest {
                    email: Some("carol@example.com".to_string()),
                    bio: Some("Grade 11".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.email.as_deref(), Some("carol@example.com"));
        assert_eq!(updated.nickname.as_deref(), Some("carol"));

        let cleared = accounts
            .update_profile(
                updated.clone(),
                UpdateProfileRequest {
                    bio: Some(String::new()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(cleared.bio, None);
        assert_eq!(cleared.email.as_deref(), Some("carol@example.com"));

        let invalid = accounts
            .update_profile(
                cleared,
                UpdateProfileRequest {
                    phone: Some("12345".to_string()),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(invalid, Err(ApiError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_change_password_rules() {
        let accounts = service().await;
        let user = accounts.register(credentials("dave", "secret1")).await.unwrap();
        let change = |old: &str, new: &str| ChangePasswordRequest {
            old_password: Some(old.to_string()),
            new_password: Some(new.to_string()),
        };

        assert!(accounts.change_password(&user, change("", "abcdef")).await.is_err());
        assert!(accounts.change_password(&user, change("wrong", "abcdef")).await.is_err());
        assert!(accounts.change_password(&user, change("secret1", "abc")).await.is_err());
        assert!(accounts.change_password(&user, change("secret1", "abcdefghijk")).await.is_err());
        accounts.change_password(&user, change("secret1", "newpass1")).await.unwrap();

        assert!(accounts.login(credentials("dave", "newpass1")).await.is_ok());
        assert!(accounts.login(credentials("dave", "secret1")).await.is_err());
    }
}
