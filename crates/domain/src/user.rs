//! User account service.

use chrono::Utc;
use common::{User, UserId};
use store::UserStore;

use crate::actor::Actor;
use crate::error::{DomainError, Result};

/// Fields for registering a new user.
///
/// `hashed_password` is an opaque hash produced by the auth layer.
#[derive(Debug, Clone)]
pub struct UserCreate {
    pub email: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub hashed_password: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub postal_code: Option<String>,
}

/// Partial update of a user profile. `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub email: Option<String>,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub hashed_password: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub postal_code: Option<String>,
}

/// Service for managing user accounts.
pub struct UserService<S: UserStore> {
    store: S,
}

impl<S: UserStore> UserService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Registers a new user, enforcing email and username uniqueness.
    #[tracing::instrument(skip(self, create))]
    pub async fn create(&self, create: UserCreate) -> Result<User> {
        if self.store.get_user_by_email(&create.email).await?.is_some() {
            return Err(DomainError::BadRequest(
                "Email already registered".to_string(),
            ));
        }
        if self
            .store
            .get_user_by_username(&create.username)
            .await?
            .is_some()
        {
            return Err(DomainError::BadRequest("Username already taken".to_string()));
        }

        let user = User {
            id: UserId::new(0),
            email: create.email,
            username: create.username,
            first_name: create.first_name,
            last_name: create.last_name,
            hashed_password: create.hashed_password,
            is_active: true,
            is_superuser: false,
            phone: create.phone,
            address: create.address,
            city: create.city,
            country: create.country,
            postal_code: create.postal_code,
            created_at: Utc::now(),
            updated_at: None,
        };
        Ok(self.store.insert_user(user).await?)
    }

    #[tracing::instrument(skip(self))]
    pub async fn get(&self, id: UserId) -> Result<User> {
        self.store
            .get_user(id)
            .await?
            .ok_or_else(|| DomainError::NotFound("User not found".to_string()))
    }

    pub async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self.store.get_user_by_email(email).await?)
    }

    pub async fn get_by_username(&self, username: &str) -> Result<Option<User>> {
        Ok(self.store.get_user_by_username(username).await?)
    }

    pub async fn list(&self, skip: u64, limit: u64) -> Result<Vec<User>> {
        Ok(self.store.list_users(skip, limit).await?)
    }

    /// Updates a profile. Only the user themselves or a superuser may do so;
    /// email and username uniqueness are re-checked when they change.
    #[tracing::instrument(skip(self, patch))]
    pub async fn update(&self, id: UserId, patch: UserUpdate, actor: &Actor) -> Result<User> {
        if !actor.can_act_for(id) {
            return Err(DomainError::Forbidden(
                "Not allowed to modify this user".to_string(),
            ));
        }
        let mut user = self.get(id).await?;

        if let Some(email) = patch.email
            && email != user.email
        {
            if self.store.get_user_by_email(&email).await?.is_some() {
                return Err(DomainError::BadRequest(
                    "Email already registered".to_string(),
                ));
            }
            user.email = email;
        }
        if let Some(username) = patch.username
            && username != user.username
        {
            if self
                .store
                .get_user_by_username(&username)
                .await?
                .is_some()
            {
                return Err(DomainError::BadRequest("Username already taken".to_string()));
            }
            user.username = username;
        }
        if let Some(first_name) = patch.first_name {
            user.first_name = first_name;
        }
        if let Some(last_name) = patch.last_name {
            user.last_name = last_name;
        }
        if let Some(hashed_password) = patch.hashed_password {
            user.hashed_password = hashed_password;
        }
        if let Some(phone) = patch.phone {
            user.phone = Some(phone);
        }
        if let Some(address) = patch.address {
            user.address = Some(address);
        }
        if let Some(city) = patch.city {
            user.city = Some(city);
        }
        if let Some(country) = patch.country {
            user.country = Some(country);
        }
        if let Some(postal_code) = patch.postal_code {
            user.postal_code = Some(postal_code);
        }

        Ok(self.store.update_user(user).await?)
    }

    /// Toggles the active flag. Superusers only.
    #[tracing::instrument(skip(self))]
    pub async fn set_active(&self, id: UserId, is_active: bool, actor: &Actor) -> Result<User> {
        if !actor.is_superuser {
            return Err(DomainError::Forbidden(
                "Not allowed to modify this user".to_string(),
            ));
        }
        let mut user = self.get(id).await?;
        user.is_active = is_active;
        Ok(self.store.update_user(user).await?)
    }

    /// Hard-deletes an account. Only the user themselves or a superuser.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, id: UserId, actor: &Actor) -> Result<()> {
        if !actor.can_act_for(id) {
            return Err(DomainError::Forbidden(
                "Not allowed to delete this user".to_string(),
            ));
        }
        if !self.store.delete_user(id).await? {
            return Err(DomainError::NotFound("User not found".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use store::MemoryStore;

    fn create(email: &str, username: &str) -> UserCreate {
        UserCreate {
            email: email.to_string(),
            username: username.to_string(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            hashed_password: "hash".to_string(),
            phone: None,
            address: None,
            city: None,
            country: None,
            postal_code: None,
        }
    }

    #[tokio::test]
    async fn create_and_get() {
        let service = UserService::new(MemoryStore::new());
        let user = service.create(create("ada@example.com", "ada")).await.unwrap();
        assert!(user.is_active);
        assert!(!user.is_superuser);

        let fetched = service.get(user.id).await.unwrap();
        assert_eq!(fetched.email, "ada@example.com");
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let service = UserService::new(MemoryStore::new());
        service.create(create("ada@example.com", "ada")).await.unwrap();

        let err = service
            .create(create("ada@example.com", "ada2"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
        assert_eq!(err.to_string(), "Email already registered");
    }

    #[tokio::test]
    async fn duplicate_username_is_rejected() {
        let service = UserService::new(MemoryStore::new());
        service.create(create("ada@example.com", "ada")).await.unwrap();

        let err = service
            .create(create("other@example.com", "ada"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Username already taken");
    }

    #[tokio::test]
    async fn update_requires_ownership_or_privilege() {
        let service = UserService::new(MemoryStore::new());
        let user = service.create(create("ada@example.com", "ada")).await.unwrap();
        let other = service.create(create("bob@example.com", "bob")).await.unwrap();

        let patch = UserUpdate {
            first_name: Some("Grace".to_string()),
            ..UserUpdate::default()
        };
        let err = service
            .update(user.id, patch.clone(), &Actor::user(other.id))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        let updated = service
            .update(user.id, patch, &Actor::superuser(other.id))
            .await
            .unwrap();
        assert_eq!(updated.first_name, "Grace");
    }

    #[tokio::test]
    async fn set_active_is_superuser_only() {
        let service = UserService::new(MemoryStore::new());
        let user = service.create(create("ada@example.com", "ada")).await.unwrap();

        let err = service
            .set_active(user.id, false, &Actor::user(user.id))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        let updated = service
            .set_active(user.id, false, &Actor::superuser(UserId::new(99)))
            .await
            .unwrap();
        assert!(!updated.is_active);
    }
}
