//! Password hashing and user lookup on top of [`Store`].

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use tracing::{info, warn};

use crate::db::{CreateUser, Store};
use crate::errors::{Error, Result};
use crate::model::{Role, User};

#[derive(Debug, Clone)]
pub struct CredentialService {
    store: Store,
    /// Verified against when the username is unknown, so both failure paths cost the same.
    dummy_hash: String,
}

impl CredentialService {
    pub async fn new(store: Store) -> Result<Self> {
        let dummy_hash = hash_password("not-a-real-password".to_string()).await?;
        Ok(Self { store, dummy_hash })
    }

    pub async fn create_user(&self, username: &str, password: &str, role: Role) -> Result<CreateUser> {
        let hash = hash_password(password.to_string()).await?;
        let outcome = self.store.insert_user(username, &hash, role).await?;
        match outcome {
            CreateUser::Created(id) => info!(id, username, role = role.as_str(), "Created user"),
            CreateUser::Conflict => warn!(username, "User already exists"),
        }
        Ok(outcome)
    }

    /// Returns the user on a match and `None` otherwise, without revealing
    /// whether the username exists.
    pub async fn verify(&self, username: &str, password: &str) -> Result<Option<User>> {
        let credential = self.store.find_credential(username).await?;

        let hash = credential
            .as_ref()
            .map(|c| c.password_hash.clone())
            .unwrap_or_else(|| self.dummy_hash.clone());
        let matches = verify_password(password.to_string(), hash).await?;

        Ok(match credential {
            Some(credential) if matches => Some(credential.into()),
            _ => None,
        })
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<User>> {
        self.store.find_user(id).await
    }

    /// Admin tooling: replaces the hash of an existing user.
    pub async fn reset_password(&self, username: &str, password: &str) -> Result<bool> {
        let hash = hash_password(password.to_string()).await?;
        self.store.update_password_hash(username, &hash).await
    }
}

async fn hash_password(password: String) -> Result<String> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| Error::PasswordHash(e.to_string()))
    })
    .await?
}

async fn verify_password(password: String, hash: String) -> Result<bool> {
    tokio::task::spawn_blocking(move || {
        let parsed = PasswordHash::new(&hash).map_err(|e| Error::PasswordHash(e.to_string()))?;
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    })
    .await?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory_store;

    #[tokio::test]
    async fn test_create_and_verify() {
        let service = CredentialService::new(memory_store().await).await.unwrap();
        let outcome = service
            .create_user("admin", "s3cret", Role::Admin)
            .await
            .unwrap();
        let CreateUser::Created(id) = outcome else {
            panic!("expected a new user, got {:?}", outcome);
        };

        let user = service.verify("admin", "s3cret").await.unwrap().unwrap();
        assert_eq!(user.id, id);
        assert_eq!(user.role, Role::Admin);

        let by_id = service.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(by_id.username, "admin");
    }

    #[tokio::test]
    async fn test_wrong_password_and_unknown_user_look_alike() {
        let service = CredentialService::new(memory_store().await).await.unwrap();
        service.create_user("alice", "right", Role::User).await.unwrap();

        assert!(service.verify("alice", "wrong").await.unwrap().is_none());
        assert!(service.verify("mallory", "right").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_user() {
        let service = CredentialService::new(memory_store().await).await.unwrap();
        service.create_user("alice", "one", Role::User).await.unwrap();
        let outcome = service.create_user("alice", "two", Role::User).await.unwrap();
        assert_eq!(outcome, CreateUser::Conflict);

        // The original password still works.
        assert!(service.verify("alice", "one").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_reset_password() {
        let service = CredentialService::new(memory_store().await).await.unwrap();
        service.create_user("admin", "old", Role::Admin).await.unwrap();

        assert!(service.reset_password("admin", "new").await.unwrap());
        assert!(service.verify("admin", "old").await.unwrap().is_none());
        assert!(service.verify("admin", "new").await.unwrap().is_some());
    }

    #[test]
    fn test_hashes_are_salted() {
        tokio_test::block_on(async {
            let a = hash_password("same".to_string()).await.unwrap();
            let b = hash_password("same".to_string()).await.unwrap();
            assert_ne!(a, b);
            assert!(verify_password("same".to_string(), a).await.unwrap());
        });
    }
}
