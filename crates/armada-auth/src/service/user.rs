//! In-memory user store
//!
//! Users live in memory and travel between nodes through the cluster
//! data sync layer, so every manager method is synchronous. Passwords
//! are stored bcrypt-hashed; plaintext never leaves `authenticate`.

use std::collections::BTreeSet;

use dashmap::DashMap;
use rand::distr::{Alphanumeric, SampleString};
use tracing::info;

use armada_common::ArmadaError;

use crate::model::{
    AuthResult, GENERATED_PASSWORD_LENGTH, GLOBAL_PERMISSION, INVALID_CREDENTIAL_MESSAGE,
    MAX_PASSWORD_LENGTH, User,
};

use super::permission;

pub struct UserManager {
    users: DashMap<String, User>,
}

impl Default for UserManager {
    fn default() -> Self {
        Self::new()
    }
}

impl UserManager {
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
        }
    }

    /// Create the administrator account unless it already exists.
    ///
    /// With no configured password a random one is generated and returned
    /// so the caller can print it exactly once; it is not recoverable
    /// afterwards.
    pub fn ensure_default_admin(
        &self,
        username: &str,
        configured_password: Option<&str>,
    ) -> anyhow::Result<Option<String>> {
        if self.users.contains_key(username) {
            return Ok(None);
        }

        let (password, generated) = match configured_password {
            Some(configured) => (configured.to_string(), None),
            None => {
                let password =
                    Alphanumeric.sample_string(&mut rand::rng(), GENERATED_PASSWORD_LENGTH);
                (password.clone(), Some(password))
            }
        };

        let mut permissions = BTreeSet::new();
        permissions.insert(GLOBAL_PERMISSION.to_string());
        self.create_user(username, &password, permissions)?;
        info!("created default administrator account '{}'", username);

        Ok(generated)
    }

    pub fn create_user(
        &self,
        username: &str,
        password: &str,
        permissions: BTreeSet<String>,
    ) -> anyhow::Result<()> {
        if username.is_empty() || !armada_common::is_valid(username) {
            return Err(ArmadaError::IllegalArgument(format!(
                "username '{}' contains illegal characters",
                username
            ))
            .into());
        }
        if password.is_empty() || password.len() > MAX_PASSWORD_LENGTH {
            return Err(ArmadaError::IllegalArgument(format!(
                "password length must be between 1 and {} bytes",
                MAX_PASSWORD_LENGTH
            ))
            .into());
        }
        if self.users.contains_key(username) {
            return Err(
                ArmadaError::IllegalArgument(format!("user '{}' already exists", username)).into(),
            );
        }

        let password_hash = bcrypt::hash(password, 10u32)
            .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?;
        self.users.insert(
            username.to_string(),
            User {
                username: username.to_string(),
                password_hash,
                permissions,
            },
        );

        Ok(())
    }

    pub fn change_password(&self, username: &str, new_password: &str) -> anyhow::Result<()> {
        if new_password.is_empty() || new_password.len() > MAX_PASSWORD_LENGTH {
            return Err(ArmadaError::IllegalArgument(format!(
                "password length must be between 1 and {} bytes",
                MAX_PASSWORD_LENGTH
            ))
            .into());
        }

        match self.users.get_mut(username) {
            Some(mut user) => {
                user.password_hash = bcrypt::hash(new_password, 10u32)
                    .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?;
                Ok(())
            }
            None => Err(ArmadaError::UserNotExist(username.to_string()).into()),
        }
    }

    pub fn delete_user(&self, username: &str) -> anyhow::Result<()> {
        match self.users.remove(username) {
            Some(_) => {
                permission::invalidate_cache_for_user(username);
                Ok(())
            }
            None => Err(ArmadaError::UserNotExist(username.to_string()).into()),
        }
    }

    pub fn grant_permission(&self, username: &str, permission_name: &str) -> anyhow::Result<()> {
        match self.users.get_mut(username) {
            Some(mut user) => {
                user.permissions.insert(permission_name.to_string());
                permission::invalidate_cache_for_user(username);
                Ok(())
            }
            None => Err(ArmadaError::UserNotExist(username.to_string()).into()),
        }
    }

    pub fn revoke_permission(&self, username: &str, permission_name: &str) -> anyhow::Result<()> {
        match self.users.get_mut(username) {
            Some(mut user) => {
                user.permissions.remove(permission_name);
                permission::invalidate_cache_for_user(username);
                Ok(())
            }
            None => Err(ArmadaError::UserNotExist(username.to_string()).into()),
        }
    }

    pub fn user(&self, username: &str) -> Option<User> {
        self.users.get(username).map(|entry| entry.value().clone())
    }

    pub fn users(&self) -> Vec<User> {
        let mut users: Vec<User> = self
            .users
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        users
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Replace the whole store with a synced snapshot from another node.
    pub fn replace_all(&self, users: Vec<User>) {
        let incoming: Vec<String> = users.iter().map(|u| u.username.clone()).collect();
        self.users.retain(|username, _| incoming.contains(username));

        for user in users {
            permission::invalidate_cache_for_user(&user.username);
            self.users.insert(user.username.clone(), user);
        }
    }

    pub fn authenticate(&self, username: &str, password: &str) -> AuthResult<User> {
        let Some(user) = self.user(username) else {
            return AuthResult::failed(INVALID_CREDENTIAL_MESSAGE);
        };

        let bcrypt_result = bcrypt::verify(password, &user.password_hash).unwrap_or(false);
        if bcrypt_result {
            AuthResult::Succeeded(user)
        } else {
            AuthResult::failed(INVALID_CREDENTIAL_MESSAGE)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_authenticate() {
        let manager = UserManager::new();
        manager
            .create_user("derklaro", "hunter2", BTreeSet::new())
            .unwrap();

        assert!(manager.authenticate("derklaro", "hunter2").is_succeeded());
        assert!(!manager.authenticate("derklaro", "wrong").is_succeeded());
        assert!(!manager.authenticate("nobody", "hunter2").is_succeeded());
    }

    #[test]
    fn test_create_rejects_bad_input() {
        let manager = UserManager::new();

        assert!(manager.create_user("", "pw", BTreeSet::new()).is_err());
        assert!(
            manager
                .create_user("bad name", "pw", BTreeSet::new())
                .is_err()
        );
        assert!(manager.create_user("ok", "", BTreeSet::new()).is_err());
        let long_password = "x".repeat(MAX_PASSWORD_LENGTH + 1);
        assert!(
            manager
                .create_user("ok", &long_password, BTreeSet::new())
                .is_err()
        );

        manager.create_user("ok", "pw", BTreeSet::new()).unwrap();
        assert!(manager.create_user("ok", "pw2", BTreeSet::new()).is_err());
    }

    #[test]
    fn test_default_admin_generates_password_once() {
        let manager = UserManager::new();

        let generated = manager.ensure_default_admin("admin", None).unwrap();
        let password = generated.expect("first call should generate a password");
        assert_eq!(password.len(), GENERATED_PASSWORD_LENGTH);
        assert!(manager.authenticate("admin", &password).is_succeeded());
        assert!(
            manager
                .user("admin")
                .unwrap()
                .permissions
                .contains(GLOBAL_PERMISSION)
        );

        // Second call must not touch the existing account
        assert!(
            manager
                .ensure_default_admin("admin", None)
                .unwrap()
                .is_none()
        );
        assert!(manager.authenticate("admin", &password).is_succeeded());
    }

    #[test]
    fn test_default_admin_uses_configured_password() {
        let manager = UserManager::new();

        let generated = manager
            .ensure_default_admin("admin", Some("configured"))
            .unwrap();
        assert!(generated.is_none());
        assert!(manager.authenticate("admin", "configured").is_succeeded());
    }

    #[test]
    fn test_change_password() {
        let manager = UserManager::new();
        manager
            .create_user("derklaro", "hunter2", BTreeSet::new())
            .unwrap();

        manager.change_password("derklaro", "hunter3").unwrap();
        assert!(!manager.authenticate("derklaro", "hunter2").is_succeeded());
        assert!(manager.authenticate("derklaro", "hunter3").is_succeeded());

        assert!(manager.change_password("derklaro", "").is_err());
        assert!(manager.change_password("ghost", "pw").is_err());
    }

    #[test]
    fn test_grant_and_revoke_permission() {
        let manager = UserManager::new();
        manager
            .create_user("operator", "pw", BTreeSet::new())
            .unwrap();

        manager
            .grant_permission("operator", "cluster.refresh")
            .unwrap();
        assert!(
            manager
                .user("operator")
                .unwrap()
                .has_permission("cluster.refresh")
        );

        manager
            .revoke_permission("operator", "cluster.refresh")
            .unwrap();
        assert!(
            !manager
                .user("operator")
                .unwrap()
                .has_permission("cluster.refresh")
        );

        assert!(manager.grant_permission("ghost", "x").is_err());
    }

    #[test]
    fn test_replace_all_syncs_store() {
        let manager = UserManager::new();
        manager
            .create_user("stale", "pw", BTreeSet::new())
            .unwrap();

        let incoming = vec![User {
            username: "synced".to_string(),
            password_hash: bcrypt::hash("pw", 10u32).unwrap(),
            permissions: BTreeSet::new(),
        }];
        manager.replace_all(incoming);

        assert!(manager.user("stale").is_none());
        assert!(manager.user("synced").is_some());
        assert_eq!(manager.user_count(), 1);
    }
}
