use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use time::OffsetDateTime;

use super::model::{NewUser, User, UserField};
use super::repo::{StoreError, UserStore, EMAIL_UNIQUE_CONSTRAINT, USERNAME_UNIQUE_CONSTRAINT};

/// Process-local store enforcing the same uniqueness rules as the `users` table.
#[derive(Debug, Default)]
pub struct InMemoryUserStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: i64,
    rows: BTreeMap<i64, User>,
}

impl Inner {
    fn conflict(&self, id: Option<i64>, username: &str, email: &str) -> Option<StoreError> {
        let others = self.rows.values().filter(|u| Some(u.id) != id);
        for other in others {
            if other.email == email {
                return Some(StoreError::UniqueViolation {
                    constraint: EMAIL_UNIQUE_CONSTRAINT.into(),
                });
            }
            if other.username == username {
                return Some(StoreError::UniqueViolation {
                    constraint: USERNAME_UNIQUE_CONSTRAINT.into(),
                });
            }
        }
        None
    }
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn len(&self) -> usize {
        self.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self.lock().rows.values().find(|u| u.email == email).cloned())
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<User>, StoreError> {
        Ok(self.lock().rows.get(&id).cloned())
    }

    async fn create(&self, new_user: NewUser) -> Result<User, StoreError> {
        let mut inner = self.lock();
        if let Some(err) = inner.conflict(None, &new_user.username, &new_user.email) {
            return Err(err);
        }
        inner.next_id += 1;
        let user = User {
            id: inner.next_id,
            username: new_user.username,
            email: new_user.email,
            password_hash: new_user.password_hash,
            role: new_user.role,
            verified: false,
            created_at: OffsetDateTime::now_utc(),
        };
        inner.rows.insert(user.id, user.clone());
        Ok(user)
    }

    async fn save(&self, user: &User) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        if let Some(err) = inner.conflict(Some(user.id), &user.username, &user.email) {
            return Err(err);
        }
        let Some(row) = inner.rows.get_mut(&user.id) else {
            return Ok(false);
        };
        row.username = user.username.clone();
        row.email = user.email.clone();
        row.password_hash = user.password_hash.clone();
        row.role = user.role;
        row.verified = user.verified;
        Ok(true)
    }

    async fn update_field(&self, email: &str, field: UserField) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        let Some(row) = inner.rows.values_mut().find(|u| u.email == email) else {
            return Ok(false);
        };
        match field {
            UserField::PasswordHash(hash) => row.password_hash = hash,
            UserField::Verified(verified) => row.verified = verified,
        }
        Ok(true)
    }

    async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        Ok(self.lock().rows.remove(&id).is_some())
    }
}
