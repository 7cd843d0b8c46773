//! Submitter lookup: which users get the priority class.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::instrument;

use typhoon_core::UserId;

use crate::db::{StoreError, map_sqlx_error};

#[async_trait]
pub trait UserDirectory: Send + Sync + 'static {
    /// The user's priority flag, or `None` for an unknown user.
    async fn priority_of(&self, user_id: UserId) -> Result<Option<bool>, StoreError>;
}

#[async_trait]
impl<T> UserDirectory for Arc<T>
where
    T: UserDirectory + ?Sized,
{
    async fn priority_of(&self, user_id: UserId) -> Result<Option<bool>, StoreError> {
        (**self).priority_of(user_id).await
    }
}

#[derive(Debug, Default)]
pub struct InMemoryUserDirectory {
    users: RwLock<HashMap<UserId, bool>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn insert(&self, user_id: UserId, priority: bool) -> Result<(), StoreError> {
        let mut users = self
            .users
            .write()
            .map_err(|_| StoreError::poisoned("user directory"))?;
        users.insert(user_id, priority);
        Ok(())
    }

    pub fn with_user(self, user_id: UserId, priority: bool) -> Self {
        if let Ok(mut users) = self.users.write() {
            users.insert(user_id, priority);
        }
        self
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn priority_of(&self, user_id: UserId) -> Result<Option<bool>, StoreError> {
        let users = self
            .users
            .read()
            .map_err(|_| StoreError::poisoned("user directory"))?;
        Ok(users.get(&user_id).copied())
    }
}

/// Reads `"user".priority`.
#[derive(Debug, Clone)]
pub struct PostgresUserDirectory {
    pool: Arc<PgPool>,
}

impl PostgresUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl UserDirectory for PostgresUserDirectory {
    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn priority_of(&self, user_id: UserId) -> Result<Option<bool>, StoreError> {
        let row = sqlx::query(r#"SELECT priority FROM "user" WHERE id = $1"#)
            .bind(user_id.get())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("user_priority", e))?;

        row.map(|row| {
            row.try_get::<bool, _>("priority")
                .map_err(|e| StoreError::Storage(format!("failed to decode user row: {}", e)))
        })
        .transpose()
    }
}
