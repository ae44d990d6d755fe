//! In-process user store.
//!
//! Stands in for the relational database: ids come from an auto-increment
//! counter starting at 1 and email addresses are unique.
use std::sync::{
    Arc,
    atomic::{AtomicI64, Ordering},
};

use async_trait::async_trait;
use scc::HashMap;

use crate::{
    core::{
        context::RequestContext,
        logging::{self, Layer},
        user::{User, UserId},
    },
    ports::{USER_LIST_LIMIT, UserRepository, UserRepositoryError, UserRepositoryResult},
};

#[derive(Clone)]
pub struct MemoryUserRepository {
    users: Arc<HashMap<UserId, User>>,
    emails: Arc<HashMap<String, UserId>>,
    next_id: Arc<AtomicI64>,
}

impl MemoryUserRepository {
    pub fn new() -> Self {
        Self {
            users: Arc::new(HashMap::new()),
            emails: Arc::new(HashMap::new()),
            next_id: Arc::new(AtomicI64::new(1)),
        }
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl Default for MemoryUserRepository {
    fn default() -> Self {
        Self::new()
    }
}

fn ensure_active(ctx: &RequestContext) -> UserRepositoryResult<()> {
    if ctx.is_cancelled() {
        return Err(UserRepositoryError::Cancelled);
    }
    Ok(())
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    fn backend(&self) -> &'static str {
        "memory_db"
    }

    async fn create(&self, ctx: &RequestContext, user: User) -> UserRepositoryResult<User> {
        ensure_active(ctx)?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if self.emails.insert_async(user.email.clone(), id).await.is_err() {
            return Err(UserRepositoryError::DuplicateEmail(user.email));
        }

        let stored = User { id, ..user };
        if self.users.insert_async(id, stored.clone()).await.is_err() {
            self.emails.remove_async(&stored.email).await;
            return Err(UserRepositoryError::Backend(format!(
                "id {id} allocated twice"
            )));
        }

        logging::info(
            ctx,
            Layer::Repository,
            format_args!("INSERT INTO users (name, email) -> id {id}"),
        );
        Ok(stored)
    }

    async fn find_by_id(&self, ctx: &RequestContext, id: UserId) -> UserRepositoryResult<User> {
        ensure_active(ctx)?;

        self.users
            .get_async(&id)
            .await
            .map(|entry| entry.get().clone())
            .ok_or(UserRepositoryError::NotFound(id))
    }

    async fn find_all(&self, ctx: &RequestContext) -> UserRepositoryResult<Vec<User>> {
        ensure_active(ctx)?;

        let mut users = Vec::with_capacity(self.users.len().min(USER_LIST_LIMIT));
        let users_ref = &mut users;
        self.users
            .retain_async(|_, user| {
                users_ref.push(user.clone());
                true
            })
            .await;

        // newest first; ids break ties between users created in the same instant
        users.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        users.truncate(USER_LIST_LIMIT);
        Ok(users)
    }
}
