use async_trait::async_trait;
use thiserror::Error;

use crate::core::{
    context::RequestContext,
    user::{User, UserId},
};

/// Maximum number of users returned by [`UserRepository::find_all`].
pub const USER_LIST_LIMIT: usize = 100;

/// Error type for user store operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum UserRepositoryError {
    /// No user exists with the requested id
    #[error("user {0} not found")]
    NotFound(UserId),

    /// Another user already owns this email address
    #[error("user with email '{0}' already exists")]
    DuplicateEmail(String),

    /// The backing store could not complete the operation
    #[error("user store failure: {0}")]
    Backend(String),

    /// The request owning this operation was cancelled before it ran
    #[error("user store operation cancelled")]
    Cancelled,
}

/// Result type alias for user store operations
pub type UserRepositoryResult<T> = Result<T, UserRepositoryError>;

/// UserRepository defines the port (interface) for the relational user store
#[async_trait]
pub trait UserRepository: Send + Sync + 'static {
    /// Short identifier of the backing store, used to name spans (`<backend>.<operation>`).
    fn backend(&self) -> &'static str;

    /// Persist a new user.
    ///
    /// # Arguments
    /// * `ctx` - The request context
    /// * `user` - The user to store; its `id` is ignored
    ///
    /// # Returns
    /// The stored user with the id assigned by the store
    async fn create(&self, ctx: &RequestContext, user: User) -> UserRepositoryResult<User>;

    /// Look a user up by id, failing with [`UserRepositoryError::NotFound`] when absent.
    async fn find_by_id(&self, ctx: &RequestContext, id: UserId) -> UserRepositoryResult<User>;

    /// List users ordered by creation time, newest first, capped at [`USER_LIST_LIMIT`].
    async fn find_all(&self, ctx: &RequestContext) -> UserRepositoryResult<Vec<User>>;
}
