pub mod context;
pub mod error;
pub mod logging;
pub mod user;
pub mod user_usecase;

pub use context::{RepositoryLocator, RequestContext};
pub use error::AppError;
pub use user::{User, UserId};
pub use user_usecase::UserUseCase;
