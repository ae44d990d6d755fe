pub mod cache_repository;
pub mod user_repository;

pub use cache_repository::{CACHE_TTL, CacheError, CacheLookup, CacheRepository, CacheResult};
pub use user_repository::{
    USER_LIST_LIMIT, UserRepository, UserRepositoryError, UserRepositoryResult,
};
