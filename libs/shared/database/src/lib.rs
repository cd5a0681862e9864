pub mod cache;
pub mod supabase;

pub use cache::{create_redis_pool, CacheError, CacheService, InMemoryCache, RedisCache};
pub use supabase::{SupabaseClient, SupabaseError};
pub use deadpool_redis::Pool as RedisPool;
