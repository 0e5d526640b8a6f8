pub mod types;
pub mod error;
pub mod config;
pub mod redis;

pub use self::types::*;
pub use self::error::*;
pub use self::config::*;
pub use self::redis::RedisService;
