//! Policy module - What gets cached, and when cache or network answers
//!
//! Provides:
//! - classify: URL path classification (audio / image / static / other)
//! - engine: the cache policy engine handling install/activate/fetch/message

pub mod classify;
pub mod engine;
