//! Key/value cache session tracking.
//!
//! A session identifies one logical conversation whose cache persists across
//! pipeline calls. Each engine owns its own [`SessionStore`]; the two stores
//! holding the same session id are reconciled by [`synchronize`] before either
//! engine performs dependent work.

mod store;
mod sync;

pub use store::{CacheClock, CacheEntry, SessionId, SessionStore};
pub use sync::synchronize;
