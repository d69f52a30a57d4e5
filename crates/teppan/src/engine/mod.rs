//! Engine adapter seam.
//!
//! The numeric inference engine is an external collaborator: it consumes a
//! fixed-shape tensor set plus a session key and returns a next-token/logits
//! pair. The orchestration layer never inspects its internals; everything it
//! needs is expressed by the [`Engine`] trait, the [`ModelProfile`]
//! introspection answers, and the [`EngineBuilder`] used at pipeline
//! construction time.

mod core_trait;

pub use core_trait::*;

#[cfg(test)]
/// Mock engine implementation.
///
/// Emits scripted tokens and tracks cache writes through a real
/// [`crate::session::SessionStore`].
pub(crate) mod mock;
