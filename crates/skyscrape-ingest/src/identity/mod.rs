//! Author identity resolution.
//!
//! ```text
//! HandleResolver ──► HandleCache ──(miss)──► IdentityBackend
//!                                              └─ HttpResolver (PLC / did:web)
//! ```

mod backend;
mod cache;
mod resolver;

pub use backend::{HttpResolver, HttpResolverConfig, IdentityBackend, ResolvedIdentity};
pub use cache::{CacheStats, HandleCache};
pub use resolver::HandleResolver;
