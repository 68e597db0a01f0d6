//! Access resolution for Sift.
//!
//! The search path never trusts an index to be security-scoped: every
//! request first asks an [`AccessResolver`] which spaces the caller may
//! read, and results are filtered against that set before they leave the
//! aggregator.
//!
//! - [`AccessResolver`]: the collaborator trait
//! - [`StaticAccessResolver`]: grants from configuration, mutable at runtime
//! - [`AccessConfig`]: the `[access]` configuration section

pub mod resolver;
pub mod static_resolver;

pub use resolver::{AccessResolver, GrantSet};
pub use static_resolver::{AccessConfig, StaticAccessResolver};
