//! Sift search services.
//!
//! Two services answer queries:
//!
//! - An [`IndexProvider`] searches one space and rebuilds spaces on demand.
//!   [`LocalIndexProvider`] serves in-process indices,
//!   [`RemoteIndexProvider`] forwards to another Sift instance.
//! - The [`SearchProvider`] resolves the caller's grants, fans a query out
//!   to the provider of each granted space (picked by a [`ProviderRouter`])
//!   and merges the answers into one globally ordered, paginated result.
//!
//! [`http`] exposes both over HTTP.

pub mod http;
pub mod mock;
pub mod provider;
pub mod remote;
pub mod router;
pub mod search;

pub use http::{ApiError, Server, ServiceState, USER_HEADER, router as http_router, serve};
pub use mock::MockIndexProvider;
pub use provider::{IndexProvider, LocalIndexProvider};
pub use remote::{INTERNAL_HEADER, RemoteIndexProvider};
pub use router::ProviderRouter;
pub use search::SearchProvider;
