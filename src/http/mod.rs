//! HTTP fetch layer
//!
//! Provides the remote API collaborator and the throttled fetcher that every
//! higher component uses to talk to it.
//!
//! # Features
//!
//! - **Remote API seam**: `RemoteApi` trait, implemented over reqwest by `HttpApi`
//! - **Throttling**: fixed-interval permits using governor
//! - **Typed outcomes**: `FetchError` separates fatal from recoverable failures
//! - **Pagination**: `next`-link listings via `Page`

mod client;
mod fetcher;
mod page;
mod rate_limit;

pub use client::{ApiError, ApiResult, HttpApi, HttpApiConfig, RemoteApi};
pub use fetcher::{
    FetchError, FetchErrorKind, FetchResult, FetchStats, RetryPolicy, ThrottledFetcher,
};
pub use page::{extract_records, Page, PageFormat};
pub use rate_limit::{RateLimitConfig, Throttle};

#[cfg(test)]
pub(crate) mod mock;
