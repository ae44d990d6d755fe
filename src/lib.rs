//! tracetour - a small user service instrumented end to end.
//!
//! tracetour serves a user API (create, fetch, list) backed by a relational
//! store port and a key-value cache port, and uses it to demonstrate
//! request-scoped observability: every request gets a root OpenTelemetry span,
//! a structured request logger and a [`core::RequestContext`] that carries both
//! (plus the repository locator and a cancellation token) through middleware,
//! handler, use case and repository layers.
//!
//! # Features
//! - Ordered middleware chain: trace root, panic recovery, logger, repository
//!   locator, CORS
//! - Panic recovery that always answers with one RFC 9457 Problem Details body
//!   and logs exactly one entry carrying the trace ids captured before the panic
//! - Tracing decorators for the user store and cache ports
//! - Cache-aside reads with best-effort cache population
//! - `notify` alerting flag on every error log and error response
//! - OTLP export of spans and metrics, JSON or pretty logs
//! - Graceful shutdown with a bounded drain
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use tracetour::adapters::{AppState, CorsPolicy, build_router, in_memory_locator};
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let state = AppState::new(Arc::new(in_memory_locator(false)), None, CorsPolicy::default());
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
//! axum::serve(listener, build_router(state)).await?;
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! The crate separates **ports** (traits) from **adapters** (implementations)
//! while keeping business logic inside `core`.
//!
//! # Error Handling
//! Library code returns typed errors (`AppError`, `UserRepositoryError`,
//! `CacheError`, `ValidationError`); process setup returns `eyre::Result<T>`
//! with `WrapErr` context.
//!
//! # Concurrency & Data Structures
//! The in-memory stores use `scc::HashMap` for shared mutable maps.
pub mod config;
pub mod metrics;
pub mod ports;
pub mod telemetry;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

pub use crate::{
    adapters::{AppState, build_router},
    core::{AppError, RepositoryLocator, RequestContext, UserUseCase},
    utils::GracefulShutdown,
};
