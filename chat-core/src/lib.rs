//! Shared library for the scalable-chat services.
//!
//! Carries the pieces every service needs: configuration loading, the common
//! error type, tracing setup, the domain models, and the collaborator clients
//! (message bus, hot cache, document store, LLM provider).

pub mod bus;
pub mod cache;
pub mod config;
pub mod error;
pub mod llm;
pub mod models;
pub mod observability;
pub mod retry;
pub mod store;

pub use error::AppError;
