//! HTTP handlers for the front service.

pub mod chat;
pub mod session;
pub mod stream;
