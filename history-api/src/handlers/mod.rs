//! HTTP handlers for the history API.

pub mod conversations;
