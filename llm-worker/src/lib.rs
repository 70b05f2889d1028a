//! LLM worker: consumes `user-messages`, generates streaming responses with
//! tool support, updates the hot cache and fans out completion events.

pub mod config;
pub mod generator;
pub mod memory;
pub mod prompt;
pub mod tools;
