//! An abstraction layer for the inference servers the relay talks to.
//!
//! This crate establishes a unified protocol for the relay to interact
//! with an upstream chat-completion service, so that the relay can be
//! pointed at any supported server (or a scripted fake in tests)
//! without modifying the core codebase.
//!
//! Types in this crate don't define any behavior, instead they are the
//! constraints that the implementors should adhere to.

#![deny(missing_docs)]

mod error;
mod provider;
mod request;
mod response;

pub use error::*;
pub use provider::*;
pub use request::*;
pub use response::*;
