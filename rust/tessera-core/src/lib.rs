#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]

mod cardinality;
mod context;
mod error;
mod implementation;
mod message;

pub use cardinality::*;
pub use context::*;
pub use error::*;
pub use implementation::*;
pub use message::*;

// Re-export the future type used by every unary calling convention.
pub use futures_core::future::BoxFuture;
