#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]

mod breakdown;
mod description;
pub mod utilities;

pub use breakdown::*;
pub use description::*;

// Re-export the core types so users only need one dependency.
pub use tessera_core;
pub use tessera_core::{
    Abortion, AbortionKind, BoxFuture, CallContext, Cardinality, DecodeError, Deserializer,
    EncodeError, ErrorCode, Message, MethodImplementation, MethodRequest, MethodResponse,
    RpcContext, RpcError, Serializer, Streaming, UnknownCardinality, message, rpc_context,
};
