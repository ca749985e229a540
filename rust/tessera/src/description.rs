//! Per-method descriptions consumed by the breakdown builders.

use std::sync::Arc;

use tessera_core::{
    BoxFuture, Cardinality, Deserializer, Message, RpcContext, RpcError, Serializer, Streaming,
};

/// Application behavior for a unary-unary method.
pub type UnaryUnaryBehavior =
    Arc<dyn Fn(Message, RpcContext) -> BoxFuture<'static, Result<Message, RpcError>> + Send + Sync>;

/// Application behavior for a unary-stream method.
pub type UnaryStreamBehavior = Arc<dyn Fn(Message, RpcContext) -> Streaming<Message> + Send + Sync>;

/// Application behavior for a stream-unary method.
pub type StreamUnaryBehavior = Arc<
    dyn Fn(Streaming<Message>, RpcContext) -> BoxFuture<'static, Result<Message, RpcError>>
        + Send
        + Sync,
>;

/// Application behavior for a stream-stream method.
pub type StreamStreamBehavior =
    Arc<dyn Fn(Streaming<Message>, RpcContext) -> Streaming<Message> + Send + Sync>;

/// Invocation-side view of an RPC method.
pub trait InvocationDescription {
    fn cardinality(&self) -> Cardinality;

    /// Serializes request values before they are sent.
    fn serialize_request(&self) -> Serializer;

    /// Deserializes response bytes as they arrive.
    fn deserialize_response(&self) -> Deserializer;
}

/// Service-side view of an RPC method.
///
/// Only the behavior matching [`cardinality`](Self::cardinality) is ever
/// consulted; the other three may be left at their default of `None`.
pub trait ServiceDescription {
    fn cardinality(&self) -> Cardinality;

    fn service_unary_unary(&self) -> Option<UnaryUnaryBehavior> {
        None
    }

    fn service_unary_stream(&self) -> Option<UnaryStreamBehavior> {
        None
    }

    fn service_stream_unary(&self) -> Option<StreamUnaryBehavior> {
        None
    }

    fn service_stream_stream(&self) -> Option<StreamStreamBehavior> {
        None
    }

    /// Deserializes request bytes as they arrive.
    fn deserialize_request(&self) -> Deserializer;

    /// Serializes response values before they are sent.
    fn serialize_response(&self) -> Serializer;
}

// Descriptions are usually held behind a pointer so one map can mix
// concrete description types.

impl<T: InvocationDescription + ?Sized> InvocationDescription for Arc<T> {
    fn cardinality(&self) -> Cardinality {
        (**self).cardinality()
    }

    fn serialize_request(&self) -> Serializer {
        (**self).serialize_request()
    }

    fn deserialize_response(&self) -> Deserializer {
        (**self).deserialize_response()
    }
}

impl<T: InvocationDescription + ?Sized> InvocationDescription for Box<T> {
    fn cardinality(&self) -> Cardinality {
        (**self).cardinality()
    }

    fn serialize_request(&self) -> Serializer {
        (**self).serialize_request()
    }

    fn deserialize_response(&self) -> Deserializer {
        (**self).deserialize_response()
    }
}

impl<T: ServiceDescription + ?Sized> ServiceDescription for Arc<T> {
    fn cardinality(&self) -> Cardinality {
        (**self).cardinality()
    }

    fn service_unary_unary(&self) -> Option<UnaryUnaryBehavior> {
        (**self).service_unary_unary()
    }

    fn service_unary_stream(&self) -> Option<UnaryStreamBehavior> {
        (**self).service_unary_stream()
    }

    fn service_stream_unary(&self) -> Option<StreamUnaryBehavior> {
        (**self).service_stream_unary()
    }

    fn service_stream_stream(&self) -> Option<StreamStreamBehavior> {
        (**self).service_stream_stream()
    }

    fn deserialize_request(&self) -> Deserializer {
        (**self).deserialize_request()
    }

    fn serialize_response(&self) -> Serializer {
        (**self).serialize_response()
    }
}

impl<T: ServiceDescription + ?Sized> ServiceDescription for Box<T> {
    fn cardinality(&self) -> Cardinality {
        (**self).cardinality()
    }

    fn service_unary_unary(&self) -> Option<UnaryUnaryBehavior> {
        (**self).service_unary_unary()
    }

    fn service_unary_stream(&self) -> Option<UnaryStreamBehavior> {
        (**self).service_unary_stream()
    }

    fn service_stream_unary(&self) -> Option<StreamUnaryBehavior> {
        (**self).service_stream_unary()
    }

    fn service_stream_stream(&self) -> Option<StreamStreamBehavior> {
        (**self).service_stream_stream()
    }

    fn deserialize_request(&self) -> Deserializer {
        (**self).deserialize_request()
    }

    fn serialize_response(&self) -> Serializer {
        (**self).serialize_response()
    }
}
