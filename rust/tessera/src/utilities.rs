//! Typed constructors for method descriptions.
//!
//! Behaviors and codecs are written against concrete request and response
//! types; the constructors erase them into [`Message`] so methods with
//! unrelated types can share one description map. A message of the wrong
//! type surfaces as `InvalidArgument` (requests) or as an [`EncodeError`]
//! naming the expected type (serializers).
//!
//! ```ignore
//! use tessera::utilities::unary_unary_rpc_method;
//!
//! let get = unary_unary_rpc_method(
//!     |id: u32, _ctx| async move { Ok(format!("item {id}")) },
//!     encode_u32, decode_u32, encode_string, decode_string,
//! );
//! ```

use std::any::{Any, type_name};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::{FutureExt, StreamExt, TryFutureExt, future, stream};
use tessera_core::{
    Cardinality, DecodeError, Deserializer, EncodeError, Message, RpcContext, RpcError, Serializer,
    Streaming, message,
};

use crate::{
    InvocationDescription, ServiceDescription, StreamStreamBehavior, StreamUnaryBehavior,
    UnaryStreamBehavior, UnaryUnaryBehavior,
};

#[derive(Clone)]
enum Behavior {
    UnaryUnary(UnaryUnaryBehavior),
    UnaryStream(UnaryStreamBehavior),
    StreamUnary(StreamUnaryBehavior),
    StreamStream(StreamStreamBehavior),
}

/// A method description built from typed behavior and codecs.
///
/// Implements both [`InvocationDescription`] and [`ServiceDescription`], so
/// the same map can be handed to both breakdown builders. Descriptions built
/// for one side only carry codecs that reject every value on the other.
#[derive(Clone)]
pub struct RpcMethod {
    cardinality: Cardinality,
    behavior: Option<Behavior>,
    request_serializer: Serializer,
    request_deserializer: Deserializer,
    response_serializer: Serializer,
    response_deserializer: Deserializer,
}

impl RpcMethod {
    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    /// Whether this description carries service behavior.
    pub fn has_behavior(&self) -> bool {
        self.behavior.is_some()
    }

    fn service(
        behavior: Behavior,
        request_deserializer: Deserializer,
        response_serializer: Serializer,
    ) -> Self {
        let cardinality = match behavior {
            Behavior::UnaryUnary(_) => Cardinality::UnaryUnary,
            Behavior::UnaryStream(_) => Cardinality::UnaryStream,
            Behavior::StreamUnary(_) => Cardinality::StreamUnary,
            Behavior::StreamStream(_) => Cardinality::StreamStream,
        };
        Self {
            cardinality,
            behavior: Some(behavior),
            request_serializer: unavailable_serializer("request serializer"),
            request_deserializer,
            response_serializer,
            response_deserializer: unavailable_deserializer("response deserializer"),
        }
    }

    fn with_invocation_hooks(
        mut self,
        request_serializer: Serializer,
        response_deserializer: Deserializer,
    ) -> Self {
        self.request_serializer = request_serializer;
        self.response_deserializer = response_deserializer;
        self
    }
}

impl fmt::Debug for RpcMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcMethod")
            .field("cardinality", &self.cardinality)
            .field("has_behavior", &self.has_behavior())
            .finish_non_exhaustive()
    }
}

impl InvocationDescription for RpcMethod {
    fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    fn serialize_request(&self) -> Serializer {
        self.request_serializer.clone()
    }

    fn deserialize_response(&self) -> Deserializer {
        self.response_deserializer.clone()
    }
}

impl ServiceDescription for RpcMethod {
    fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    fn service_unary_unary(&self) -> Option<UnaryUnaryBehavior> {
        match &self.behavior {
            Some(Behavior::UnaryUnary(b)) => Some(b.clone()),
            _ => None,
        }
    }

    fn service_unary_stream(&self) -> Option<UnaryStreamBehavior> {
        match &self.behavior {
            Some(Behavior::UnaryStream(b)) => Some(b.clone()),
            _ => None,
        }
    }

    fn service_stream_unary(&self) -> Option<StreamUnaryBehavior> {
        match &self.behavior {
            Some(Behavior::StreamUnary(b)) => Some(b.clone()),
            _ => None,
        }
    }

    fn service_stream_stream(&self) -> Option<StreamStreamBehavior> {
        match &self.behavior {
            Some(Behavior::StreamStream(b)) => Some(b.clone()),
            _ => None,
        }
    }

    fn deserialize_request(&self) -> Deserializer {
        self.request_deserializer.clone()
    }

    fn serialize_response(&self) -> Serializer {
        self.response_serializer.clone()
    }
}

// ============================================================================
// Both sides
// ============================================================================

/// Describe a unary-unary method for both the invoking and servicing side.
pub fn unary_unary_rpc_method<Req, Resp, B, Fut>(
    behavior: B,
    request_serializer: impl Fn(&Req) -> Result<Bytes, EncodeError> + Send + Sync + 'static,
    request_deserializer: impl Fn(&[u8]) -> Result<Req, DecodeError> + Send + Sync + 'static,
    response_serializer: impl Fn(&Resp) -> Result<Bytes, EncodeError> + Send + Sync + 'static,
    response_deserializer: impl Fn(&[u8]) -> Result<Resp, DecodeError> + Send + Sync + 'static,
) -> RpcMethod
where
    Req: Any + Send,
    Resp: Any + Send,
    B: Fn(Req, RpcContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Resp, RpcError>> + Send + 'static,
{
    unary_unary_service_description(behavior, request_deserializer, response_serializer)
        .with_invocation_hooks(
            erase_serializer(request_serializer),
            erase_deserializer(response_deserializer),
        )
}

/// Describe a unary-stream method for both the invoking and servicing side.
pub fn unary_stream_rpc_method<Req, Resp, B>(
    behavior: B,
    request_serializer: impl Fn(&Req) -> Result<Bytes, EncodeError> + Send + Sync + 'static,
    request_deserializer: impl Fn(&[u8]) -> Result<Req, DecodeError> + Send + Sync + 'static,
    response_serializer: impl Fn(&Resp) -> Result<Bytes, EncodeError> + Send + Sync + 'static,
    response_deserializer: impl Fn(&[u8]) -> Result<Resp, DecodeError> + Send + Sync + 'static,
) -> RpcMethod
where
    Req: Any + Send,
    Resp: Any + Send,
    B: Fn(Req, RpcContext) -> Streaming<Resp> + Send + Sync + 'static,
{
    unary_stream_service_description(behavior, request_deserializer, response_serializer)
        .with_invocation_hooks(
            erase_serializer(request_serializer),
            erase_deserializer(response_deserializer),
        )
}

/// Describe a stream-unary method for both the invoking and servicing side.
pub fn stream_unary_rpc_method<Req, Resp, B, Fut>(
    behavior: B,
    request_serializer: impl Fn(&Req) -> Result<Bytes, EncodeError> + Send + Sync + 'static,
    request_deserializer: impl Fn(&[u8]) -> Result<Req, DecodeError> + Send + Sync + 'static,
    response_serializer: impl Fn(&Resp) -> Result<Bytes, EncodeError> + Send + Sync + 'static,
    response_deserializer: impl Fn(&[u8]) -> Result<Resp, DecodeError> + Send + Sync + 'static,
) -> RpcMethod
where
    Req: Any + Send,
    Resp: Any + Send,
    B: Fn(Streaming<Req>, RpcContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Resp, RpcError>> + Send + 'static,
{
    stream_unary_service_description(behavior, request_deserializer, response_serializer)
        .with_invocation_hooks(
            erase_serializer(request_serializer),
            erase_deserializer(response_deserializer),
        )
}

/// Describe a stream-stream method for both the invoking and servicing side.
pub fn stream_stream_rpc_method<Req, Resp, B>(
    behavior: B,
    request_serializer: impl Fn(&Req) -> Result<Bytes, EncodeError> + Send + Sync + 'static,
    request_deserializer: impl Fn(&[u8]) -> Result<Req, DecodeError> + Send + Sync + 'static,
    response_serializer: impl Fn(&Resp) -> Result<Bytes, EncodeError> + Send + Sync + 'static,
    response_deserializer: impl Fn(&[u8]) -> Result<Resp, DecodeError> + Send + Sync + 'static,
) -> RpcMethod
where
    Req: Any + Send,
    Resp: Any + Send,
    B: Fn(Streaming<Req>, RpcContext) -> Streaming<Resp> + Send + Sync + 'static,
{
    stream_stream_service_description(behavior, request_deserializer, response_serializer)
        .with_invocation_hooks(
            erase_serializer(request_serializer),
            erase_deserializer(response_deserializer),
        )
}

// ============================================================================
// Invocation side only
// ============================================================================

/// Describe a method as seen by callers only.
///
/// The result has no service behavior; handing it to
/// [`break_down_service`](crate::break_down_service) fails.
pub fn invocation_description<Req, Resp>(
    cardinality: Cardinality,
    request_serializer: impl Fn(&Req) -> Result<Bytes, EncodeError> + Send + Sync + 'static,
    response_deserializer: impl Fn(&[u8]) -> Result<Resp, DecodeError> + Send + Sync + 'static,
) -> RpcMethod
where
    Req: Any + Send,
    Resp: Any + Send,
{
    RpcMethod {
        cardinality,
        behavior: None,
        request_serializer: erase_serializer(request_serializer),
        request_deserializer: unavailable_deserializer("request deserializer"),
        response_serializer: unavailable_serializer("response serializer"),
        response_deserializer: erase_deserializer(response_deserializer),
    }
}

// ============================================================================
// Service side only
// ============================================================================

/// Describe a unary-unary method as seen by the service only.
pub fn unary_unary_service_description<Req, Resp, B, Fut>(
    behavior: B,
    request_deserializer: impl Fn(&[u8]) -> Result<Req, DecodeError> + Send + Sync + 'static,
    response_serializer: impl Fn(&Resp) -> Result<Bytes, EncodeError> + Send + Sync + 'static,
) -> RpcMethod
where
    Req: Any + Send,
    Resp: Any + Send,
    B: Fn(Req, RpcContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Resp, RpcError>> + Send + 'static,
{
    let erased: UnaryUnaryBehavior =
        Arc::new(move |request: Message, ctx: RpcContext| match downcast::<Req>(request) {
            Ok(request) => behavior(request, ctx).map_ok(message::<Resp>).boxed(),
            Err(e) => future::ready(Err(e)).boxed(),
        });
    RpcMethod::service(
        Behavior::UnaryUnary(erased),
        erase_deserializer(request_deserializer),
        erase_serializer(response_serializer),
    )
}

/// Describe a unary-stream method as seen by the service only.
pub fn unary_stream_service_description<Req, Resp, B>(
    behavior: B,
    request_deserializer: impl Fn(&[u8]) -> Result<Req, DecodeError> + Send + Sync + 'static,
    response_serializer: impl Fn(&Resp) -> Result<Bytes, EncodeError> + Send + Sync + 'static,
) -> RpcMethod
where
    Req: Any + Send,
    Resp: Any + Send,
    B: Fn(Req, RpcContext) -> Streaming<Resp> + Send + Sync + 'static,
{
    let erased: UnaryStreamBehavior =
        Arc::new(move |request: Message, ctx: RpcContext| match downcast::<Req>(request) {
            Ok(request) => erase_responses(behavior(request, ctx)),
            Err(e) => failed_stream(e),
        });
    RpcMethod::service(
        Behavior::UnaryStream(erased),
        erase_deserializer(request_deserializer),
        erase_serializer(response_serializer),
    )
}

/// Describe a stream-unary method as seen by the service only.
pub fn stream_unary_service_description<Req, Resp, B, Fut>(
    behavior: B,
    request_deserializer: impl Fn(&[u8]) -> Result<Req, DecodeError> + Send + Sync + 'static,
    response_serializer: impl Fn(&Resp) -> Result<Bytes, EncodeError> + Send + Sync + 'static,
) -> RpcMethod
where
    Req: Any + Send,
    Resp: Any + Send,
    B: Fn(Streaming<Req>, RpcContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Resp, RpcError>> + Send + 'static,
{
    let erased: StreamUnaryBehavior =
        Arc::new(move |requests: Streaming<Message>, ctx: RpcContext| {
            behavior(typed_requests::<Req>(requests), ctx)
                .map_ok(message::<Resp>)
                .boxed()
        });
    RpcMethod::service(
        Behavior::StreamUnary(erased),
        erase_deserializer(request_deserializer),
        erase_serializer(response_serializer),
    )
}

/// Describe a stream-stream method as seen by the service only.
pub fn stream_stream_service_description<Req, Resp, B>(
    behavior: B,
    request_deserializer: impl Fn(&[u8]) -> Result<Req, DecodeError> + Send + Sync + 'static,
    response_serializer: impl Fn(&Resp) -> Result<Bytes, EncodeError> + Send + Sync + 'static,
) -> RpcMethod
where
    Req: Any + Send,
    Resp: Any + Send,
    B: Fn(Streaming<Req>, RpcContext) -> Streaming<Resp> + Send + Sync + 'static,
{
    let erased: StreamStreamBehavior =
        Arc::new(move |requests: Streaming<Message>, ctx: RpcContext| {
            erase_responses(behavior(typed_requests::<Req>(requests), ctx))
        });
    RpcMethod::service(
        Behavior::StreamStream(erased),
        erase_deserializer(request_deserializer),
        erase_serializer(response_serializer),
    )
}

// ============================================================================
// Erasure helpers
// ============================================================================

fn downcast<T: Any>(value: Message) -> Result<T, RpcError> {
    match value.downcast::<T>() {
        Ok(boxed) => Ok(*boxed),
        Err(_) => {
            let expected = type_name::<T>();
            Err(RpcError::invalid_argument(format!("expected a message of type {expected}")))
        }
    }
}

fn typed_requests<T: Any + Send>(requests: Streaming<Message>) -> Streaming<T> {
    Box::pin(requests.map(|item| item.and_then(downcast::<T>)))
}

fn erase_responses<T: Any + Send>(responses: Streaming<T>) -> Streaming<Message> {
    Box::pin(responses.map(|item| item.map(message::<T>)))
}

fn failed_stream(error: RpcError) -> Streaming<Message> {
    Box::pin(stream::once(future::ready(Err(error))))
}

fn erase_serializer<T: Any>(
    serialize: impl Fn(&T) -> Result<Bytes, EncodeError> + Send + Sync + 'static,
) -> Serializer {
    Arc::new(move |value: &Message| match (**value).downcast_ref::<T>() {
        Some(value) => serialize(value),
        None => Err(EncodeError::unexpected_type(type_name::<T>())),
    })
}

fn erase_deserializer<T: Any + Send>(
    deserialize: impl Fn(&[u8]) -> Result<T, DecodeError> + Send + Sync + 'static,
) -> Deserializer {
    Arc::new(move |bytes: &[u8]| deserialize(bytes).map(message::<T>))
}

fn unavailable_serializer(hook: &'static str) -> Serializer {
    Arc::new(move |_value: &Message| {
        let reason = format!("{hook} is not available on this description");
        Err(EncodeError::new(reason))
    })
}

fn unavailable_deserializer(hook: &'static str) -> Deserializer {
    Arc::new(move |_bytes: &[u8]| {
        let reason = format!("{hook} is not available on this description");
        Err(DecodeError::new(reason))
    })
}
