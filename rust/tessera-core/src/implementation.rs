//! Opaque method implementations.
//!
//! A [`MethodImplementation`] is what an execution engine runs for one RPC
//! method. It is built from a plain callable through one of the four inline
//! constructors, one per [`Cardinality`], and exposes a single
//! [`invoke`](MethodImplementation::invoke) operation. Callers never look
//! inside it.

use std::fmt;
use std::sync::Arc;

use futures_core::future::BoxFuture;

use crate::{CallContext, Cardinality, Message, RpcError, Streaming};

/// Calling convention for unary-unary implementations.
pub type UnaryUnaryFn = Arc<
    dyn Fn(Message, CallContext) -> BoxFuture<'static, Result<Message, RpcError>> + Send + Sync,
>;

/// Calling convention for unary-stream implementations.
pub type UnaryStreamFn = Arc<dyn Fn(Message, CallContext) -> Streaming<Message> + Send + Sync>;

/// Calling convention for stream-unary implementations.
pub type StreamUnaryFn = Arc<
    dyn Fn(Streaming<Message>, CallContext) -> BoxFuture<'static, Result<Message, RpcError>>
        + Send
        + Sync,
>;

/// Calling convention for stream-stream implementations.
pub type StreamStreamFn =
    Arc<dyn Fn(Streaming<Message>, CallContext) -> Streaming<Message> + Send + Sync>;

/// Request side of an invocation.
pub enum MethodRequest {
    Unary(Message),
    Stream(Streaming<Message>),
}

impl MethodRequest {
    fn shape(&self) -> &'static str {
        match self {
            MethodRequest::Unary(_) => "unary",
            MethodRequest::Stream(_) => "stream",
        }
    }
}

/// Response side of an invocation.
pub enum MethodResponse {
    Unary(BoxFuture<'static, Result<Message, RpcError>>),
    Stream(Streaming<Message>),
}

impl MethodResponse {
    /// The pending single response, or an error if the method streams.
    pub fn into_unary(self) -> Result<BoxFuture<'static, Result<Message, RpcError>>, RpcError> {
        match self {
            MethodResponse::Unary(fut) => Ok(fut),
            MethodResponse::Stream(_) => Err(RpcError::internal(
                "expected a unary response, method produced a stream",
            )),
        }
    }

    /// The response stream, or an error if the method answers once.
    pub fn into_stream(self) -> Result<Streaming<Message>, RpcError> {
        match self {
            MethodResponse::Stream(stream) => Ok(stream),
            MethodResponse::Unary(_) => Err(RpcError::internal(
                "expected a response stream, method produced a unary response",
            )),
        }
    }
}

impl fmt::Debug for MethodResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MethodResponse::Unary(_) => f.write_str("MethodResponse::Unary(..)"),
            MethodResponse::Stream(_) => f.write_str("MethodResponse::Stream(..)"),
        }
    }
}

#[derive(Clone)]
enum Inline {
    UnaryUnary(Option<UnaryUnaryFn>),
    UnaryStream(Option<UnaryStreamFn>),
    StreamUnary(Option<StreamUnaryFn>),
    StreamStream(Option<StreamStreamFn>),
}

/// A cardinality-tagged executable unit for one RPC method.
///
/// Cloning is cheap and shares the underlying callable.
#[derive(Clone)]
pub struct MethodImplementation {
    inner: Inline,
}

impl MethodImplementation {
    /// Unary-unary implementation. `None` leaves the behavior unspecified.
    pub fn unary_unary_inline(behavior: Option<UnaryUnaryFn>) -> Self {
        Self {
            inner: Inline::UnaryUnary(behavior),
        }
    }

    /// Unary-stream implementation. `None` leaves the behavior unspecified.
    pub fn unary_stream_inline(behavior: Option<UnaryStreamFn>) -> Self {
        Self {
            inner: Inline::UnaryStream(behavior),
        }
    }

    /// Stream-unary implementation. `None` leaves the behavior unspecified.
    pub fn stream_unary_inline(behavior: Option<StreamUnaryFn>) -> Self {
        Self {
            inner: Inline::StreamUnary(behavior),
        }
    }

    /// Stream-stream implementation. `None` leaves the behavior unspecified.
    pub fn stream_stream_inline(behavior: Option<StreamStreamFn>) -> Self {
        Self {
            inner: Inline::StreamStream(behavior),
        }
    }

    pub fn cardinality(&self) -> Cardinality {
        match self.inner {
            Inline::UnaryUnary(_) => Cardinality::UnaryUnary,
            Inline::UnaryStream(_) => Cardinality::UnaryStream,
            Inline::StreamUnary(_) => Cardinality::StreamUnary,
            Inline::StreamStream(_) => Cardinality::StreamStream,
        }
    }

    /// Whether a behavior was supplied at construction.
    pub fn is_specified(&self) -> bool {
        match &self.inner {
            Inline::UnaryUnary(f) => f.is_some(),
            Inline::UnaryStream(f) => f.is_some(),
            Inline::StreamUnary(f) => f.is_some(),
            Inline::StreamStream(f) => f.is_some(),
        }
    }

    /// Run the method.
    ///
    /// Fails with `Unimplemented` if no behavior was supplied, and with
    /// `InvalidArgument` if the request shape doesn't match the cardinality.
    pub fn invoke(
        &self,
        request: MethodRequest,
        call: CallContext,
    ) -> Result<MethodResponse, RpcError> {
        let cardinality = self.cardinality();
        tracing::trace!(%cardinality, request = request.shape(), "invoking method implementation");

        if !self.is_specified() {
            return Err(RpcError::unimplemented(format!(
                "no {} behavior was supplied for this method",
                cardinality
            )));
        }

        match (&self.inner, request) {
            (Inline::UnaryUnary(Some(f)), MethodRequest::Unary(req)) => {
                Ok(MethodResponse::Unary(f(req, call)))
            }
            (Inline::UnaryStream(Some(f)), MethodRequest::Unary(req)) => {
                Ok(MethodResponse::Stream(f(req, call)))
            }
            (Inline::StreamUnary(Some(f)), MethodRequest::Stream(reqs)) => {
                Ok(MethodResponse::Unary(f(reqs, call)))
            }
            (Inline::StreamStream(Some(f)), MethodRequest::Stream(reqs)) => {
                Ok(MethodResponse::Stream(f(reqs, call)))
            }
            (_, request) => Err(RpcError::invalid_argument(format!(
                "{} method cannot accept a {} request",
                cardinality,
                request.shape()
            ))),
        }
    }
}

impl fmt::Debug for MethodImplementation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodImplementation")
            .field("cardinality", &self.cardinality())
            .field("specified", &self.is_specified())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ErrorCode, message};
    use futures_util::{FutureExt, StreamExt, stream};

    fn echo_unary() -> UnaryUnaryFn {
        Arc::new(|req: Message, _call: CallContext| async move { Ok::<_, RpcError>(req) }.boxed())
    }

    fn run_unary(response: MethodResponse) -> Result<Message, RpcError> {
        response
            .into_unary()
            .unwrap()
            .now_or_never()
            .expect("ready future")
    }

    #[test]
    fn inline_constructors_tag_cardinality() {
        assert_eq!(
            MethodImplementation::unary_unary_inline(None).cardinality(),
            Cardinality::UnaryUnary
        );
        assert_eq!(
            MethodImplementation::unary_stream_inline(None).cardinality(),
            Cardinality::UnaryStream
        );
        assert_eq!(
            MethodImplementation::stream_unary_inline(None).cardinality(),
            Cardinality::StreamUnary
        );
        assert_eq!(
            MethodImplementation::stream_stream_inline(None).cardinality(),
            Cardinality::StreamStream
        );
    }

    #[test]
    fn unspecified_implementation_is_unimplemented() {
        let implementation = MethodImplementation::unary_unary_inline(None);
        assert!(!implementation.is_specified());

        let err = implementation
            .invoke(MethodRequest::Unary(message(1u32)), CallContext::new())
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Unimplemented);
    }

    #[test]
    fn unary_unary_invocation() {
        let implementation = MethodImplementation::unary_unary_inline(Some(echo_unary()));
        assert!(implementation.is_specified());

        let response = implementation
            .invoke(MethodRequest::Unary(message(7u32)), CallContext::new())
            .unwrap();
        let value = run_unary(response).unwrap();
        assert_eq!(*value.downcast::<u32>().unwrap(), 7);
    }

    #[test]
    fn shape_mismatch_is_invalid_argument() {
        let implementation = MethodImplementation::unary_unary_inline(Some(echo_unary()));
        let requests: Streaming<Message> = Box::pin(stream::empty());

        let err = implementation
            .invoke(MethodRequest::Stream(requests), CallContext::new())
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
        assert!(err.to_string().contains("unary-unary"));
    }

    #[test]
    fn stream_stream_invocation() {
        let doubler: StreamStreamFn = Arc::new(|requests: Streaming<Message>, _call: CallContext| {
            Box::pin(requests.map(|item| item.map(|m| message(*m.downcast::<u32>().unwrap() * 2))))
        });
        let implementation = MethodImplementation::stream_stream_inline(Some(doubler));

        let requests: Streaming<Message> =
            Box::pin(stream::iter(vec![Ok(message(1u32)), Ok(message(2u32))]));
        let responses = implementation
            .invoke(MethodRequest::Stream(requests), CallContext::new())
            .unwrap()
            .into_stream()
            .unwrap();

        let values: Vec<u32> = responses
            .map(|item| *item.unwrap().downcast::<u32>().unwrap())
            .collect()
            .now_or_never()
            .unwrap();
        assert_eq!(values, vec![2, 4]);
    }

    #[test]
    fn response_shape_accessors() {
        let unary = MethodResponse::Unary(async { Ok::<_, RpcError>(message(())) }.boxed());
        assert!(unary.into_stream().is_err());

        let streaming = MethodResponse::Stream(Box::pin(stream::empty()));
        assert!(streaming.into_unary().is_err());
    }

    #[test]
    fn debug_shows_cardinality() {
        let s = format!("{:?}", MethodImplementation::stream_unary_inline(None));
        assert!(s.contains("StreamUnary"));
        assert!(s.contains("false"));
    }
}
