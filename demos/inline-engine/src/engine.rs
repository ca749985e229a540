//! A minimal in-process execution engine.
//!
//! The engine owns both breakdowns built from one description map and runs
//! each call the way a transport would: the invoking side serializes, the
//! servicing side deserializes, runs the implementation, serializes the
//! response, and the invoking side deserializes it again.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tessera::{
    Abortion, AbortionKind, BoxFuture, BreakdownError, CallContext, Cardinality, Deserializer,
    InvocationBreakdown, InvocationDescription, Message, MethodImplementation, MethodRequest,
    RpcError, Serializer, ServiceBreakdown, ServiceDescription, Streaming, break_down_invocation,
    break_down_service,
};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;

/// Capacity of the channel that carries each response stream.
pub const STREAM_BUFFER: usize = 16;

/// The four hooks for one method, as both sides see them.
#[derive(Clone)]
struct Codecs {
    request_serializer: Serializer,
    request_deserializer: Deserializer,
    response_serializer: Serializer,
    response_deserializer: Deserializer,
}

impl Codecs {
    /// Carry a request from the invoking side to the servicing side.
    fn request(&self, value: &Message) -> Result<Message, RpcError> {
        let bytes = (self.request_serializer)(value)?;
        Ok((self.request_deserializer)(&bytes)?)
    }

    /// Carry a response from the servicing side back to the invoking side.
    fn response(&self, value: &Message) -> Result<Message, RpcError> {
        let bytes = (self.response_serializer)(value)?;
        Ok((self.response_deserializer)(&bytes)?)
    }
}

/// Runs calls against an invocation and a service breakdown in one process.
pub struct Engine {
    client: InvocationBreakdown,
    server: Arc<ServiceBreakdown>,
    timeout: Option<Duration>,
}

impl Engine {
    /// Build both breakdowns from one description map.
    pub fn new<D>(methods: &HashMap<String, D>) -> Result<Self, BreakdownError>
    where
        D: InvocationDescription + ServiceDescription,
    {
        let client = break_down_invocation(methods);
        let server = break_down_service(methods)?;
        tracing::info!(methods = client.len(), "engine ready");
        Ok(Self {
            client,
            server: Arc::new(server),
            timeout: None,
        })
    }

    /// Give every call a deadline `timeout` after it starts.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn cardinality(&self, method: &str) -> Option<Cardinality> {
        self.client.cardinality(method)
    }

    pub async fn unary_unary(&self, method: &str, request: Message) -> Result<Message, RpcError> {
        let (implementation, codecs) = self.prepare(method, Cardinality::UnaryUnary)?;
        let call = self.start_call();
        let request = codecs.request(&request)?;
        let pending = implementation
            .invoke(MethodRequest::Unary(request), call.clone())?
            .into_unary()?;
        let response = run_with_deadline(pending, &call).await?;
        codecs.response(&response)
    }

    pub async fn unary_stream(
        &self,
        method: &str,
        request: Message,
    ) -> Result<Streaming<Message>, RpcError> {
        let (implementation, codecs) = self.prepare(method, Cardinality::UnaryStream)?;
        let call = self.start_call();
        let request = codecs.request(&request)?;
        let responses = implementation
            .invoke(MethodRequest::Unary(request), call.clone())?
            .into_stream()?;
        Ok(forward_responses(responses, codecs, call))
    }

    pub async fn stream_unary(
        &self,
        method: &str,
        requests: Streaming<Message>,
    ) -> Result<Message, RpcError> {
        let (implementation, codecs) = self.prepare(method, Cardinality::StreamUnary)?;
        let call = self.start_call();
        let requests = carry_requests(requests, codecs.clone());
        let pending = implementation
            .invoke(MethodRequest::Stream(requests), call.clone())?
            .into_unary()?;
        let response = run_with_deadline(pending, &call).await?;
        codecs.response(&response)
    }

    pub async fn stream_stream(
        &self,
        method: &str,
        requests: Streaming<Message>,
    ) -> Result<Streaming<Message>, RpcError> {
        let (implementation, codecs) = self.prepare(method, Cardinality::StreamStream)?;
        let call = self.start_call();
        let requests = carry_requests(requests, codecs.clone());
        let responses = implementation
            .invoke(MethodRequest::Stream(requests), call.clone())?
            .into_stream()?;
        Ok(forward_responses(responses, codecs, call))
    }

    fn start_call(&self) -> CallContext {
        match self.timeout {
            Some(timeout) => CallContext::with_timeout(timeout),
            None => CallContext::new(),
        }
    }

    fn prepare(
        &self,
        method: &str,
        expected: Cardinality,
    ) -> Result<(MethodImplementation, Codecs), RpcError> {
        let unknown = || RpcError::unimplemented(format!("unknown method {method}"));

        let cardinality = self.client.cardinality(method).ok_or_else(unknown)?;
        if cardinality != expected {
            return Err(RpcError::invalid_argument(format!(
                "method {method} is {cardinality}, called as {expected}"
            )));
        }

        let implementation = self
            .server
            .implementation(method)
            .ok_or_else(unknown)?
            .clone();
        let codecs = Codecs {
            request_serializer: self
                .client
                .request_serializer(method)
                .ok_or_else(unknown)?
                .clone(),
            request_deserializer: self
                .server
                .request_deserializer(method)
                .ok_or_else(unknown)?
                .clone(),
            response_serializer: self
                .server
                .response_serializer(method)
                .ok_or_else(unknown)?
                .clone(),
            response_deserializer: self
                .client
                .response_deserializer(method)
                .ok_or_else(unknown)?
                .clone(),
        };
        tracing::debug!(method, %cardinality, "starting call");
        Ok((implementation, codecs))
    }
}

async fn run_with_deadline(
    pending: BoxFuture<'static, Result<Message, RpcError>>,
    call: &CallContext,
) -> Result<Message, RpcError> {
    let Some(remaining) = call.time_remaining() else {
        return pending.await;
    };
    match tokio::time::timeout(remaining, pending).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(?remaining, "call deadline passed");
            call.abort(Abortion::Expired);
            Err(RpcError::Aborted(AbortionKind::Expired))
        }
    }
}

fn carry_requests(requests: Streaming<Message>, codecs: Codecs) -> Streaming<Message> {
    Box::pin(requests.map(move |item| {
        let value = item?;
        codecs.request(&value)
    }))
}

/// What woke the response forwarder.
enum Next {
    Item(Option<Result<Message, RpcError>>),
    Expired,
    Closed,
}

/// Resolves at the deadline, or never if there is none.
async fn expiry(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn forward_responses(
    mut responses: Streaming<Message>,
    codecs: Codecs,
    call: CallContext,
) -> Streaming<Message> {
    let (tx, rx) = mpsc::channel::<Result<Message, RpcError>>(STREAM_BUFFER);
    let deadline = call.deadline().map(Instant::from_std);

    tokio::spawn(async move {
        loop {
            // A stream that stops yielding must still expire.
            let next = tokio::select! {
                item = responses.next() => Next::Item(item),
                _ = expiry(deadline) => Next::Expired,
                _ = tx.closed() => Next::Closed,
            };
            let item = match next {
                Next::Item(Some(item)) => item,
                Next::Item(None) => return,
                Next::Expired => {
                    tracing::warn!("response stream deadline passed");
                    call.abort(Abortion::Expired);
                    let _ = tx.send(Err(RpcError::Aborted(AbortionKind::Expired))).await;
                    return;
                }
                Next::Closed => {
                    tracing::debug!("response receiver dropped");
                    call.abort(Abortion::Cancelled);
                    return;
                }
            };

            if let Some(abortion) = call.abortion() {
                let _ = tx.send(Err(RpcError::Aborted(abortion.into()))).await;
                return;
            }
            if !call.is_active() {
                call.abort(Abortion::Expired);
                let _ = tx.send(Err(RpcError::Aborted(AbortionKind::Expired))).await;
                return;
            }
            let item = item.and_then(|value| codecs.response(&value));
            if tx.send(item).await.is_err() {
                tracing::debug!("response receiver dropped");
                call.abort(Abortion::Cancelled);
                return;
            }
        }
    });

    Box::pin(ReceiverStream::new(rx))
}
