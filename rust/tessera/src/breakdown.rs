//! Invocation-side and service-side breakdowns.
//!
//! A breakdown is the normalized table an execution engine drives: for every
//! method name it holds a [`MethodImplementation`] plus the serialization
//! hooks for that method. The builders here are single synchronous passes
//! over the description map; they keep no state between calls.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tessera_core::{
    CallContext, Cardinality, Deserializer, Message, MethodImplementation, Serializer,
    StreamStreamFn, StreamUnaryFn, Streaming, UnaryStreamFn, UnaryUnaryFn, rpc_context,
};

use crate::{InvocationDescription, ServiceDescription};

/// Invocation-side view of a set of RPC methods.
///
/// All four maps have the same key set: the method names given to
/// [`break_down_invocation`].
pub struct InvocationBreakdown {
    cardinalities: HashMap<String, Cardinality>,
    implementations: HashMap<String, MethodImplementation>,
    request_serializers: HashMap<String, Serializer>,
    response_deserializers: HashMap<String, Deserializer>,
}

impl InvocationBreakdown {
    pub fn cardinalities(&self) -> &HashMap<String, Cardinality> {
        &self.cardinalities
    }

    pub fn implementations(&self) -> &HashMap<String, MethodImplementation> {
        &self.implementations
    }

    pub fn request_serializers(&self) -> &HashMap<String, Serializer> {
        &self.request_serializers
    }

    pub fn response_deserializers(&self) -> &HashMap<String, Deserializer> {
        &self.response_deserializers
    }

    pub fn cardinality(&self, method: &str) -> Option<Cardinality> {
        self.cardinalities.get(method).copied()
    }

    pub fn implementation(&self, method: &str) -> Option<&MethodImplementation> {
        self.implementations.get(method)
    }

    pub fn request_serializer(&self, method: &str) -> Option<&Serializer> {
        self.request_serializers.get(method)
    }

    pub fn response_deserializer(&self, method: &str) -> Option<&Deserializer> {
        self.response_deserializers.get(method)
    }

    /// Names of every method in the breakdown.
    pub fn method_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.cardinalities.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.cardinalities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cardinalities.is_empty()
    }
}

impl fmt::Debug for InvocationBreakdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationBreakdown")
            .field("cardinalities", &self.cardinalities)
            .finish_non_exhaustive()
    }
}

/// Service-side view of a set of RPC methods.
///
/// All three maps have the same key set: the method names given to
/// [`break_down_service`].
pub struct ServiceBreakdown {
    implementations: HashMap<String, MethodImplementation>,
    request_deserializers: HashMap<String, Deserializer>,
    response_serializers: HashMap<String, Serializer>,
}

impl ServiceBreakdown {
    pub fn implementations(&self) -> &HashMap<String, MethodImplementation> {
        &self.implementations
    }

    pub fn request_deserializers(&self) -> &HashMap<String, Deserializer> {
        &self.request_deserializers
    }

    pub fn response_serializers(&self) -> &HashMap<String, Serializer> {
        &self.response_serializers
    }

    pub fn implementation(&self, method: &str) -> Option<&MethodImplementation> {
        self.implementations.get(method)
    }

    pub fn request_deserializer(&self, method: &str) -> Option<&Deserializer> {
        self.request_deserializers.get(method)
    }

    pub fn response_serializer(&self, method: &str) -> Option<&Serializer> {
        self.response_serializers.get(method)
    }

    /// Names of every method in the breakdown.
    pub fn method_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.implementations.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.implementations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.implementations.is_empty()
    }
}

impl fmt::Debug for ServiceBreakdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceBreakdown")
            .field("implementations", &self.implementations)
            .finish_non_exhaustive()
    }
}

/// Errors that can occur while assembling a breakdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakdownError {
    /// The method declares a cardinality but supplies no behavior for it.
    UnsupportedCardinality {
        method: String,
        cardinality: Cardinality,
    },
}

impl fmt::Display for BreakdownError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakdownError::UnsupportedCardinality {
                method,
                cardinality,
            } => write!(
                f,
                "method {} declares cardinality {} but has no {} behavior",
                method, cardinality, cardinality
            ),
        }
    }
}

impl std::error::Error for BreakdownError {}

/// Derive an [`InvocationBreakdown`] from invocation-side method descriptions.
///
/// Client-side implementations are placeholders with no behavior; the
/// execution layer supplies the behavior when it makes the call.
pub fn break_down_invocation<D: InvocationDescription>(
    method_descriptions: &HashMap<String, D>,
) -> InvocationBreakdown {
    let count = method_descriptions.len();
    let mut cardinalities = HashMap::with_capacity(count);
    let mut implementations = HashMap::with_capacity(count);
    let mut request_serializers = HashMap::with_capacity(count);
    let mut response_deserializers = HashMap::with_capacity(count);

    for (name, description) in method_descriptions {
        let cardinality = description.cardinality();
        let implementation = match cardinality {
            Cardinality::UnaryUnary => MethodImplementation::unary_unary_inline(None),
            Cardinality::UnaryStream => MethodImplementation::unary_stream_inline(None),
            Cardinality::StreamUnary => MethodImplementation::stream_unary_inline(None),
            Cardinality::StreamStream => MethodImplementation::stream_stream_inline(None),
        };
        tracing::debug!(method = %name, %cardinality, "assembled invocation method");

        cardinalities.insert(name.clone(), cardinality);
        implementations.insert(name.clone(), implementation);
        request_serializers.insert(name.clone(), description.serialize_request());
        response_deserializers.insert(name.clone(), description.deserialize_response());
    }

    tracing::debug!(methods = count, "invocation breakdown ready");
    InvocationBreakdown {
        cardinalities,
        implementations,
        request_serializers,
        response_deserializers,
    }
}

/// Derive a [`ServiceBreakdown`] from service-side method descriptions.
///
/// Each implementation adapts the engine's [`CallContext`] into the
/// [`RpcContext`](tessera_core::RpcContext) the behavior expects and
/// otherwise forwards request and result untouched.
///
/// # Errors
///
/// Returns [`BreakdownError::UnsupportedCardinality`] if a description
/// supplies no behavior for its declared cardinality. No partial breakdown
/// is produced.
pub fn break_down_service<D: ServiceDescription>(
    method_descriptions: &HashMap<String, D>,
) -> Result<ServiceBreakdown, BreakdownError> {
    let count = method_descriptions.len();
    let mut implementations = HashMap::with_capacity(count);
    let mut request_deserializers = HashMap::with_capacity(count);
    let mut response_serializers = HashMap::with_capacity(count);

    for (name, description) in method_descriptions {
        let cardinality = description.cardinality();
        let unsupported = || {
            tracing::warn!(method = %name, %cardinality, "no behavior for declared cardinality");
            BreakdownError::UnsupportedCardinality {
                method: name.clone(),
                cardinality,
            }
        };

        // Each closure owns its own behavior handle, bound in this iteration.
        let implementation = match cardinality {
            Cardinality::UnaryUnary => {
                let behavior = description.service_unary_unary().ok_or_else(unsupported)?;
                let service: UnaryUnaryFn = Arc::new(move |request: Message, call: CallContext| {
                    behavior(request, rpc_context(call))
                });
                MethodImplementation::unary_unary_inline(Some(service))
            }
            Cardinality::UnaryStream => {
                let behavior = description.service_unary_stream().ok_or_else(unsupported)?;
                let service: UnaryStreamFn = Arc::new(move |request: Message, call: CallContext| {
                    behavior(request, rpc_context(call))
                });
                MethodImplementation::unary_stream_inline(Some(service))
            }
            Cardinality::StreamUnary => {
                let behavior = description.service_stream_unary().ok_or_else(unsupported)?;
                let service: StreamUnaryFn =
                    Arc::new(move |requests: Streaming<Message>, call: CallContext| {
                        behavior(requests, rpc_context(call))
                    });
                MethodImplementation::stream_unary_inline(Some(service))
            }
            Cardinality::StreamStream => {
                let behavior = description.service_stream_stream().ok_or_else(unsupported)?;
                let service: StreamStreamFn =
                    Arc::new(move |requests: Streaming<Message>, call: CallContext| {
                        behavior(requests, rpc_context(call))
                    });
                MethodImplementation::stream_stream_inline(Some(service))
            }
        };
        tracing::debug!(method = %name, %cardinality, "assembled service method");

        implementations.insert(name.clone(), implementation);
        request_deserializers.insert(name.clone(), description.deserialize_request());
        response_serializers.insert(name.clone(), description.serialize_response());
    }

    tracing::debug!(methods = count, "service breakdown ready");
    Ok(ServiceBreakdown {
        implementations,
        request_deserializers,
        response_serializers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{StreamStreamBehavior, StreamUnaryBehavior, UnaryStreamBehavior, UnaryUnaryBehavior};
    use bytes::Bytes;
    use futures_util::{FutureExt, StreamExt, stream};
    use std::collections::HashSet;
    use tessera_core::{
        DecodeError, EncodeError, ErrorCode, MethodRequest, RpcContext, RpcError, message,
    };

    fn noop_serializer() -> Serializer {
        Arc::new(|_m: &Message| Ok::<_, EncodeError>(Bytes::new()))
    }

    fn noop_deserializer() -> Deserializer {
        Arc::new(|_b: &[u8]| Ok::<_, DecodeError>(message(())))
    }

    struct Declared {
        cardinality: Cardinality,
        tag: u32,
        serializer: Serializer,
        deserializer: Deserializer,
    }

    impl Declared {
        fn new(cardinality: Cardinality, tag: u32) -> Self {
            Self {
                cardinality,
                tag,
                serializer: noop_serializer(),
                deserializer: noop_deserializer(),
            }
        }
    }

    impl InvocationDescription for Declared {
        fn cardinality(&self) -> Cardinality {
            self.cardinality
        }

        fn serialize_request(&self) -> Serializer {
            self.serializer.clone()
        }

        fn deserialize_response(&self) -> Deserializer {
            self.deserializer.clone()
        }
    }

    // Every behavior answers with its method's tag so tests can tell
    // which behavior ran.
    impl ServiceDescription for Declared {
        fn cardinality(&self) -> Cardinality {
            self.cardinality
        }

        fn service_unary_unary(&self) -> Option<UnaryUnaryBehavior> {
            let tag = self.tag;
            Some(Arc::new(move |_req: Message, _ctx: RpcContext| {
                async move { Ok::<_, RpcError>(message(tag)) }.boxed()
            }))
        }

        fn service_unary_stream(&self) -> Option<UnaryStreamBehavior> {
            let tag = self.tag;
            Some(Arc::new(move |_req: Message, _ctx: RpcContext| {
                let items: Streaming<Message> =
                    Box::pin(stream::iter(vec![Ok(message(tag)), Ok(message(tag))]));
                items
            }))
        }

        fn service_stream_unary(&self) -> Option<StreamUnaryBehavior> {
            let tag = self.tag;
            Some(Arc::new(move |_reqs: Streaming<Message>, _ctx: RpcContext| {
                async move { Ok::<_, RpcError>(message(tag)) }.boxed()
            }))
        }

        fn service_stream_stream(&self) -> Option<StreamStreamBehavior> {
            let tag = self.tag;
            Some(Arc::new(move |_reqs: Streaming<Message>, _ctx: RpcContext| {
                let items: Streaming<Message> = Box::pin(stream::iter(vec![Ok(message(tag))]));
                items
            }))
        }

        fn deserialize_request(&self) -> Deserializer {
            self.deserializer.clone()
        }

        fn serialize_response(&self) -> Serializer {
            self.serializer.clone()
        }
    }

    /// Declares a cardinality but never supplies a behavior.
    struct Hollow(Cardinality);

    impl ServiceDescription for Hollow {
        fn cardinality(&self) -> Cardinality {
            self.0
        }

        fn deserialize_request(&self) -> Deserializer {
            noop_deserializer()
        }

        fn serialize_response(&self) -> Serializer {
            noop_serializer()
        }
    }

    fn all_cardinalities() -> HashMap<String, Declared> {
        Cardinality::ALL
            .iter()
            .enumerate()
            .map(|(i, &c)| (c.to_string(), Declared::new(c, i as u32)))
            .collect()
    }

    fn keys<V>(map: &HashMap<String, V>) -> HashSet<String> {
        map.keys().cloned().collect()
    }

    fn request_for(cardinality: Cardinality) -> MethodRequest {
        if cardinality.has_streaming_request() {
            MethodRequest::Stream(Box::pin(stream::iter(vec![Ok(message(0u32))])))
        } else {
            MethodRequest::Unary(message(0u32))
        }
    }

    fn tags_from(implementation: &MethodImplementation) -> Vec<u32> {
        let request = request_for(implementation.cardinality());
        let response = implementation.invoke(request, CallContext::new()).unwrap();
        if implementation.cardinality().has_streaming_response() {
            response
                .into_stream()
                .unwrap()
                .map(|item| *item.unwrap().downcast::<u32>().unwrap())
                .collect::<Vec<_>>()
                .now_or_never()
                .unwrap()
        } else {
            let value = response
                .into_unary()
                .unwrap()
                .now_or_never()
                .unwrap()
                .unwrap();
            vec![*value.downcast::<u32>().unwrap()]
        }
    }

    #[test]
    fn invocation_maps_share_key_set() {
        let descriptions = all_cardinalities();
        let breakdown = break_down_invocation(&descriptions);

        let expected = keys(&descriptions);
        assert_eq!(keys(breakdown.cardinalities()), expected);
        assert_eq!(keys(breakdown.implementations()), expected);
        assert_eq!(keys(breakdown.request_serializers()), expected);
        assert_eq!(keys(breakdown.response_deserializers()), expected);
        assert_eq!(breakdown.len(), 4);
    }

    #[test]
    fn invocation_records_cardinality_and_placeholders() {
        let descriptions = all_cardinalities();
        let breakdown = break_down_invocation(&descriptions);

        for cardinality in Cardinality::ALL {
            let name = cardinality.to_string();
            assert_eq!(breakdown.cardinality(&name), Some(cardinality));

            let implementation = breakdown.implementation(&name).unwrap();
            assert_eq!(implementation.cardinality(), cardinality);
            assert!(!implementation.is_specified());

            let err = implementation
                .invoke(request_for(cardinality), CallContext::new())
                .unwrap_err();
            assert_eq!(err.code(), ErrorCode::Unimplemented);
        }
    }

    #[test]
    fn invocation_hooks_are_copied_verbatim() {
        let mut descriptions = HashMap::new();
        descriptions.insert("Get".to_string(), Declared::new(Cardinality::UnaryUnary, 0));
        let breakdown = break_down_invocation(&descriptions);

        let original = &descriptions["Get"];
        assert!(Arc::ptr_eq(
            breakdown.request_serializer("Get").unwrap(),
            &original.serializer
        ));
        assert!(Arc::ptr_eq(
            breakdown.response_deserializer("Get").unwrap(),
            &original.deserializer
        ));
    }

    #[test]
    fn empty_input_gives_empty_breakdowns() {
        let descriptions: HashMap<String, Declared> = HashMap::new();
        assert!(break_down_invocation(&descriptions).is_empty());
        assert!(break_down_service(&descriptions).unwrap().is_empty());
    }

    #[test]
    fn service_maps_share_key_set() {
        let descriptions = all_cardinalities();
        let breakdown = break_down_service(&descriptions).unwrap();

        let expected = keys(&descriptions);
        assert_eq!(keys(breakdown.implementations()), expected);
        assert_eq!(keys(breakdown.request_deserializers()), expected);
        assert_eq!(keys(breakdown.response_serializers()), expected);
    }

    #[test]
    fn service_hooks_are_copied_verbatim() {
        let mut descriptions = HashMap::new();
        descriptions.insert(
            "List".to_string(),
            Declared::new(Cardinality::UnaryStream, 0),
        );
        let breakdown = break_down_service(&descriptions).unwrap();

        let original = &descriptions["List"];
        assert!(Arc::ptr_eq(
            breakdown.request_deserializer("List").unwrap(),
            &original.deserializer
        ));
        assert!(Arc::ptr_eq(
            breakdown.response_serializer("List").unwrap(),
            &original.serializer
        ));
    }

    #[test]
    fn each_service_implementation_runs_its_own_behavior() {
        let descriptions = all_cardinalities();
        let breakdown = break_down_service(&descriptions).unwrap();

        for (i, cardinality) in Cardinality::ALL.iter().enumerate() {
            let implementation = breakdown.implementation(&cardinality.to_string()).unwrap();
            assert_eq!(implementation.cardinality(), *cardinality);
            assert!(implementation.is_specified());

            let tags = tags_from(implementation);
            assert!(!tags.is_empty());
            assert!(
                tags.iter().all(|&tag| tag == i as u32),
                "{cardinality}: {tags:?}"
            );
        }
    }

    #[test]
    fn missing_behavior_is_rejected() {
        for cardinality in Cardinality::ALL {
            let mut descriptions = HashMap::new();
            descriptions.insert("Broken".to_string(), Hollow(cardinality));

            let err = break_down_service(&descriptions).unwrap_err();
            assert_eq!(
                err,
                BreakdownError::UnsupportedCardinality {
                    method: "Broken".to_string(),
                    cardinality,
                }
            );
        }
    }

    #[test]
    fn mixed_descriptions_behind_arc() {
        let mut descriptions: HashMap<String, Arc<dyn ServiceDescription>> = HashMap::new();
        descriptions.insert(
            "Get".to_string(),
            Arc::new(Declared::new(Cardinality::UnaryUnary, 1)),
        );
        descriptions.insert(
            "Hollow".to_string(),
            Arc::new(Hollow(Cardinality::StreamStream)),
        );

        let err = break_down_service(&descriptions).unwrap_err();
        assert!(matches!(
            err,
            BreakdownError::UnsupportedCardinality { ref method, .. } if method == "Hollow"
        ));

        descriptions.remove("Hollow");
        let breakdown = break_down_service(&descriptions).unwrap();
        assert_eq!(tags_from(breakdown.implementation("Get").unwrap()), vec![1]);
    }

    #[test]
    fn breakdown_error_display() {
        let err = BreakdownError::UnsupportedCardinality {
            method: "Watch".to_string(),
            cardinality: Cardinality::UnaryStream,
        };
        let s = err.to_string();
        assert!(s.contains("Watch"));
        assert!(s.contains("unary-stream"));
    }
}
