//! Inline engine - driving tessera breakdowns in one process
//!
//! An inventory service declares four methods, one per cardinality:
//! - `Lookup` (unary-unary) returns one item
//! - `List` (unary-stream) streams every item whose name has a prefix
//! - `Restock` (stream-unary) adds a stream of items and answers with a summary
//! - `Watch` (stream-stream) answers each lookup in a stream with the item
//!
//! Messages are facet types encoded with postcard. The [`Engine`] builds both
//! breakdowns from the same description map and carries every request and
//! response through the serializers, as a transport would.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use bytes::Bytes;
use futures_util::StreamExt;
use parking_lot::Mutex;
use tessera::utilities::{
    RpcMethod, stream_stream_rpc_method, stream_unary_rpc_method, unary_stream_rpc_method,
    unary_unary_rpc_method,
};
use tessera::{DecodeError, EncodeError, ErrorCode, RpcContext, RpcError, Streaming};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

mod engine;

pub use engine::{Engine, STREAM_BUFFER};

// ============================================================================
// Facet Types
// ============================================================================

/// A stocked item.
#[derive(Debug, Clone, PartialEq, Eq, facet::Facet)]
pub struct Item {
    pub name: String,
    pub quantity: u32,
}

/// Request for a single item by name.
#[derive(Debug, Clone, PartialEq, Eq, facet::Facet)]
pub struct Lookup {
    pub name: String,
}

/// Request for every item whose name starts with `prefix`.
#[derive(Debug, Clone, PartialEq, Eq, facet::Facet)]
pub struct ListRequest {
    pub prefix: String,
}

/// Answer to a restock.
#[derive(Debug, Clone, PartialEq, Eq, facet::Facet)]
pub struct RestockSummary {
    /// Number of items received
    pub items: u32,
    /// Sum of their quantities
    pub quantity: u32,
}

// ============================================================================
// Postcard codec
// ============================================================================

/// Encode a facet value as postcard.
pub fn encode<T: facet::Facet<'static>>(value: &T) -> Result<Bytes, EncodeError> {
    facet_postcard::to_vec(value)
        .map(Bytes::from)
        .map_err(|e| EncodeError::new(format!("postcard: {e}")))
}

/// Decode a postcard payload into a facet value.
pub fn decode<T>(bytes: &[u8]) -> Result<T, DecodeError>
where
    T: for<'a> facet::Facet<'a>,
{
    facet_postcard::from_slice(bytes)
        .map_err(|e| DecodeError::for_type(std::any::type_name::<T>(), format!("postcard: {e}")))
}

// ============================================================================
// Inventory service
// ============================================================================

/// Shared item counts behind the four inventory methods.
#[derive(Clone, Default)]
pub struct Inventory {
    items: Arc<Mutex<BTreeMap<String, u32>>>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `quantity` to an item and return its new count.
    ///
    /// Counts are `u32`; an addition past `u32::MAX` leaves the item
    /// untouched and fails with `OutOfRange`.
    pub fn stock(&self, name: impl Into<String>, quantity: u32) -> Result<u32, RpcError> {
        let name = name.into();
        let mut items = self.items.lock();
        let current = items.get(&name).copied().unwrap_or(0);
        let updated = current
            .checked_add(quantity)
            .ok_or_else(|| exceeds_limit(&format!("stock of {name}")))?;
        items.insert(name, updated);
        Ok(updated)
    }

    pub fn quantity(&self, name: &str) -> Option<u32> {
        self.items.lock().get(name).copied()
    }

    fn find(&self, name: &str) -> Result<Item, RpcError> {
        match self.quantity(name) {
            Some(quantity) => Ok(Item {
                name: name.to_string(),
                quantity,
            }),
            None => Err(RpcError::status(
                ErrorCode::NotFound,
                format!("no item named {name}"),
            )),
        }
    }

    /// Descriptions of every inventory method, keyed by method name.
    pub fn methods(&self) -> HashMap<String, RpcMethod> {
        let mut methods = HashMap::new();
        methods.insert("Lookup".to_string(), self.lookup());
        methods.insert("List".to_string(), self.list());
        methods.insert("Restock".to_string(), self.restock());
        methods.insert("Watch".to_string(), self.watch());
        methods
    }

    fn lookup(&self) -> RpcMethod {
        let inventory = self.clone();
        unary_unary_rpc_method(
            move |request: Lookup, _ctx: RpcContext| {
                let found = inventory.find(&request.name);
                async move { found }
            },
            encode::<Lookup>,
            decode::<Lookup>,
            encode::<Item>,
            decode::<Item>,
        )
    }

    fn list(&self) -> RpcMethod {
        let inventory = self.clone();
        unary_stream_rpc_method(
            move |request: ListRequest, ctx: RpcContext| -> Streaming<Item> {
                let matching: Vec<Item> = inventory
                    .items
                    .lock()
                    .iter()
                    .filter(|(name, _)| name.starts_with(&request.prefix))
                    .map(|(name, &quantity)| Item {
                        name: name.clone(),
                        quantity,
                    })
                    .collect();

                let (tx, rx) = mpsc::channel::<Result<Item, RpcError>>(STREAM_BUFFER);
                tokio::spawn(async move {
                    for item in matching {
                        if !ctx.is_active() {
                            tracing::debug!("list call no longer active");
                            return;
                        }
                        if tx.send(Ok(item)).await.is_err() {
                            return;
                        }
                    }
                });
                Box::pin(ReceiverStream::new(rx))
            },
            encode::<ListRequest>,
            decode::<ListRequest>,
            encode::<Item>,
            decode::<Item>,
        )
    }

    fn restock(&self) -> RpcMethod {
        let inventory = self.clone();
        stream_unary_rpc_method(
            move |mut requests: Streaming<Item>, _ctx: RpcContext| {
                let inventory = inventory.clone();
                async move {
                    let mut summary = RestockSummary {
                        items: 0,
                        quantity: 0,
                    };
                    while let Some(item) = requests.next().await {
                        let item = item?;
                        let items = summary
                            .items
                            .checked_add(1)
                            .ok_or_else(|| exceeds_limit("restocked item count"))?;
                        let quantity = summary
                            .quantity
                            .checked_add(item.quantity)
                            .ok_or_else(|| exceeds_limit("restocked quantity"))?;
                        inventory.stock(item.name, item.quantity)?;
                        summary = RestockSummary { items, quantity };
                    }
                    Ok::<_, RpcError>(summary)
                }
            },
            encode::<Item>,
            decode::<Item>,
            encode::<RestockSummary>,
            decode::<RestockSummary>,
        )
    }

    fn watch(&self) -> RpcMethod {
        let inventory = self.clone();
        stream_stream_rpc_method(
            move |requests: Streaming<Lookup>, _ctx: RpcContext| -> Streaming<Item> {
                let inventory = inventory.clone();
                Box::pin(requests.map(move |request| {
                    request.and_then(|lookup| inventory.find(&lookup.name))
                }))
            },
            encode::<Lookup>,
            decode::<Lookup>,
            encode::<Item>,
            decode::<Item>,
        )
    }
}

fn exceeds_limit(what: &str) -> RpcError {
    RpcError::status(
        ErrorCode::OutOfRange,
        format!("{what} would exceed {}", u32::MAX),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use std::time::Duration;
    use tessera::{AbortionKind, Cardinality, Message, message};

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }

    fn stocked() -> Inventory {
        let inventory = Inventory::new();
        inventory.stock("apple", 3).unwrap();
        inventory.stock("apricot", 5).unwrap();
        inventory.stock("banana", 7).unwrap();
        inventory
    }

    fn lookup(name: &str) -> Message {
        message(Lookup {
            name: name.to_string(),
        })
    }

    fn item(name: &str, quantity: u32) -> Item {
        Item {
            name: name.to_string(),
            quantity,
        }
    }

    fn items(values: Vec<Message>) -> Vec<Item> {
        values
            .into_iter()
            .map(|m| *m.downcast::<Item>().unwrap())
            .collect()
    }

    #[test]
    fn postcard_codec_round_trip() {
        let item = item("pear", 2);
        let bytes = encode(&item).unwrap();
        assert_eq!(decode::<Item>(&bytes).unwrap(), item);
        assert!(decode::<Item>(&[0xff]).is_err());
    }

    #[test]
    fn stock_past_u32_max_leaves_item_untouched() {
        let inventory = stocked();
        assert_eq!(inventory.stock("apple", 4).unwrap(), 7);

        let err = inventory.stock("apple", u32::MAX).unwrap_err();
        assert_eq!(err.code(), ErrorCode::OutOfRange);
        assert_eq!(inventory.quantity("apple"), Some(7));
    }

    #[test]
    fn engine_reports_cardinalities() {
        let engine = Engine::new(&stocked().methods()).unwrap();
        let declared = [
            ("Lookup", Cardinality::UnaryUnary),
            ("List", Cardinality::UnaryStream),
            ("Restock", Cardinality::StreamUnary),
            ("Watch", Cardinality::StreamStream),
        ];
        for (method, cardinality) in declared {
            assert_eq!(engine.cardinality(method), Some(cardinality));
        }
        assert_eq!(engine.cardinality("Delete"), None);
    }

    #[tokio_test_lite::test]
    async fn lookup_found_and_missing() {
        init_tracing();
        let engine = Engine::new(&stocked().methods()).unwrap();

        let response = engine
            .unary_unary("Lookup", lookup("banana"))
            .await
            .unwrap();
        assert_eq!(*response.downcast::<Item>().unwrap(), item("banana", 7));

        let err = engine
            .unary_unary("Lookup", lookup("kiwi"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }

    #[tokio_test_lite::test]
    async fn list_streams_matching_items() {
        init_tracing();
        let engine = Engine::new(&stocked().methods()).unwrap();

        let request = message(ListRequest {
            prefix: "ap".to_string(),
        });
        let responses = engine.unary_stream("List", request).await.unwrap();
        let values: Vec<Message> = responses.map(|item| item.unwrap()).collect().await;
        let names: Vec<String> = items(values).into_iter().map(|i| i.name).collect();
        assert_eq!(names, vec!["apple", "apricot"]);
    }

    #[tokio_test_lite::test]
    async fn restock_updates_inventory() {
        init_tracing();
        let inventory = stocked();
        let engine = Engine::new(&inventory.methods()).unwrap();

        let requests: Streaming<Message> = Box::pin(stream::iter(vec![
            Ok(message(item("apple", 2))),
            Ok(message(item("cherry", 10))),
        ]));
        let summary = engine.stream_unary("Restock", requests).await.unwrap();
        assert_eq!(
            *summary.downcast::<RestockSummary>().unwrap(),
            RestockSummary {
                items: 2,
                quantity: 12,
            }
        );
        assert_eq!(inventory.quantity("apple"), Some(5));
        assert_eq!(inventory.quantity("cherry"), Some(10));
    }

    #[tokio_test_lite::test]
    async fn restock_past_u32_max_is_out_of_range() {
        init_tracing();
        let inventory = Inventory::new();
        let engine = Engine::new(&inventory.methods()).unwrap();

        let requests: Streaming<Message> = Box::pin(stream::iter(vec![
            Ok(message(item("a", u32::MAX))),
            Ok(message(item("b", 1))),
        ]));
        let err = engine.stream_unary("Restock", requests).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::OutOfRange);
        assert_eq!(inventory.quantity("a"), Some(u32::MAX));
        assert_eq!(inventory.quantity("b"), None);
    }

    #[tokio_test_lite::test]
    async fn watch_answers_each_lookup() {
        init_tracing();
        let engine = Engine::new(&stocked().methods()).unwrap();

        let requests: Streaming<Message> =
            Box::pin(stream::iter(vec![Ok(lookup("apple")), Ok(lookup("kiwi"))]));
        let responses: Vec<Result<Message, RpcError>> = engine
            .stream_stream("Watch", requests)
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(responses.len(), 2);
        let mut responses = responses.into_iter();
        let first = responses.next().unwrap().unwrap();
        assert_eq!(first.downcast::<Item>().unwrap().quantity, 3);
        let second = responses.next().unwrap().unwrap_err();
        assert_eq!(second.code(), ErrorCode::NotFound);
    }

    #[tokio_test_lite::test]
    async fn wrong_cardinality_and_unknown_method() {
        init_tracing();
        let engine = Engine::new(&stocked().methods()).unwrap();

        let request = message(ListRequest {
            prefix: String::new(),
        });
        let err = engine.unary_unary("List", request).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);

        let err = engine
            .unary_unary("Delete", lookup("apple"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Unimplemented);
    }

    #[tokio_test_lite::test]
    async fn wrongly_typed_request_fails_to_encode() {
        init_tracing();
        let engine = Engine::new(&stocked().methods()).unwrap();

        let request = message(ListRequest {
            prefix: String::new(),
        });
        let err = engine.unary_unary("Lookup", request).await.unwrap_err();
        assert!(matches!(err, RpcError::Encode(_)));
    }

    #[tokio::test]
    async fn slow_call_expires() {
        init_tracing();
        let mut methods = HashMap::new();
        methods.insert(
            "Slow".to_string(),
            unary_unary_rpc_method(
                |request: Lookup, _ctx: RpcContext| async move {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok::<_, RpcError>(item(&request.name, 0))
                },
                encode::<Lookup>,
                decode::<Lookup>,
                encode::<Item>,
                decode::<Item>,
            ),
        );
        let engine = Engine::new(&methods)
            .unwrap()
            .with_timeout(Duration::from_millis(20));

        let err = engine.unary_unary("Slow", lookup("x")).await.unwrap_err();
        assert_eq!(err, RpcError::Aborted(AbortionKind::Expired));
    }

    #[tokio::test]
    async fn stalled_stream_expires() {
        init_tracing();
        let seen = Arc::new(Mutex::new(None));
        let recorded = seen.clone();
        let mut methods = HashMap::new();
        methods.insert(
            "Stall".to_string(),
            stream_stream_rpc_method(
                move |_requests: Streaming<Lookup>, ctx: RpcContext| -> Streaming<Item> {
                    let recorded = recorded.clone();
                    ctx.add_abortion_callback(move |kind| *recorded.lock() = Some(kind));
                    Box::pin(stream::pending())
                },
                encode::<Lookup>,
                decode::<Lookup>,
                encode::<Item>,
                decode::<Item>,
            ),
        );
        let engine = Engine::new(&methods)
            .unwrap()
            .with_timeout(Duration::from_millis(20));

        let requests: Streaming<Message> = Box::pin(stream::empty());
        let mut responses = engine.stream_stream("Stall", requests).await.unwrap();
        let first = responses.next().await.unwrap().err();
        assert_eq!(first, Some(RpcError::Aborted(AbortionKind::Expired)));
        assert!(responses.next().await.is_none());
        assert_eq!(*seen.lock(), Some(AbortionKind::Expired));
    }
}
