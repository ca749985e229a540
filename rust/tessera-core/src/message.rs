//! Message and stream shapes shared by every method table.

use std::any::Any;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use futures_core::Stream;

use crate::{DecodeError, EncodeError, RpcError};

/// A type-erased message value.
///
/// Breakdown tables hold methods with unrelated request and response types,
/// so values cross the table boundary as `Message` and are downcast at the
/// edges.
pub type Message = Box<dyn Any + Send>;

/// A sequence of values, as sent by streaming callers or produced by
/// streaming services.
pub type Streaming<T> = Pin<Box<dyn Stream<Item = Result<T, RpcError>> + Send>>;

/// Serializes a message into bytes.
pub type Serializer = Arc<dyn Fn(&Message) -> Result<Bytes, EncodeError> + Send + Sync>;

/// Deserializes bytes into a message.
pub type Deserializer = Arc<dyn Fn(&[u8]) -> Result<Message, DecodeError> + Send + Sync>;

/// Box a value as a [`Message`].
pub fn message<T: Any + Send>(value: T) -> Message {
    Box::new(value)
}
