//! Runs each inventory method once through the inline engine.
//!
//! Set `RUST_LOG=tessera=debug` to watch the breakdowns being assembled.

use std::time::Duration;

use futures_util::{StreamExt, stream};
use tessera::{Message, RpcError, Streaming, message};
use tessera_inline_engine::{Engine, Inventory, Item, ListRequest, Lookup, RestockSummary};

const CALL_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tessera_inline_engine=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let inventory = Inventory::new();
    inventory.stock("apple", 3)?;
    inventory.stock("apricot", 5)?;
    inventory.stock("banana", 7)?;

    let engine = Engine::new(&inventory.methods())?
        .with_timeout(CALL_TIMEOUT);

    let lookup = message(Lookup {
        name: "apple".to_string(),
    });
    let item = engine.unary_unary("Lookup", lookup).await?;
    println!("Lookup apple -> {:?}", downcast::<Item>(item)?);

    let list = message(ListRequest {
        prefix: "ap".to_string(),
    });
    let mut listed = engine.unary_stream("List", list).await?;
    while let Some(item) = listed.next().await {
        println!("List ap -> {:?}", downcast::<Item>(item?)?);
    }

    let deliveries: Streaming<Message> = Box::pin(stream::iter(vec![
        Ok(message(Item {
            name: "banana".to_string(),
            quantity: 5,
        })),
        Ok(message(Item {
            name: "cherry".to_string(),
            quantity: 12,
        })),
    ]));
    let summary = engine.stream_unary("Restock", deliveries).await?;
    println!("Restock -> {:?}", downcast::<RestockSummary>(summary)?);

    let names = ["banana", "cherry", "durian"];
    let lookups = names.map(|name| {
        Ok::<_, RpcError>(message(Lookup {
            name: name.to_string(),
        }))
    });
    let lookups: Streaming<Message> = Box::pin(stream::iter(lookups));
    let mut watched = engine.stream_stream("Watch", lookups).await?;
    while let Some(item) = watched.next().await {
        match item {
            Ok(item) => println!("Watch -> {:?}", downcast::<Item>(item)?),
            Err(e) => println!("Watch -> {e}"),
        }
    }

    Ok(())
}

fn downcast<T: 'static>(value: Message) -> Result<T, RpcError> {
    value
        .downcast::<T>()
        .map(|boxed| *boxed)
        .map_err(|_| RpcError::internal(format!("expected {}", std::any::type_name::<T>())))
}
