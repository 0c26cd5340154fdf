//! Action routing with raw and typed handlers.
//!
//! This example demonstrates:
//! - Registering handlers by action code and by action name
//! - MsgPack-decoded handler input and object replies
//! - Broadcasting an action to every connected client
//!
//! ```sh
//! cargo run --example actions
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use sockwire::codec::MsgPackCodec;
use sockwire::transport::KeepAlive;
use sockwire::{ActionContext, ClientBuilder, Connection, Message, ServerBuilder};

/// Input structure for the "add" action.
#[derive(Serialize, Deserialize, Debug)]
struct AddInput {
    a: i64,
    b: i64,
}

/// Output structure for the "add" action.
#[derive(Serialize, Deserialize, Debug)]
struct AddOutput {
    sum: i64,
}

const PING: i32 = 7;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let server = ServerBuilder::new()
        .keep_alive(KeepAlive::default())
        .action(PING, |_msg: Message, ctx: ActionContext| async move {
            ctx.reply("pong").await
        })
        .action_typed("add", |input: AddInput, ctx: ActionContext| async move {
            ctx.reply_object(&AddOutput {
                sum: input.a + input.b,
            })
            .await
        })
        .bind("127.0.0.1:0")
        .await?;

    let client = ClientBuilder::new()
        .action("news", |msg: Message, ctx: ActionContext| async move {
            println!("client {}: news {}", ctx.connection().id(), msg.as_str()?);
            Ok(())
        })
        .build();

    let conn: Connection = client.connect(server.local_addr()).await?;
    let timeout = Some(Duration::from_secs(1));

    if let Some(reply) = conn.send_action_and_get_reply(PING, (), timeout).await? {
        println!("ping -> {}", reply.as_str()?);
    }

    let input = MsgPackCodec::encode(&AddInput { a: 40, b: 2 })?;
    if let Some(reply) = conn.send_action_and_get_reply("add", input, timeout).await? {
        let output: AddOutput = reply.to_object()?;
        println!("add -> {}", output.sum);
    }

    let delivered = server.broadcast_action("news", "server going down").await;
    println!("broadcast reached {} client(s)", delivered);

    tokio::time::sleep(Duration::from_millis(100)).await;
    server.shutdown().await;
    conn.closed().await;
    Ok(())
}
