//! Echo server and client over a delimiter protocol.
//!
//! This example demonstrates:
//! - Starting a server with a line-based protocol
//! - Echoing every received message from a data handler
//! - Waiting for replies with a timeout on the client
//!
//! ```sh
//! cargo run --example echo
//! ```

use std::time::Duration;

use sockwire::protocol::DelimiterProtocol;
use sockwire::{ClientBuilder, Connection, Message, ServerBuilder};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let server = ServerBuilder::new()
        .protocol(DelimiterProtocol::default())
        .on_connect(|conn| println!("server: {} connected", conn.peer_addr()))
        .on_disconnect(|conn| println!("server: {} gone", conn.peer_addr()))
        .on_data(|conn: Connection, msg: Message| async move {
            if let Err(e) = conn.send(msg.into_payload()).await {
                eprintln!("server: echo failed: {}", e);
            }
        })
        .bind("127.0.0.1:0")
        .await?;

    println!("listening on {}", server.local_addr());

    let conn = ClientBuilder::new()
        .protocol(DelimiterProtocol::default())
        .connect(server.local_addr())
        .await?;

    for line in ["hello", "framed", "world"] {
        match conn
            .send_and_get_reply(line, Some(Duration::from_secs(1)))
            .await?
        {
            Some(reply) => println!("client: {} -> {}", line, reply.as_str()?),
            None => println!("client: {} -> (no reply)", line),
        }
    }

    conn.close().await;
    server.shutdown().await;
    Ok(())
}
