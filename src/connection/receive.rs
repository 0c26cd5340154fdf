//! Receive and dispatch loops.
//!
//! The receive task reads, decodes and offers each message to the reply
//! slot. Whatever the slot does not consume is queued for the dispatch task,
//! which runs the action router and data handlers in wire order.

use tokio::io::{AsyncReadExt, ReadHalf};
use tokio::sync::{mpsc, watch};

use super::{lock, Connection};
use crate::error::SockwireError;
use crate::message::Message;
use crate::protocol::Decoder;
use crate::transport::BoxedStream;

/// Start the receive loop of `conn` unless one already claimed the stream.
pub(crate) fn spawn_receive_loop(conn: &Connection) {
    let Some(reader) = lock(&conn.inner.reader).take() else {
        return;
    };

    let protocol = conn.protocol();
    let decoder = protocol.decoder();
    let buffer_size = protocol.read_buffer_size().max(1);
    let (tx, rx) = mpsc::channel(conn.endpoint().dispatch_capacity.max(1));

    tokio::spawn(dispatch_loop(conn.clone(), rx));
    let task = tokio::spawn(receive_loop(conn.clone(), reader, decoder, buffer_size, tx));
    *lock(&conn.inner.receive_task) = Some(task);
}

async fn raised(flag: &mut watch::Receiver<bool>) {
    let _ = flag.wait_for(|set| *set).await;
}

async fn receive_loop(
    conn: Connection,
    mut reader: ReadHalf<BoxedStream>,
    mut decoder: Box<dyn Decoder>,
    buffer_size: usize,
    dispatch: mpsc::Sender<Message>,
) {
    let mut shutdown = conn.inner.shutdown.subscribe();
    let mut buf = vec![0u8; buffer_size];
    let mut payloads = Vec::new();

    let error = 'read: loop {
        let n = tokio::select! {
            biased;
            _ = raised(&mut shutdown) => break None,
            read = reader.read(&mut buf) => match read {
                Ok(0) => break None,
                Ok(n) => n,
                Err(e) => break Some(SockwireError::Io(e)),
            },
        };

        // Messages completed ahead of a framing error are still delivered.
        let decoded = decoder.decode(&buf[..n], &mut payloads);

        for payload in payloads.drain(..) {
            let Some(message) = conn.inner.pending.resolve(Message::new(payload)) else {
                continue;
            };

            tokio::select! {
                biased;
                _ = raised(&mut shutdown) => break 'read None,
                sent = dispatch.send(message) => {
                    if sent.is_err() {
                        break 'read None;
                    }
                }
            }
        }

        if let Err(e) = decoded {
            break Some(e);
        }
    };

    tracing::debug!(
        "Receive loop for connection {} stopped ({} bytes undecoded)",
        conn.id(),
        decoder.buffered()
    );
    drop(reader);
    conn.disconnect(error, true).await;
}

async fn dispatch_loop(conn: Connection, mut queue: mpsc::Receiver<Message>) {
    let mut opened = conn.inner.opened.subscribe();
    let mut shutdown = conn.inner.shutdown.subscribe();

    // Nothing is dispatched before the connect event, or at all if the
    // connection was rejected.
    tokio::select! {
        biased;
        _ = raised(&mut opened) => {}
        _ = raised(&mut shutdown) => {
            if !*opened.borrow() {
                return;
            }
        }
    }

    // Messages decoded before a disconnect are still delivered.
    while let Some(message) = queue.recv().await {
        conn.endpoint().dispatch(&conn, message).await;
    }
}
