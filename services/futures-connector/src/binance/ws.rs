//! WebSocket stream plumbing

use crate::transport::{StreamCloser, StreamHandle};
use anyhow::Context;
use connector_common::ConnectorResult;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

/// Frames buffered per subscription before backpressure drops the pump
const FRAME_BUFFER: usize = 1024;

/// Connect and pump text frames into a channel.
///
/// The pump answers pings, forwards text frames and exits on close or
/// error; the receiver side then sees end-of-stream. Dropping the returned
/// handle aborts the pump.
pub(super) async fn open_stream(url: &str) -> ConnectorResult<StreamHandle> {
    let (stream, _response) = connect_async(url)
        .await
        .with_context(|| format!("connecting stream {url}"))?;
    debug!(url, "stream connected");

    let (mut write, mut read) = stream.split();
    let (tx, rx) = mpsc::channel(FRAME_BUFFER);

    let pump = tokio::spawn(async move {
        while let Some(message) = read.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    if tx.send(text.to_string()).await.is_err() {
                        break;
                    }
                }
                Ok(Message::Ping(payload)) => {
                    if write.send(Message::Pong(payload)).await.is_err() {
                        warn!("pong failed, closing stream");
                        break;
                    }
                }
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "stream closed by venue");
                    break;
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(error = %err, "stream read failed");
                    break;
                }
            }
        }
    });

    Ok(StreamHandle::with_closer(rx, StreamCloser::new(pump)))
}
