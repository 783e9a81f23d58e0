//! Message transport seam.
//!
//! A [`Dialer`] opens a text-frame connection and hands back a pair of
//! channels. The connection is closed when the inbound channel ends; dropping
//! the outbound sender closes the socket.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use crate::error::{Error, Result};

/// Both halves of an open connection.
#[derive(Debug)]
pub struct TransportParts {
	pub outbound: mpsc::UnboundedSender<String>,
	pub inbound: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
pub trait Dialer: Send + Sync + 'static {
	async fn dial(&self, url: &str) -> Result<TransportParts>;
}

/// Dials WebSocket URLs with tokio-tungstenite.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketDialer;

#[async_trait]
impl Dialer for WebSocketDialer {
	async fn dial(&self, url: &str) -> Result<TransportParts> {
		let (stream, _) = connect_async(url).await.map_err(|err| Error::Dial {
			url: url.to_string(),
			message: err.to_string(),
		})?;

		let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<String>();
		let (inbound_tx, inbound) = mpsc::unbounded_channel::<String>();
		let (mut sink, mut source) = stream.split();
		let url = url.to_string();

		tokio::spawn(async move {
			loop {
				tokio::select! {
					outgoing = outbound_rx.recv() => match outgoing {
						Some(text) => {
							if sink.send(Message::Text(text)).await.is_err() {
								break;
							}
						}
						None => {
							let _ = sink.close().await;
							break;
						}
					},
					incoming = source.next() => match incoming {
						Some(Ok(Message::Text(text))) => {
							if inbound_tx.send(text).is_err() {
								break;
							}
						}
						Some(Ok(Message::Binary(bytes))) => {
							if inbound_tx.send(String::from_utf8_lossy(&bytes).into_owned()).is_err() {
								break;
							}
						}
						Some(Ok(Message::Close(_))) | None => break,
						Some(Ok(_)) => {}
						Some(Err(err)) => {
							debug!(target = "tabbridge.transport", url = %url, error = %err, "websocket error");
							break;
						}
					},
				}
			}
			debug!(target = "tabbridge.transport", url = %url, "websocket closed");
		});

		Ok(TransportParts { outbound, inbound })
	}
}
