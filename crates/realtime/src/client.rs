use anyhow::Result;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

use crate::types;
use crate::types::Session;

pub(crate) mod config;
mod consts;
mod utils;

type ClientTx = tokio::sync::mpsc::Sender<Outgoing>;
type ServerTx = tokio::sync::broadcast::Sender<types::ServerEvent>;
pub type ServerRx = tokio::sync::broadcast::Receiver<types::ServerEvent>;

/// Frames queued for the writer task.
#[derive(Debug)]
enum Outgoing {
    Event(types::ClientEvent),
    Close,
}

/// The control surface of a live agent connection.
///
/// `Client` is the WebSocket implementation; adapters depend on this trait so
/// they can be driven by a mock in tests.
#[async_trait]
pub trait RealtimeClient: Send {
    async fn send_event(&mut self, event: types::ClientEvent) -> Result<()>;

    async fn update_session(&mut self, session: Session) -> Result<()> {
        self.send_event(types::ClientEvent::session_update(session))
            .await
    }

    async fn create_conversation_item(&mut self, item: types::Item) -> Result<()> {
        let event = types::ClientEvent::ConversationItemCreate(
            types::events::client::ConversationItemCreateEvent::new(item),
        );
        self.send_event(event).await
    }

    async fn create_response(&mut self) -> Result<()> {
        self.send_event(types::ClientEvent::create_response()).await
    }

    async fn cancel_response(&mut self) -> Result<()> {
        self.send_event(types::ClientEvent::cancel_response()).await
    }

    async fn server_events(&mut self) -> Result<ServerRx>;

    async fn disconnect(&mut self) -> Result<()>;
}

// Holds the channel capacity, the writer queue and the broadcast side of the reader.
pub struct Client {
    capacity: usize,
    config: config::Config,
    c_tx: Option<ClientTx>,
    s_tx: Option<ServerTx>,
}

impl Client {
    fn new(capacity: usize, config: config::Config) -> Self {
        Self {
            capacity,
            config,
            c_tx: None,
            s_tx: None,
        }
    }

    async fn connect(&mut self) -> Result<()> {
        if self.c_tx.is_some() {
            return Err(anyhow::anyhow!("already connected"));
        }

        let request = utils::build_request(&self.config)?;
        let (ws_stream, _) = tokio_tungstenite::connect_async(request).await?;
        let (mut write, mut read) = ws_stream.split();

        let (c_tx, mut c_rx) = tokio::sync::mpsc::channel::<Outgoing>(self.capacity);
        let (s_tx, _) = tokio::sync::broadcast::channel(self.capacity);

        self.c_tx = Some(c_tx);
        self.s_tx = Some(s_tx.clone());

        // Writer: serialize queued events until asked to close or every sender is gone.
        tokio::spawn(async move {
            while let Some(outgoing) = c_rx.recv().await {
                match outgoing {
                    Outgoing::Event(event) => match serde_json::to_string(&event) {
                        Ok(text) => {
                            tracing::debug!("sending client event: {}", event.kind());
                            if let Err(e) = write.send(Message::Text(text)).await {
                                tracing::error!("failed to send message: {}", e);
                            }
                        }
                        Err(e) => {
                            tracing::error!("failed to serialize event: {}", e);
                        }
                    },
                    Outgoing::Close => break,
                }
            }
            if let Err(e) = write.close().await {
                tracing::debug!("socket already closed: {}", e);
            }
        });

        // Reader: decode server frames and fan them out to every subscriber.
        tokio::spawn(async move {
            while let Some(message) = read.next().await {
                let message = match message {
                    Err(e) => {
                        tracing::error!("failed to read message: {}", e);
                        break;
                    }
                    Ok(message) => message,
                };
                match message {
                    Message::Text(text) => {
                        match serde_json::from_str::<types::ServerEvent>(&text) {
                            Ok(event) => {
                                if let Err(e) = s_tx.send(event) {
                                    tracing::debug!("no subscriber for server event: {}", e);
                                }
                            }
                            Err(e) => {
                                let event_type = serde_json::from_str::<serde_json::Value>(&text)
                                    .ok()
                                    .and_then(|json| {
                                        json.get("type")
                                            .and_then(|v| v.as_str())
                                            .map(str::to_owned)
                                    });
                                tracing::error!(
                                    "failed to deserialize event: {}, type=> {:?}",
                                    e,
                                    event_type
                                );
                            }
                        }
                    }
                    Message::Binary(bin) => {
                        tracing::warn!("unexpected binary message: {} bytes", bin.len());
                    }
                    Message::Close(reason) => {
                        tracing::info!("connection closed: {:?}", reason);
                        break;
                    }
                    _ => {}
                }
            }
            // Reads end on close, error or EOF; all three look like a close to subscribers.
            let close_event = types::ServerEvent::Close { reason: None };
            if let Err(e) = s_tx.send(close_event) {
                tracing::debug!("no subscriber for close event: {}", e);
            }
        });
        Ok(())
    }
}

#[async_trait]
impl RealtimeClient for Client {
    async fn send_event(&mut self, event: types::ClientEvent) -> Result<()> {
        match self.c_tx {
            Some(ref tx) => {
                tx.send(Outgoing::Event(event))
                    .await
                    .map_err(|_| anyhow::anyhow!("connection writer has stopped"))?;
                Ok(())
            }
            None => Err(anyhow::anyhow!("not connected yet")),
        }
    }

    async fn server_events(&mut self) -> Result<ServerRx> {
        match self.s_tx {
            Some(ref tx) => Ok(tx.subscribe()),
            None => Err(anyhow::anyhow!("not connected yet")),
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.s_tx = None;
        if let Some(tx) = self.c_tx.take() {
            // The writer may already be gone if the server hung up first.
            let _ = tx.send(Outgoing::Close).await;
        }
        Ok(())
    }
}

async fn connect_with_config(capacity: usize, config: config::Config) -> Result<Client> {
    let mut client = Client::new(capacity, config);
    client.connect().await?;
    Ok(client)
}

pub async fn connect(config: config::Config) -> Result<Client> {
    connect_with_config(consts::DEFAULT_CAPACITY, config).await
}
