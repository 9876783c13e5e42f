//! Notification handling for the connected iron
//! Forwards values pushed on subscribed characteristics to the session.

use bluest::Characteristic;
use futures_util::StreamExt;
use log::{debug, error, info};
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::transport::{TransportEvent, TransportEventSender};

/// Notification handler for the active link
#[derive(Clone)]
pub struct NotificationHandler {
    events: TransportEventSender,
    /// Cancelled when the link goes away
    link_token: Arc<Mutex<CancellationToken>>,
}

impl NotificationHandler {
    pub fn new(events: TransportEventSender) -> Self {
        Self {
            events,
            link_token: Arc::new(Mutex::new(CancellationToken::new())),
        }
    }

    /// Starts forwarding notifications of `characteristic`
    pub fn subscribe(&self, characteristic: Characteristic) {
        let token = self
            .link_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let events = self.events.clone();

        tokio::spawn(async move {
            Self::process_notifications(characteristic, events, token).await;
        });
    }

    /// Ends every notification stream of the current link
    pub fn stop_all(&self) {
        let mut token = self
            .link_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let previous = std::mem::replace(&mut *token, CancellationToken::new());
        previous.cancel();
    }

    async fn process_notifications(
        characteristic: Characteristic,
        events: TransportEventSender,
        token: CancellationToken,
    ) {
        let uuid = characteristic.uuid();
        debug!("Subscribing to notifications of {}", uuid);

        let mut notification_stream = match characteristic.notify().await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Failed to subscribe to {}: {}", uuid, e);
                return;
            }
        };

        loop {
            tokio::select! {
                item = notification_stream.next() => match item {
                    Some(Ok(value)) => {
                        debug!("Notification from {}: {:?}", uuid, value);
                        let event = TransportEvent::Notification { characteristic: uuid, value };
                        if events.send(event).is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        error!("Error in notification stream of {}: {}", uuid, e);
                        break;
                    }
                    None => break,
                },
                _ = token.cancelled() => break,
            }
        }

        info!("Notification stream of {} ended", uuid);
    }
}
