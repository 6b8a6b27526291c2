use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};

/// Named push events delivered by the external transport.
///
/// Arrival order across event types is not guaranteed: `startup` may land
/// before, after, or interleaved with `message` and `end`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Structured metadata payload text, parseable into `StartupMetadata`.
    Startup(String),
    /// Raw answer text, possibly containing the literal `<br>` marker.
    Message(String),
    /// End-of-stream marker; carries no payload.
    End,
    /// Error payload, optionally structured as `{"error": "..."}`.
    Error(String),
}

/// Boxed producer future driven by the caller alongside the consumer.
pub type TransportWorker = BoxFuture<'static, ()>;

/// Consumer half of a transport: the event subscription plus the close
/// signal honored by producers.
#[derive(Debug)]
pub struct StreamTransport {
    events: mpsc::UnboundedReceiver<TransportEvent>,
    close: Option<oneshot::Sender<()>>,
}

impl StreamTransport {
    /// Receives the next event; `None` once the producer is gone.
    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }

    /// Signals the producer to stop and drops the subscription.
    /// Idempotent; already-received events are unaffected.
    pub fn close(&mut self) {
        if let Some(close) = self.close.take() {
            let _ = close.send(());
        }
        self.events.close();
    }
}

/// Producer half handed to transport integrations.
#[derive(Debug)]
pub struct TransportSender {
    events: mpsc::UnboundedSender<TransportEvent>,
    closed: oneshot::Receiver<()>,
}

impl TransportSender {
    pub fn startup(&self, payload: impl Into<String>) -> bool {
        self.send(TransportEvent::Startup(payload.into()))
    }

    pub fn message(&self, payload: impl Into<String>) -> bool {
        self.send(TransportEvent::Message(payload.into()))
    }

    pub fn end(&self) -> bool {
        self.send(TransportEvent::End)
    }

    pub fn error(&self, payload: impl Into<String>) -> bool {
        self.send(TransportEvent::Error(payload.into()))
    }

    /// True once the consumer has closed or dropped the transport.
    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }

    /// Resolves when the consumer closes the transport.
    pub async fn closed(&mut self) {
        let _ = (&mut self.closed).await;
    }

    fn send(&self, event: TransportEvent) -> bool {
        self.events.send(event).is_ok()
    }
}

/// Builds a connected producer/consumer transport pair.
pub fn channel() -> (TransportSender, StreamTransport) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (close_tx, close_rx) = oneshot::channel();
    (
        TransportSender {
            events: event_tx,
            closed: close_rx,
        },
        StreamTransport {
            events: event_rx,
            close: Some(close_tx),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_events_in_send_order() {
        let (sender, mut transport) = channel();
        sender.startup("{}");
        sender.message("hi");
        sender.end();

        assert_eq!(
            transport.next_event().await,
            Some(TransportEvent::Startup("{}".to_string()))
        );
        assert_eq!(
            transport.next_event().await,
            Some(TransportEvent::Message("hi".to_string()))
        );
        assert_eq!(transport.next_event().await, Some(TransportEvent::End));
    }

    #[tokio::test]
    async fn close_signals_the_producer() {
        let (mut sender, mut transport) = channel();
        assert!(!sender.is_closed());

        transport.close();
        sender.closed().await;
        assert!(sender.is_closed());
        assert!(!sender.message("late"));
    }

    #[tokio::test]
    async fn dropped_producer_ends_the_subscription() {
        let (sender, mut transport) = channel();
        sender.message("only");
        drop(sender);

        assert_eq!(
            transport.next_event().await,
            Some(TransportEvent::Message("only".to_string()))
        );
        assert_eq!(transport.next_event().await, None);
    }
}
