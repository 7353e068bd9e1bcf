//! Loopback channel for testing.
//!
//! Two [`LoopbackChannel`] endpoints joined by in-process
//! [`tokio::sync::mpsc`] queues stand in for two clients paired in one relay
//! room. Frames are passed as decoded [`WireMessage`] values.

use tokio::sync::mpsc;

use psst_proto::wire::WireMessage;

use super::{Channel, TransportError};

/// In-process channel endpoint.
#[derive(Debug)]
pub struct LoopbackChannel {
    /// Sender toward the remote endpoint; `None` once closed.
    tx: Option<mpsc::Sender<WireMessage>>,
    /// Frames the remote endpoint sent.
    rx: mpsc::Receiver<WireMessage>,
}

impl LoopbackChannel {
    /// Create two connected endpoints.
    ///
    /// `buffer` is the queue capacity in each direction.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use psst::transport::Channel;
    /// use psst::transport::loopback::LoopbackChannel;
    /// use psst_proto::wire::WireMessage;
    ///
    /// # async fn example() {
    /// let (mut alice, mut bob) = LoopbackChannel::pair(32);
    /// alice.send(&WireMessage::cipher(b"sealed")).await.unwrap();
    /// let frame = bob.recv().await.unwrap();
    /// assert_eq!(frame, WireMessage::cipher(b"sealed"));
    /// # }
    /// ```
    #[must_use]
    pub fn pair(buffer: usize) -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::channel(buffer);
        let (tx_b, rx_b) = mpsc::channel(buffer);

        let a = Self {
            tx: Some(tx_b),
            rx: rx_a,
        };
        let b = Self {
            tx: Some(tx_a),
            rx: rx_b,
        };
        (a, b)
    }

    /// Sender feeding the remote endpoint's inbound queue.
    ///
    /// Tests use it to simulate relay-originated frames such as the
    /// dead-peer sentinel. `None` once this endpoint is closed.
    #[must_use]
    pub fn peer_sender(&self) -> Option<mpsc::Sender<WireMessage>> {
        self.tx.clone()
    }
}

impl Channel for LoopbackChannel {
    async fn send(&mut self, msg: &WireMessage) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::ConnectionClosed)?;
        tx.send(msg.clone())
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn recv(&mut self) -> Result<WireMessage, TransportError> {
        self.rx.recv().await.ok_or(TransportError::ConnectionClosed)
    }

    async fn close(&mut self) {
        self.tx = None;
        self.rx.close();
    }

    fn is_open(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }
}
