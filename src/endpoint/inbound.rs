//! Inbound endpoint: decoded frames from a shared port.
//!
//! Each endpoint owns a [`FrameDecoder`] and a task that feeds it from the
//! connection's event stream. Endpoints on the same port share the bytes but
//! never their framing state.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, trace};

use crate::config::{LinkConfig, OutputEncoding};
use crate::error::{Error, Result};
use crate::framing::{Frame, FrameDecoder, Payload};
use crate::identifiers::PortId;
use crate::transport::{ConnectionPool, LinkEvent, Subscription, sleep_until_deadline};

use super::status::{LinkStatus, StatusHandler};

// ============================================================================
// InboundMessage
// ============================================================================

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InboundMessage {
    /// Port the frame arrived on.
    pub port: PortId,
    /// Frame contents.
    pub payload: Payload,
}

// ============================================================================
// InboundEndpoint
// ============================================================================

/// Consumer of decoded frames from one port.
///
/// # Example
///
/// ```ignore
/// let (endpoint, mut messages) = InboundEndpoint::attach(&pool, Some(&config), None)?;
/// while let Some(message) = messages.recv().await {
///     println!("{:?}", message.payload);
/// }
/// endpoint.detach().await;
/// ```
pub struct InboundEndpoint {
    port: PortId,
    pool: Arc<ConnectionPool>,
    task: JoinHandle<()>,
}

impl InboundEndpoint {
    /// Acquires the port and starts decoding.
    ///
    /// The status handler, if any, first receives
    /// [`LinkStatus::NotConnected`] and then every change.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigurationMissing`] if `config` is `None`; the
    /// endpoint is not created.
    pub fn attach(
        pool: &Arc<ConnectionPool>,
        config: Option<&LinkConfig>,
        status: Option<StatusHandler>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<InboundMessage>)> {
        let Some(config) = config else {
            error!("Inbound endpoint has no serial port configuration");
            return Err(Error::ConfigurationMissing);
        };

        let handle = pool.acquire(config);
        let (message_tx, message_rx) = mpsc::unbounded_channel();

        let decode = DecodeTask {
            port: config.port.clone(),
            decoder: FrameDecoder::new(config.framing),
            encoding: config.encoding,
            subscription: handle.subscribe(),
            message_tx,
            status,
        };
        let task = tokio::spawn(decode.run());

        debug!(port = %config.port, framing = ?config.framing, "Inbound endpoint attached");

        Ok((
            Self {
                port: config.port.clone(),
                pool: Arc::clone(pool),
                task,
            },
            message_rx,
        ))
    }

    /// Returns the port this endpoint reads.
    #[inline]
    #[must_use]
    pub fn port(&self) -> &PortId {
        &self.port
    }

    /// Stops decoding and releases the port.
    ///
    /// Bytes still buffered in the decoder are discarded.
    pub async fn detach(self) {
        self.task.abort();
        let _ = self.task.await;
        self.pool.release(&self.port).await;
        debug!(port = %self.port, "Inbound endpoint detached");
    }
}

// ============================================================================
// DecodeTask
// ============================================================================

struct DecodeTask {
    port: PortId,
    decoder: FrameDecoder,
    encoding: OutputEncoding,
    subscription: Subscription,
    message_tx: mpsc::UnboundedSender<InboundMessage>,
    status: Option<StatusHandler>,
}

impl DecodeTask {
    async fn run(mut self) {
        self.report(LinkStatus::NotConnected);

        loop {
            tokio::select! {
                event = self.subscription.recv() => {
                    let Some(event) = event else {
                        break;
                    };
                    if !self.handle_event(event) {
                        break;
                    }
                }

                () = sleep_until_deadline(self.decoder.deadline()) => {
                    if let Some(frame) = self.decoder.expire(Instant::now())
                        && !self.deliver(frame)
                    {
                        break;
                    }
                }
            }
        }

        trace!(port = %self.port, "Decode task stopped");
    }

    /// Returns `false` once the message receiver is gone.
    fn handle_event(&mut self, event: LinkEvent) -> bool {
        if let LinkEvent::Data(bytes) = &event {
            let frames = self.decoder.feed(bytes, Instant::now());
            return frames.into_iter().all(|frame| self.deliver(frame));
        }

        if let Some(status) = LinkStatus::from_event(&event) {
            self.report(status);
        }
        true
    }

    fn deliver(&self, frame: Frame) -> bool {
        trace!(port = %self.port, bytes = frame.len(), "Frame decoded");
        let message = InboundMessage {
            port: self.port.clone(),
            payload: frame.into_payload(self.encoding),
        };
        self.message_tx.send(message).is_ok()
    }

    fn report(&self, status: LinkStatus) {
        if let Some(handler) = &self.status {
            handler(status);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use parking_lot::Mutex;
    use tokio::time::sleep;

    use crate::config::Framing;
    use crate::transport::MockTransport;

    fn pool(mock: &MockTransport) -> Arc<ConnectionPool> {
        ConnectionPool::builder()
            .transport(mock.clone())
            .reconnect_delay(Duration::from_secs(1))
            .build()
    }

    fn config(framing: Framing, encoding: OutputEncoding) -> LinkConfig {
        LinkConfig::builder("/dev/ttyUSB0")
            .framing(framing)
            .encoding(encoding)
            .build()
            .unwrap()
    }

    async fn settle() {
        sleep(Duration::from_millis(1)).await;
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<InboundMessage>) -> Vec<Payload> {
        std::iter::from_fn(|| rx.try_recv().ok())
            .map(|m| m.payload)
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_configuration() {
        let pool = pool(&MockTransport::new());
        let result = InboundEndpoint::attach(&pool, None, None);
        assert!(matches!(result, Err(Error::ConfigurationMissing)));
        assert_eq!(pool.connection_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delimited_text_frames() {
        let mock = MockTransport::new();
        let pool = pool(&mock);
        let config = config(Framing::Delimiter(b'\n'), OutputEncoding::Text);

        let (endpoint, mut rx) = InboundEndpoint::attach(&pool, Some(&config), None).unwrap();
        settle().await;

        mock.inject_data("/dev/ttyUSB0", b"T=21.5\nT=2");
        mock.inject_data("/dev/ttyUSB0", b"1.7\n");
        settle().await;

        assert_eq!(
            drain(&mut rx),
            vec![
                Payload::Text("T=21.5\n".into()),
                Payload::Text("T=21.7\n".into())
            ]
        );

        endpoint.detach().await;
        assert_eq!(mock.close_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inter_byte_timeout_frame() {
        let mock = MockTransport::new();
        let pool = pool(&mock);
        let config = config(
            Framing::InterByteTimeout(Duration::from_millis(20)),
            OutputEncoding::Binary,
        );

        let (_endpoint, mut rx) = InboundEndpoint::attach(&pool, Some(&config), None).unwrap();
        settle().await;

        for chunk in [&[0x01, 0x03][..], &[0x02], &[0x00, 0x0A]] {
            mock.inject_data("/dev/ttyUSB0", chunk);
            sleep(Duration::from_millis(10)).await;
            assert!(drain(&mut rx).is_empty());
        }

        sleep(Duration::from_millis(15)).await;
        assert_eq!(
            drain(&mut rx),
            vec![Payload::Binary(vec![0x01, 0x03, 0x02, 0x00, 0x0A])]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_splits_frames_when_data_and_timer_race() {
        let mock = MockTransport::new();
        let pool = pool(&mock);
        let config = config(
            Framing::InterByteTimeout(Duration::from_millis(20)),
            OutputEncoding::Binary,
        );

        let (_endpoint, mut rx) = InboundEndpoint::attach(&pool, Some(&config), None).unwrap();
        settle().await;

        for round in 0..8u8 {
            mock.inject_data("/dev/ttyUSB0", &[round]);
            settle().await;

            // The next byte and the expired timer become ready together.
            mock.inject_data("/dev/ttyUSB0", &[round + 100]);
            tokio::time::advance(Duration::from_millis(50)).await;
            sleep(Duration::from_millis(50)).await;

            assert_eq!(
                drain(&mut rx),
                vec![Payload::Binary(vec![round]), Payload::Binary(vec![round + 100])]
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_endpoints_keep_independent_framing() {
        let mock = MockTransport::new();
        let pool = pool(&mock);
        let lines = config(Framing::Delimiter(b'\n'), OutputEncoding::Text);
        let pairs = config(Framing::Count(2), OutputEncoding::Binary);

        let (_a, mut line_rx) = InboundEndpoint::attach(&pool, Some(&lines), None).unwrap();
        let (_b, mut pair_rx) = InboundEndpoint::attach(&pool, Some(&pairs), None).unwrap();
        settle().await;

        mock.inject_data("/dev/ttyUSB0", b"ab\nc");
        settle().await;

        assert_eq!(mock.open_count(), 1);
        assert_eq!(drain(&mut line_rx), vec![Payload::Text("ab\n".into())]);
        assert_eq!(
            drain(&mut pair_rx),
            vec![Payload::Binary(b"ab".to_vec()), Payload::Binary(b"\nc".to_vec())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_follows_connection() {
        let mock = MockTransport::new();
        mock.fail_opens(["Permission denied"]);
        let pool = pool(&mock);
        let config = config(Framing::PerByte, OutputEncoding::Text);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler: StatusHandler = Box::new(move |status| sink.lock().push(status));

        let (_endpoint, _rx) =
            InboundEndpoint::attach(&pool, Some(&config), Some(handler)).unwrap();
        sleep(Duration::from_millis(1001)).await;

        mock.inject_close("/dev/ttyUSB0");
        settle().await;

        assert_eq!(
            *seen.lock(),
            vec![
                LinkStatus::NotConnected,
                LinkStatus::NotConnected,
                LinkStatus::Error("Serialport /dev/ttyUSB0: open failed: Permission denied".into()),
                LinkStatus::Connected,
                LinkStatus::Error("Serialport /dev/ttyUSB0 closed unexpectedly".into()),
                LinkStatus::NotConnected,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_detach_keeps_shared_port_open() {
        let mock = MockTransport::new();
        let pool = pool(&mock);
        let config = config(Framing::PerByte, OutputEncoding::Text);

        let (first, _rx1) = InboundEndpoint::attach(&pool, Some(&config), None).unwrap();
        let (_second, mut rx2) = InboundEndpoint::attach(&pool, Some(&config), None).unwrap();
        settle().await;

        first.detach().await;
        assert_eq!(mock.close_count(), 0);

        mock.inject_data("/dev/ttyUSB0", b"ok");
        settle().await;
        assert_eq!(
            drain(&mut rx2),
            vec![Payload::Text("o".into()), Payload::Text("k".into())]
        );
    }
}
