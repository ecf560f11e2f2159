//! Half-duplex transmit sequencer.
//!
//! Every outbound write runs the same four steps:
//!
//! ```text
//! assert signal ──► write bytes ──► hold (wire time) ──► release signal ──► complete
//! ```
//!
//! The hold is a scheduled deadline owned by the connection loop, never a
//! busy wait. Once a write has started it always runs to the release step,
//! so the bus is never left half-driven. Writes submitted while one is in
//! flight queue in FIFO order.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::config::{FlowControl, LineSettings};
use crate::error::{Error, Result};
use crate::identifiers::PortId;

use super::link::SerialLink;

// ============================================================================
// LineTiming
// ============================================================================

/// Wire time of outbound bytes for a given line configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineTiming {
    bits_per_char: u32,
    baud_rate: u32,
}

impl LineTiming {
    /// Derives timing from line settings.
    #[inline]
    #[must_use]
    pub fn new(line: &LineSettings) -> Self {
        Self {
            bits_per_char: line.bits_per_char(),
            baud_rate: line.baud_rate.max(1),
        }
    }

    /// Returns the bits each character occupies on the wire.
    #[inline]
    #[must_use]
    pub fn bits_per_char(&self) -> u32 {
        self.bits_per_char
    }

    /// Time for `len` characters to leave the wire, rounded up to the
    /// next nanosecond.
    #[must_use]
    pub fn hold_duration(&self, len: usize) -> Duration {
        let bits = len as u128 * u128::from(self.bits_per_char);
        let nanos = (bits * 1_000_000_000).div_ceil(u128::from(self.baud_rate));
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}

// ============================================================================
// PendingWrite
// ============================================================================

/// Completion channel for one write.
pub(crate) type WriteDone = oneshot::Sender<Result<()>>;

/// A write waiting for the line.
pub(crate) struct PendingWrite {
    /// Payload bytes.
    pub bytes: Vec<u8>,
    /// Completion channel.
    pub done_tx: WriteDone,
}

/// Transmit phase of the line.
enum Phase {
    /// Nothing in flight.
    Idle,
    /// Bytes written; signal stays asserted until `until`.
    Holding { until: Instant, done_tx: WriteDone },
}

// ============================================================================
// Sequencer
// ============================================================================

/// Serializes writes on one connection and drives the direction signal.
pub(crate) struct Sequencer {
    port: PortId,
    flow_control: FlowControl,
    timing: LineTiming,
    queue: VecDeque<PendingWrite>,
    phase: Phase,
}

impl Sequencer {
    /// Creates an idle sequencer.
    pub fn new(port: PortId, line: &LineSettings, flow_control: FlowControl) -> Self {
        Self {
            port,
            flow_control,
            timing: LineTiming::new(line),
            queue: VecDeque::new(),
            phase: Phase::Idle,
        }
    }

    /// Returns `true` if no write is holding the line.
    #[inline]
    pub fn is_idle(&self) -> bool {
        matches!(self.phase, Phase::Idle)
    }

    /// Returns when the in-flight hold ends.
    #[inline]
    pub fn hold_deadline(&self) -> Option<Instant> {
        match self.phase {
            Phase::Idle => None,
            Phase::Holding { until, .. } => Some(until),
        }
    }

    /// Returns the number of writes waiting behind the in-flight one.
    #[inline]
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Drives the control line to its listening level.
    pub async fn restore_idle(&self, link: &mut dyn SerialLink) {
        if let Some((signal, level)) = self.flow_control.idle_level()
            && let Err(e) = link.set_control_signal(signal, level).await
        {
            warn!(port = %self.port, %signal, error = %e, "Failed to set idle level");
        }
    }

    /// Queues a write and starts it if the line is free.
    pub async fn submit(&mut self, write: PendingWrite, link: &mut dyn SerialLink) {
        self.queue.push_back(write);
        self.start_next(link).await;
    }

    /// Starts queued writes until one holds the line or the queue drains.
    pub async fn start_next(&mut self, link: &mut dyn SerialLink) {
        while self.is_idle() {
            let Some(PendingWrite { bytes, done_tx }) = self.queue.pop_front() else {
                return;
            };

            match self.begin(&bytes, link).await {
                Ok(Some(until)) => {
                    self.phase = Phase::Holding { until, done_tx };
                }
                Ok(None) => {
                    let _ = done_tx.send(Ok(()));
                }
                Err(e) => {
                    let _ = done_tx.send(Err(e));
                }
            }
        }
    }

    /// Ends the hold: releases the signal and completes the write.
    ///
    /// With no link (the port dropped during the hold) there is nothing to
    /// release and the write still counts as sent.
    pub async fn finish_hold(&mut self, link: Option<&mut (dyn SerialLink + 'static)>) {
        let Phase::Holding { done_tx, .. } = std::mem::replace(&mut self.phase, Phase::Idle) else {
            return;
        };

        let result = match (link, self.flow_control.idle_level()) {
            (Some(link), Some((signal, level))) => link
                .set_control_signal(signal, level)
                .await
                .map_err(|e| {
                    Error::write_failure(self.port.clone(), format!("release {signal}: {e}"))
                }),
            _ => Ok(()),
        };

        trace!(port = %self.port, "Transmit complete");
        let _ = done_tx.send(result);
    }

    /// Fails every write that has not started yet.
    pub fn fail_queued(&mut self, error: impl Fn() -> Error) {
        let count = self.queue.len();
        for write in self.queue.drain(..) {
            let _ = write.done_tx.send(Err(error()));
        }
        if count > 0 {
            debug!(port = %self.port, count, "Failed queued writes");
        }
    }

    /// Asserts the signal and writes the bytes.
    ///
    /// Returns the hold deadline, or `None` when there is no signal to hold.
    async fn begin(&self, bytes: &[u8], link: &mut dyn SerialLink) -> Result<Option<Instant>> {
        let Some((signal, level)) = self.flow_control.transmit_level() else {
            link.write(bytes)
                .await
                .map_err(|e| Error::write_failure(self.port.clone(), e.to_string()))?;
            trace!(port = %self.port, bytes = bytes.len(), "SEND");
            return Ok(None);
        };

        link.set_control_signal(signal, level)
            .await
            .map_err(|e| Error::write_failure(self.port.clone(), format!("assert {signal}: {e}")))?;

        if let Err(e) = link.write(bytes).await {
            self.restore_idle(link).await;
            return Err(Error::write_failure(self.port.clone(), e.to_string()));
        }

        let hold = self.timing.hold_duration(bytes.len());
        trace!(
            port = %self.port,
            bytes = bytes.len(),
            hold_us = hold.as_micros() as u64,
            "SEND"
        );

        Ok(Some(Instant::now() + hold))
    }
}

// ============================================================================
// Tests
// ============================================================================
