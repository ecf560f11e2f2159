//! Stream frame decoder.
//!
//! Reassembles individually delivered bytes into frames according to a
//! [`Framing`] rule. Each consuming endpoint owns its own decoder, so one
//! endpoint's framing never affects another's.
//!
//! The decoder is synchronous and never blocks. Inter-byte-timeout mode
//! exposes its armed timer through [`FrameDecoder::deadline`]; the owner
//! sleeps until that instant and calls [`FrameDecoder::expire`].
//!
//! # Example
//!
//! ```ignore
//! let mut decoder = FrameDecoder::new(Framing::Delimiter(b'\n'));
//! let frames = decoder.feed(b"OK\r\nERR", Instant::now());
//! assert_eq!(frames[0].as_bytes(), b"OK\r\n");
//! assert_eq!(decoder.residual(), b"ERR");
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

use crate::config::Framing;

use super::Frame;

// ============================================================================
// Constants
// ============================================================================

/// Upper bound on buffered bytes for delimiter and timeout framing.
pub const DEFAULT_CAPACITY: usize = 32_768;

// ============================================================================
// DecodeBuffer
// ============================================================================

/// Bounded byte accumulator.
#[derive(Debug, Clone)]
pub struct DecodeBuffer {
    /// Accumulated bytes; the length is the fill index.
    bytes: Vec<u8>,
    /// Maximum number of bytes held.
    capacity: usize,
}

impl DecodeBuffer {
    /// Creates an empty buffer bounded at `capacity` bytes.
    #[inline]
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: Vec::new(),
            capacity: capacity.max(1),
        }
    }

    /// Appends a byte. Returns `true` if the buffer is now full.
    #[inline]
    pub fn push(&mut self, byte: u8) -> bool {
        self.bytes.push(byte);
        self.bytes.len() >= self.capacity
    }

    /// Takes the accumulated bytes and resets the fill index.
    #[inline]
    pub fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.bytes)
    }

    /// Discards the accumulated bytes.
    #[inline]
    pub fn reset(&mut self) {
        self.bytes.clear();
    }

    /// Returns the accumulated bytes.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Returns the fill index.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns `true` if nothing is buffered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Returns the capacity bound.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

// ============================================================================
// FrameDecoder
// ============================================================================

/// Per-endpoint frame decoder.
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    /// Active framing rule.
    framing: Framing,
    /// Byte accumulator.
    buffer: DecodeBuffer,
    /// Silence deadline; `Some` while the inter-byte timer is armed.
    deadline: Option<Instant>,
}

impl FrameDecoder {
    /// Creates a decoder with the default capacity bound.
    #[must_use]
    pub fn new(framing: Framing) -> Self {
        Self::with_capacity(framing, DEFAULT_CAPACITY)
    }

    /// Creates a decoder with a custom capacity bound.
    ///
    /// Count framing always bounds the buffer at the count itself.
    #[must_use]
    pub fn with_capacity(framing: Framing, capacity: usize) -> Self {
        let framing = framing.normalized();
        let capacity = match framing {
            Framing::Count(count) => count,
            _ => capacity,
        };

        Self {
            framing,
            buffer: DecodeBuffer::new(capacity),
            deadline: None,
        }
    }

    /// Returns the framing rule.
    #[inline]
    #[must_use]
    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// Returns the bytes buffered but not yet emitted.
    #[inline]
    #[must_use]
    pub fn residual(&self) -> &[u8] {
        self.buffer.as_slice()
    }

    /// Returns when the inter-byte timer fires, if it is armed.
    #[inline]
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Drops buffered bytes and disarms the timer.
    pub fn reset(&mut self) {
        self.buffer.reset();
        self.deadline = None;
    }

    /// Feeds one byte received at `now`.
    ///
    /// Returns a frame if this byte completes one.
    pub fn push(&mut self, byte: u8, now: Instant) -> Option<Frame> {
        match self.framing {
            Framing::PerByte => Some(Frame::new(vec![byte])),

            Framing::Delimiter(delimiter) => {
                let full = self.buffer.push(byte);
                (byte == delimiter || full).then(|| self.emit())
            }

            Framing::Count(_) => self.buffer.push(byte).then(|| self.emit()),

            Framing::InterByteTimeout(timeout) => self.push_timed(byte, now, timeout),
        }
    }

    /// Feeds a chunk of bytes received at `now`.
    ///
    /// Frame boundaries are identical to pushing the bytes one at a time.
    pub fn feed(&mut self, data: &[u8], now: Instant) -> Vec<Frame> {
        data.iter()
            .filter_map(|&byte| self.push(byte, now))
            .collect()
    }

    /// Emits the buffered bytes if the inter-byte timer has fired by `now`.
    pub fn expire(&mut self, now: Instant) -> Option<Frame> {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                let frame = self.emit();
                trace!(bytes = frame.len(), "Inter-byte timeout elapsed");
                Some(frame)
            }
            _ => None,
        }
    }

    /// Buffers a byte in inter-byte-timeout mode, restarting the countdown.
    ///
    /// A byte arriving after the deadline first closes the frame the
    /// silence already ended, even if [`expire`](Self::expire) has not run.
    fn push_timed(&mut self, byte: u8, now: Instant, timeout: Duration) -> Option<Frame> {
        let expired = self.expire(now);

        // The timer is only armed with room left, so a byte landing in a
        // just-emptied buffer cannot fill it.
        if self.buffer.push(byte) {
            debug_assert!(expired.is_none());
            return Some(self.emit());
        }

        self.deadline = Some(now + timeout);
        expired
    }

    /// Takes the buffer as a frame and disarms the timer.
    fn emit(&mut self) -> Frame {
        self.deadline = None;
        Frame::new(self.buffer.take())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    fn bytes_of(frames: &[Frame]) -> Vec<Vec<u8>> {
        frames.iter().map(|f| f.as_bytes().to_vec()).collect()
    }

    #[test]
    fn test_delimiter_includes_delimiter() {
        let mut decoder = FrameDecoder::new(Framing::Delimiter(b'\n'));
        let frames = decoder.feed(b"one\ntwo\nthr", Instant::now());

        assert_eq!(bytes_of(&frames), vec![b"one\n".to_vec(), b"two\n".to_vec()]);
        assert_eq!(decoder.residual(), b"thr");
    }

    #[test]
    fn test_delimiter_flushes_at_capacity() {
        let mut decoder = FrameDecoder::with_capacity(Framing::Delimiter(b';'), 4);
        let frames = decoder.feed(b"abcdef;", Instant::now());

        assert_eq!(bytes_of(&frames), vec![b"abcd".to_vec(), b"ef;".to_vec()]);
        assert!(decoder.residual().is_empty());
    }

    #[test]
    fn test_count_never_emits_short() {
        let mut decoder = FrameDecoder::new(Framing::Count(3));
        let frames = decoder.feed(&[1, 2, 3, 4, 5, 6, 7], Instant::now());

        assert_eq!(bytes_of(&frames), vec![vec![1, 2, 3], vec![4, 5, 6]]);
        assert_eq!(decoder.residual(), &[7]);

        let frames = decoder.feed(&[8, 9], Instant::now());
        assert_eq!(bytes_of(&frames), vec![vec![7, 8, 9]]);
    }

    #[test]
    fn test_per_byte() {
        let mut decoder = FrameDecoder::new(Framing::PerByte);
        let frames = decoder.feed(b"hi", Instant::now());
        assert_eq!(bytes_of(&frames), vec![b"h".to_vec(), b"i".to_vec()]);
        assert!(decoder.residual().is_empty());
        assert!(decoder.deadline().is_none());
    }

    #[test]
    fn test_degenerate_count_is_per_byte() {
        let decoder = FrameDecoder::new(Framing::Count(0));
        assert_eq!(decoder.framing(), Framing::PerByte);
    }

    #[test]
    fn test_timeout_restarts_on_each_byte() {
        let timeout = Duration::from_millis(10);
        let mut decoder = FrameDecoder::new(Framing::InterByteTimeout(timeout));
        let t0 = Instant::now();

        assert!(decoder.push(0xAA, t0).is_none());
        assert_eq!(decoder.deadline(), Some(t0 + timeout));

        let t1 = t0 + Duration::from_millis(8);
        assert!(decoder.push(0xBB, t1).is_none());
        assert_eq!(decoder.deadline(), Some(t1 + timeout));

        // First deadline passed, but the countdown was restarted.
        assert!(decoder.expire(t0 + timeout).is_none());

        let frame = decoder.expire(t1 + timeout).expect("frame after silence");
        assert_eq!(frame.as_bytes(), &[0xAA, 0xBB]);
        assert!(decoder.deadline().is_none());
        assert!(decoder.residual().is_empty());
    }

    #[test]
    fn test_late_byte_starts_new_frame() {
        let timeout = Duration::from_millis(20);
        let mut decoder = FrameDecoder::new(Framing::InterByteTimeout(timeout));
        let t0 = Instant::now();

        assert!(decoder.push(1, t0).is_none());

        let late = t0 + Duration::from_millis(100);
        let frame = decoder.push(2, late).expect("frame closed by silence");
        assert_eq!(frame.as_bytes(), &[1]);
        assert_eq!(decoder.residual(), &[2]);
        assert_eq!(decoder.deadline(), Some(late + timeout));

        let later = late + timeout;
        let frames = decoder.feed(&[3, 4], later);
        assert_eq!(bytes_of(&frames), vec![vec![2]]);
        assert_eq!(decoder.residual(), &[3, 4]);
    }

    #[test]
    fn test_timeout_flushes_at_capacity() {
        let mut decoder =
            FrameDecoder::with_capacity(Framing::InterByteTimeout(Duration::from_millis(5)), 2);
        let now = Instant::now();

        assert!(decoder.push(1, now).is_none());
        let frame = decoder.push(2, now).expect("capacity frame");
        assert_eq!(frame.as_bytes(), &[1, 2]);
        assert!(decoder.deadline().is_none());
    }

    #[test]
    fn test_expire_without_timer_is_noop() {
        let mut decoder = FrameDecoder::new(Framing::Delimiter(b'\n'));
        decoder.feed(b"abc", Instant::now());
        assert!(decoder.expire(Instant::now()).is_none());
        assert_eq!(decoder.residual(), b"abc");
    }

    #[test]
    fn test_reset() {
        let mut decoder = FrameDecoder::new(Framing::InterByteTimeout(Duration::from_millis(5)));
        decoder.push(1, Instant::now());
        decoder.reset();
        assert!(decoder.residual().is_empty());
        assert!(decoder.deadline().is_none());
    }

    fn framing_strategy() -> impl Strategy<Value = Framing> {
        prop_oneof![
            any::<u8>().prop_map(Framing::Delimiter),
            (1usize..16).prop_map(Framing::Count),
            Just(Framing::PerByte),
            (1u64..50).prop_map(|ms| Framing::InterByteTimeout(Duration::from_millis(ms))),
        ]
    }

    proptest! {
        #[test]
        fn prop_frames_reproduce_stream(
            framing in framing_strategy(),
            capacity in 1usize..64,
            input in proptest::collection::vec(any::<u8>(), 0..512),
        ) {
            let mut decoder = FrameDecoder::with_capacity(framing, capacity);
            let now = Instant::now();

            let mut output: Vec<u8> = decoder
                .feed(&input, now)
                .iter()
                .flat_map(|f| f.as_bytes().to_vec())
                .collect();
            output.extend_from_slice(decoder.residual());

            prop_assert_eq!(output, input);
        }

        #[test]
        fn prop_silence_separates_frames(
            timeout_ms in 2u64..50,
            groups in proptest::collection::vec(
                proptest::collection::vec((any::<u8>(), 0u64..1000), 1..16),
                1..8,
            ),
        ) {
            let timeout = Duration::from_millis(timeout_ms);
            let mut decoder = FrameDecoder::new(Framing::InterByteTimeout(timeout));
            let mut now = Instant::now();
            let mut frames = Vec::new();

            for (index, group) in groups.iter().enumerate() {
                if index > 0 {
                    now += timeout;
                }
                for &(byte, gap) in group {
                    // Gaps inside a group stay below the timeout.
                    now += Duration::from_millis(gap % timeout_ms);
                    frames.extend(decoder.push(byte, now));
                }
            }

            let expected: Vec<Vec<u8>> = groups
                .iter()
                .map(|group| group.iter().map(|&(byte, _)| byte).collect())
                .collect();
            let (last, closed) = expected.split_last().unwrap();

            prop_assert_eq!(bytes_of(&frames), closed.to_vec());
            prop_assert_eq!(decoder.residual(), last.as_slice());
        }

        #[test]
        fn prop_count_frames_are_exact(
            count in 1usize..32,
            input in proptest::collection::vec(any::<u8>(), 0..512),
        ) {
            let mut decoder = FrameDecoder::new(Framing::Count(count));
            let frames = decoder.feed(&input, Instant::now());

            prop_assert_eq!(frames.len(), input.len() / count);
            prop_assert!(frames.iter().all(|f| f.len() == count));
            prop_assert_eq!(decoder.residual().len(), input.len() % count);
        }

        #[test]
        fn prop_batching_does_not_move_boundaries(
            delimiter in any::<u8>(),
            split in 0usize..256,
            input in proptest::collection::vec(any::<u8>(), 0..256),
        ) {
            let now = Instant::now();
            let split = split.min(input.len());

            let mut whole = FrameDecoder::new(Framing::Delimiter(delimiter));
            let expected = bytes_of(&whole.feed(&input, now));

            let mut chunked = FrameDecoder::new(Framing::Delimiter(delimiter));
            let mut actual = bytes_of(&chunked.feed(&input[..split], now));
            actual.extend(bytes_of(&chunked.feed(&input[split..], now)));

            prop_assert_eq!(actual, expected);
            prop_assert_eq!(chunked.residual(), whole.residual());
        }
    }
}
