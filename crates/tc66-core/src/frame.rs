//! Reassembly of notification fragments into a measurement frame.
//!
//! The meter answers a request with a burst of notifications whose sizes
//! depend on the negotiated MTU. Their payloads concatenate to exactly
//! [`FRAME_LEN`] bytes. The [`FrameAssembler`] tracks the running total and
//! reaches exactly one terminal state per request:
//!
//! ```text
//! Waiting --fragment--> Accumulating --total == 192--> Complete
//!                              |
//!                              +------total > 192----> Overrun
//! ```
//!
//! An assembler is single-use. Create a new one (and a new fragment
//! subscription) for each request.

use futures::{Stream, StreamExt};
use thiserror::Error;
use tracing::{debug, trace};

use tc66_types::{FRAME_LEN, Frame};

/// Failure to assemble a frame from fragments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    /// A fragment pushed the running total past the frame length.
    #[error("buffer length {received} exceeds 192")]
    Overrun {
        /// Running total including the offending fragment.
        received: usize,
    },

    /// The fragment source ended before the frame was complete.
    #[error("fragment stream ended after {received} of 192 bytes")]
    Incomplete {
        /// Bytes received before the stream ended.
        received: usize,
    },

    /// A fragment arrived after the assembler had already finished.
    #[error("assembler already reached a terminal state")]
    Terminated,
}

/// Assembly progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblerState {
    /// No bytes received yet.
    Waiting,
    /// Some bytes received, frame not yet complete.
    Accumulating {
        /// Bytes received so far.
        received: usize,
    },
    /// Exactly [`FRAME_LEN`] bytes received.
    Complete,
    /// More than [`FRAME_LEN`] bytes received.
    Overrun {
        /// Running total at the point of overrun.
        received: usize,
    },
}

impl AssemblerState {
    /// Whether no further fragments will be accepted.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Overrun { .. })
    }
}

/// Accumulates fragments into one [`Frame`].
#[derive(Debug)]
pub struct FrameAssembler {
    buf: [u8; FRAME_LEN],
    received: usize,
    state: AssemblerState,
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameAssembler {
    /// Create an empty assembler.
    pub fn new() -> Self {
        Self {
            buf: [0u8; FRAME_LEN],
            received: 0,
            state: AssemblerState::Waiting,
        }
    }

    /// Current state.
    pub fn state(&self) -> AssemblerState {
        self.state
    }

    /// Total bytes received so far, including an overrunning fragment.
    pub fn received(&self) -> usize {
        self.received
    }

    /// Append one fragment.
    ///
    /// Returns `Ok(Some(frame))` on the fragment that completes the frame and
    /// `Ok(None)` while more bytes are needed. Zero-length fragments are
    /// ignored.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Overrun`] if the fragment pushes the total past
    /// [`FRAME_LEN`], and [`FrameError::Terminated`] if the assembler already
    /// completed or overran.
    pub fn push(&mut self, fragment: &[u8]) -> Result<Option<Frame>, FrameError> {
        if self.state.is_terminal() {
            return Err(FrameError::Terminated);
        }
        if fragment.is_empty() {
            return Ok(None);
        }

        let total = self.received + fragment.len();
        if total > FRAME_LEN {
            self.received = total;
            self.state = AssemblerState::Overrun { received: total };
            return Err(FrameError::Overrun { received: total });
        }

        self.buf[self.received..total].copy_from_slice(fragment);
        self.received = total;
        trace!("Received {} bytes", total);

        if total == FRAME_LEN {
            self.state = AssemblerState::Complete;
            Ok(Some(Frame::new(self.buf)))
        } else {
            self.state = AssemblerState::Accumulating { received: total };
            Ok(None)
        }
    }

    /// Drain fragments from `fragments` until the frame is complete.
    ///
    /// Progress is kept in `self`, so when this future is dropped (for example
    /// by a timeout) [`received`](Self::received) still reports how far
    /// assembly got.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Overrun`] on overrun and
    /// [`FrameError::Incomplete`] if the stream ends first.
    pub async fn collect<S>(&mut self, fragments: &mut S) -> Result<Frame, FrameError>
    where
        S: Stream<Item = Vec<u8>> + Unpin + ?Sized,
    {
        while let Some(fragment) = fragments.next().await {
            if let Some(frame) = self.push(&fragment)? {
                debug!("Frame complete ({} bytes)", FRAME_LEN);
                return Ok(frame);
            }
        }
        Err(FrameError::Incomplete {
            received: self.received,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(len: usize, offset: usize) -> Vec<u8> {
        (0..len).map(|i| ((i + offset) % 251) as u8).collect()
    }

    #[test]
    fn test_single_fragment_completes() {
        let mut assembler = FrameAssembler::new();
        assert_eq!(assembler.state(), AssemblerState::Waiting);

        let data = pattern(FRAME_LEN, 0);
        let frame = assembler.push(&data).unwrap().unwrap();
        assert_eq!(&frame.as_bytes()[..], &data[..]);
        assert_eq!(assembler.state(), AssemblerState::Complete);
    }

    #[test]
    fn test_typical_mtu_fragments() {
        // 20-byte notifications as seen with the default ATT MTU
        let data = pattern(FRAME_LEN, 7);
        let mut assembler = FrameAssembler::new();
        let mut result = None;
        for chunk in data.chunks(20) {
            assert!(result.is_none());
            result = assembler.push(chunk).unwrap();
        }
        assert_eq!(&result.unwrap().as_bytes()[..], &data[..]);
    }

    #[test]
    fn test_accumulating_state() {
        let mut assembler = FrameAssembler::new();
        assert!(assembler.push(&[0u8; 64]).unwrap().is_none());
        assert_eq!(
            assembler.state(),
            AssemblerState::Accumulating { received: 64 }
        );
        assert_eq!(assembler.received(), 64);
    }

    #[test]
    fn test_overrun() {
        let mut assembler = FrameAssembler::new();
        assembler.push(&[0u8; 180]).unwrap();
        let err = assembler.push(&[0u8; 20]).unwrap_err();
        assert_eq!(err, FrameError::Overrun { received: 200 });
        assert_eq!(assembler.state(), AssemblerState::Overrun { received: 200 });
        assert_eq!(err.to_string(), "buffer length 200 exceeds 192");
    }

    #[test]
    fn test_single_oversized_fragment() {
        let mut assembler = FrameAssembler::new();
        let err = assembler.push(&[0u8; 193]).unwrap_err();
        assert_eq!(err, FrameError::Overrun { received: 193 });
    }

    #[test]
    fn test_push_after_complete_is_rejected() {
        let mut assembler = FrameAssembler::new();
        assembler.push(&[0u8; FRAME_LEN]).unwrap();
        assert_eq!(assembler.push(&[1]), Err(FrameError::Terminated));
        assert_eq!(assembler.state(), AssemblerState::Complete);
    }

    #[test]
    fn test_push_after_overrun_is_rejected() {
        let mut assembler = FrameAssembler::new();
        let _ = assembler.push(&[0u8; 200]);
        assert_eq!(assembler.push(&[]), Err(FrameError::Terminated));
    }

    #[test]
    fn test_empty_fragments_ignored() {
        let mut assembler = FrameAssembler::new();
        assert!(assembler.push(&[]).unwrap().is_none());
        assert_eq!(assembler.state(), AssemblerState::Waiting);
        assembler.push(&[0u8; 100]).unwrap();
        assert!(assembler.push(&[]).unwrap().is_none());
        assert_eq!(assembler.received(), 100);
    }

    #[tokio::test]
    async fn test_collect_from_stream() {
        let data = pattern(FRAME_LEN, 3);
        let chunks: Vec<Vec<u8>> = data.chunks(64).map(<[u8]>::to_vec).collect();
        let mut stream = futures::stream::iter(chunks);

        let mut assembler = FrameAssembler::new();
        let frame = assembler.collect(&mut stream).await.unwrap();
        assert_eq!(&frame.as_bytes()[..], &data[..]);
    }

    #[tokio::test]
    async fn test_collect_leaves_trailing_fragments_unread() {
        let chunks = vec![vec![0u8; 96], vec![0u8; 96], vec![9u8; 10]];
        let mut stream = futures::stream::iter(chunks);

        let mut assembler = FrameAssembler::new();
        assembler.collect(&mut stream).await.unwrap();
        assert_eq!(stream.next().await, Some(vec![9u8; 10]));
    }

    #[tokio::test]
    async fn test_collect_incomplete() {
        let mut stream = futures::stream::iter(vec![vec![0u8; 100]]);
        let mut assembler = FrameAssembler::new();
        let err = assembler.collect(&mut stream).await.unwrap_err();
        assert_eq!(err, FrameError::Incomplete { received: 100 });
    }

    #[tokio::test]
    async fn test_collect_overrun() {
        let mut stream = futures::stream::iter(vec![vec![0u8; 150], vec![0u8; 50]]);
        let mut assembler = FrameAssembler::new();
        let err = assembler.collect(&mut stream).await.unwrap_err();
        assert_eq!(err, FrameError::Overrun { received: 200 });
    }
}
