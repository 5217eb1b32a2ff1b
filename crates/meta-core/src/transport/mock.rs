//! Mock byte channel for testing.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use super::traits::{ByteChannel, TransportError};

#[derive(Debug, Default)]
struct MockState {
    /// Bytes the "device" has already sent.
    inbound: VecDeque<u8>,
    /// Replies released into `inbound`, one per host write.
    replies: VecDeque<Vec<u8>>,
    /// Captured writes.
    writes: Vec<Vec<u8>>,
    closed: bool,
}

/// Scripted channel for exercising protocol logic without hardware.
///
/// Clones share state, so a test can hand one clone to a session and keep
/// another to inspect writes or to close the channel from outside.
#[derive(Clone, Default)]
pub struct MockChannel {
    shared: Arc<(Mutex<MockState>, Condvar)>,
}

impl MockChannel {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        // A panicking test thread must not hide the scripted state from the others.
        self.shared
            .0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make bytes readable immediately.
    pub fn push_inbound(&self, data: &[u8]) {
        self.state().inbound.extend(data.iter().copied());
        self.shared.1.notify_all();
    }

    /// Queue a reply that becomes readable after the next host write.
    pub fn queue_reply(&self, data: &[u8]) {
        self.state().replies.push_back(data.to_vec());
    }

    /// Get all captured writes.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state().writes.clone()
    }

    /// Clear captured writes.
    pub fn clear_writes(&self) {
        self.state().writes.clear();
    }

    /// Simulate the cable being pulled or the port being closed elsewhere.
    pub fn disconnect(&self) {
        self.state().closed = true;
        self.shared.1.notify_all();
    }
}

impl ByteChannel for MockChannel {
    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let mut state = self.state();
        if state.closed {
            return Err(TransportError::Disconnected);
        }
        state.writes.push(data.to_vec());
        if let Some(reply) = state.replies.pop_front() {
            state.inbound.extend(reply);
            self.shared.1.notify_all();
        }
        Ok(())
    }

    fn read_available(
        &mut self,
        max_len: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        let guard = self.state();
        let (mut state, _) = self
            .shared
            .1
            .wait_timeout_while(guard, timeout, |s| s.inbound.is_empty() && !s.closed)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if state.closed {
            return Err(TransportError::Disconnected);
        }
        let n = max_len.min(state.inbound.len());
        Ok(state.inbound.drain(..n).collect())
    }

    fn bytes_available(&mut self) -> Result<usize, TransportError> {
        let state = self.state();
        if state.closed {
            return Err(TransportError::Disconnected);
        }
        Ok(state.inbound.len())
    }

    fn close(&mut self) {
        self.disconnect();
    }

    fn is_open(&self) -> bool {
        !self.state().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_mock_reply_released_by_write() {
        let mut mock = MockChannel::new();
        mock.queue_reply(b"ATEMATEM");

        assert_eq!(mock.bytes_available().unwrap(), 0);
        mock.write(b"METAMETA").unwrap();
        assert_eq!(mock.bytes_available().unwrap(), 8);

        let got = mock.read_exact(8, Duration::from_millis(10)).unwrap();
        assert_eq!(got, b"ATEMATEM");
    }

    #[test]
    fn test_mock_write_capture() {
        let mut mock = MockChannel::new();
        mock.write(b"Hello").unwrap();
        mock.write(b"World").unwrap();

        let writes = mock.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0], b"Hello");
        assert_eq!(writes[1], b"World");
    }

    #[test]
    fn test_mock_read_exact_incomplete() {
        let mut mock = MockChannel::new();
        mock.push_inbound(&[1, 2, 3]);

        match mock.read_exact(4, Duration::from_millis(20)) {
            Err(TransportError::Incomplete { expected, received }) => {
                assert_eq!(expected, 4);
                assert_eq!(received, vec![1, 2, 3]);
            }
            other => panic!("expected Incomplete, got {:?}", other),
        }
    }

    #[test]
    fn test_mock_read_times_out_empty() {
        let mut mock = MockChannel::new();
        let start = Instant::now();
        let got = mock.read_available(16, Duration::from_millis(30)).unwrap();
        assert!(got.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_close_unblocks_pending_read() {
        let mut mock = MockChannel::new();
        let remote = mock.clone();

        let closer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.disconnect();
        });

        let start = Instant::now();
        let res = mock.read_available(8, Duration::from_secs(5));
        closer.join().unwrap();

        assert!(matches!(res, Err(TransportError::Disconnected)));
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(!mock.is_open());
        assert!(mock.write(b"x").is_err());
    }
}
