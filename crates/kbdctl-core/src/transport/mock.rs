//! Mock USB transport for testing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::traits::{TransportError, UsbTransport};
use crate::cancel::CancelToken;
use crate::protocol::constants::{CONFIG_CHUNK_SIZE, CORRELATION_LEN, GMK_VENDOR_ID, GMK87_PRODUCT_ID};
use crate::protocol::{CommandId, FrameHeader};

/// Scripted device behaviour: maps each written report to the reports it
/// queues for reading.
pub type Responder = Box<dyn FnMut(&[u8]) -> Vec<Vec<u8>> + Send>;

/// Mock transport for unit testing the protocol layers without a device.
///
/// Clones share all state, so a test can hand one clone to a session and
/// inspect the captured traffic through another.
#[derive(Clone)]
pub struct MockTransport {
    /// Queued reports to return on read.
    response_queue: Arc<Mutex<VecDeque<Vec<u8>>>>,
    /// Captured writes.
    write_log: Arc<Mutex<Vec<Vec<u8>>>>,
    /// Optional scripted device.
    responder: Arc<Mutex<Option<Responder>>>,
    /// Forced write count, for short-write simulation.
    write_len: Arc<Mutex<Option<usize>>>,
    /// Number of `close` calls.
    close_count: Arc<Mutex<usize>>,
    /// Simulated VID/PID.
    vid: u16,
    pid: u16,
    /// Whether device is "connected".
    connected: Arc<Mutex<bool>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            response_queue: Arc::new(Mutex::new(VecDeque::new())),
            write_log: Arc::new(Mutex::new(Vec::new())),
            responder: Arc::new(Mutex::new(None)),
            write_len: Arc::new(Mutex::new(None)),
            close_count: Arc::new(Mutex::new(0)),
            vid: GMK_VENDOR_ID,
            pid: GMK87_PRODUCT_ID,
            connected: Arc::new(Mutex::new(true)),
        }
    }

    /// Mock whose every write is answered by `responder`.
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: FnMut(&[u8]) -> Vec<Vec<u8>> + Send + 'static,
    {
        let mock = Self::new();
        *mock.responder.lock().unwrap() = Some(Box::new(responder));
        mock
    }

    /// Device that answers every request with its first four bytes followed
    /// by a 4-byte zero payload.
    pub fn echo_device() -> Self {
        Self::with_responder(|request| {
            let mut response = request[..CORRELATION_LEN + 1].to_vec();
            response.extend_from_slice(&[0u8; CONFIG_CHUNK_SIZE]);
            vec![response]
        })
    }

    /// Device holding `image`: `ConfigRead` answers with the chunk at the
    /// requested position, everything else like `echo_device`.
    pub fn config_device(image: Vec<u8>) -> Self {
        Self::with_responder(move |request| {
            let mut response = request[..CORRELATION_LEN + 1].to_vec();
            let chunk = FrameHeader::parse(request)
                .ok()
                .filter(|h| h.command == CommandId::ConfigRead)
                .and_then(|h| {
                    let start = h.position as usize;
                    image.get(start..start + CONFIG_CHUNK_SIZE)
                });
            match chunk {
                Some(chunk) => response.extend_from_slice(chunk),
                None => response.extend_from_slice(&[0u8; CONFIG_CHUNK_SIZE]),
            }
            vec![response]
        })
    }

    /// Queue a report to be returned on next read.
    pub fn queue_response(&self, report: &[u8]) {
        self.response_queue.lock().unwrap().push_back(report.to_vec());
    }

    /// Report `len` as the transferred count of every subsequent write.
    pub fn set_write_len(&self, len: Option<usize>) {
        *self.write_len.lock().unwrap() = len;
    }

    /// Get all captured writes.
    pub fn get_writes(&self) -> Vec<Vec<u8>> {
        self.write_log.lock().unwrap().clone()
    }

    pub fn close_count(&self) -> usize {
        *self.close_count.lock().unwrap()
    }

    /// Simulate device disconnect.
    pub fn disconnect(&self) {
        *self.connected.lock().unwrap() = false;
    }

    /// Simulate device reconnect.
    pub fn reconnect(&self) {
        *self.connected.lock().unwrap() = true;
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl UsbTransport for MockTransport {
    fn write(&self, report: &[u8], cancel: &CancelToken) -> Result<usize, TransportError> {
        cancel.check()?;
        if !*self.connected.lock().unwrap() {
            return Err(TransportError::Disconnected);
        }
        self.write_log.lock().unwrap().push(report.to_vec());

        if let Some(responder) = self.responder.lock().unwrap().as_mut() {
            let replies = responder(report);
            self.response_queue.lock().unwrap().extend(replies);
        }

        Ok(self.write_len.lock().unwrap().unwrap_or(report.len()))
    }

    fn read(&self, timeout: Duration, cancel: &CancelToken) -> Result<Vec<u8>, TransportError> {
        cancel.check()?;
        if !*self.connected.lock().unwrap() {
            return Err(TransportError::Disconnected);
        }
        let next = self.response_queue.lock().unwrap().pop_front();
        match next {
            Some(report) => Ok(report),
            None => {
                cancel.sleep(timeout)?;
                Err(TransportError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    fn close(&self) -> Result<(), TransportError> {
        *self.close_count.lock().unwrap() += 1;
        *self.connected.lock().unwrap() = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        *self.connected.lock().unwrap()
    }

    fn vendor_id(&self) -> u16 {
        self.vid
    }

    fn product_id(&self) -> u16 {
        self.pid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_mock_response_queue() {
        let mock = MockTransport::new();
        let cancel = CancelToken::new();
        mock.queue_response(&[0x04, 0x01]);
        mock.queue_response(&[0x04, 0x02]);

        assert_eq!(mock.read(Duration::ZERO, &cancel).unwrap(), vec![0x04, 0x01]);
        assert_eq!(mock.read(Duration::ZERO, &cancel).unwrap(), vec![0x04, 0x02]);

        // Queue is empty now
        assert!(matches!(
            mock.read(Duration::from_millis(5), &cancel),
            Err(TransportError::Timeout { timeout_ms: 5 })
        ));
    }

    #[test]
    fn test_mock_write_capture() {
        let mock = MockTransport::new();
        let cancel = CancelToken::new();
        mock.write(b"Hello", &cancel).unwrap();
        mock.write(b"World", &cancel).unwrap();

        let writes = mock.get_writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0], b"Hello");
        assert_eq!(writes[1], b"World");
    }

    #[test]
    fn test_mock_empty_read_waits_for_timeout() {
        let mock = MockTransport::new();
        let start = Instant::now();
        let res = mock.read(Duration::from_millis(40), &CancelToken::new());
        assert!(matches!(res, Err(TransportError::Timeout { .. })));
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn test_mock_cancelled_read() {
        let mock = MockTransport::new();
        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(matches!(
            mock.read(Duration::from_secs(5), &cancel),
            Err(TransportError::Cancelled)
        ));
    }

    #[test]
    fn test_echo_device_answers_each_write() {
        let mock = MockTransport::echo_device();
        let cancel = CancelToken::new();
        let request = [0x04, 0xAA, 0xBB, 0x05, 0x04, 0x00, 0x00, 0x00];
        mock.write(&request, &cancel).unwrap();

        let response = mock.read(Duration::ZERO, &cancel).unwrap();
        assert_eq!(response, vec![0x04, 0xAA, 0xBB, 0x05, 0, 0, 0, 0]);
    }

    #[test]
    fn test_mock_disconnect_and_close() {
        let mock = MockTransport::new();
        let cancel = CancelToken::new();
        assert!(mock.is_connected());

        mock.disconnect();
        assert!(!mock.is_connected());
        assert!(mock.write(b"test", &cancel).is_err());

        mock.reconnect();
        mock.close().unwrap();
        mock.close().unwrap();
        assert_eq!(mock.close_count(), 2);
        assert!(!mock.is_connected());
    }
}
