//! Command channel: one command, one confirmed round trip.
//!
//! The device answers on the same interrupt endpoint it uses for unrelated
//! reports, and late answers to earlier commands can still be in flight. A
//! response belongs to the pending command when it echoes the request's
//! report id and checksum; everything else is discarded until the response
//! budget runs out.

use std::time::{Duration, Instant};

use tracing::{debug, instrument, trace};

use crate::cancel::CancelToken;
use crate::error::ProtocolError;
use crate::events::{KbdEvent, KbdObserver};
use crate::protocol::constants::{
    CORRELATION_LEN, END_SETTLE_DELAY, FRAME_SIZE, RESPONSE_DATA_OFFSET, RESPONSE_TIMEOUT,
};
use crate::protocol::{CommandFrame, CommandId};
use crate::transport::{TransportError, UsbTransport};

/// Timing rules of the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelTiming {
    /// Budget for a matching response, measured from the end of the write.
    pub response_timeout: Duration,
    /// Pause before every `End` command.
    pub end_settle: Duration,
}

impl Default for ChannelTiming {
    fn default() -> Self {
        Self {
            response_timeout: RESPONSE_TIMEOUT,
            end_settle: END_SETTLE_DELAY,
        }
    }
}

/// Fixed point in time a read loop must give up at.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    budget: Duration,
}

impl Deadline {
    /// Deadline `budget` from now.
    pub fn after(budget: Duration) -> Self {
        Self {
            start: Instant::now(),
            budget,
        }
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.start.elapsed())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }
}

/// Outcome of inspecting one response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Matched,
    Stale,
}

/// Decides whether a response answers a given request.
#[derive(Debug, Clone, Copy)]
pub struct ResponseFilter {
    command: CommandId,
    token: [u8; CORRELATION_LEN],
}

impl ResponseFilter {
    pub fn for_frame(frame: &CommandFrame) -> Self {
        Self {
            command: frame.command(),
            token: frame.correlation_token(),
        }
    }

    pub fn command(&self) -> CommandId {
        self.command
    }

    pub fn token(&self) -> [u8; CORRELATION_LEN] {
        self.token
    }

    /// Responses too short to carry any data are an error, not noise.
    pub fn classify(&self, response: &[u8]) -> Result<Verdict, ProtocolError> {
        if response.len() < RESPONSE_DATA_OFFSET {
            return Err(ProtocolError::ShortRead {
                command: self.command,
                len: response.len(),
            });
        }
        if response[..CORRELATION_LEN] == self.token {
            Ok(Verdict::Matched)
        } else {
            Ok(Verdict::Stale)
        }
    }
}

/// Read until `filter` accepts a response or `deadline` expires.
///
/// Stale responses are handed to `on_stale` and dropped. Returns the whole
/// matching report.
pub fn read_until_match<T, F>(
    transport: &T,
    filter: &ResponseFilter,
    deadline: Deadline,
    cancel: &CancelToken,
    mut on_stale: F,
) -> Result<Vec<u8>, ProtocolError>
where
    T: UsbTransport + ?Sized,
    F: FnMut(&[u8]),
{
    let command = filter.command();
    loop {
        let remaining = deadline.remaining();
        if remaining.is_zero() {
            return Err(ProtocolError::Timeout {
                command,
                timeout_ms: deadline.budget().as_millis() as u64,
            });
        }

        let response = match transport.read(remaining, cancel) {
            Ok(response) => response,
            Err(TransportError::Timeout { .. }) => continue,
            Err(e) => return Err(ProtocolError::from_transport(command, e)),
        };
        trace!(command = %command, bytes = response.len(), "Read response");

        match filter.classify(&response)? {
            Verdict::Matched => return Ok(response),
            Verdict::Stale => on_stale(&response),
        }
    }
}

/// Sends commands over a transport and collects their responses.
pub struct CommandChannel<'a, T: UsbTransport + ?Sized, O: KbdObserver + ?Sized> {
    transport: &'a T,
    observer: &'a O,
    cancel: &'a CancelToken,
    timing: ChannelTiming,
}

impl<'a, T: UsbTransport + ?Sized, O: KbdObserver + ?Sized> CommandChannel<'a, T, O> {
    pub fn new(transport: &'a T, observer: &'a O, cancel: &'a CancelToken, timing: ChannelTiming) -> Self {
        Self {
            transport,
            observer,
            cancel,
            timing,
        }
    }

    pub fn timing(&self) -> ChannelTiming {
        self.timing
    }

    /// Encode and send one command, returning the response data.
    pub fn execute(&self, command: CommandId, payload: &[u8], position: u32) -> Result<Vec<u8>, ProtocolError> {
        let frame = CommandFrame::encode(command, payload, position)?;
        self.send(&frame)
    }

    /// Send `frame` and wait for its response; returns the response from
    /// byte 4 on.
    #[instrument(level = "debug", skip(self, frame), fields(command = %frame.command(), position = frame.position()))]
    pub fn send(&self, frame: &CommandFrame) -> Result<Vec<u8>, ProtocolError> {
        let command = frame.command();

        if command.needs_settle() {
            self.cancel
                .sleep(self.timing.end_settle)
                .map_err(ProtocolError::cancelled(command))?;
        }

        let written = self
            .transport
            .write(frame.as_bytes(), self.cancel)
            .map_err(|e| ProtocolError::from_transport(command, e))?;
        if written != FRAME_SIZE {
            return Err(ProtocolError::ShortWrite { command, written });
        }

        let filter = ResponseFilter::for_frame(frame);
        let deadline = Deadline::after(self.timing.response_timeout);
        let response = read_until_match(self.transport, &filter, deadline, self.cancel, |stale| {
            debug!(command = %command, expected = ?filter.token(), got = ?&stale[..CORRELATION_LEN], "Ignoring unmatched response");
            self.observer.on_event(&KbdEvent::ResponseDiscarded {
                command,
                expected: filter.token(),
                got: stale.to_vec(),
            });
        })?;

        let data = response[RESPONSE_DATA_OFFSET..].to_vec();
        debug!(command = %command, data = %hex(&data), "Matched response");
        Ok(data)
    }
}

fn hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::testing::RecordingObserver;
    use crate::events::NullObserver;
    use crate::transport::MockTransport;

    fn fast_timing(response_ms: u64) -> ChannelTiming {
        ChannelTiming {
            response_timeout: Duration::from_millis(response_ms),
            end_settle: Duration::from_millis(100),
        }
    }

    fn response_for(frame: &CommandFrame, data: &[u8]) -> Vec<u8> {
        let mut response = frame.as_bytes()[..4].to_vec();
        response.extend_from_slice(data);
        response
    }

    #[test]
    fn test_filter_classifies_by_first_three_bytes() {
        let frame = CommandFrame::encode(CommandId::ConfigRead, &[0; 4], 8).unwrap();
        let filter = ResponseFilter::for_frame(&frame);

        let mut good = frame.as_bytes().to_vec();
        assert_eq!(filter.classify(&good).unwrap(), Verdict::Matched);

        // Byte 3 onwards is not part of the match.
        good[3] = 0xFF;
        assert_eq!(filter.classify(&good).unwrap(), Verdict::Matched);

        let mut stale = frame.as_bytes().to_vec();
        stale[1] ^= 0x01;
        assert_eq!(filter.classify(&stale).unwrap(), Verdict::Stale);

        assert!(matches!(
            filter.classify(&[0x04, 0x00, 0x00]),
            Err(ProtocolError::ShortRead { len: 3, .. })
        ));
    }

    #[test]
    fn test_send_returns_bytes_after_offset_four() {
        let mock = MockTransport::echo_device();
        let cancel = CancelToken::new();
        let channel = CommandChannel::new(&mock, &NullObserver, &cancel, fast_timing(200));

        let data = channel.execute(CommandId::ConfigRead, &[0; 4], 12).unwrap();
        assert_eq!(data, vec![0, 0, 0, 0]);

        let writes = mock.get_writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].len(), FRAME_SIZE);
        assert_eq!(writes[0][3], CommandId::ConfigRead.as_u8());
    }

    #[test]
    fn test_send_discards_unmatched_responses() {
        let frame = CommandFrame::encode(CommandId::Probe, &[0; 4], 4).unwrap();
        let other = CommandFrame::encode(CommandId::Probe, &[0; 4], 0).unwrap();

        let mock = MockTransport::new();
        mock.queue_response(&response_for(&other, &[1, 1, 1, 1]));
        mock.queue_response(&response_for(&other, &[2, 2, 2, 2]));
        mock.queue_response(&response_for(&frame, &[9, 8, 7, 6]));

        let observer = RecordingObserver::default();
        let cancel = CancelToken::new();
        let channel = CommandChannel::new(&mock, &observer, &cancel, fast_timing(200));

        assert_eq!(channel.send(&frame).unwrap(), vec![9, 8, 7, 6]);
        let discarded = observer
            .events()
            .iter()
            .filter(|e| matches!(e, KbdEvent::ResponseDiscarded { .. }))
            .count();
        assert_eq!(discarded, 2);
    }

    #[test]
    fn test_timeout_when_no_match_arrives() {
        let frame = CommandFrame::encode(CommandId::Start, &[], 0).unwrap();
        let other = CommandFrame::encode(CommandId::End, &[], 0).unwrap();

        let mock = MockTransport::new();
        for _ in 0..3 {
            mock.queue_response(&response_for(&other, &[]));
        }

        let cancel = CancelToken::new();
        let channel = CommandChannel::new(&mock, &NullObserver, &cancel, fast_timing(300));

        let start = Instant::now();
        let err = channel.send(&frame).unwrap_err();
        let elapsed = start.elapsed();

        assert!(matches!(
            err,
            ProtocolError::Timeout {
                command: CommandId::Start,
                timeout_ms: 300
            }
        ));
        assert!(elapsed >= Duration::from_millis(300), "gave up early: {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(600), "overran budget: {:?}", elapsed);
    }

    #[test]
    fn test_default_budget_is_two_seconds() {
        let mock = MockTransport::new();
        let cancel = CancelToken::new();
        let channel = CommandChannel::new(&mock, &NullObserver, &cancel, ChannelTiming::default());

        let start = Instant::now();
        let err = channel.execute(CommandId::Start, &[], 0).unwrap_err();
        let elapsed = start.elapsed();

        assert!(matches!(err, ProtocolError::Timeout { timeout_ms: 2000, .. }));
        assert!(elapsed >= Duration::from_secs(2));
        assert!(elapsed < Duration::from_millis(2500));
    }

    #[test]
    fn test_short_write() {
        let mock = MockTransport::echo_device();
        mock.set_write_len(Some(32));
        let cancel = CancelToken::new();
        let channel = CommandChannel::new(&mock, &NullObserver, &cancel, fast_timing(200));

        let err = channel.execute(CommandId::Start, &[], 0).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::ShortWrite {
                command: CommandId::Start,
                written: 32
            }
        ));
    }

    #[test]
    fn test_short_read() {
        let mock = MockTransport::new();
        mock.queue_response(&[0x04, 0x01]);
        let cancel = CancelToken::new();
        let channel = CommandChannel::new(&mock, &NullObserver, &cancel, fast_timing(200));

        let err = channel.execute(CommandId::Start, &[], 0).unwrap_err();
        assert!(matches!(err, ProtocolError::ShortRead { len: 2, .. }));
    }

    #[test]
    fn test_payload_too_large_is_not_sent() {
        let mock = MockTransport::echo_device();
        let cancel = CancelToken::new();
        let channel = CommandChannel::new(&mock, &NullObserver, &cancel, fast_timing(200));

        let err = channel.execute(CommandId::ConfigWrite, &[0; 57], 0).unwrap_err();
        assert!(matches!(err, ProtocolError::PayloadTooLarge { len: 57 }));
        assert!(mock.get_writes().is_empty());
    }

    #[test]
    fn test_end_waits_for_settle_delay() {
        let mock = MockTransport::echo_device();
        let cancel = CancelToken::new();
        let channel = CommandChannel::new(&mock, &NullObserver, &cancel, fast_timing(200));

        let start = Instant::now();
        channel.execute(CommandId::End, &[], 0).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(100));

        let start = Instant::now();
        channel.execute(CommandId::Start, &[], 0).unwrap();
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn test_cancel_during_settle_skips_write() {
        let mock = MockTransport::echo_device();
        let cancel = CancelToken::new();
        cancel.cancel();
        let channel = CommandChannel::new(&mock, &NullObserver, &cancel, fast_timing(200));

        let err = channel.execute(CommandId::End, &[], 0).unwrap_err();
        assert!(matches!(err, ProtocolError::Cancelled { command: CommandId::End }));
        assert!(mock.get_writes().is_empty());
    }

    #[test]
    fn test_cancel_during_read_loop() {
        let mock = MockTransport::new();
        let cancel = CancelToken::new();
        let remote = cancel.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            remote.cancel();
        });

        let channel = CommandChannel::new(&mock, &NullObserver, &cancel, ChannelTiming::default());
        let start = Instant::now();
        let err = channel.execute(CommandId::Start, &[], 0).unwrap_err();

        assert!(err.is_cancelled());
        assert!(start.elapsed() < Duration::from_secs(1));
        handle.join().unwrap();
    }

    #[test]
    fn test_transport_error_is_wrapped() {
        let mock = MockTransport::echo_device();
        mock.disconnect();
        let cancel = CancelToken::new();
        let channel = CommandChannel::new(&mock, &NullObserver, &cancel, fast_timing(200));

        let err = channel.execute(CommandId::Probe, &[0; 4], 0).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Transport {
                command: CommandId::Probe,
                source: TransportError::Disconnected
            }
        ));
    }
}
