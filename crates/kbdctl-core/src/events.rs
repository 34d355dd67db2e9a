//! Event system for UI decoupling.
//!
//! Allows the CLI (or any other front end) to follow protocol progress
//! without tight coupling to the core logic.

use std::fmt;
use std::time::Duration;

use crate::protocol::CommandId;
use crate::state::{SessionState, TransactionKind};

/// Events emitted by a keyboard session.
#[derive(Debug, Clone)]
pub enum KbdEvent {
    /// Device opened.
    DeviceConnected { vid: u16, pid: u16 },
    /// Device released.
    DeviceClosed,
    /// Transaction state machine moved.
    StateChanged {
        kind: TransactionKind,
        from: SessionState,
        to: SessionState,
    },
    /// Progress through a transaction's steps.
    Progress {
        kind: TransactionKind,
        current: usize,
        total: usize,
    },
    /// A response arrived that did not belong to the pending command.
    ResponseDiscarded {
        command: CommandId,
        expected: [u8; 3],
        got: Vec<u8>,
    },
    /// USB report sent/received.
    Packet {
        direction: PacketDirection,
        length: usize,
        data: Vec<u8>,
    },
    /// A transaction completed successfully.
    TransactionComplete {
        kind: TransactionKind,
        elapsed: Duration,
    },
}

/// USB packet direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketDirection {
    Tx, // Transmit (Host -> Device)
    Rx, // Receive (Device -> Host)
}

impl fmt::Display for PacketDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketDirection::Tx => write!(f, "TX"),
            PacketDirection::Rx => write!(f, "RX"),
        }
    }
}

/// Observer trait for receiving session events.
///
/// Implement this trait in your UI layer to receive updates.
pub trait KbdObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &KbdEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl KbdObserver for NullObserver {
    fn on_event(&self, _event: &KbdEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl KbdObserver for TracingObserver {
    fn on_event(&self, event: &KbdEvent) {
        match event {
            KbdEvent::DeviceConnected { vid, pid } => {
                tracing::info!(vid = %format!("{:04X}", vid), pid = %format!("{:04X}", pid), "Device connected");
            }
            KbdEvent::DeviceClosed => {
                tracing::debug!("Device closed");
            }
            KbdEvent::StateChanged { kind, from, to } => {
                tracing::debug!(transaction = %kind, from = %from, to = %to, "State changed");
            }
            KbdEvent::Progress {
                kind,
                current,
                total,
            } => {
                tracing::trace!(transaction = %kind, progress = %format!("{}/{}", current, total), "Progress");
            }
            KbdEvent::ResponseDiscarded {
                command,
                expected,
                got,
            } => {
                tracing::debug!(command = %command, expected = ?expected, got = ?got, "Ignoring unmatched response");
            }
            KbdEvent::Packet {
                direction, length, ..
            } => {
                tracing::trace!(dir = %direction, len = length, "USB Packet");
            }
            KbdEvent::TransactionComplete { kind, elapsed } => {
                tracing::info!(transaction = %kind, elapsed_ms = elapsed.as_millis() as u64, "Transaction complete");
            }
        }
    }
}
