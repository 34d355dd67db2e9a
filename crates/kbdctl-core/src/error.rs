//! Error types for the command channel and configuration transactions.

use thiserror::Error;

use crate::cancel::Cancelled;
use crate::image::ImageError;
use crate::protocol::CommandId;
use crate::protocol::constants::{FRAME_SIZE, HEADER_SIZE, MAX_PAYLOAD};
use crate::state::{SessionState, Step, TransactionKind};
use crate::timecodec::TimeCodecError;
use crate::transport::TransportError;

/// Failure of a single command round trip.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Payload too large: {len} bytes, maximum {}", MAX_PAYLOAD)]
    PayloadTooLarge { len: usize },

    #[error("Position 0x{position:X} does not fit in 24 bits")]
    PositionOutOfRange { position: u32 },

    #[error("Frame too short: {len} bytes, header needs {}", HEADER_SIZE)]
    FrameTooShort { len: usize },

    #[error("Unknown command id 0x{id:02X}")]
    UnknownCommand { id: u8 },

    #[error("Short write for {command}: wrote {written} bytes, expected {}", FRAME_SIZE)]
    ShortWrite { command: CommandId, written: usize },

    #[error("Short read for {command}: read {len} bytes")]
    ShortRead { command: CommandId, len: usize },

    #[error("No matching response for {command} within {timeout_ms}ms")]
    Timeout { command: CommandId, timeout_ms: u64 },

    #[error("Command {command} cancelled")]
    Cancelled { command: CommandId },

    #[error("Transport error during {command}")]
    Transport {
        command: CommandId,
        #[source]
        source: TransportError,
    },
}

impl ProtocolError {
    /// Map a transport failure during `command`, keeping cancellation distinct.
    pub fn from_transport(command: CommandId, source: TransportError) -> Self {
        match source {
            TransportError::Cancelled => ProtocolError::Cancelled { command },
            source => ProtocolError::Transport { command, source },
        }
    }

    pub fn cancelled(command: CommandId) -> impl FnOnce(Cancelled) -> Self {
        move |_| ProtocolError::Cancelled { command }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProtocolError::Cancelled { .. })
    }
}

/// Failure of a whole read or write transaction.
#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("{kind} transaction aborted at {step}")]
    Aborted {
        kind: TransactionKind,
        step: Step,
        #[source]
        source: ProtocolError,
    },

    #[error("{kind} transaction cannot send {command} in state {state}")]
    InvalidTransition {
        kind: TransactionKind,
        state: SessionState,
        command: CommandId,
    },

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error(transparent)]
    TimeCodec(#[from] TimeCodecError),
}

impl TransactionError {
    /// The protocol error behind an aborted transaction, if any.
    pub fn protocol_error(&self) -> Option<&ProtocolError> {
        match self {
            TransactionError::Aborted { source, .. } => Some(source),
            _ => None,
        }
    }
}
