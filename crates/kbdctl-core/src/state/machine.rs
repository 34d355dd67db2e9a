//! Transaction state machine for the configuration protocol.

use std::fmt;

use crate::error::TransactionError;
use crate::protocol::CommandId;

/// Device-side session state as implied by the commands sent so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No session open.
    #[default]
    Idle,
    /// `Start` acknowledged.
    Started,
    /// Probe sequence in progress.
    Probing,
    /// `End` acknowledged.
    Finalized,
    /// Reading or writing configuration data.
    Transferring,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "IDLE"),
            SessionState::Started => write!(f, "STARTED"),
            SessionState::Probing => write!(f, "PROBING"),
            SessionState::Finalized => write!(f, "FINALIZED"),
            SessionState::Transferring => write!(f, "TRANSFERRING"),
        }
    }
}

/// The two supported transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
    Read,
    Write,
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionKind::Read => write!(f, "read"),
            TransactionKind::Write => write!(f, "write"),
        }
    }
}

/// Transition table. `None` means the command is not allowed here.
pub fn next_state(kind: TransactionKind, state: SessionState, command: CommandId) -> Option<SessionState> {
    use CommandId::*;
    use SessionState::*;
    use TransactionKind::*;

    match (kind, state, command) {
        (_, Idle, Start) => Some(Started),
        (Read, Started | Probing, Probe) => Some(Probing),
        (Read, Probing, End) => Some(Finalized),
        (Read, Finalized | Transferring, ConfigRead) => Some(Transferring),
        (Write, Started, ConfigWrite) => Some(Transferring),
        (Write, Transferring, End) => Some(Finalized),
        _ => None,
    }
}

/// Tracks one transaction and rejects commands sent out of sequence.
#[derive(Debug)]
pub struct TransactionMachine {
    kind: TransactionKind,
    state: SessionState,
}

impl TransactionMachine {
    pub fn new(kind: TransactionKind) -> Self {
        Self {
            kind,
            state: SessionState::Idle,
        }
    }

    pub fn kind(&self) -> TransactionKind {
        self.kind
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Check that `command` may be sent now, without moving.
    pub fn check(&self, command: CommandId) -> Result<SessionState, TransactionError> {
        next_state(self.kind, self.state, command).ok_or(TransactionError::InvalidTransition {
            kind: self.kind,
            state: self.state,
            command,
        })
    }

    /// Record that `command` was acknowledged; returns `(from, to)`.
    pub fn advance(&mut self, command: CommandId) -> Result<(SessionState, SessionState), TransactionError> {
        let to = self.check(command)?;
        let from = self.state;
        if from != to {
            tracing::trace!(transaction = %self.kind, from = %from, to = %to, "State transition");
        }
        self.state = to;
        Ok((from, to))
    }

    /// Whether the transaction has reached its terminal state.
    pub fn is_complete(&self) -> bool {
        match self.kind {
            TransactionKind::Read => self.state == SessionState::Transferring,
            TransactionKind::Write => self.state == SessionState::Finalized,
        }
    }

    /// Return to `Idle` once the transaction is complete.
    pub fn finish(&mut self) -> Result<(), TransactionError> {
        if !self.is_complete() {
            return Err(TransactionError::InvalidTransition {
                kind: self.kind,
                state: self.state,
                command: CommandId::End,
            });
        }
        self.state = SessionState::Idle;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use CommandId::*;

    #[test]
    fn test_read_sequence_states() {
        let mut m = TransactionMachine::new(TransactionKind::Read);
        assert_eq!(m.advance(Start).unwrap().1, SessionState::Started);
        assert_eq!(m.advance(Probe).unwrap().1, SessionState::Probing);
        assert_eq!(m.advance(Probe).unwrap().1, SessionState::Probing);
        assert_eq!(m.advance(End).unwrap().1, SessionState::Finalized);
        assert_eq!(m.advance(ConfigRead).unwrap().1, SessionState::Transferring);
        assert_eq!(m.advance(ConfigRead).unwrap().1, SessionState::Transferring);
        assert!(m.is_complete());
        m.finish().unwrap();
        assert_eq!(m.state(), SessionState::Idle);
    }

    #[test]
    fn test_write_sequence_states() {
        let mut m = TransactionMachine::new(TransactionKind::Write);
        m.advance(Start).unwrap();
        assert_eq!(m.advance(ConfigWrite).unwrap().1, SessionState::Transferring);
        assert!(!m.is_complete());
        assert_eq!(m.advance(End).unwrap().1, SessionState::Finalized);
        m.finish().unwrap();
        assert_eq!(m.state(), SessionState::Idle);
    }

    #[test]
    fn test_rejects_out_of_order_commands() {
        let mut m = TransactionMachine::new(TransactionKind::Read);
        assert!(matches!(
            m.advance(Probe),
            Err(TransactionError::InvalidTransition {
                state: SessionState::Idle,
                command: Probe,
                ..
            })
        ));

        m.advance(Start).unwrap();
        // End straight after Start skips the probes.
        assert!(m.advance(End).is_err());
        // ConfigRead before End.
        assert!(m.advance(ConfigRead).is_err());
        // Failed transitions leave the state alone.
        assert_eq!(m.state(), SessionState::Started);
    }

    #[test]
    fn test_write_rejects_read_commands() {
        let mut m = TransactionMachine::new(TransactionKind::Write);
        m.advance(Start).unwrap();
        assert!(m.advance(Probe).is_err());
        assert!(m.advance(ConfigRead).is_err());
        assert!(m.advance(End).is_err());
    }

    #[test]
    fn test_finish_requires_terminal_state() {
        let mut m = TransactionMachine::new(TransactionKind::Read);
        m.advance(Start).unwrap();
        assert!(m.finish().is_err());

        let mut w = TransactionMachine::new(TransactionKind::Write);
        w.advance(Start).unwrap();
        w.advance(ConfigWrite).unwrap();
        assert!(w.finish().is_err());
    }

    #[test]
    fn test_start_only_from_idle() {
        for kind in [TransactionKind::Read, TransactionKind::Write] {
            assert_eq!(next_state(kind, SessionState::Idle, Start), Some(SessionState::Started));
            assert_eq!(next_state(kind, SessionState::Started, Start), None);
            assert_eq!(next_state(kind, SessionState::Finalized, Start), None);
        }
    }
}
