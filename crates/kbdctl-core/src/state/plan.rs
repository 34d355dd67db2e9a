//! Command sequences of the read and write transactions.

use std::fmt;

use crate::protocol::CommandId;
use crate::protocol::constants::{
    CONFIG_CHUNK_COUNT, CONFIG_CHUNK_SIZE, PROBE_COUNT, TRAILING_PROBE_LEN, TRAILING_PROBE_POSITION,
};

/// One command of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Start,
    /// Zero payload of `len` bytes at `position`.
    Probe { position: u32, len: usize },
    End,
    ConfigRead { position: u32 },
    /// Carries the whole image.
    ConfigWrite { position: u32 },
}

impl Step {
    pub fn command(&self) -> CommandId {
        match self {
            Step::Start => CommandId::Start,
            Step::Probe { .. } => CommandId::Probe,
            Step::End => CommandId::End,
            Step::ConfigRead { .. } => CommandId::ConfigRead,
            Step::ConfigWrite { .. } => CommandId::ConfigWrite,
        }
    }

    pub fn position(&self) -> u32 {
        match self {
            Step::Start | Step::End => 0,
            Step::Probe { position, .. }
            | Step::ConfigRead { position }
            | Step::ConfigWrite { position } => *position,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Start | Step::End => write!(f, "{}", self.command()),
            _ => write!(f, "{} at position {}", self.command(), self.position()),
        }
    }
}

fn chunk_position(index: usize) -> u32 {
    (index * CONFIG_CHUNK_SIZE) as u32
}

/// Start, nine 4-byte probes, one trailing 1-byte probe at 36, End, then
/// twelve 4-byte reads covering the image.
pub fn read_plan() -> Vec<Step> {
    let mut steps = Vec::with_capacity(1 + PROBE_COUNT + 1 + 1 + CONFIG_CHUNK_COUNT);
    steps.push(Step::Start);
    steps.extend((0..PROBE_COUNT).map(|i| Step::Probe {
        position: chunk_position(i),
        len: CONFIG_CHUNK_SIZE,
    }));
    steps.push(Step::Probe {
        position: TRAILING_PROBE_POSITION,
        len: TRAILING_PROBE_LEN,
    });
    steps.push(Step::End);
    steps.extend((0..CONFIG_CHUNK_COUNT).map(|i| Step::ConfigRead {
        position: chunk_position(i),
    }));
    steps
}

/// Start, one image write at 0, End.
pub fn write_plan() -> Vec<Step> {
    vec![Step::Start, Step::ConfigWrite { position: 0 }, Step::End]
}
