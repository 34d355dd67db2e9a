//! Command identifiers understood by the configuration interface.

use std::fmt;

/// Command id carried in byte 3 of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandId {
    /// Opens a configuration session.
    Start = 0x01,
    /// Closes the current phase; must be preceded by the settle delay.
    End = 0x02,
    /// Device-side preparation step with no known payload semantics.
    Probe = 0x03,
    /// Reads a chunk of the configuration image.
    ConfigRead = 0x05,
    /// Writes the configuration image.
    ConfigWrite = 0x06,
}

impl CommandId {
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Start),
            0x02 => Some(Self::End),
            0x03 => Some(Self::Probe),
            0x05 => Some(Self::ConfigRead),
            0x06 => Some(Self::ConfigWrite),
            _ => None,
        }
    }

    /// Whether the device needs the settle delay before this command.
    pub const fn needs_settle(self) -> bool {
        matches!(self, Self::End)
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandId::Start => write!(f, "START"),
            CommandId::End => write!(f, "END"),
            CommandId::Probe => write!(f, "PROBE"),
            CommandId::ConfigRead => write!(f, "CONFIG_READ"),
            CommandId::ConfigWrite => write!(f, "CONFIG_WRITE"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_ids_roundtrip() {
        for cmd in [
            CommandId::Start,
            CommandId::End,
            CommandId::Probe,
            CommandId::ConfigRead,
            CommandId::ConfigWrite,
        ] {
            assert_eq!(CommandId::from_u8(cmd.as_u8()), Some(cmd));
        }
    }

    #[test]
    fn test_unknown_command_ids() {
        assert_eq!(CommandId::from_u8(0x00), None);
        assert_eq!(CommandId::from_u8(0x04), None);
        assert_eq!(CommandId::from_u8(0xFF), None);
    }

    #[test]
    fn test_only_end_needs_settle() {
        assert!(CommandId::End.needs_settle());
        assert!(!CommandId::Start.needs_settle());
        assert!(!CommandId::ConfigRead.needs_settle());
    }
}
