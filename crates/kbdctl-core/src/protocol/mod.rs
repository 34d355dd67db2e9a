//! Protocol module - GMK87 configuration protocol definitions.

pub mod command;
pub mod constants;
pub mod frame;

pub use command::CommandId;
pub use constants::*;
pub use frame::{CommandFrame, FrameHeader, checksum};
