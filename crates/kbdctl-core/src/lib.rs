//! kbdctl-core: GMK87 keyboard configuration protocol in Rust.
//!
//! The keyboard exposes its configuration memory (including its clock) over
//! a vendor HID interface. This crate reads and writes that memory using the
//! keyboard's 64-byte command reports.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: Constants, command ids, frame encoding
//! - **Transport**: USB communication abstraction (nusb, mock)
//! - **Channel**: One command, one matched response
//! - **State**: Transaction state machine and command plans
//! - **Image / Time codec**: The 48-byte config image and its clock block
//! - **Events**: Observer pattern for UI decoupling
//! - **Session**: High-level orchestrator
//!
//! # Example
//!
//! ```no_run
//! use kbdctl_core::{CancelToken, KbdConfig, KeyboardSession};
//!
//! let session = KeyboardSession::open(&KbdConfig::default(), CancelToken::new())?;
//! let image = session.load_config()?;
//! println!("{}", image);
//! session.set_time(chrono::Local::now())?;
//! session.close()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod cancel;
pub mod channel;
pub mod config;
pub mod error;
pub mod events;
pub mod image;
pub mod protocol;
pub mod session;
pub mod state;
pub mod timecodec;
pub mod transport;

// Re-exports for convenience
pub use cancel::{CancelToken, Cancelled};
pub use channel::{ChannelTiming, CommandChannel};
pub use config::KbdConfig;
pub use error::{ProtocolError, TransactionError};
pub use events::{KbdEvent, KbdObserver, NullObserver, TracingObserver};
pub use image::{ConfigImage, ImageError};
pub use protocol::{CommandFrame, CommandId};
pub use session::{KeyboardSession, TimeSync};
pub use state::{SessionState, Step, TransactionKind};
pub use timecodec::{TimeCodec, TimeCodecError};
pub use transport::{MockTransport, NusbTransport, TransportError, UsbTransport};
