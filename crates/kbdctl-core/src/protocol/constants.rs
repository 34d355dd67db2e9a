//! Protocol constants for the GMK87 configuration interface.
//!
//! Recovered from USB captures of the vendor configuration tool. Several of
//! the values (probe layout, date offset) have no documented meaning and are
//! kept as opaque protocol constants.

use std::time::Duration;

// ============================================================================
// Device Identification
// ============================================================================

/// Zuoya / GMK vendor ID
pub const GMK_VENDOR_ID: u16 = 0x320F;

/// GMK87 product ID
pub const GMK87_PRODUCT_ID: u16 = 0x5055;

/// Vendor-defined HID interface carrying the configuration protocol
pub const CONFIG_INTERFACE: u8 = 3;

// ============================================================================
// Frame Layout
// ============================================================================

/// USB interrupt report size; every command and response is one report.
pub const FRAME_SIZE: usize = 64;

/// Bytes before the payload: report id, checksum (2), command, length, position (3).
pub const HEADER_SIZE: usize = 8;

/// Largest payload a single frame can carry.
pub const MAX_PAYLOAD: usize = FRAME_SIZE - HEADER_SIZE;

/// Report id placed in byte 0 of every command.
pub const REPORT_ID: u8 = 0x04;

/// Position is carried as 24 bits.
pub const MAX_POSITION: u32 = 0x00FF_FFFF;

/// Frame bytes `[3, 63)` are summed into the checksum.
pub const CHECKSUM_START: usize = 3;
pub const CHECKSUM_END: usize = FRAME_SIZE - 1;

/// Request bytes echoed by the matching response (report id + checksum).
pub const CORRELATION_LEN: usize = 3;

/// Responses carry data from this offset on.
pub const RESPONSE_DATA_OFFSET: usize = 4;

// ============================================================================
// Timing
// ============================================================================

/// Budget for a matching response, measured from the end of the write.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Device settle time required before every `End` command.
pub const END_SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Upper bound for a single interrupt OUT transfer.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Granularity at which blocking waits re-check cancellation.
pub const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// Configuration Image
// ============================================================================

/// Bytes per `ConfigRead` / `Probe` step.
pub const CONFIG_CHUNK_SIZE: usize = 4;

/// Number of `ConfigRead` steps in a read transaction.
pub const CONFIG_CHUNK_COUNT: usize = 12;

/// Total size of the configuration image.
pub const CONFIG_IMAGE_SIZE: usize = CONFIG_CHUNK_SIZE * CONFIG_CHUNK_COUNT;

/// Number of 4-byte probes sent before the trailing short probe.
pub const PROBE_COUNT: usize = 9;

/// Position of the trailing 1-byte probe.
pub const TRAILING_PROBE_POSITION: u32 = 36;

/// Payload length of the trailing probe.
pub const TRAILING_PROBE_LEN: usize = 1;

/// Offset of the first date/time byte (seconds) inside the image.
pub const DATE_OFFSET: usize = 35;

/// Seconds, minutes, hours, weekday, day, month, year.
pub const DATE_FIELD_COUNT: usize = 7;

/// Year field stores `year - YEAR_BASE`.
pub const YEAR_BASE: i32 = 2000;

/// Default multiplier applied to the measured read duration when
/// programming the clock (one read plus one write transaction).
pub const LATENCY_FACTOR: u32 = 2;
