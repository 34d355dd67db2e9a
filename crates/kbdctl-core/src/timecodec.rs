//! Real-time clock encoding for the configuration image.
//!
//! The device keeps its clock in seven bytes of the image: BCD seconds,
//! minutes and hours, an ISO weekday, then BCD day, month and
//! `year - 2000`. Programming the clock takes a read and a write transaction,
//! so the encoded instant is pushed forward by a multiple of the measured
//! read duration to land close to the moment the write completes.

use std::time::Duration;

use chrono::{DateTime, Datelike, TimeDelta, TimeZone, Timelike, Weekday};
use thiserror::Error;
use tracing::debug;

use crate::image::{ConfigImage, DateFields};
use crate::protocol::constants::{LATENCY_FACTOR, YEAR_BASE};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimeCodecError {
    #[error("{field} value {value} outside BCD range 0..=99")]
    ValueOutOfRange { field: &'static str, value: i32 },
    #[error("Latency compensation of {millis}ms cannot be applied")]
    LatencyOutOfRange { millis: u128 },
}

/// Encode `value` as packed BCD (`tens << 4 | ones`).
pub fn bcd_encode(value: i32) -> Result<u8, TimeCodecError> {
    if !(0..=99).contains(&value) {
        return Err(TimeCodecError::ValueOutOfRange {
            field: "value",
            value,
        });
    }
    Ok((((value / 10) << 4) | (value % 10)) as u8)
}

pub fn bcd_decode(byte: u8) -> u8 {
    (byte >> 4) * 10 + (byte & 0x0F)
}

/// ISO weekday number, Monday = 1 through Sunday = 7.
pub fn weekday_byte(weekday: Weekday) -> u8 {
    weekday.number_from_monday() as u8
}

fn encode_field(field: &'static str, value: i32) -> Result<u8, TimeCodecError> {
    bcd_encode(value).map_err(|_| TimeCodecError::ValueOutOfRange { field, value })
}

/// Encode the seven clock bytes for `time`. Sub-second precision is dropped.
pub fn encode_date_fields<Tz: TimeZone>(time: &DateTime<Tz>) -> Result<DateFields, TimeCodecError> {
    Ok([
        encode_field("second", time.second() as i32)?,
        encode_field("minute", time.minute() as i32)?,
        encode_field("hour", time.hour() as i32)?,
        weekday_byte(time.weekday()),
        encode_field("day", time.day() as i32)?,
        encode_field("month", time.month() as i32)?,
        encode_field("year", time.year() - YEAR_BASE)?,
    ])
}

/// Latency-compensating clock encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeCodec {
    latency_factor: u32,
}

impl Default for TimeCodec {
    fn default() -> Self {
        Self::new(LATENCY_FACTOR)
    }
}

impl TimeCodec {
    pub fn new(latency_factor: u32) -> Self {
        Self { latency_factor }
    }

    pub fn latency_factor(&self) -> u32 {
        self.latency_factor
    }

    /// `requested + latency_factor * read_duration`.
    pub fn target_instant<Tz: TimeZone>(
        &self,
        requested: DateTime<Tz>,
        read_duration: Duration,
    ) -> Result<DateTime<Tz>, TimeCodecError> {
        let out_of_range = || TimeCodecError::LatencyOutOfRange {
            millis: read_duration.as_millis() * u128::from(self.latency_factor),
        };
        let offset = read_duration
            .checked_mul(self.latency_factor)
            .and_then(|d| TimeDelta::from_std(d).ok())
            .ok_or_else(out_of_range)?;
        requested.checked_add_signed(offset).ok_or_else(out_of_range)
    }

    /// Write the compensated clock into `image`, returning the instant encoded.
    ///
    /// On error the image is left untouched.
    pub fn apply<Tz: TimeZone>(
        &self,
        image: &mut ConfigImage,
        requested: DateTime<Tz>,
        read_duration: Duration,
    ) -> Result<DateTime<Tz>, TimeCodecError> {
        let target = self.target_instant(requested, read_duration)?;
        let fields = encode_date_fields(&target)?;
        debug!(fields = ?fields, read_ms = read_duration.as_millis(), "Encoded clock fields");
        image.set_date_fields(&fields);
        Ok(target)
    }
}
