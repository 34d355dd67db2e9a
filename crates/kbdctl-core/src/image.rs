//! The 48-byte configuration image.
//!
//! The image is opaque apart from the date/time block starting at
//! [`DATE_OFFSET`]. It is assembled from positional chunks, strictly in
//! ascending position order.

use std::fmt;

use thiserror::Error;

use crate::protocol::constants::{
    CONFIG_CHUNK_SIZE, CONFIG_IMAGE_SIZE, DATE_FIELD_COUNT, DATE_OFFSET,
};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ImageError {
    #[error("Image must be {expected} bytes, got {actual}")]
    WrongLength { expected: usize, actual: usize },
    #[error("Chunk at position {got} out of order, expected position {expected}")]
    OutOfOrder { expected: usize, got: usize },
    #[error("Chunk at position {position} is {len} bytes, expected {expected}")]
    ChunkSize {
        position: usize,
        len: usize,
        expected: usize,
    },
}

/// Date/time block as stored in the image: sec, min, hour, weekday, day, month, year.
pub type DateFields = [u8; DATE_FIELD_COUNT];

/// Snapshot of the device's configuration memory.
#[derive(Clone, PartialEq, Eq)]
pub struct ConfigImage {
    bytes: [u8; CONFIG_IMAGE_SIZE],
}

impl ConfigImage {
    pub const SIZE: usize = CONFIG_IMAGE_SIZE;

    pub fn from_bytes(data: &[u8]) -> Result<Self, ImageError> {
        let bytes: [u8; CONFIG_IMAGE_SIZE] =
            data.try_into().map_err(|_| ImageError::WrongLength {
                expected: CONFIG_IMAGE_SIZE,
                actual: data.len(),
            })?;
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; CONFIG_IMAGE_SIZE] {
        &self.bytes
    }

    pub fn date_fields(&self) -> DateFields {
        let mut fields = [0u8; DATE_FIELD_COUNT];
        fields.copy_from_slice(&self.bytes[DATE_OFFSET..DATE_OFFSET + DATE_FIELD_COUNT]);
        fields
    }

    pub fn set_date_fields(&mut self, fields: &DateFields) {
        self.bytes[DATE_OFFSET..DATE_OFFSET + DATE_FIELD_COUNT].copy_from_slice(fields);
    }
}

impl fmt::Display for ConfigImage {
    /// Space separated lowercase hex, e.g. `00 1f a0 …`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.bytes.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl fmt::Debug for ConfigImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConfigImage({})", self)
    }
}

/// Collects `ConfigRead` chunks into an image.
#[derive(Debug, Default)]
pub struct ImageAssembler {
    buffer: Vec<u8>,
}

impl ImageAssembler {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(CONFIG_IMAGE_SIZE),
        }
    }

    /// Position the next chunk must be read from.
    pub fn next_position(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_complete(&self) -> bool {
        self.buffer.len() == CONFIG_IMAGE_SIZE
    }

    pub fn push(&mut self, position: usize, chunk: &[u8]) -> Result<(), ImageError> {
        let expected = self.next_position();
        if position != expected || expected >= CONFIG_IMAGE_SIZE {
            return Err(ImageError::OutOfOrder {
                expected,
                got: position,
            });
        }
        if chunk.len() != CONFIG_CHUNK_SIZE {
            return Err(ImageError::ChunkSize {
                position,
                len: chunk.len(),
                expected: CONFIG_CHUNK_SIZE,
            });
        }
        self.buffer.extend_from_slice(chunk);
        Ok(())
    }

    pub fn finish(self) -> Result<ConfigImage, ImageError> {
        ConfigImage::from_bytes(&self.buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assemble_in_order() {
        let mut asm = ImageAssembler::new();
        for i in 0..12u8 {
            asm.push(i as usize * 4, &[i, i, i, i]).unwrap();
        }
        assert!(asm.is_complete());

        let image = asm.finish().unwrap();
        assert_eq!(image.as_bytes().len(), 48);
        assert_eq!(image.as_bytes()[0], 0);
        assert_eq!(image.as_bytes()[47], 11);
        assert_eq!(&image.as_bytes()[20..24], &[5, 5, 5, 5]);
    }

    #[test]
    fn test_assemble_rejects_out_of_order() {
        let mut asm = ImageAssembler::new();
        asm.push(0, &[0; 4]).unwrap();
        let err = asm.push(8, &[0; 4]).unwrap_err();
        assert_eq!(err, ImageError::OutOfOrder { expected: 4, got: 8 });
    }

    #[test]
    fn test_assemble_rejects_overflow_and_bad_chunk() {
        let mut asm = ImageAssembler::new();
        assert!(matches!(
            asm.push(0, &[0; 3]),
            Err(ImageError::ChunkSize { len: 3, .. })
        ));
        for i in 0..12 {
            asm.push(i * 4, &[0; 4]).unwrap();
        }
        assert!(matches!(asm.push(48, &[0; 4]), Err(ImageError::OutOfOrder { .. })));
    }

    #[test]
    fn test_incomplete_image() {
        let mut asm = ImageAssembler::new();
        asm.push(0, &[1; 4]).unwrap();
        assert_eq!(
            asm.finish().unwrap_err(),
            ImageError::WrongLength {
                expected: 48,
                actual: 4
            }
        );
    }

    #[test]
    fn test_date_fields_window() {
        let mut image = ConfigImage::from_bytes(&[0xEE; 48]).unwrap();
        image.set_date_fields(&[1, 2, 3, 4, 5, 6, 7]);

        assert_eq!(image.date_fields(), [1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(image.as_bytes()[34], 0xEE);
        assert_eq!(&image.as_bytes()[35..42], &[1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(image.as_bytes()[42], 0xEE);
    }

    #[test]
    fn test_hex_display() {
        let mut bytes = [0u8; 48];
        bytes[0] = 0x1F;
        bytes[1] = 0xA0;
        let image = ConfigImage::from_bytes(&bytes).unwrap();
        let text = image.to_string();
        assert!(text.starts_with("1f a0 00"));
        assert_eq!(text.split(' ').count(), 48);
    }
}
