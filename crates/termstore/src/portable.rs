#![forbid(unsafe_code)]

//! Interchange formats store headers and integers as exactly 32 bits, so that
//! files written by 64-bit builds can be read by 32-bit builds and the other
//! way around.

use std::io::Read;
use std::io::Write;

use bitstream_io::BigEndian;
use bitstream_io::BitRead;
use bitstream_io::BitReader;
use bitstream_io::BitWrite;
use bitstream_io::BitWriter;
use log::error;

use crate::Header;
use crate::TermStoreError;

/// Writes headers and integers as 32-bit big endian words.
pub struct PortableWriter<W: Write> {
    writer: BitWriter<W, BigEndian>,
}

impl<W: Write> PortableWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: BitWriter::new(writer),
        }
    }

    /// Writes the header in its 32-bit layout, see [Header::to_portable].
    pub fn write_header(&mut self, header: Header) -> Result<(), TermStoreError> {
        let word = header.to_portable()?;
        Ok(self.writer.write::<32, u32>(word)?)
    }

    pub fn write_int(&mut self, value: i32) -> Result<(), TermStoreError> {
        Ok(self.writer.write::<32, u32>(value as u32)?)
    }

    /// Writes a length, an error when it does not fit in 32 bits.
    pub fn write_length(&mut self, length: usize) -> Result<(), TermStoreError> {
        let length = u32::try_from(length).map_err(|_| TermStoreError::PortableOverflow { value: length })?;
        Ok(self.writer.write::<32, u32>(length)?)
    }

    pub fn flush(&mut self) -> Result<(), TermStoreError> {
        self.writer.byte_align()?;
        Ok(self.writer.flush()?)
    }
}

impl<W: Write> Drop for PortableWriter<W> {
    fn drop(&mut self) {
        if self.flush().is_err() {
            error!("Failed to flush the portable stream when dropped");
        }
    }
}

/// Reads the words written by a [PortableWriter].
pub struct PortableReader<R: Read> {
    reader: BitReader<R, BigEndian>,
}

impl<R: Read> PortableReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BitReader::new(reader),
        }
    }

    pub fn read_header(&mut self) -> Result<Header, TermStoreError> {
        Ok(Header::from_portable(self.reader.read::<32, u32>()?))
    }

    pub fn read_int(&mut self) -> Result<i32, TermStoreError> {
        Ok(self.reader.read::<32, u32>()? as i32)
    }

    pub fn read_length(&mut self) -> Result<usize, TermStoreError> {
        Ok(self.reader.read::<32, u32>()? as usize)
    }
}
