//! Temporal Delimiter OBU. The payload is empty; the header alone marks the
//! boundary between temporal units.

use anyhow::{Result, bail};

use crate::structs::header::{ObuHeader, ObuType, write_obu};
use crate::utils::bitstream_io::{BitstreamIoWriter, BsIoSliceReader};
use crate::utils::errors::HeaderError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemporalDelimiterObu {
    pub header: ObuHeader,
}

impl TemporalDelimiterObu {
    pub fn write(&self, w: &mut BitstreamIoWriter) -> Result<()> {
        write_obu(ObuType::TemporalDelimiter, &self.header, w, |_| Ok(()))
    }

    pub fn read(header: ObuHeader, payload_size: u64, r: &mut BsIoSliceReader) -> Result<Self> {
        if payload_size != 0 {
            bail!(HeaderError::PayloadSizeMismatch {
                expected: r.position()?,
                actual: r.position()? + (payload_size << 3),
            });
        }
        Ok(Self { header })
    }
}
