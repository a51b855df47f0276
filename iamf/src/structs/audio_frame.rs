//! Audio Frame OBU.
//!
//! The payload is opaque codec data whose meaning depends on the associated
//! Codec Config OBU: an Opus packet, an AAC `raw_data_block()`, a FLAC
//! `FRAME`, or interleaved PCM samples. Substream ids 0 through 17 are
//! carried implicitly by the compact OBU types and are not serialized.

use anyhow::{Result, bail};

use crate::structs::header::{ObuHeader, ObuType, write_obu};
use crate::utils::bitstream_io::{BitstreamIoWriter, BsIoSliceReader};
use crate::utils::errors::HeaderError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrameObu {
    pub header: ObuHeader,
    substream_id: u32,
    pub audio_frame: Vec<u8>,
}

impl AudioFrameObu {
    pub fn new(header: ObuHeader, substream_id: u32, audio_frame: Vec<u8>) -> Self {
        Self {
            header,
            substream_id,
            audio_frame,
        }
    }

    pub fn substream_id(&self) -> u32 {
        self.substream_id
    }

    pub fn write(&self, w: &mut BitstreamIoWriter) -> Result<()> {
        let obu_type = ObuType::for_substream_id(self.substream_id);
        write_obu(obu_type, &self.header, w, |pw| {
            if obu_type == ObuType::AudioFrame {
                pw.put_uleb128(self.substream_id)?;
            }
            pw.put_bytes(&self.audio_frame)
        })
    }

    /// Reads an Audio Frame payload. The substream id comes from the OBU type
    /// for the compact forms, otherwise from a leading `leb128`; the remaining
    /// payload bytes are the codec data.
    pub fn read(
        obu_type: ObuType,
        header: ObuHeader,
        payload_size: u64,
        r: &mut BsIoSliceReader,
    ) -> Result<Self> {
        let start = r.position()?;
        let substream_id = match obu_type.implicit_substream_id() {
            Some(id) => id,
            None => r.get_uleb128()?,
        };
        let id_bytes = (r.position()? - start) >> 3;
        let Some(frame_bytes) = payload_size.checked_sub(id_bytes) else {
            bail!(HeaderError::SizeSmallerThanHeaderFields {
                obu_size: payload_size as u32,
                consumed: id_bytes,
            });
        };
        let audio_frame = r.get_vec(frame_bytes as usize)?;

        Ok(Self {
            header,
            substream_id,
            audio_frame,
        })
    }
}
