//! OBU header and type codes.

use anyhow::{Result, bail};

use crate::utils::bitstream_io::{BitstreamIoWriter, BsIoSliceReader};
use crate::utils::errors::HeaderError;

/// 5-bit OBU type code.
///
/// Values 6 through 23 are Audio Frame OBUs whose substream id (0 through 17)
/// is implicit in the type and not serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ObuType {
    CodecConfig,
    AudioElement,
    MixPresentation,
    ParameterBlock,
    TemporalDelimiter,
    AudioFrame,
    /// Compact Audio Frame form carrying substream id 0..=17.
    AudioFrameId(u8),
    Reserved(u8),
    SequenceHeader,
}

impl ObuType {
    pub fn from_u5(value: u8) -> Self {
        match value & 0x1F {
            0 => Self::CodecConfig,
            1 => Self::AudioElement,
            2 => Self::MixPresentation,
            3 => Self::ParameterBlock,
            4 => Self::TemporalDelimiter,
            5 => Self::AudioFrame,
            v @ 6..=23 => Self::AudioFrameId(v - 6),
            31 => Self::SequenceHeader,
            v => Self::Reserved(v),
        }
    }

    pub fn as_u5(self) -> u8 {
        match self {
            Self::CodecConfig => 0,
            Self::AudioElement => 1,
            Self::MixPresentation => 2,
            Self::ParameterBlock => 3,
            Self::TemporalDelimiter => 4,
            Self::AudioFrame => 5,
            Self::AudioFrameId(id) => 6 + id,
            Self::Reserved(v) => v,
            Self::SequenceHeader => 31,
        }
    }

    /// The compact Audio Frame form for a substream id, or the generic form
    /// when the id does not fit the compact range [0, 17].
    pub fn for_substream_id(substream_id: u32) -> Self {
        match substream_id {
            0..=17 => Self::AudioFrameId(substream_id as u8),
            _ => Self::AudioFrame,
        }
    }

    /// The substream id implied by a compact Audio Frame type.
    pub fn implicit_substream_id(self) -> Option<u32> {
        match self {
            Self::AudioFrameId(id) => Some(u32::from(id)),
            _ => None,
        }
    }

    pub fn is_audio_frame(self) -> bool {
        matches!(self, Self::AudioFrame | Self::AudioFrameId(_))
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::CodecConfig => "IA Codec Config",
            Self::AudioElement => "IA Audio Element",
            Self::MixPresentation => "IA Mix Presentation",
            Self::ParameterBlock => "IA Parameter Block",
            Self::TemporalDelimiter => "IA Temporal Delimiter",
            Self::AudioFrame | Self::AudioFrameId(_) => "IA Audio Frame",
            Self::Reserved(_) => "IA Reserved",
            Self::SequenceHeader => "IA Sequence Header",
        }
    }
}

/// OBU header: type and flag bits, `obu_size`, optional trimming counts and
/// optional extension bytes.
///
/// `obu_size` covers everything after itself: the optional trimming and
/// extension fields plus the payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObuHeader {
    pub redundant_copy: bool,

    /// When set, the two trim counts below are serialized.
    pub trimming_status: bool,
    pub num_samples_to_trim_at_end: u32,
    pub num_samples_to_trim_at_start: u32,

    /// `Some` serializes the extension flag, an `extension_header_size` and
    /// the opaque bytes. Unknown extensions round-trip losslessly.
    pub extension_header_bytes: Option<Vec<u8>>,
}

impl ObuHeader {
    pub fn with_trim(num_samples_to_trim_at_start: u32, num_samples_to_trim_at_end: u32) -> Self {
        Self {
            trimming_status: true,
            num_samples_to_trim_at_end,
            num_samples_to_trim_at_start,
            ..Default::default()
        }
    }

    fn validate_flags_for_type(&self, obu_type: ObuType) -> Result<()> {
        if matches!(
            obu_type,
            ObuType::TemporalDelimiter | ObuType::SequenceHeader
        ) {
            if self.redundant_copy {
                bail!(HeaderError::RedundantCopyForbidden(obu_type.name()));
            }
            if self.trimming_status {
                bail!(HeaderError::TrimmingForbidden(obu_type.name()));
            }
        }
        Ok(())
    }

    /// Serializes the header for a payload of known size. The caller writes
    /// the payload bytes immediately after.
    pub fn write(
        &self,
        obu_type: ObuType,
        payload_size: usize,
        w: &mut BitstreamIoWriter,
    ) -> Result<()> {
        self.validate_flags_for_type(obu_type)?;

        // The optional fields count towards obu_size, so serialize them first
        // with the same leb generator.
        let mut fields = BitstreamIoWriter::new(w.leb_style());
        if self.trimming_status {
            fields.put_uleb128(self.num_samples_to_trim_at_end)?;
            fields.put_uleb128(self.num_samples_to_trim_at_start)?;
        }
        if let Some(extension) = &self.extension_header_bytes {
            fields.put_uleb128(extension.len() as u32)?;
            fields.put_bytes(extension)?;
        }
        let fields = fields.into_bytes()?;

        let Some(obu_size) = fields
            .len()
            .checked_add(payload_size)
            .and_then(|size| u32::try_from(size).ok())
        else {
            bail!(HeaderError::PayloadTooLarge(payload_size));
        };

        w.put_n(5, u32::from(obu_type.as_u5()))?;
        w.put(self.redundant_copy)?;
        w.put(self.trimming_status)?;
        w.put(self.extension_header_bytes.is_some())?;
        w.put_uleb128(obu_size)?;
        w.put_bytes(&fields)?;
        Ok(())
    }

    /// Reads a header, returning the OBU type, the header fields and the
    /// number of payload bytes that follow.
    pub fn read(r: &mut BsIoSliceReader) -> Result<(ObuType, Self, u64)> {
        let obu_type = ObuType::from_u5(r.get_n(5)?);
        let redundant_copy = r.get()?;
        let trimming_status = r.get()?;
        let extension_flag = r.get()?;
        let obu_size = r.get_uleb128()?;
        let after_size = r.position()?;

        let mut header = Self {
            redundant_copy,
            trimming_status,
            ..Default::default()
        };

        if trimming_status {
            header.num_samples_to_trim_at_end = r.get_uleb128()?;
            header.num_samples_to_trim_at_start = r.get_uleb128()?;
        }
        if extension_flag {
            let extension_header_size = r.get_uleb128()?;
            header.extension_header_bytes = Some(r.get_vec(extension_header_size as usize)?);
        }

        let consumed = (r.position()? - after_size) >> 3;
        if consumed > u64::from(obu_size) {
            bail!(HeaderError::SizeSmallerThanHeaderFields { obu_size, consumed });
        }

        header.validate_flags_for_type(obu_type)?;
        Ok((obu_type, header, u64::from(obu_size) - consumed))
    }
}

/// Serializes a complete OBU: the payload is rendered to a scratch buffer so
/// its size is known, then the header and payload land in `w` together. A
/// failing payload leaves `w` untouched.
pub(crate) fn write_obu<F>(
    obu_type: ObuType,
    header: &ObuHeader,
    w: &mut BitstreamIoWriter,
    payload_fn: F,
) -> Result<()>
where
    F: FnOnce(&mut BitstreamIoWriter) -> Result<()>,
{
    let mut pw = BitstreamIoWriter::new(w.leb_style());
    payload_fn(&mut pw)?;
    let payload = pw.into_bytes()?;
    header.write(obu_type, payload.len(), w)?;
    w.put_bytes(&payload)?;
    Ok(())
}
