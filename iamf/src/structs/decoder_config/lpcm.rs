//! LPCM decoder config.

use anyhow::{Result, bail};

use crate::utils::bitstream_io::{BitstreamIoWriter, BsIoSliceReader};
use crate::utils::errors::CodecConfigError;

/// Bit 0 of `sample_format_flags_bitmask`: samples are little-endian.
pub const LPCM_LITTLE_ENDIAN: u8 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LpcmDecoderConfig {
    /// Only the values 0 (big-endian) and 1 (little-endian) are defined.
    pub sample_format_flags_bitmask: u8,
    pub sample_size: u8,
    pub sample_rate: u32,
}

impl LpcmDecoderConfig {
    pub const REQUIRED_AUDIO_ROLL_DISTANCE: i16 = 0;

    pub fn is_little_endian(&self) -> bool {
        self.sample_format_flags_bitmask & LPCM_LITTLE_ENDIAN != 0
    }

    fn validate(&self) -> Result<()> {
        if self.sample_format_flags_bitmask > LPCM_LITTLE_ENDIAN {
            bail!(CodecConfigError::InvalidSampleFormatFlags(
                self.sample_format_flags_bitmask
            ));
        }
        if !matches!(self.sample_size, 16 | 24 | 32) {
            bail!(CodecConfigError::InvalidSampleSize(self.sample_size));
        }
        if !matches!(self.sample_rate, 16000 | 32000 | 44100 | 48000 | 96000) {
            bail!(CodecConfigError::InvalidSampleRate(self.sample_rate));
        }
        Ok(())
    }

    pub fn write(&self, w: &mut BitstreamIoWriter) -> Result<()> {
        self.validate()?;
        w.put_n(8, u32::from(self.sample_format_flags_bitmask))?;
        w.put_n(8, u32::from(self.sample_size))?;
        w.put_n(32, self.sample_rate)?;
        Ok(())
    }

    pub fn read(r: &mut BsIoSliceReader) -> Result<Self> {
        let config = Self {
            sample_format_flags_bitmask: r.get_n(8)?,
            sample_size: r.get_n(8)?,
            sample_rate: r.get_n(32)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn output_sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn bit_depth_to_measure_loudness(&self) -> u8 {
        self.sample_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: LpcmDecoderConfig = LpcmDecoderConfig {
        sample_format_flags_bitmask: LPCM_LITTLE_ENDIAN,
        sample_size: 16,
        sample_rate: 48000,
    };

    #[test]
    fn round_trip() {
        let mut w = BitstreamIoWriter::default();
        CONFIG.write(&mut w).unwrap();
        let bytes = w.into_bytes().unwrap();
        assert_eq!(bytes, [0x01, 0x10, 0x00, 0x00, 0xBB, 0x80]);

        let mut r = BsIoSliceReader::from_slice(&bytes);
        assert_eq!(LpcmDecoderConfig::read(&mut r).unwrap(), CONFIG);
    }

    #[test]
    fn invalid_fields_are_rejected() {
        let mut w = BitstreamIoWriter::default();
        assert!(
            LpcmDecoderConfig {
                sample_format_flags_bitmask: 2,
                ..CONFIG
            }
            .write(&mut w)
            .is_err()
        );
        assert!(
            LpcmDecoderConfig {
                sample_size: 20,
                ..CONFIG
            }
            .write(&mut w)
            .is_err()
        );
        assert!(
            LpcmDecoderConfig {
                sample_rate: 22050,
                ..CONFIG
            }
            .write(&mut w)
            .is_err()
        );
    }
}
