//! IA Sequence Header OBU.

use anyhow::{Result, bail};

use crate::structs::header::{ObuHeader, ObuType, write_obu};
use crate::utils::bitstream_io::{BitstreamIoWriter, BsIoSliceReader};
use crate::utils::errors::SequenceHeaderError;

/// The 4-byte magic `"iamf"` opening every IA Sequence.
pub const IA_CODE: u32 = 0x6961_6D66;

/// 8-bit profile value.
///
/// Values beyond the enumerated set are tolerated as reserved when parsing
/// but are rejected when writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileVersion {
    Simple,
    Base,
    Reserved(u8),
}

impl ProfileVersion {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Simple,
            1 => Self::Base,
            v => Self::Reserved(v),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::Simple => 0,
            Self::Base => 1,
            Self::Reserved(v) => v,
        }
    }
}

/// IA Sequence Header OBU: magic plus primary and additional profiles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IaSequenceHeaderObu {
    pub header: ObuHeader,
    pub primary_profile: ProfileVersion,
    pub additional_profile: ProfileVersion,
}

impl IaSequenceHeaderObu {
    pub fn new(primary_profile: ProfileVersion, additional_profile: ProfileVersion) -> Self {
        Self {
            header: ObuHeader::default(),
            primary_profile,
            additional_profile,
        }
    }

    pub fn write(&self, w: &mut BitstreamIoWriter) -> Result<()> {
        for profile in [self.primary_profile, self.additional_profile] {
            if let ProfileVersion::Reserved(value) = profile {
                bail!(SequenceHeaderError::ReservedProfile(value));
            }
        }

        write_obu(ObuType::SequenceHeader, &self.header, w, |pw| {
            pw.put_n(32, IA_CODE)?;
            pw.put_n(8, u32::from(self.primary_profile.as_u8()))?;
            pw.put_n(8, u32::from(self.additional_profile.as_u8()))?;
            Ok(())
        })
    }

    pub fn read(header: ObuHeader, r: &mut BsIoSliceReader) -> Result<Self> {
        let ia_code: u32 = r.get_n(32)?;
        if ia_code != IA_CODE {
            bail!(SequenceHeaderError::InvalidIaCode(ia_code));
        }

        let primary_profile = ProfileVersion::from_u8(r.get_n(8)?);
        let additional_profile = ProfileVersion::from_u8(r.get_n(8)?);

        Ok(Self {
            header,
            primary_profile,
            additional_profile,
        })
    }
}
