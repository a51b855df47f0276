//! Parameter definitions.
//!
//! A parameter definition binds a parameter id to its rate and subblock
//! timing, plus per-type defaults. Demixing and recon gain definitions are
//! restricted to mode 0 with a single implicit subblock. Positional
//! definitions clamp their defaults to the representable ranges. Unknown
//! types are preserved as opaque extension bytes.

use anyhow::{Result, bail};

use crate::structs::parameter_block::DemixingInfoParameterData;
use crate::utils::bitstream_io::{BitstreamIoWriter, BsIoSliceReader};
use crate::utils::errors::ParamError;
use crate::utils::numeric::add_u32_checked;

pub const PARAMETER_DEFINITION_MIX_GAIN: u32 = 0;
pub const PARAMETER_DEFINITION_DEMIXING: u32 = 1;
pub const PARAMETER_DEFINITION_RECON_GAIN: u32 = 2;
pub const PARAMETER_DEFINITION_POLAR: u32 = 3;
pub const PARAMETER_DEFINITION_CART8: u32 = 4;
pub const PARAMETER_DEFINITION_CART16: u32 = 5;
pub const PARAMETER_DEFINITION_DUAL_POLAR: u32 = 6;
pub const PARAMETER_DEFINITION_DUAL_CART8: u32 = 7;
pub const PARAMETER_DEFINITION_DUAL_CART16: u32 = 8;

/// Fields common to every parameter definition.
///
/// When `param_definition_mode == 0` the definition carries the timing of
/// every parameter block referencing it; otherwise each block carries its
/// own.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamDefinition {
    pub parameter_id: u32,
    pub parameter_rate: u32,
    pub param_definition_mode: u8,
    pub reserved: u8,

    // Only meaningful when `param_definition_mode == 0`.
    pub duration: u32,
    pub constant_subblock_duration: u32,
    pub num_subblocks: u32,
    pub subblock_durations: Vec<u32>,
}

impl ParamDefinition {
    pub fn include_subblock_duration_array(&self) -> bool {
        self.param_definition_mode == 0 && self.constant_subblock_duration == 0
    }

    pub fn validate(&self) -> Result<()> {
        if self.parameter_rate == 0 {
            bail!(ParamError::ZeroParameterRate(self.parameter_id));
        }

        if self.param_definition_mode == 0 {
            if self.duration == 0 {
                bail!(ParamError::ZeroDuration(self.parameter_id));
            }
            if self.constant_subblock_duration > self.duration {
                bail!(ParamError::ConstantSubblockTooLong {
                    id: self.parameter_id,
                    csd: self.constant_subblock_duration,
                    duration: self.duration,
                });
            }

            if self.include_subblock_duration_array() {
                if self.subblock_durations.len() as u64 != u64::from(self.num_subblocks) {
                    bail!(ParamError::SubblockCountMismatch {
                        expected: self.num_subblocks,
                        actual: self.subblock_durations.len(),
                    });
                }

                let mut total: u32 = 0;
                for (i, duration) in self.subblock_durations.iter().enumerate() {
                    if *duration == 0 {
                        bail!(ParamError::ZeroSubblockDuration(i));
                    }
                    total = add_u32_checked(total, *duration)?;
                }
                if total != self.duration {
                    bail!(ParamError::SubblockSumMismatch {
                        expected: self.duration,
                        actual: total,
                    });
                }
            }
        }
        Ok(())
    }

    pub fn write(&self, w: &mut BitstreamIoWriter) -> Result<()> {
        self.validate()?;

        w.put_uleb128(self.parameter_id)?;
        w.put_uleb128(self.parameter_rate)?;
        w.put_n(1, u32::from(self.param_definition_mode))?;
        w.put_n(7, u32::from(self.reserved))?;
        if self.param_definition_mode != 0 {
            return Ok(());
        }

        w.put_uleb128(self.duration)?;
        w.put_uleb128(self.constant_subblock_duration)?;
        if self.constant_subblock_duration != 0 {
            return Ok(());
        }

        w.put_uleb128(self.num_subblocks)?;
        for subblock_duration in &self.subblock_durations {
            w.put_uleb128(*subblock_duration)?;
        }
        Ok(())
    }

    pub fn read(r: &mut BsIoSliceReader) -> Result<Self> {
        let mut definition = Self {
            parameter_id: r.get_uleb128()?,
            parameter_rate: r.get_uleb128()?,
            param_definition_mode: r.get_n(1)?,
            reserved: r.get_n(7)?,
            ..Default::default()
        };

        if definition.param_definition_mode == 0 {
            definition.duration = r.get_uleb128()?;
            definition.constant_subblock_duration = r.get_uleb128()?;
            if definition.constant_subblock_duration == 0 {
                definition.num_subblocks = r.get_uleb128()?;
                for _ in 0..definition.num_subblocks {
                    definition.subblock_durations.push(r.get_uleb128()?);
                }
            }
        }

        definition.validate()?;
        Ok(definition)
    }

    /// The single-implicit-subblock restriction shared by demixing and recon
    /// gain definitions.
    fn validate_single_subblock(&self) -> Result<()> {
        if self.param_definition_mode != 0
            || self.duration == 0
            || self.duration != self.constant_subblock_duration
        {
            bail!(ParamError::SingleSubblockRequired(self.parameter_id));
        }
        Ok(())
    }
}

/// Default polar position: 9-bit signed azimuth, 8-bit signed elevation and
/// 7-bit unsigned distance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PolarPosition {
    pub azimuth: i16,
    pub elevation: i8,
    pub distance: u8,
}

impl PolarPosition {
    pub fn write(&self, w: &mut BitstreamIoWriter) -> Result<()> {
        w.put_s(9, i32::from(self.azimuth.clamp(-180, 180)))?;
        w.put_s(8, i32::from(self.elevation.clamp(-90, 90)))?;
        w.put_n(7, u32::from(self.distance))?;
        Ok(())
    }

    pub fn read(r: &mut BsIoSliceReader) -> Result<Self> {
        let azimuth: i16 = r.get_s(9)?;
        let elevation: i8 = r.get_s(8)?;
        let distance: u8 = r.get_n(7)?;
        Ok(Self {
            azimuth: azimuth.clamp(-180, 180),
            elevation: elevation.clamp(-90, 90),
            distance,
        })
    }
}

/// Default Cartesian position in signed 8-bit components.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CartPosition8 {
    pub x: i8,
    pub y: i8,
    pub z: i8,
}

impl CartPosition8 {
    pub fn write(&self, w: &mut BitstreamIoWriter) -> Result<()> {
        for component in [self.x, self.y, self.z] {
            w.put_s(8, i32::from(component))?;
        }
        Ok(())
    }

    pub fn read(r: &mut BsIoSliceReader) -> Result<Self> {
        Ok(Self {
            x: r.get_s(8)?,
            y: r.get_s(8)?,
            z: r.get_s(8)?,
        })
    }
}

/// Default Cartesian position in signed 16-bit components.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CartPosition16 {
    pub x: i16,
    pub y: i16,
    pub z: i16,
}

impl CartPosition16 {
    pub fn write(&self, w: &mut BitstreamIoWriter) -> Result<()> {
        for component in [self.x, self.y, self.z] {
            w.put_s(16, i32::from(component))?;
        }
        Ok(())
    }

    pub fn read(r: &mut BsIoSliceReader) -> Result<Self> {
        Ok(Self {
            x: r.get_s(16)?,
            y: r.get_s(16)?,
            z: r.get_s(16)?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MixGainParamDefinition {
    pub base: ParamDefinition,
    /// Q7.8 gain applied when no parameter block covers a timestamp.
    pub default_mix_gain: i16,
}

impl MixGainParamDefinition {
    pub fn write(&self, w: &mut BitstreamIoWriter) -> Result<()> {
        self.base.write(w)?;
        w.put_s(16, i32::from(self.default_mix_gain))?;
        Ok(())
    }

    pub fn read(r: &mut BsIoSliceReader) -> Result<Self> {
        Ok(Self {
            base: ParamDefinition::read(r)?,
            default_mix_gain: r.get_s(16)?,
        })
    }
}

/// Default demixing info carried by the audio element: the runtime fields
/// plus a 4-bit `default_w` seed and 4 reserved bits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DefaultDemixingInfo {
    pub demixing_info: DemixingInfoParameterData,
    pub default_w: u8,
    pub reserved_default: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DemixingParamDefinition {
    pub base: ParamDefinition,
    pub default_demixing_info: DefaultDemixingInfo,
}

impl DemixingParamDefinition {
    pub fn write(&self, w: &mut BitstreamIoWriter) -> Result<()> {
        self.base.write(w)?;
        self.default_demixing_info.demixing_info.write(w)?;
        w.put_n(4, u32::from(self.default_demixing_info.default_w))?;
        w.put_n(4, u32::from(self.default_demixing_info.reserved_default))?;
        self.base.validate_single_subblock()
    }

    pub fn read(r: &mut BsIoSliceReader) -> Result<Self> {
        let base = ParamDefinition::read(r)?;
        let demixing_info = DemixingInfoParameterData::read(r)?;
        let default_w = r.get_n(4)?;
        let reserved_default = r.get_n(4)?;

        base.validate_single_subblock()?;
        Ok(Self {
            base,
            default_demixing_info: DefaultDemixingInfo {
                demixing_info,
                default_w,
                reserved_default,
            },
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconGainParamDefinition {
    pub base: ParamDefinition,
}

impl ReconGainParamDefinition {
    pub fn write(&self, w: &mut BitstreamIoWriter) -> Result<()> {
        self.base.write(w)?;
        self.base.validate_single_subblock()
    }

    pub fn read(r: &mut BsIoSliceReader) -> Result<Self> {
        let base = ParamDefinition::read(r)?;
        base.validate_single_subblock()?;
        Ok(Self { base })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolarParamDefinition {
    pub base: ParamDefinition,
    pub default_position: PolarPosition,
}

impl PolarParamDefinition {
    pub fn write(&self, w: &mut BitstreamIoWriter) -> Result<()> {
        self.base.write(w)?;
        self.default_position.write(w)
    }

    pub fn read(r: &mut BsIoSliceReader) -> Result<Self> {
        Ok(Self {
            base: ParamDefinition::read(r)?,
            default_position: PolarPosition::read(r)?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cart8ParamDefinition {
    pub base: ParamDefinition,
    pub default_position: CartPosition8,
}

impl Cart8ParamDefinition {
    pub fn write(&self, w: &mut BitstreamIoWriter) -> Result<()> {
        self.base.write(w)?;
        self.default_position.write(w)
    }

    pub fn read(r: &mut BsIoSliceReader) -> Result<Self> {
        Ok(Self {
            base: ParamDefinition::read(r)?,
            default_position: CartPosition8::read(r)?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cart16ParamDefinition {
    pub base: ParamDefinition,
    pub default_position: CartPosition16,
}

impl Cart16ParamDefinition {
    pub fn write(&self, w: &mut BitstreamIoWriter) -> Result<()> {
        self.base.write(w)?;
        self.default_position.write(w)
    }

    pub fn read(r: &mut BsIoSliceReader) -> Result<Self> {
        Ok(Self {
            base: ParamDefinition::read(r)?,
            default_position: CartPosition16::read(r)?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DualPolarParamDefinition {
    pub base: ParamDefinition,
    pub default_first: PolarPosition,
    pub default_second: PolarPosition,
}

impl DualPolarParamDefinition {
    pub fn write(&self, w: &mut BitstreamIoWriter) -> Result<()> {
        self.base.write(w)?;
        self.default_first.write(w)?;
        self.default_second.write(w)
    }

    pub fn read(r: &mut BsIoSliceReader) -> Result<Self> {
        Ok(Self {
            base: ParamDefinition::read(r)?,
            default_first: PolarPosition::read(r)?,
            default_second: PolarPosition::read(r)?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DualCart8ParamDefinition {
    pub base: ParamDefinition,
    pub default_first: CartPosition8,
    pub default_second: CartPosition8,
}

impl DualCart8ParamDefinition {
    pub fn write(&self, w: &mut BitstreamIoWriter) -> Result<()> {
        self.base.write(w)?;
        self.default_first.write(w)?;
        self.default_second.write(w)
    }

    pub fn read(r: &mut BsIoSliceReader) -> Result<Self> {
        Ok(Self {
            base: ParamDefinition::read(r)?,
            default_first: CartPosition8::read(r)?,
            default_second: CartPosition8::read(r)?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DualCart16ParamDefinition {
    pub base: ParamDefinition,
    pub default_first: CartPosition16,
    pub default_second: CartPosition16,
}

impl DualCart16ParamDefinition {
    pub fn write(&self, w: &mut BitstreamIoWriter) -> Result<()> {
        self.base.write(w)?;
        self.default_first.write(w)?;
        self.default_second.write(w)
    }

    pub fn read(r: &mut BsIoSliceReader) -> Result<Self> {
        Ok(Self {
            base: ParamDefinition::read(r)?,
            default_first: CartPosition16::read(r)?,
            default_second: CartPosition16::read(r)?,
        })
    }
}

/// An unknown parameter definition, preserved as its declared bytes. It does
/// not carry the common base fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtendedParamDefinition {
    pub param_definition_type: u32,
    pub param_definition_bytes: Vec<u8>,
}

impl ExtendedParamDefinition {
    pub fn write(&self, w: &mut BitstreamIoWriter) -> Result<()> {
        w.put_uleb128(self.param_definition_bytes.len() as u32)?;
        w.put_bytes(&self.param_definition_bytes)
    }

    pub fn read(param_definition_type: u32, r: &mut BsIoSliceReader) -> Result<Self> {
        let param_definition_size = r.get_uleb128()?;
        Ok(Self {
            param_definition_type,
            param_definition_bytes: r.get_vec(param_definition_size as usize)?,
        })
    }
}

/// Every parameter definition variant, dispatchable on the serialized type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamDefinitionVariant {
    MixGain(MixGainParamDefinition),
    Demixing(DemixingParamDefinition),
    ReconGain(ReconGainParamDefinition),
    Polar(PolarParamDefinition),
    Cart8(Cart8ParamDefinition),
    Cart16(Cart16ParamDefinition),
    DualPolar(DualPolarParamDefinition),
    DualCart8(DualCart8ParamDefinition),
    DualCart16(DualCart16ParamDefinition),
    Extended(ExtendedParamDefinition),
}

impl ParamDefinitionVariant {
    pub fn param_definition_type(&self) -> u32 {
        match self {
            Self::MixGain(_) => PARAMETER_DEFINITION_MIX_GAIN,
            Self::Demixing(_) => PARAMETER_DEFINITION_DEMIXING,
            Self::ReconGain(_) => PARAMETER_DEFINITION_RECON_GAIN,
            Self::Polar(_) => PARAMETER_DEFINITION_POLAR,
            Self::Cart8(_) => PARAMETER_DEFINITION_CART8,
            Self::Cart16(_) => PARAMETER_DEFINITION_CART16,
            Self::DualPolar(_) => PARAMETER_DEFINITION_DUAL_POLAR,
            Self::DualCart8(_) => PARAMETER_DEFINITION_DUAL_CART8,
            Self::DualCart16(_) => PARAMETER_DEFINITION_DUAL_CART16,
            Self::Extended(extended) => extended.param_definition_type,
        }
    }

    /// The common base fields, absent for extension definitions.
    pub fn base(&self) -> Option<&ParamDefinition> {
        match self {
            Self::MixGain(d) => Some(&d.base),
            Self::Demixing(d) => Some(&d.base),
            Self::ReconGain(d) => Some(&d.base),
            Self::Polar(d) => Some(&d.base),
            Self::Cart8(d) => Some(&d.base),
            Self::Cart16(d) => Some(&d.base),
            Self::DualPolar(d) => Some(&d.base),
            Self::DualCart8(d) => Some(&d.base),
            Self::DualCart16(d) => Some(&d.base),
            Self::Extended(_) => None,
        }
    }

    /// Writes the type-specific body; the caller has already written the type
    /// tag in whichever width its OBU uses.
    pub fn write(&self, w: &mut BitstreamIoWriter) -> Result<()> {
        match self {
            Self::MixGain(d) => d.write(w),
            Self::Demixing(d) => d.write(w),
            Self::ReconGain(d) => d.write(w),
            Self::Polar(d) => d.write(w),
            Self::Cart8(d) => d.write(w),
            Self::Cart16(d) => d.write(w),
            Self::DualPolar(d) => d.write(w),
            Self::DualCart8(d) => d.write(w),
            Self::DualCart16(d) => d.write(w),
            Self::Extended(d) => d.write(w),
        }
    }

    /// Reads the body matching an already-consumed type tag. Unknown types
    /// consume their declared size and are preserved as extension bytes.
    pub fn read_for_type(param_definition_type: u32, r: &mut BsIoSliceReader) -> Result<Self> {
        Ok(match param_definition_type {
            PARAMETER_DEFINITION_MIX_GAIN => Self::MixGain(MixGainParamDefinition::read(r)?),
            PARAMETER_DEFINITION_DEMIXING => Self::Demixing(DemixingParamDefinition::read(r)?),
            PARAMETER_DEFINITION_RECON_GAIN => Self::ReconGain(ReconGainParamDefinition::read(r)?),
            PARAMETER_DEFINITION_POLAR => Self::Polar(PolarParamDefinition::read(r)?),
            PARAMETER_DEFINITION_CART8 => Self::Cart8(Cart8ParamDefinition::read(r)?),
            PARAMETER_DEFINITION_CART16 => Self::Cart16(Cart16ParamDefinition::read(r)?),
            PARAMETER_DEFINITION_DUAL_POLAR => {
                Self::DualPolar(DualPolarParamDefinition::read(r)?)
            }
            PARAMETER_DEFINITION_DUAL_CART8 => {
                Self::DualCart8(DualCart8ParamDefinition::read(r)?)
            }
            PARAMETER_DEFINITION_DUAL_CART16 => {
                Self::DualCart16(DualCart16ParamDefinition::read(r)?)
            }
            _ => Self::Extended(ExtendedParamDefinition::read(param_definition_type, r)?),
        })
    }
}
