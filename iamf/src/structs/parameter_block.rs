//! Parameter Block OBU and its runtime parameter data.
//!
//! A parameter block references a parameter definition by id. The timing
//! fields live in the block itself when the definition uses
//! `param_definition_mode == 1` and in the definition otherwise, so both
//! serialization and interpolation take the per-id metadata resolved from
//! the descriptors.

use std::collections::BTreeMap;

use anyhow::{Result, bail};

use crate::structs::header::{ObuHeader, ObuType, write_obu};
use crate::structs::param_definition::{
    CartPosition8, CartPosition16, PARAMETER_DEFINITION_CART8, PARAMETER_DEFINITION_CART16,
    PARAMETER_DEFINITION_DEMIXING, PARAMETER_DEFINITION_DUAL_CART8,
    PARAMETER_DEFINITION_DUAL_CART16, PARAMETER_DEFINITION_DUAL_POLAR,
    PARAMETER_DEFINITION_MIX_GAIN, PARAMETER_DEFINITION_POLAR, PARAMETER_DEFINITION_RECON_GAIN,
    ParamDefinition, PolarPosition,
};
use crate::utils::bitstream_io::{BitstreamIoWriter, BsIoSliceReader};
use crate::utils::errors::ParamError;
use crate::utils::numeric::{q0_8_to_float, q7_8_to_float};

/// The 12 canonical channels a recon gain bitmask may name, in bit order.
pub const RECON_GAIN_CHANNELS: [&str; 12] = [
    "L", "C", "R", "Lss", "Rss", "Ltf", "Rtf", "Lrs", "Rrs", "Ltb", "Rtb", "LFE",
];

/// 3-bit demixing mode. Six values select down-mix parameter presets; 3 and
/// 7 are reserved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DMixPMode {
    #[default]
    Mode1,
    Mode2,
    Mode3,
    Mode1N,
    Mode2N,
    Mode3N,
}

impl DMixPMode {
    pub fn from_u3(value: u8) -> Result<Self> {
        Ok(match value {
            0 => Self::Mode1,
            1 => Self::Mode2,
            2 => Self::Mode3,
            4 => Self::Mode1N,
            5 => Self::Mode2N,
            6 => Self::Mode3N,
            v => bail!(ParamError::ReservedDmixPMode(v)),
        })
    }

    pub fn as_u3(self) -> u8 {
        match self {
            Self::Mode1 => 0,
            Self::Mode2 => 1,
            Self::Mode3 => 2,
            Self::Mode1N => 4,
            Self::Mode2N => 5,
            Self::Mode3N => 6,
        }
    }

    fn preset(self) -> (f64, f64, f64, f64, i32) {
        match self {
            Self::Mode1 => (1.0, 1.0, 0.707, 0.707, -1),
            Self::Mode2 => (0.707, 0.707, 0.707, 0.707, -1),
            Self::Mode3 => (1.0, 0.866, 0.866, 0.866, -1),
            Self::Mode1N => (1.0, 1.0, 0.707, 0.707, 1),
            Self::Mode2N => (0.707, 0.707, 0.707, 0.707, 1),
            Self::Mode3N => (1.0, 0.866, 0.866, 0.866, 1),
        }
    }
}

/// Fixed `w_idx` to `w` lookup.
const W_IDX_TO_W: [f64; 11] = [
    0.0, 0.0179, 0.0391, 0.0658, 0.1038, 0.25, 0.3962, 0.4342, 0.4609, 0.4821, 0.5,
];

/// How the running `w_idx` is updated for a temporal unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WIdxUpdateRule {
    /// `w_idx(k) = clamp(w_idx(k-1) + w_idx_offset(k), 0, 10)`.
    Normal,
    /// The first temporal unit always uses `w_idx = 0`.
    FirstFrame,
    /// No parameter block covered this temporal unit; the audio element's
    /// `default_w` passes through unchanged.
    Default,
}

/// Down-mix parameters resolved from a `dmixp_mode` and the running `w_idx`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DownMixingParams {
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
    pub delta: f64,
    pub w_idx_offset: i32,
    pub w_idx_used: i32,
    pub w: f64,
    pub in_bitstream: bool,
}

/// Demixing info carried per parameter subblock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DemixingInfoParameterData {
    pub dmixp_mode: DMixPMode,
    pub reserved: u8,
}

impl DemixingInfoParameterData {
    pub fn write(&self, w: &mut BitstreamIoWriter) -> Result<()> {
        w.put_n(3, u32::from(self.dmixp_mode.as_u3()))?;
        w.put_n(5, u32::from(self.reserved))?;
        Ok(())
    }

    pub fn read(r: &mut BsIoSliceReader) -> Result<Self> {
        let dmixp_mode = DMixPMode::from_u3(r.get_n(3)?)?;
        let reserved = r.get_n(5)?;
        Ok(Self {
            dmixp_mode,
            reserved,
        })
    }

    /// Resolves the down-mix parameters for one temporal unit, advancing the
    /// running `w_idx` according to `rule`.
    pub fn down_mixing_params(
        dmixp_mode: DMixPMode,
        previous_w_idx: i32,
        rule: WIdxUpdateRule,
    ) -> Result<DownMixingParams> {
        let (alpha, beta, gamma, delta, w_idx_offset) = dmixp_mode.preset();

        let w_idx = match rule {
            WIdxUpdateRule::Normal => (previous_w_idx + w_idx_offset).clamp(0, 10),
            WIdxUpdateRule::FirstFrame => 0,
            WIdxUpdateRule::Default => previous_w_idx,
        };
        let Some(w) = usize::try_from(w_idx).ok().and_then(|i| W_IDX_TO_W.get(i)) else {
            bail!(ParamError::UnknownWIdx(w_idx));
        };

        Ok(DownMixingParams {
            alpha,
            beta,
            gamma,
            delta,
            w_idx_offset,
            w_idx_used: w_idx,
            w: *w,
            in_bitstream: true,
        })
    }
}

/// Mix gain animation over one subblock. All point values are Q7.8.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MixGainParameterData {
    Step {
        start_point_value: i16,
    },
    Linear {
        start_point_value: i16,
        end_point_value: i16,
    },
    Bezier {
        start_point_value: i16,
        end_point_value: i16,
        control_point_value: i16,
        /// Q0.8 relative time of the control point.
        control_point_relative_time: u8,
    },
}

const ANIMATE_STEP: u32 = 0;
const ANIMATE_LINEAR: u32 = 1;
const ANIMATE_BEZIER: u32 = 2;

impl MixGainParameterData {
    pub fn write(&self, w: &mut BitstreamIoWriter) -> Result<()> {
        match self {
            Self::Step { start_point_value } => {
                w.put_uleb128(ANIMATE_STEP)?;
                w.put_s(16, i32::from(*start_point_value))?;
            }
            Self::Linear {
                start_point_value,
                end_point_value,
            } => {
                w.put_uleb128(ANIMATE_LINEAR)?;
                w.put_s(16, i32::from(*start_point_value))?;
                w.put_s(16, i32::from(*end_point_value))?;
            }
            Self::Bezier {
                start_point_value,
                end_point_value,
                control_point_value,
                control_point_relative_time,
            } => {
                w.put_uleb128(ANIMATE_BEZIER)?;
                w.put_s(16, i32::from(*start_point_value))?;
                w.put_s(16, i32::from(*end_point_value))?;
                w.put_s(16, i32::from(*control_point_value))?;
                w.put_n(8, u32::from(*control_point_relative_time))?;
            }
        }
        Ok(())
    }

    pub fn read(r: &mut BsIoSliceReader) -> Result<Self> {
        let animation_type = r.get_uleb128()?;
        Ok(match animation_type {
            ANIMATE_STEP => Self::Step {
                start_point_value: r.get_s(16)?,
            },
            ANIMATE_LINEAR => Self::Linear {
                start_point_value: r.get_s(16)?,
                end_point_value: r.get_s(16)?,
            },
            ANIMATE_BEZIER => Self::Bezier {
                start_point_value: r.get_s(16)?,
                end_point_value: r.get_s(16)?,
                control_point_value: r.get_s(16)?,
                control_point_relative_time: r.get_n(8)?,
            },
            v => bail!(ParamError::UnknownAnimationType(v)),
        })
    }

    /// Interpolates the gain in dB at `target_time` within a subblock
    /// spanning `[start_time, end_time]`.
    pub fn interpolate(&self, start_time: i64, end_time: i64, target_time: i64) -> Result<f32> {
        if target_time < start_time || target_time > end_time || start_time > end_time {
            bail!(ParamError::InterpolationOutOfRange {
                start: start_time,
                end: end_time,
                target: target_time,
            });
        }

        // Shift times so the subblock starts at zero.
        let n_0 = 0i64;
        let n = target_time - start_time;
        let n_2 = end_time - start_time;

        Ok(match self {
            Self::Step { start_point_value } => q7_8_to_float(*start_point_value),
            Self::Linear {
                start_point_value,
                end_point_value,
            } => {
                let a = n as f32 / n_2 as f32;
                let p_0 = q7_8_to_float(*start_point_value);
                let p_2 = q7_8_to_float(*end_point_value);
                (1.0 - a) * p_0 + a * p_2
            }
            Self::Bezier {
                start_point_value,
                end_point_value,
                control_point_value,
                control_point_relative_time,
            } => {
                let control_point_float = q0_8_to_float(*control_point_relative_time);
                // `round` as IAMF defines it: floor(x + 0.5).
                let n_1 = (n_2 as f32 * control_point_float + 0.5).floor();

                let p_0 = q7_8_to_float(*start_point_value);
                let p_1 = q7_8_to_float(*control_point_value);
                let p_2 = q7_8_to_float(*end_point_value);

                let alpha = (n_0 - 2 * n_1 as i64 + n_2) as f32;
                let beta = (2 * (n_1 as i64 - n_0)) as f32;
                let gamma = (n_0 - n) as f32;
                let a = if alpha == 0.0 {
                    -gamma / beta
                } else {
                    (-beta + (beta * beta - 4.0 * alpha * gamma).sqrt()) / (2.0 * alpha)
                };
                (1.0 - a) * (1.0 - a) * p_0 + 2.0 * (1.0 - a) * a * p_1 + a * a * p_2
            }
        })
    }
}

/// One layer's recon gains: a bitmask of the canonical channels plus one
/// byte per present channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconGainElement {
    pub recon_gain_flag: u32,
    pub recon_gain: [u8; 12],
}

impl ReconGainElement {
    fn validate_mask(mask: u32) -> Result<()> {
        if mask >> RECON_GAIN_CHANNELS.len() != 0 {
            bail!(ParamError::ReconGainMaskOverflow(mask));
        }
        Ok(())
    }

    pub fn write(&self, w: &mut BitstreamIoWriter) -> Result<()> {
        Self::validate_mask(self.recon_gain_flag)?;
        w.put_uleb128(self.recon_gain_flag)?;
        for (channel, gain) in self.recon_gain.iter().enumerate() {
            if self.recon_gain_flag & (1 << channel) != 0 {
                w.put_n(8, u32::from(*gain))?;
            }
        }
        Ok(())
    }

    pub fn read(r: &mut BsIoSliceReader) -> Result<Self> {
        let recon_gain_flag = r.get_uleb128()?;
        Self::validate_mask(recon_gain_flag)?;
        let mut recon_gain = [0u8; 12];
        for (channel, gain) in recon_gain.iter_mut().enumerate() {
            if recon_gain_flag & (1 << channel) != 0 {
                *gain = r.get_n(8)?;
            }
        }
        Ok(Self {
            recon_gain_flag,
            recon_gain,
        })
    }
}

/// Recon gains for every layer of the owning audio element. Layers whose
/// `recon_gain_is_present_flag` is unset carry no element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconGainInfoParameterData {
    pub recon_gain_elements: Vec<Option<ReconGainElement>>,
}

impl ReconGainInfoParameterData {
    pub fn write(&self, recon_gain_is_present_flags: &[bool], w: &mut BitstreamIoWriter) -> Result<()> {
        if self.recon_gain_elements.len() != recon_gain_is_present_flags.len() {
            bail!(ParamError::ReconGainLayerMismatch {
                expected: recon_gain_is_present_flags.len(),
                actual: self.recon_gain_elements.len(),
            });
        }
        for (element, present) in self
            .recon_gain_elements
            .iter()
            .zip(recon_gain_is_present_flags)
        {
            match (element, present) {
                (Some(element), true) => element.write(w)?,
                (None, false) => {}
                _ => bail!(ParamError::ReconGainLayerMismatch {
                    expected: recon_gain_is_present_flags.len(),
                    actual: self.recon_gain_elements.len(),
                }),
            }
        }
        Ok(())
    }

    pub fn read(recon_gain_is_present_flags: &[bool], r: &mut BsIoSliceReader) -> Result<Self> {
        let mut recon_gain_elements = Vec::with_capacity(recon_gain_is_present_flags.len());
        for present in recon_gain_is_present_flags {
            recon_gain_elements.push(if *present {
                Some(ReconGainElement::read(r)?)
            } else {
                None
            });
        }
        Ok(Self {
            recon_gain_elements,
        })
    }
}

/// Opaque payload of an extension parameter type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionParameterData {
    pub parameter_data_bytes: Vec<u8>,
}

impl ExtensionParameterData {
    pub fn write(&self, w: &mut BitstreamIoWriter) -> Result<()> {
        w.put_uleb128(self.parameter_data_bytes.len() as u32)?;
        w.put_bytes(&self.parameter_data_bytes)
    }

    pub fn read(r: &mut BsIoSliceReader) -> Result<Self> {
        let parameter_data_size = r.get_uleb128()?;
        Ok(Self {
            parameter_data_bytes: r.get_vec(parameter_data_size as usize)?,
        })
    }
}

/// Per-subblock payload; the active arm is fixed by the parameter's type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParameterData {
    MixGain(MixGainParameterData),
    Demixing(DemixingInfoParameterData),
    ReconGain(ReconGainInfoParameterData),
    Polar(PolarPosition),
    Cart8(CartPosition8),
    Cart16(CartPosition16),
    DualPolar {
        first: PolarPosition,
        second: PolarPosition,
    },
    DualCart8 {
        first: CartPosition8,
        second: CartPosition8,
    },
    DualCart16 {
        first: CartPosition16,
        second: CartPosition16,
    },
    Extension(ExtensionParameterData),
}

impl ParameterData {
    fn matches_type(&self, param_definition_type: u32) -> bool {
        match self {
            Self::MixGain(_) => param_definition_type == PARAMETER_DEFINITION_MIX_GAIN,
            Self::Demixing(_) => param_definition_type == PARAMETER_DEFINITION_DEMIXING,
            Self::ReconGain(_) => param_definition_type == PARAMETER_DEFINITION_RECON_GAIN,
            Self::Polar(_) => param_definition_type == PARAMETER_DEFINITION_POLAR,
            Self::Cart8(_) => param_definition_type == PARAMETER_DEFINITION_CART8,
            Self::Cart16(_) => param_definition_type == PARAMETER_DEFINITION_CART16,
            Self::DualPolar { .. } => param_definition_type == PARAMETER_DEFINITION_DUAL_POLAR,
            Self::DualCart8 { .. } => param_definition_type == PARAMETER_DEFINITION_DUAL_CART8,
            Self::DualCart16 { .. } => param_definition_type == PARAMETER_DEFINITION_DUAL_CART16,
            Self::Extension(_) => param_definition_type > PARAMETER_DEFINITION_DUAL_CART16,
        }
    }

    fn write(&self, metadata: &PerIdParameterMetadata, w: &mut BitstreamIoWriter) -> Result<()> {
        match self {
            Self::MixGain(data) => data.write(w),
            Self::Demixing(data) => data.write(w),
            Self::ReconGain(data) => data.write(&metadata.recon_gain_is_present_flags, w),
            Self::Polar(data) => data.write(w),
            Self::Cart8(data) => data.write(w),
            Self::Cart16(data) => data.write(w),
            Self::DualPolar { first, second } => {
                first.write(w)?;
                second.write(w)
            }
            Self::DualCart8 { first, second } => {
                first.write(w)?;
                second.write(w)
            }
            Self::DualCart16 { first, second } => {
                first.write(w)?;
                second.write(w)
            }
            Self::Extension(data) => data.write(w),
        }
    }

    fn read(metadata: &PerIdParameterMetadata, r: &mut BsIoSliceReader) -> Result<Self> {
        Ok(match metadata.param_definition_type {
            PARAMETER_DEFINITION_MIX_GAIN => Self::MixGain(MixGainParameterData::read(r)?),
            PARAMETER_DEFINITION_DEMIXING => Self::Demixing(DemixingInfoParameterData::read(r)?),
            PARAMETER_DEFINITION_RECON_GAIN => Self::ReconGain(ReconGainInfoParameterData::read(
                &metadata.recon_gain_is_present_flags,
                r,
            )?),
            PARAMETER_DEFINITION_POLAR => Self::Polar(PolarPosition::read(r)?),
            PARAMETER_DEFINITION_CART8 => Self::Cart8(CartPosition8::read(r)?),
            PARAMETER_DEFINITION_CART16 => Self::Cart16(CartPosition16::read(r)?),
            PARAMETER_DEFINITION_DUAL_POLAR => Self::DualPolar {
                first: PolarPosition::read(r)?,
                second: PolarPosition::read(r)?,
            },
            PARAMETER_DEFINITION_DUAL_CART8 => Self::DualCart8 {
                first: CartPosition8::read(r)?,
                second: CartPosition8::read(r)?,
            },
            PARAMETER_DEFINITION_DUAL_CART16 => Self::DualCart16 {
                first: CartPosition16::read(r)?,
                second: CartPosition16::read(r)?,
            },
            _ => Self::Extension(ExtensionParameterData::read(r)?),
        })
    }
}

/// Everything the codec needs to serialize or parse parameter blocks for one
/// parameter id: the definition's type and timing, plus the owning audio
/// element's per-layer recon gain flags for recon gain parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PerIdParameterMetadata {
    pub param_definition_type: u32,
    pub param_definition: ParamDefinition,
    pub recon_gain_is_present_flags: Vec<bool>,
}

pub type ParameterMetadataMap = BTreeMap<u32, PerIdParameterMetadata>;

/// Resolves the duration of subblock `subblock_index` from the shared
/// context: explicit per-subblock durations when `constant_subblock_duration`
/// is zero, the constant otherwise, with the final subblock shortened when
/// the constant does not divide the total duration.
pub fn subblock_duration(
    subblock_index: u32,
    num_subblocks: u32,
    constant_subblock_duration: u32,
    total_duration: u32,
    explicit_duration: impl Fn(u32) -> Option<u32>,
) -> Result<u32> {
    if subblock_index >= num_subblocks {
        bail!(ParamError::SubblockIndexOutOfRange {
            index: subblock_index,
            num_subblocks,
        });
    }

    if constant_subblock_duration == 0 {
        return explicit_duration(subblock_index).ok_or_else(|| {
            ParamError::SubblockIndexOutOfRange {
                index: subblock_index,
                num_subblocks,
            }
            .into()
        });
    }

    if subblock_index == num_subblocks - 1
        && u64::from(num_subblocks) * u64::from(constant_subblock_duration)
            > u64::from(total_duration)
    {
        // IAMF: "If NS x CSD > D, the actual duration of the last subblock
        // SHALL be D - (NS - 1) x CSD."
        Ok(total_duration - (num_subblocks - 1) * constant_subblock_duration)
    } else {
        Ok(constant_subblock_duration)
    }
}

/// An element of the Parameter Block OBU's `subblocks` vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSubblock {
    /// Serialized only when the definition has mode 1 and the block's
    /// `constant_subblock_duration` is zero.
    pub subblock_duration: u32,
    pub param_data: ParameterData,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterBlockObu {
    pub header: ObuHeader,
    pub parameter_id: u32,

    // Carried in the OBU only when the definition has mode 1; inherited from
    // the definition otherwise.
    pub duration: u32,
    pub constant_subblock_duration: u32,
    pub num_subblocks: u32,

    pub subblocks: Vec<ParameterSubblock>,
}

impl ParameterBlockObu {
    /// Effective total duration, honoring `param_definition_mode`.
    pub fn duration(&self, metadata: &PerIdParameterMetadata) -> u32 {
        if metadata.param_definition.param_definition_mode == 0 {
            metadata.param_definition.duration
        } else {
            self.duration
        }
    }

    pub fn constant_subblock_duration(&self, metadata: &PerIdParameterMetadata) -> u32 {
        if metadata.param_definition.param_definition_mode == 0 {
            metadata.param_definition.constant_subblock_duration
        } else {
            self.constant_subblock_duration
        }
    }

    pub fn num_subblocks(&self, metadata: &PerIdParameterMetadata) -> u32 {
        let constant_subblock_duration = self.constant_subblock_duration(metadata);
        let duration = self.duration(metadata);
        if constant_subblock_duration != 0 {
            duration.div_ceil(constant_subblock_duration)
        } else if metadata.param_definition.param_definition_mode == 0 {
            metadata.param_definition.num_subblocks
        } else {
            self.num_subblocks
        }
    }

    /// Effective duration of one subblock.
    pub fn subblock_duration(
        &self,
        metadata: &PerIdParameterMetadata,
        subblock_index: u32,
    ) -> Result<u32> {
        subblock_duration(
            subblock_index,
            self.num_subblocks(metadata),
            self.constant_subblock_duration(metadata),
            self.duration(metadata),
            |i| {
                if metadata.param_definition.param_definition_mode == 0 {
                    metadata
                        .param_definition
                        .subblock_durations
                        .get(i as usize)
                        .copied()
                } else {
                    self.subblocks
                        .get(i as usize)
                        .map(|subblock| subblock.subblock_duration)
                }
            },
        )
    }

    /// Interpolated mix gain in dB at a time relative to the block start.
    pub fn mix_gain_at(
        &self,
        metadata: &PerIdParameterMetadata,
        obu_relative_time: i64,
    ) -> Result<f32> {
        let num_subblocks = self.num_subblocks(metadata);
        let mut subblock_start: i64 = 0;
        for i in 0..num_subblocks {
            let duration = i64::from(self.subblock_duration(metadata, i)?);
            let subblock_end = subblock_start + duration;
            let is_last = i == num_subblocks - 1;
            if obu_relative_time < subblock_end || (is_last && obu_relative_time == subblock_end) {
                let Some(ParameterSubblock {
                    param_data: ParameterData::MixGain(mix_gain),
                    ..
                }) = self.subblocks.get(i as usize)
                else {
                    bail!(ParamError::NotAMixGain(self.parameter_id));
                };
                return mix_gain.interpolate(subblock_start, subblock_end, obu_relative_time);
            }
            subblock_start = subblock_end;
        }

        bail!(ParamError::InterpolationOutOfRange {
            start: 0,
            end: subblock_start,
            target: obu_relative_time,
        })
    }

    fn validate(&self, metadata: &PerIdParameterMetadata) -> Result<()> {
        let num_subblocks = self.num_subblocks(metadata);
        if self.subblocks.len() as u64 != u64::from(num_subblocks) {
            bail!(ParamError::SubblockCountMismatch {
                expected: num_subblocks,
                actual: self.subblocks.len(),
            });
        }

        for subblock in &self.subblocks {
            if !subblock
                .param_data
                .matches_type(metadata.param_definition_type)
            {
                bail!(ParamError::DataTypeMismatch(self.parameter_id));
            }
        }

        if metadata.param_definition.param_definition_mode != 0 {
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
            if self.constant_subblock_duration == 0 {
                let mut total: u64 = 0;
                for (i, subblock) in self.subblocks.iter().enumerate() {
                    if subblock.subblock_duration == 0 {
                        bail!(ParamError::ZeroSubblockDuration(i));
                    }
                    total += u64::from(subblock.subblock_duration);
                }
                if total != u64::from(self.duration) {
                    bail!(ParamError::SubblockSumMismatch {
                        expected: self.duration,
                        actual: total as u32,
                    });
                }
            }
        }
        Ok(())
    }

    pub fn write(&self, metadata: &PerIdParameterMetadata, w: &mut BitstreamIoWriter) -> Result<()> {
        self.validate(metadata)?;

        write_obu(ObuType::ParameterBlock, &self.header, w, |pw| {
            pw.put_uleb128(self.parameter_id)?;

            let mode = metadata.param_definition.param_definition_mode;
            if mode == 1 {
                pw.put_uleb128(self.duration)?;
                pw.put_uleb128(self.constant_subblock_duration)?;
                if self.constant_subblock_duration == 0 {
                    pw.put_uleb128(self.num_subblocks)?;
                }
            }

            for subblock in &self.subblocks {
                if mode == 1 && self.constant_subblock_duration == 0 {
                    pw.put_uleb128(subblock.subblock_duration)?;
                }
                subblock.param_data.write(metadata, pw)?;
            }
            Ok(())
        })
    }

    pub fn read(
        header: ObuHeader,
        metadata_map: &ParameterMetadataMap,
        r: &mut BsIoSliceReader,
    ) -> Result<Self> {
        let parameter_id = r.get_uleb128()?;
        let Some(metadata) = metadata_map.get(&parameter_id) else {
            bail!(ParamError::UnknownParameterId(parameter_id));
        };

        let mut obu = Self {
            header,
            parameter_id,
            duration: 0,
            constant_subblock_duration: 0,
            num_subblocks: 0,
            subblocks: Vec::new(),
        };

        let mode = metadata.param_definition.param_definition_mode;
        if mode == 1 {
            obu.duration = r.get_uleb128()?;
            obu.constant_subblock_duration = r.get_uleb128()?;
            if obu.constant_subblock_duration == 0 {
                obu.num_subblocks = r.get_uleb128()?;
            }
        }

        let num_subblocks = obu.num_subblocks(metadata);
        for _ in 0..num_subblocks {
            let subblock_duration = if mode == 1 && obu.constant_subblock_duration == 0 {
                r.get_uleb128()?
            } else {
                0
            };
            let param_data = ParameterData::read(metadata, r)?;
            obu.subblocks.push(ParameterSubblock {
                subblock_duration,
                param_data,
            });
        }

        obu.validate(metadata)?;
        Ok(obu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::param_definition::PARAMETER_DEFINITION_MIX_GAIN;
    use crate::utils::numeric::q7_8_from_float;

    fn mix_gain_metadata(mode: u8) -> PerIdParameterMetadata {
        PerIdParameterMetadata {
            param_definition_type: PARAMETER_DEFINITION_MIX_GAIN,
            param_definition: ParamDefinition {
                parameter_id: 7,
                parameter_rate: 48000,
                param_definition_mode: mode,
                duration: if mode == 0 { 2048 } else { 0 },
                constant_subblock_duration: if mode == 0 { 2048 } else { 0 },
                ..Default::default()
            },
            recon_gain_is_present_flags: vec![],
        }
    }

    fn round_trip(obu: &ParameterBlockObu, metadata: &PerIdParameterMetadata) -> ParameterBlockObu {
        let mut w = BitstreamIoWriter::default();
        obu.write(metadata, &mut w).unwrap();
        let bytes = w.into_bytes().unwrap();

        let mut metadata_map = ParameterMetadataMap::new();
        metadata_map.insert(obu.parameter_id, metadata.clone());

        let mut r = BsIoSliceReader::from_slice(&bytes);
        let (obu_type, header, _) = ObuHeader::read(&mut r).unwrap();
        assert_eq!(obu_type, ObuType::ParameterBlock);
        ParameterBlockObu::read(header, &metadata_map, &mut r).unwrap()
    }

    #[test]
    fn mode_0_block_inherits_timing_from_the_definition() {
        let metadata = mix_gain_metadata(0);
        let obu = ParameterBlockObu {
            header: ObuHeader::default(),
            parameter_id: 7,
            duration: 0,
            constant_subblock_duration: 0,
            num_subblocks: 0,
            subblocks: vec![ParameterSubblock {
                subblock_duration: 0,
                param_data: ParameterData::MixGain(MixGainParameterData::Step {
                    start_point_value: 0x0100,
                }),
            }],
        };

        let mut w = BitstreamIoWriter::default();
        obu.write(&metadata, &mut w).unwrap();
        // Header, parameter_id, animation_type, one Q7.8 point.
        assert_eq!(
            w.into_bytes().unwrap(),
            [0b00011_000, 4, 7, 0, 0x01, 0x00]
        );

        let read = round_trip(&obu, &metadata);
        assert_eq!(read, obu);
        assert_eq!(read.duration(&metadata), 2048);
        assert_eq!(read.num_subblocks(&metadata), 1);
    }

    #[test]
    fn mode_1_block_carries_its_own_subblock_durations() {
        let metadata = mix_gain_metadata(1);
        let obu = ParameterBlockObu {
            header: ObuHeader::default(),
            parameter_id: 7,
            duration: 300,
            constant_subblock_duration: 0,
            num_subblocks: 2,
            subblocks: vec![
                ParameterSubblock {
                    subblock_duration: 100,
                    param_data: ParameterData::MixGain(MixGainParameterData::Linear {
                        start_point_value: 0,
                        end_point_value: 0x0200,
                    }),
                },
                ParameterSubblock {
                    subblock_duration: 200,
                    param_data: ParameterData::MixGain(MixGainParameterData::Step {
                        start_point_value: 0x0200,
                    }),
                },
            ],
        };

        let read = round_trip(&obu, &metadata);
        assert_eq!(read, obu);
        assert_eq!(read.subblock_duration(&metadata, 0).unwrap(), 100);
        assert_eq!(read.subblock_duration(&metadata, 1).unwrap(), 200);
    }

    #[test]
    fn short_final_subblock_duration() {
        // 5 subblocks of 100 cover a duration of 450: the last is 50.
        let duration = subblock_duration(4, 5, 100, 450, |_| None).unwrap();
        assert_eq!(duration, 50);
        assert_eq!(subblock_duration(3, 5, 100, 450, |_| None).unwrap(), 100);
        assert!(subblock_duration(5, 5, 100, 450, |_| None).is_err());
    }

    #[test]
    fn linear_interpolation_matches_the_spec_example() {
        let animation = MixGainParameterData::Linear {
            start_point_value: q7_8_from_float(6.0).unwrap(),
            end_point_value: q7_8_from_float(-6.0).unwrap(),
        };
        assert_eq!(animation.interpolate(0, 2, 0).unwrap(), 6.0);
        assert_eq!(animation.interpolate(0, 2, 1).unwrap(), 0.0);
        assert_eq!(animation.interpolate(0, 2, 2).unwrap(), -6.0);
        assert!(animation.interpolate(0, 2, 3).is_err());
        assert!(animation.interpolate(0, 2, -1).is_err());
    }

    #[test]
    fn step_and_bezier_interpolation() {
        let step = MixGainParameterData::Step {
            start_point_value: q7_8_from_float(-3.0).unwrap(),
        };
        assert_eq!(step.interpolate(10, 20, 15).unwrap(), -3.0);

        let bezier = MixGainParameterData::Bezier {
            start_point_value: 0,
            end_point_value: 0,
            control_point_value: q7_8_from_float(2.0).unwrap(),
            control_point_relative_time: 128, // 0.5 in Q0.8
        };
        assert_eq!(bezier.interpolate(0, 2, 0).unwrap(), 0.0);
        assert!((bezier.interpolate(0, 2, 1).unwrap() - 1.0).abs() < 1e-6);
        assert_eq!(bezier.interpolate(0, 2, 2).unwrap(), 0.0);
    }

    #[test]
    fn mix_gain_at_walks_subblocks() {
        let metadata = mix_gain_metadata(1);
        let obu = ParameterBlockObu {
            header: ObuHeader::default(),
            parameter_id: 7,
            duration: 200,
            constant_subblock_duration: 100,
            num_subblocks: 0,
            subblocks: vec![
                ParameterSubblock {
                    subblock_duration: 0,
                    param_data: ParameterData::MixGain(MixGainParameterData::Step {
                        start_point_value: q7_8_from_float(1.0).unwrap(),
                    }),
                },
                ParameterSubblock {
                    subblock_duration: 0,
                    param_data: ParameterData::MixGain(MixGainParameterData::Step {
                        start_point_value: q7_8_from_float(2.0).unwrap(),
                    }),
                },
            ],
        };

        assert_eq!(obu.mix_gain_at(&metadata, 0).unwrap(), 1.0);
        assert_eq!(obu.mix_gain_at(&metadata, 99).unwrap(), 1.0);
        assert_eq!(obu.mix_gain_at(&metadata, 100).unwrap(), 2.0);
        assert_eq!(obu.mix_gain_at(&metadata, 200).unwrap(), 2.0);
        assert!(obu.mix_gain_at(&metadata, 201).is_err());
    }

    #[test]
    fn demixing_mode_tables() {
        let params = DemixingInfoParameterData::down_mixing_params(
            DMixPMode::Mode1,
            3,
            WIdxUpdateRule::Normal,
        )
        .unwrap();
        assert_eq!(params.alpha, 1.0);
        assert_eq!(params.delta, 0.707);
        assert_eq!(params.w_idx_used, 2);
        assert_eq!(params.w, 0.0391);

        // The first temporal unit pins w_idx to 0.
        let params = DemixingInfoParameterData::down_mixing_params(
            DMixPMode::Mode1N,
            7,
            WIdxUpdateRule::FirstFrame,
        )
        .unwrap();
        assert_eq!(params.w_idx_used, 0);
        assert_eq!(params.w, 0.0);

        // Without a parameter block the default_w passes through unchanged.
        let params = DemixingInfoParameterData::down_mixing_params(
            DMixPMode::Mode2N,
            10,
            WIdxUpdateRule::Default,
        )
        .unwrap();
        assert_eq!(params.w_idx_used, 10);
        assert_eq!(params.w, 0.5);

        // The running index clamps to [0, 10].
        let params = DemixingInfoParameterData::down_mixing_params(
            DMixPMode::Mode1,
            0,
            WIdxUpdateRule::Normal,
        )
        .unwrap();
        assert_eq!(params.w_idx_used, 0);
    }

    #[test]
    fn reserved_dmixp_modes_are_rejected() {
        assert!(DMixPMode::from_u3(3).is_err());
        assert!(DMixPMode::from_u3(7).is_err());

        let bytes = [0b011_00000u8];
        let mut r = BsIoSliceReader::from_slice(&bytes);
        assert!(DemixingInfoParameterData::read(&mut r).is_err());
    }

    #[test]
    fn recon_gain_bitmask_round_trip() {
        let mut recon_gain = [0u8; 12];
        recon_gain[0] = 100; // L
        recon_gain[11] = 200; // LFE
        let element = ReconGainElement {
            recon_gain_flag: 0x801,
            recon_gain,
        };

        let mut w = BitstreamIoWriter::default();
        element.write(&mut w).unwrap();
        let bytes = w.into_bytes().unwrap();
        // leb128 mask (2 bytes) plus one byte per set channel.
        assert_eq!(bytes, [0x81, 0x10, 100, 200]);

        let mut r = BsIoSliceReader::from_slice(&bytes);
        assert_eq!(ReconGainElement::read(&mut r).unwrap(), element);

        let bad = ReconGainElement {
            recon_gain_flag: 1 << 12,
            recon_gain: [0; 12],
        };
        let mut w = BitstreamIoWriter::default();
        assert!(bad.write(&mut w).is_err());
    }

    #[test]
    fn recon_gain_layers_follow_element_flags() {
        let flags = [false, true];
        let data = ReconGainInfoParameterData {
            recon_gain_elements: vec![
                None,
                Some(ReconGainElement {
                    recon_gain_flag: 0x1,
                    recon_gain: [255, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
                }),
            ],
        };

        let mut w = BitstreamIoWriter::default();
        data.write(&flags, &mut w).unwrap();
        let bytes = w.into_bytes().unwrap();
        assert_eq!(bytes, [0x01, 255]);

        let mut r = BsIoSliceReader::from_slice(&bytes);
        assert_eq!(
            ReconGainInfoParameterData::read(&flags, &mut r).unwrap(),
            data
        );

        let mut w = BitstreamIoWriter::default();
        assert!(data.write(&[true, true], &mut w).is_err());
    }

    #[test]
    fn unknown_parameter_id_is_rejected() {
        let metadata = mix_gain_metadata(0);
        let obu = ParameterBlockObu {
            header: ObuHeader::default(),
            parameter_id: 7,
            duration: 0,
            constant_subblock_duration: 0,
            num_subblocks: 0,
            subblocks: vec![ParameterSubblock {
                subblock_duration: 0,
                param_data: ParameterData::MixGain(MixGainParameterData::Step {
                    start_point_value: 0,
                }),
            }],
        };
        let mut w = BitstreamIoWriter::default();
        obu.write(&metadata, &mut w).unwrap();
        let bytes = w.into_bytes().unwrap();

        let mut r = BsIoSliceReader::from_slice(&bytes);
        let (_, header, _) = ObuHeader::read(&mut r).unwrap();
        assert!(ParameterBlockObu::read(header, &ParameterMetadataMap::new(), &mut r).is_err());
    }
}
