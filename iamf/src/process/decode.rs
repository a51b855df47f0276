//! Decode pipeline.
//!
//! Drives one codec delegate per substream over parsed temporal units and
//! attaches the decoded PCM, honoring the trimming the audio frame headers
//! declare. The running demixing `w_idx` is tracked per stream.

use std::collections::BTreeMap;

use anyhow::{Result, bail};
use log::trace;

use crate::process::codec::{AudioCodec, CodecFactory};
use crate::process::encode::substream_channel_counts;
use crate::process::parse::DecodedTemporalUnit;
use crate::process::{Descriptors, InternalTimestamp};
use crate::structs::parameter_block::{
    DMixPMode, DemixingInfoParameterData, DownMixingParams, ParameterData, WIdxUpdateRule,
};
use crate::utils::errors::PipelineError;

/// PCM decoded from one temporal unit, keyed by substream id. Samples are
/// arranged `[time][channel]` with the trimmed regions removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedSamples {
    pub start_timestamp: InternalTimestamp,
    pub end_timestamp: InternalTimestamp,
    pub samples: BTreeMap<u32, Vec<Vec<i32>>>,
    /// Down-mix parameters resolved from this unit's demixing parameter
    /// block, when one is present.
    pub down_mixing_params: Option<DownMixingParamsSummary>,
}

/// The demixing outcome for a unit, with floats reduced to the table inputs
/// so the struct stays `Eq`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownMixingParamsSummary {
    pub dmixp_mode: DMixPMode,
    pub w_idx_used: i32,
}

struct SubstreamDecoder {
    codec: Box<dyn AudioCodec>,
}

/// Decodes audio frames back to PCM using per-substream codec delegates.
pub struct Decoder {
    substreams: BTreeMap<u32, SubstreamDecoder>,
    first_unit_decoded: bool,
    previous_w_idx: i32,
    default_w: i32,
}

impl Decoder {
    pub fn new(descriptors: &Descriptors, codec_factory: &CodecFactory) -> Result<Self> {
        let mut substreams = BTreeMap::new();
        for element in descriptors.audio_elements.values() {
            let codec_config = descriptors.codec_config_for_element(element.audio_element_id)?;
            let channel_counts = substream_channel_counts(element);
            for (substream_id, num_channels) in
                element.audio_substream_ids.iter().zip(channel_counts)
            {
                let mut codec = codec_factory(codec_config)?;
                codec.initialize(codec_config, num_channels)?;
                substreams.insert(*substream_id, SubstreamDecoder { codec });
            }
        }

        let default_w = descriptors
            .audio_elements
            .values()
            .flat_map(|element| &element.audio_element_params)
            .find_map(|param| match param {
                crate::structs::param_definition::ParamDefinitionVariant::Demixing(demixing) => {
                    Some(i32::from(demixing.default_demixing_info.default_w))
                }
                _ => None,
            })
            .unwrap_or(0);

        Ok(Self {
            substreams,
            first_unit_decoded: false,
            previous_w_idx: 0,
            default_w,
        })
    }

    /// Decodes every audio frame of a temporal unit and advances the
    /// demixing state.
    pub fn decode_temporal_unit(&mut self, unit: &DecodedTemporalUnit) -> Result<DecodedSamples> {
        let down_mixing_params = self.resolve_down_mixing(unit)?;

        let mut samples = BTreeMap::new();
        for audio_frame in &unit.audio_frames {
            let substream_id = audio_frame.substream_id();
            let Some(substream) = self.substreams.get_mut(&substream_id) else {
                bail!(PipelineError::UnknownSubstreamId(substream_id));
            };

            let mut decoded = substream.codec.decode_frame(&audio_frame.audio_frame)?;
            let trim_at_start = audio_frame.header.num_samples_to_trim_at_start as usize;
            let trim_at_end = audio_frame.header.num_samples_to_trim_at_end as usize;
            if trim_at_start + trim_at_end > decoded.len() {
                bail!(
                    "Trim of {} samples exceeds the {} decoded for substream {substream_id}",
                    trim_at_start + trim_at_end,
                    decoded.len()
                );
            }
            decoded.truncate(decoded.len() - trim_at_end);
            decoded.drain(..trim_at_start);
            trace!(
                "Decoded {} trimmed samples for substream {substream_id}",
                decoded.len()
            );

            samples.insert(substream_id, decoded);
        }

        self.first_unit_decoded = true;
        Ok(DecodedSamples {
            start_timestamp: unit.start_timestamp,
            end_timestamp: unit.end_timestamp,
            samples,
            down_mixing_params,
        })
    }

    /// Applies the `w_idx` update rule for this unit: normal when a demixing
    /// parameter block is present, pinned to zero on the first unit, and the
    /// element's `default_w` otherwise.
    fn resolve_down_mixing(
        &mut self,
        unit: &DecodedTemporalUnit,
    ) -> Result<Option<DownMixingParamsSummary>> {
        let demixing = unit.parameter_blocks.iter().find_map(|block| {
            block.subblocks.iter().find_map(|subblock| {
                if let ParameterData::Demixing(data) = &subblock.param_data {
                    Some(*data)
                } else {
                    None
                }
            })
        });

        let Some(demixing) = demixing else {
            if self.first_unit_decoded {
                self.previous_w_idx = self.default_w;
            }
            return Ok(None);
        };

        let rule = if self.first_unit_decoded {
            WIdxUpdateRule::Normal
        } else {
            WIdxUpdateRule::FirstFrame
        };
        let params: DownMixingParams = DemixingInfoParameterData::down_mixing_params(
            demixing.dmixp_mode,
            self.previous_w_idx,
            rule,
        )?;
        self.previous_w_idx = params.w_idx_used;

        Ok(Some(DownMixingParamsSummary {
            dmixp_mode: demixing.dmixp_mode,
            w_idx_used: params.w_idx_used,
        }))
    }
}
