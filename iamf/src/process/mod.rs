//! Processing pipeline for IA sequences.
//!
//! 1. **Parsing** ([`parse`]): Converts bitstream bytes into typed OBUs and
//!    assembles them into temporal units.
//!
//! 2. **Sequencing** ([`sequence`]): Validates temporal units and emits
//!    descriptors plus temporal units in canonical order.
//!
//! 3. **Encoding** ([`encode`]): Drives per-substream codec delegates frame
//!    by frame and hands the results to the sequencer.
//!
//! 4. **Decoding** ([`decode`]): Turns parsed temporal units back into
//!    trimmed PCM.
//!
//! 5. **Codec delegates** ([`codec`]): The capability interface the pipeline
//!    consumes for per-frame encode/decode.

pub mod codec;
pub mod decode;
pub mod encode;
pub mod parse;
pub mod sequence;

use std::collections::BTreeMap;

use anyhow::{Result, bail};

use crate::structs::audio_element::AudioElementObu;
use crate::structs::codec_config::CodecConfigObu;
use crate::structs::ia_sequence_header::IaSequenceHeaderObu;
use crate::structs::mix_presentation::MixPresentationObu;
use crate::structs::param_definition::{
    PARAMETER_DEFINITION_MIX_GAIN, ParamDefinitionVariant,
};
use crate::structs::parameter_block::{ParameterMetadataMap, PerIdParameterMetadata};
use crate::utils::errors::PipelineError;

/// Timestamps are ticks in the audio sample timescale.
pub type InternalTimestamp = i64;

/// The descriptor OBUs of one IA sequence, keyed by their ids.
///
/// Audio frames and parameter blocks reference these by id; nothing here
/// owns or points at the data-path OBUs.
#[derive(Debug, Clone)]
pub struct Descriptors {
    pub sequence_header: IaSequenceHeaderObu,
    pub codec_configs: BTreeMap<u32, CodecConfigObu>,
    pub audio_elements: BTreeMap<u32, AudioElementObu>,
    pub mix_presentations: BTreeMap<u32, MixPresentationObu>,
}

impl Descriptors {
    pub fn codec_config_for_element(&self, audio_element_id: u32) -> Result<&CodecConfigObu> {
        let Some(element) = self.audio_elements.get(&audio_element_id) else {
            bail!(PipelineError::UnknownAudioElementId(audio_element_id));
        };
        let Some(codec_config) = self.codec_configs.get(&element.codec_config_id) else {
            bail!(PipelineError::UnknownCodecConfigId(element.codec_config_id));
        };
        Ok(codec_config)
    }

    pub fn element_for_substream(&self, substream_id: u32) -> Result<&AudioElementObu> {
        self.audio_elements
            .values()
            .find(|element| element.audio_substream_ids.contains(&substream_id))
            .ok_or_else(|| PipelineError::UnknownSubstreamId(substream_id).into())
    }

    /// Collects the per-id parameter metadata every parameter block needs,
    /// from the audio elements and mix presentations.
    pub fn parameter_metadata(&self) -> ParameterMetadataMap {
        let mut metadata_map = ParameterMetadataMap::new();
        for element in self.audio_elements.values() {
            register_audio_element_parameters(element, &mut metadata_map);
        }
        for mix_presentation in self.mix_presentations.values() {
            register_mix_presentation_parameters(mix_presentation, &mut metadata_map);
        }
        metadata_map
    }
}

fn register(
    variant: &ParamDefinitionVariant,
    recon_gain_flags: Vec<bool>,
    metadata_map: &mut ParameterMetadataMap,
) {
    // Extension definitions have no base and no parseable blocks.
    if let Some(base) = variant.base() {
        metadata_map.insert(
            base.parameter_id,
            PerIdParameterMetadata {
                param_definition_type: variant.param_definition_type(),
                param_definition: base.clone(),
                recon_gain_is_present_flags: recon_gain_flags,
            },
        );
    }
}

/// Registers an audio element's parameter definitions, attaching the
/// per-layer recon gain flags where needed.
pub(crate) fn register_audio_element_parameters(
    element: &AudioElementObu,
    metadata_map: &mut ParameterMetadataMap,
) {
    for param in &element.audio_element_params {
        let recon_gain_flags = match param {
            ParamDefinitionVariant::ReconGain(_) => element.recon_gain_is_present_flags(),
            _ => Vec::new(),
        };
        register(param, recon_gain_flags, metadata_map);
    }
}

/// Registers a mix presentation's mix gains and rendering-config parameter
/// definitions.
pub(crate) fn register_mix_presentation_parameters(
    mix_presentation: &MixPresentationObu,
    metadata_map: &mut ParameterMetadataMap,
) {
    for sub_mix in &mix_presentation.sub_mixes {
        for element in &sub_mix.audio_elements {
            metadata_map.insert(
                element.element_mix_gain.base.parameter_id,
                PerIdParameterMetadata {
                    param_definition_type: PARAMETER_DEFINITION_MIX_GAIN,
                    param_definition: element.element_mix_gain.base.clone(),
                    recon_gain_is_present_flags: Vec::new(),
                },
            );
            for param in &element.rendering_config.rendering_config_param_definitions {
                register(param, Vec::new(), metadata_map);
            }
        }
        metadata_map.insert(
            sub_mix.output_mix_gain.base.parameter_id,
            PerIdParameterMetadata {
                param_definition_type: PARAMETER_DEFINITION_MIX_GAIN,
                param_definition: sub_mix.output_mix_gain.base.clone(),
                recon_gain_is_present_flags: Vec::new(),
            },
        );
    }
}
