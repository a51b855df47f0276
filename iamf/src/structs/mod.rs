//! Data structures representing bitstream components.
//!
//! One module per OBU family: the shared header, the descriptor OBUs
//! (sequence header, codec config, audio element, mix presentation), the
//! parameter machinery (definitions and blocks), and the data-path OBUs
//! (audio frames, temporal delimiters, arbitrary pass-through OBUs).

pub mod arbitrary;
pub mod audio_element;
pub mod audio_frame;
pub mod codec_config;
pub mod decoder_config;
pub mod header;
pub mod ia_sequence_header;
pub mod mix_presentation;
pub mod param_definition;
pub mod parameter_block;
pub mod temporal_delimiter;
