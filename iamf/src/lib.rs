#![doc = include_str!("../README.md")]
//!
//! ## Technical Overview
//!
//! ### Bitstream Organization
//!
//! An IA sequence is a flat stream of OBUs: an IA Sequence Header, the
//! descriptor OBUs (codec configs, audio elements, mix presentations), then
//! temporal units, each holding the parameter blocks and audio frames that
//! jointly cover one aligned time interval, optionally preceded by a
//! temporal delimiter.
//!
//! ### Quick Start
//!
//! Parsing a serialized sequence:
//!
//! ```rust
//! use iamf::process::parse::Parser;
//!
//! // A minimal sequence: just an IA Sequence Header.
//! let data: &[u8] = &[0xF8, 0x06, 0x69, 0x61, 0x6D, 0x66, 0x00, 0x00];
//!
//! let mut parser = Parser::default();
//! let sequence = parser.parse_sequence(data)?;
//! assert!(sequence.temporal_units.is_empty());
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! Encoding goes the other way: build [`process::Descriptors`], feed PCM
//! frames through a [`process::encode::Encoder`] with a codec delegate per
//! substream, and finalize into any [`process::sequence::ObuSink`].

/// Processing pipeline for IA sequences.
///
/// 1. **Parsing** ([`process::parse`]): Bitstream bytes into typed OBUs and
///    temporal units.
///
/// 2. **Sequencing** ([`process::sequence`]): Temporal-unit validation and
///    canonical emission.
///
/// 3. **Encoding** ([`process::encode`]): The frame-by-frame pipeline
///    driver.
pub mod process;

/// Data structures representing bitstream components.
///
/// - **OBU header** ([`structs::header`]): Type codes, flags and sizing
/// - **Descriptors** ([`structs::codec_config`], [`structs::audio_element`],
///   [`structs::mix_presentation`]): Stream setup OBUs
/// - **Parameters** ([`structs::param_definition`],
///   [`structs::parameter_block`]): Time-varying parameter machinery
/// - **Data path** ([`structs::audio_frame`],
///   [`structs::temporal_delimiter`], [`structs::arbitrary`]): Per-frame
///   OBUs
pub mod structs;

/// Utility functions and supporting infrastructure.
///
/// - **Bitstream I/O** ([`utils::bitstream_io`]): Bit-level reading/writing
/// - **Error Handling** ([`utils::errors`]): Error types
/// - **Numeric Conversions** ([`utils::numeric`]): Q-formats and PCM packing
/// - **Validation** ([`utils::validate`]): Shared checks
pub mod utils;
