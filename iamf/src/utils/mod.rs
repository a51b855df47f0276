//! Utility functions and supporting infrastructure.
//!
//! - **Bitstream I/O** ([`bitstream_io`]): Bit-level reading/writing,
//!   `leb128` and expandable-size codecs
//! - **Error Handling** ([`errors`]): Error types
//! - **Numeric Conversions** ([`numeric`]): Q-formats, checked casts, PCM
//!   packing
//! - **Validation** ([`validate`]): Equality, uniqueness and range checks

pub mod bitstream_io;
pub mod errors;
pub mod numeric;
pub mod validate;
