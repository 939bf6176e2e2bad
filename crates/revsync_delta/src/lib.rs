//! # revsync delta codec
//!
//! Windowed binary delta encoding/decoding for revsync.
//!
//! A delta stream is the 4-byte magic `"SVN\0"` followed by windows.
//! Each window header is five base-128 integers (source view offset,
//! source view length, target view length, instruction-section length,
//! new-data length), then the instruction bytes, then the literal data.
//!
//! ## Instruction bytes
//!
//! The top two bits of an instruction byte select the copy source
//! (source view / produced target / new data); the low six bits are an
//! inline length of 1–63, with zero meaning "a base-128 length follows".
//! Source and target copies then carry a base-128 offset; new-data
//! copies consume the literal section in order, so their offsets are
//! implicit.
//!
//! ## Guarantees
//!
//! - `decode(encode(w)) == w` for every valid window
//! - the decoder accepts input in arbitrary fragments without losing
//!   position and never blocks
//! - malformed input is a fatal [`DeltaError`], never silently absorbed

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod apply;
mod decoder;
mod encoder;
mod error;
mod varint;
mod window;

pub use apply::{apply_window, apply_windows};
pub use decoder::{parse_instructions, DecoderState, Progress, WindowDecoder};
pub use encoder::encode_window;
pub use error::{DeltaError, DeltaResult};
pub use window::{
    DeltaInstruction, DeltaWindow, InstructionKind, DELTA_MAGIC, MAX_NEW_DATA_CHUNK,
};
