//! Delta window encoder.

use crate::error::DeltaResult;
use crate::varint;
use crate::window::{DeltaWindow, InstructionKind, DELTA_MAGIC};

/// Appends the wire form of `window` to `buf`.
///
/// The stream magic is written only when `include_header` is set, which
/// callers do for the first window of a stream. The literal new-data
/// section is appended after the instruction bytes, matching the on-wire
/// layout the decoder consumes.
///
/// Encoding is the exact inverse of decoding: decoding the produced
/// bytes yields a window equal to the input.
///
/// # Errors
///
/// Returns a [`crate::DeltaError`] if the window violates its own
/// invariants; nothing is appended in that case.
pub fn encode_window(
    window: &DeltaWindow,
    include_header: bool,
    buf: &mut Vec<u8>,
) -> DeltaResult<()> {
    window.validate()?;

    let mut instruction_bytes = Vec::new();
    for instruction in &window.instructions {
        let selector = instruction.kind.as_bits() << 6;
        if instruction.length >= 1 && instruction.length <= 0x3f {
            instruction_bytes.push(selector | instruction.length as u8);
        } else {
            instruction_bytes.push(selector);
            varint::write_u64(&mut instruction_bytes, instruction.length);
        }
        match instruction.kind {
            InstructionKind::CopyFromSource | InstructionKind::CopyFromTarget => {
                varint::write_u64(&mut instruction_bytes, instruction.offset);
            }
            // The running new-data offset is implicit on the wire.
            InstructionKind::CopyFromNewData => {}
        }
    }

    if include_header {
        buf.extend_from_slice(&DELTA_MAGIC);
    }
    varint::write_u64(buf, window.source_view_offset);
    varint::write_u64(buf, window.source_view_length);
    varint::write_u64(buf, window.target_view_length);
    varint::write_u64(buf, instruction_bytes.len() as u64);
    varint::write_u64(buf, window.new_data_length());
    buf.extend_from_slice(&instruction_bytes);
    buf.extend_from_slice(&window.new_data);
    Ok(())
}
