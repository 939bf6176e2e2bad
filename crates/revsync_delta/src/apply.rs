//! Applying decoded windows against a source to reconstruct a target.

use crate::error::{DeltaError, DeltaResult};
use crate::window::{DeltaWindow, InstructionKind};

/// Applies one window, appending its target view to `target`.
///
/// `source` is the full source content; the window's own
/// `source_view_offset` / `source_view_length` select the view copy
/// instructions read from.
///
/// # Errors
///
/// Returns [`DeltaError::SourceOutOfBounds`] when the source view falls
/// outside `source`, or [`DeltaError::CorruptWindow`] when the window's
/// invariants do not hold.
pub fn apply_window(window: &DeltaWindow, source: &[u8], target: &mut Vec<u8>) -> DeltaResult<()> {
    window.validate()?;

    let view_start = usize::try_from(window.source_view_offset)
        .map_err(|_| DeltaError::corrupt_window("source view offset too large"))?;
    let view_len = usize::try_from(window.source_view_length)
        .map_err(|_| DeltaError::corrupt_window("source view length too large"))?;
    let view_end = view_start
        .checked_add(view_len)
        .ok_or_else(|| DeltaError::corrupt_window("source view overflow"))?;
    if view_end > source.len() {
        return Err(DeltaError::SourceOutOfBounds {
            need: view_end as u64,
            have: source.len() as u64,
        });
    }
    let view = &source[view_start..view_end];

    let mut produced = Vec::with_capacity(window.target_view_length as usize);
    for instruction in &window.instructions {
        let length = instruction.length as usize;
        let offset = instruction.offset as usize;
        match instruction.kind {
            InstructionKind::CopyFromSource => {
                produced.extend_from_slice(&view[offset..offset + length]);
            }
            InstructionKind::CopyFromTarget => {
                // May overlap the write position: copy byte by byte so a
                // one-byte seed expands into a run.
                for i in 0..length {
                    let byte = produced[offset + i];
                    produced.push(byte);
                }
            }
            InstructionKind::CopyFromNewData => {
                produced.extend_from_slice(&window.new_data[offset..offset + length]);
            }
        }
    }
    target.extend_from_slice(&produced);
    Ok(())
}

/// Applies a sequence of windows in order, returning the full target.
///
/// Each window selects its own source view, so windows produced against
/// successive spans of a large file compose naturally.
///
/// # Errors
///
/// Fails on the first window that cannot be applied; the partial target
/// is discarded.
pub fn apply_windows<'a, I>(windows: I, source: &[u8]) -> DeltaResult<Vec<u8>>
where
    I: IntoIterator<Item = &'a DeltaWindow>,
{
    let mut target = Vec::new();
    for window in windows {
        apply_window(window, source, &mut target)?;
    }
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::DeltaInstruction;
    use bytes::Bytes;

    #[test]
    fn copy_source_then_literal() {
        // The worked example: copy 10 source bytes, append "HELLO".
        let window = DeltaWindow {
            source_view_offset: 0,
            source_view_length: 10,
            target_view_length: 15,
            instructions: vec![
                DeltaInstruction::new(InstructionKind::CopyFromSource, 10, 0),
                DeltaInstruction::new(InstructionKind::CopyFromNewData, 5, 0),
            ],
            new_data: Bytes::from_static(b"HELLO"),
        };
        let source = b"0123456789";
        let target = apply_windows([&window], source).unwrap();
        assert_eq!(target, b"0123456789HELLO");
    }

    #[test]
    fn target_copy_expands_runs() {
        let window = DeltaWindow {
            source_view_offset: 0,
            source_view_length: 0,
            target_view_length: 9,
            instructions: vec![
                DeltaInstruction::new(InstructionKind::CopyFromNewData, 1, 0),
                DeltaInstruction::new(InstructionKind::CopyFromTarget, 8, 0),
            ],
            new_data: Bytes::from_static(b"a"),
        };
        let target = apply_windows([&window], b"").unwrap();
        assert_eq!(target, b"aaaaaaaaa");
    }

    #[test]
    fn replacement_windows_reproduce_data() {
        let data = (0..=255u8).cycle().take(250_000).collect::<Vec<u8>>();
        let windows = DeltaWindow::replacement_windows(Bytes::from(data.clone()));
        let target = apply_windows(&windows, b"anything").unwrap();
        assert_eq!(target, data);
    }

    #[test]
    fn windows_compose_over_source_views() {
        let source = b"aaaaaaaaaabbbbbbbbbb";
        let first = DeltaWindow {
            source_view_offset: 0,
            source_view_length: 10,
            target_view_length: 10,
            instructions: vec![DeltaInstruction::new(InstructionKind::CopyFromSource, 10, 0)],
            new_data: Bytes::new(),
        };
        let second = DeltaWindow {
            source_view_offset: 10,
            source_view_length: 10,
            target_view_length: 11,
            instructions: vec![
                DeltaInstruction::new(InstructionKind::CopyFromSource, 10, 0),
                DeltaInstruction::new(InstructionKind::CopyFromNewData, 1, 0),
            ],
            new_data: Bytes::from_static(b"!"),
        };
        let target = apply_windows([&first, &second], source).unwrap();
        assert_eq!(target, b"aaaaaaaaaabbbbbbbbbb!");
    }

    #[test]
    fn source_view_past_end_fails() {
        let window = DeltaWindow {
            source_view_offset: 5,
            source_view_length: 10,
            target_view_length: 10,
            instructions: vec![DeltaInstruction::new(InstructionKind::CopyFromSource, 10, 0)],
            new_data: Bytes::new(),
        };
        let err = apply_windows([&window], b"short").unwrap_err();
        assert!(matches!(err, DeltaError::SourceOutOfBounds { .. }));
    }
}
