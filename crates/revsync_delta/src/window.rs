//! Delta window and instruction types.

use crate::error::{DeltaError, DeltaResult};
use bytes::Bytes;

/// Magic bytes opening every delta stream.
pub const DELTA_MAGIC: [u8; 4] = *b"SVN\0";

/// Maximum literal data carried by one replacement window.
///
/// Larger payloads are split across windows so a reader never has to
/// buffer more than this much new data at once.
pub const MAX_NEW_DATA_CHUNK: u64 = 100 * 1024;

/// Where an instruction copies its bytes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InstructionKind {
    /// Copy from the source view; carries an explicit offset.
    CopyFromSource = 0,
    /// Copy from target bytes already produced by this window; carries an
    /// explicit offset and may overlap the write position (run-length
    /// expansion).
    CopyFromTarget = 1,
    /// Copy the next bytes of the window's literal new data.
    CopyFromNewData = 2,
}

impl InstructionKind {
    /// Converts the top two bits of an instruction byte to a kind.
    #[must_use]
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(Self::CopyFromSource),
            1 => Some(Self::CopyFromTarget),
            2 => Some(Self::CopyFromNewData),
            _ => None,
        }
    }

    /// Converts the kind to its two-bit wire value.
    #[must_use]
    pub const fn as_bits(self) -> u8 {
        self as u8
    }
}

/// One reconstruction instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeltaInstruction {
    /// Copy source selector.
    pub kind: InstructionKind,
    /// Number of bytes to produce. Never zero in a valid window.
    pub length: u64,
    /// Copy offset. For [`InstructionKind::CopyFromNewData`] this is the
    /// running position inside the window's new data; it is implicit on
    /// the wire and materialized on decode.
    pub offset: u64,
}

impl DeltaInstruction {
    /// Creates an instruction.
    #[must_use]
    pub const fn new(kind: InstructionKind, length: u64, offset: u64) -> Self {
        Self {
            kind,
            length,
            offset,
        }
    }
}

/// One self-describing unit of a delta stream.
///
/// A window reconstructs `target_view_length` bytes from a window of the
/// source (`source_view_offset` / `source_view_length`), from target
/// bytes it has already produced, and from `new_data`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaWindow {
    /// Offset of the source view within the full source.
    pub source_view_offset: u64,
    /// Length of the source view.
    pub source_view_length: u64,
    /// Total length of the target span this window produces.
    pub target_view_length: u64,
    /// Ordered reconstruction instructions.
    pub instructions: Vec<DeltaInstruction>,
    /// Literal bytes consumed by `CopyFromNewData` instructions.
    pub new_data: Bytes,
}

impl DeltaWindow {
    /// Length of the literal data section.
    #[must_use]
    pub fn new_data_length(&self) -> u64 {
        self.new_data.len() as u64
    }

    /// Checks the window invariants.
    ///
    /// - instruction lengths sum to `target_view_length`;
    /// - no instruction has zero length;
    /// - source copies stay inside the source view;
    /// - target copies reference already-produced bytes;
    /// - new-data copies have monotonic offsets and consume the literal
    ///   data exactly.
    ///
    /// # Errors
    ///
    /// Returns [`DeltaError::CorruptWindow`] on any violation.
    pub fn validate(&self) -> DeltaResult<()> {
        let mut produced: u64 = 0;
        let mut new_data_used: u64 = 0;
        for instruction in &self.instructions {
            if instruction.length == 0 {
                return Err(DeltaError::corrupt_window("zero-length instruction"));
            }
            match instruction.kind {
                InstructionKind::CopyFromSource => {
                    let end = instruction
                        .offset
                        .checked_add(instruction.length)
                        .ok_or_else(|| DeltaError::corrupt_window("source range overflow"))?;
                    if end > self.source_view_length {
                        return Err(DeltaError::corrupt_window(
                            "source copy outside source view",
                        ));
                    }
                }
                InstructionKind::CopyFromTarget => {
                    if instruction.offset >= produced {
                        return Err(DeltaError::corrupt_window(
                            "target copy references unproduced bytes",
                        ));
                    }
                }
                InstructionKind::CopyFromNewData => {
                    if instruction.offset != new_data_used {
                        return Err(DeltaError::corrupt_window(
                            "new-data offsets not monotonic",
                        ));
                    }
                    new_data_used = new_data_used
                        .checked_add(instruction.length)
                        .ok_or_else(|| DeltaError::corrupt_window("new-data overflow"))?;
                }
            }
            produced = produced
                .checked_add(instruction.length)
                .ok_or_else(|| DeltaError::corrupt_window("target length overflow"))?;
        }
        if produced != self.target_view_length {
            return Err(DeltaError::corrupt_window(format!(
                "instructions produce {produced} bytes, window declares {}",
                self.target_view_length
            )));
        }
        if new_data_used != self.new_data_length() {
            return Err(DeltaError::corrupt_window(format!(
                "instructions consume {new_data_used} new-data bytes, window carries {}",
                self.new_data_length()
            )));
        }
        Ok(())
    }

    /// Builds windows that replace the whole target with literal `data`.
    ///
    /// No instruction references old content, so the result applies
    /// against any (or no) source. Data larger than
    /// [`MAX_NEW_DATA_CHUNK`] is split across several windows.
    #[must_use]
    pub fn replacement_windows(data: Bytes) -> Vec<Self> {
        if data.is_empty() {
            return vec![Self {
                source_view_offset: 0,
                source_view_length: 0,
                target_view_length: 0,
                instructions: Vec::new(),
                new_data: Bytes::new(),
            }];
        }
        let chunk = MAX_NEW_DATA_CHUNK as usize;
        let mut windows = Vec::with_capacity(data.len() / chunk + 1);
        let mut rest = data;
        while !rest.is_empty() {
            let take = rest.len().min(chunk);
            let new_data = rest.split_to(take);
            windows.push(Self {
                source_view_offset: 0,
                source_view_length: 0,
                target_view_length: take as u64,
                instructions: vec![DeltaInstruction::new(
                    InstructionKind::CopyFromNewData,
                    take as u64,
                    0,
                )],
                new_data,
            });
        }
        windows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn copy_source(length: u64, offset: u64) -> DeltaInstruction {
        DeltaInstruction::new(InstructionKind::CopyFromSource, length, offset)
    }

    fn copy_new(length: u64, offset: u64) -> DeltaInstruction {
        DeltaInstruction::new(InstructionKind::CopyFromNewData, length, offset)
    }

    #[test]
    fn kind_roundtrip() {
        for kind in [
            InstructionKind::CopyFromSource,
            InstructionKind::CopyFromTarget,
            InstructionKind::CopyFromNewData,
        ] {
            assert_eq!(InstructionKind::from_bits(kind.as_bits()), Some(kind));
        }
        assert_eq!(InstructionKind::from_bits(3), None);
    }

    #[test]
    fn valid_window_passes() {
        let window = DeltaWindow {
            source_view_offset: 0,
            source_view_length: 10,
            target_view_length: 15,
            instructions: vec![copy_source(10, 0), copy_new(5, 0)],
            new_data: Bytes::from_static(b"HELLO"),
        };
        window.validate().unwrap();
    }

    #[test]
    fn length_mismatch_is_corrupt() {
        let window = DeltaWindow {
            source_view_offset: 0,
            source_view_length: 10,
            target_view_length: 20,
            instructions: vec![copy_source(10, 0)],
            new_data: Bytes::new(),
        };
        assert!(matches!(
            window.validate(),
            Err(DeltaError::CorruptWindow { .. })
        ));
    }

    #[test]
    fn unconsumed_new_data_is_corrupt() {
        let window = DeltaWindow {
            source_view_offset: 0,
            source_view_length: 0,
            target_view_length: 2,
            instructions: vec![copy_new(2, 0)],
            new_data: Bytes::from_static(b"abc"),
        };
        assert!(matches!(
            window.validate(),
            Err(DeltaError::CorruptWindow { .. })
        ));
    }

    #[test]
    fn target_copy_must_look_backwards() {
        let window = DeltaWindow {
            source_view_offset: 0,
            source_view_length: 0,
            target_view_length: 4,
            instructions: vec![
                copy_new(2, 0),
                DeltaInstruction::new(InstructionKind::CopyFromTarget, 2, 2),
            ],
            new_data: Bytes::from_static(b"ab"),
        };
        assert!(matches!(
            window.validate(),
            Err(DeltaError::CorruptWindow { .. })
        ));
    }

    #[test]
    fn replacement_of_empty_data() {
        let windows = DeltaWindow::replacement_windows(Bytes::new());
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].target_view_length, 0);
        assert!(windows[0].instructions.is_empty());
        windows[0].validate().unwrap();
    }

    #[test]
    fn replacement_chunks_large_data() {
        let data = Bytes::from(vec![7u8; 250 * 1024]);
        let windows = DeltaWindow::replacement_windows(data);
        assert_eq!(windows.len(), 3);
        assert_eq!(windows[0].new_data_length(), MAX_NEW_DATA_CHUNK);
        assert_eq!(windows[1].new_data_length(), MAX_NEW_DATA_CHUNK);
        assert_eq!(windows[2].new_data_length(), 50 * 1024);
        for window in &windows {
            window.validate().unwrap();
            assert_eq!(window.source_view_length, 0);
        }
    }
}
