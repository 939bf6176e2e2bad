//! Resumable delta window decoder.

use crate::error::{DeltaError, DeltaResult};
use crate::varint::{self, VarintReader};
use crate::window::{DeltaInstruction, DeltaWindow, InstructionKind, DELTA_MAGIC};
use bytes::Bytes;
use std::io::Read;

/// Maximum size of one window's instruction section.
/// Prevents allocation-based DoS from untrusted input.
const MAX_INSTRUCTION_SECTION: u64 = 256 * 1024 * 1024;

/// Maximum size of one window's literal data section.
const MAX_NEW_DATA_SECTION: u64 = 256 * 1024 * 1024;

/// Decoder position within the current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    /// Reading the 4 magic bytes that open a stream.
    Header,
    /// Reading the five window header integers.
    Offsets,
    /// Reading the instruction section.
    Instructions,
    /// Header and instructions complete; collecting literal new data.
    Done,
}

/// Outcome of one [`WindowDecoder::feed`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// All input was consumed without completing a window.
    NeedMore,
    /// A window was completed. Unconsumed input belongs to the next one.
    Window(DeltaWindow),
}

/// Incremental decoder for a delta stream.
///
/// Input may arrive in arbitrary fragments; the decoder keeps its
/// position between calls and never blocks. A completed window is
/// handed back as soon as its last byte is seen, and the decoder is then
/// ready for the next window of the same stream (the magic header
/// appears only once).
#[derive(Debug)]
pub struct WindowDecoder {
    state: DecoderState,
    header_read: usize,
    offsets: [u64; 5],
    offset_index: usize,
    varint: VarintReader,
    instructions: Vec<u8>,
    new_data: Vec<u8>,
}

impl WindowDecoder {
    /// Creates a decoder expecting the stream magic header.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: DecoderState::Header,
            header_read: 0,
            offsets: [0; 5],
            offset_index: 0,
            varint: VarintReader::default(),
            instructions: Vec::new(),
            new_data: Vec::new(),
        }
    }

    /// Creates a decoder for a stream whose header was already consumed.
    #[must_use]
    pub fn continuation() -> Self {
        let mut decoder = Self::new();
        decoder.state = DecoderState::Offsets;
        decoder
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// True if the decoder sits cleanly between windows.
    ///
    /// At a clean boundary the stream may simply end; anywhere else an
    /// end of input is corruption.
    #[must_use]
    pub fn at_window_boundary(&self) -> bool {
        self.state == DecoderState::Offsets && self.offset_index == 0 && self.varint.is_empty()
    }

    /// Feeds a fragment of the stream.
    ///
    /// Returns the number of bytes consumed and either
    /// [`Progress::NeedMore`] or a completed [`Progress::Window`]. When a
    /// window completes, consumption stops there; feed the remainder of
    /// the fragment again for the next window.
    ///
    /// # Errors
    ///
    /// Returns a [`DeltaError`] on malformed input. Decoder state is
    /// unspecified afterwards; the error is fatal for the stream.
    pub fn feed(&mut self, input: &[u8]) -> DeltaResult<(usize, Progress)> {
        let mut pos = 0;
        loop {
            match self.state {
                DecoderState::Header => {
                    while self.header_read < DELTA_MAGIC.len() {
                        if pos >= input.len() {
                            return Ok((pos, Progress::NeedMore));
                        }
                        if input[pos] != DELTA_MAGIC[self.header_read] {
                            return Err(DeltaError::CorruptHeader);
                        }
                        self.header_read += 1;
                        pos += 1;
                    }
                    self.state = DecoderState::Offsets;
                }
                DecoderState::Offsets => {
                    while self.offset_index < self.offsets.len() {
                        if pos >= input.len() {
                            return Ok((pos, Progress::NeedMore));
                        }
                        if let Some(value) = self.varint.push(input[pos])? {
                            self.offsets[self.offset_index] = value;
                            self.offset_index += 1;
                        }
                        pos += 1;
                    }
                    if self.offsets[3] > MAX_INSTRUCTION_SECTION {
                        return Err(DeltaError::corrupt_window("instruction section too large"));
                    }
                    if self.offsets[4] > MAX_NEW_DATA_SECTION {
                        return Err(DeltaError::corrupt_window("new-data section too large"));
                    }
                    self.instructions = Vec::with_capacity(self.offsets[3] as usize);
                    self.new_data = Vec::with_capacity(self.offsets[4] as usize);
                    self.state = DecoderState::Instructions;
                }
                DecoderState::Instructions => {
                    let want = self.offsets[3] as usize - self.instructions.len();
                    let take = want.min(input.len() - pos);
                    self.instructions.extend_from_slice(&input[pos..pos + take]);
                    pos += take;
                    if self.instructions.len() < self.offsets[3] as usize {
                        return Ok((pos, Progress::NeedMore));
                    }
                    self.state = DecoderState::Done;
                }
                DecoderState::Done => {
                    let want = self.offsets[4] as usize - self.new_data.len();
                    let take = want.min(input.len() - pos);
                    self.new_data.extend_from_slice(&input[pos..pos + take]);
                    pos += take;
                    if self.new_data.len() < self.offsets[4] as usize {
                        return Ok((pos, Progress::NeedMore));
                    }
                    let window = self.take_window()?;
                    return Ok((pos, Progress::Window(window)));
                }
            }
        }
    }

    /// Reads the next complete window from `reader`.
    ///
    /// Returns `Ok(None)` at a clean end of stream. Wrap the reader in a
    /// [`std::io::BufReader`]; bytes are pulled one at a time so the
    /// decoder position stays exact.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure, on malformed input, or when the
    /// stream ends in the middle of a window.
    pub fn read_window<R: Read>(&mut self, reader: &mut R) -> DeltaResult<Option<DeltaWindow>> {
        let mut byte = [0u8; 1];
        loop {
            let read = reader
                .read(&mut byte)
                .map_err(|e| DeltaError::corrupt_window(format!("delta read failed: {e}")))?;
            if read == 0 {
                if self.at_window_boundary() {
                    return Ok(None);
                }
                return Err(DeltaError::corrupt_window("unexpected end of delta stream"));
            }
            match self.feed(&byte)? {
                (_, Progress::NeedMore) => {}
                (_, Progress::Window(window)) => return Ok(Some(window)),
            }
        }
    }

    /// Builds the finished window and resets for the next one.
    fn take_window(&mut self) -> DeltaResult<DeltaWindow> {
        let instructions = parse_instructions(&self.instructions)?;
        let window = DeltaWindow {
            source_view_offset: self.offsets[0],
            source_view_length: self.offsets[1],
            target_view_length: self.offsets[2],
            instructions,
            new_data: Bytes::from(std::mem::take(&mut self.new_data)),
        };
        window.validate()?;
        self.offsets = [0; 5];
        self.offset_index = 0;
        self.instructions = Vec::new();
        self.state = DecoderState::Offsets;
        Ok(window)
    }
}

impl Default for WindowDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Materializes the instruction sequence from its wire bytes.
///
/// New-data instructions get their implicit offsets filled in from the
/// running literal-data position.
///
/// # Errors
///
/// Returns a [`DeltaError`] on an unknown instruction kind, a truncated
/// instruction, or a zero length.
pub fn parse_instructions(bytes: &[u8]) -> DeltaResult<Vec<DeltaInstruction>> {
    let mut instructions = Vec::new();
    let mut pos = 0;
    let mut new_data_offset: u64 = 0;
    while pos < bytes.len() {
        let first = bytes[pos];
        pos += 1;
        let kind = InstructionKind::from_bits(first >> 6)
            .ok_or_else(|| DeltaError::corrupt_window("unknown instruction kind"))?;
        let mut length = u64::from(first & 0x3f);
        if length == 0 {
            length = varint::read_u64(bytes, &mut pos)?;
            if length == 0 {
                return Err(DeltaError::corrupt_window("zero-length instruction"));
            }
        }
        let offset = match kind {
            InstructionKind::CopyFromSource | InstructionKind::CopyFromTarget => {
                varint::read_u64(bytes, &mut pos)?
            }
            InstructionKind::CopyFromNewData => {
                let offset = new_data_offset;
                new_data_offset = new_data_offset
                    .checked_add(length)
                    .ok_or_else(|| DeltaError::corrupt_window("new-data overflow"))?;
                offset
            }
        };
        instructions.push(DeltaInstruction {
            kind,
            length,
            offset,
        });
    }
    Ok(instructions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::encode_window;
    use crate::window::MAX_NEW_DATA_CHUNK;

    fn sample_window() -> DeltaWindow {
        DeltaWindow {
            source_view_offset: 0,
            source_view_length: 10,
            target_view_length: 15,
            instructions: vec![
                DeltaInstruction::new(InstructionKind::CopyFromSource, 10, 0),
                DeltaInstruction::new(InstructionKind::CopyFromNewData, 5, 0),
            ],
            new_data: Bytes::from_static(b"HELLO"),
        }
    }

    fn encode(window: &DeltaWindow, with_header: bool) -> Vec<u8> {
        let mut buf = Vec::new();
        encode_window(window, with_header, &mut buf).unwrap();
        buf
    }

    #[test]
    fn decode_whole_stream() {
        let bytes = encode(&sample_window(), true);
        let mut decoder = WindowDecoder::new();
        let (consumed, progress) = decoder.feed(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(progress, Progress::Window(sample_window()));
        assert!(decoder.at_window_boundary());
    }

    #[test]
    fn decode_byte_by_byte() {
        let bytes = encode(&sample_window(), true);
        let mut decoder = WindowDecoder::new();
        let mut window = None;
        for &byte in &bytes {
            match decoder.feed(&[byte]).unwrap() {
                (1, Progress::NeedMore) => {}
                (1, Progress::Window(w)) => window = Some(w),
                other => panic!("unexpected progress: {other:?}"),
            }
        }
        assert_eq!(window, Some(sample_window()));
    }

    #[test]
    fn decode_two_windows_from_one_buffer() {
        let first = sample_window();
        let second = DeltaWindow::replacement_windows(Bytes::from_static(b"xyz"))
            .pop()
            .unwrap();
        let mut bytes = encode(&first, true);
        bytes.extend_from_slice(&encode(&second, false));

        let mut decoder = WindowDecoder::new();
        let (consumed, progress) = decoder.feed(&bytes).unwrap();
        assert_eq!(progress, Progress::Window(first));
        let (rest, progress) = decoder.feed(&bytes[consumed..]).unwrap();
        assert_eq!(consumed + rest, bytes.len());
        assert_eq!(progress, Progress::Window(second));
    }

    #[test]
    fn bad_magic_is_corrupt_header() {
        let mut decoder = WindowDecoder::new();
        assert_eq!(
            decoder.feed(b"SVM\0").unwrap_err(),
            DeltaError::CorruptHeader
        );
    }

    #[test]
    fn declared_lengths_must_match_instructions() {
        let mut bytes = encode(&sample_window(), true);
        // Tamper with the target length (6th byte: right after the magic
        // and the zero source offset).
        bytes[6] = 99;
        let mut decoder = WindowDecoder::new();
        let err = decoder.feed(&bytes).unwrap_err();
        assert!(matches!(err, DeltaError::CorruptWindow { .. }));
    }

    #[test]
    fn empty_window_decodes() {
        let empty = DeltaWindow::replacement_windows(Bytes::new()).pop().unwrap();
        let bytes = encode(&empty, true);
        let mut decoder = WindowDecoder::new();
        let (consumed, progress) = decoder.feed(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(progress, Progress::Window(empty));
    }

    #[test]
    fn long_instruction_lengths_use_varint_form() {
        let length = MAX_NEW_DATA_CHUNK;
        let window = DeltaWindow {
            source_view_offset: 0,
            source_view_length: 0,
            target_view_length: length,
            instructions: vec![DeltaInstruction::new(
                InstructionKind::CopyFromNewData,
                length,
                0,
            )],
            new_data: Bytes::from(vec![0u8; length as usize]),
        };
        let bytes = encode(&window, false);
        let mut decoder = WindowDecoder::continuation();
        let (_, progress) = decoder.feed(&bytes).unwrap();
        assert_eq!(progress, Progress::Window(window));
    }

    #[test]
    fn read_window_from_reader() {
        let mut bytes = encode(&sample_window(), true);
        bytes.extend_from_slice(&encode(&sample_window(), false));
        let mut cursor = std::io::Cursor::new(bytes);
        let mut decoder = WindowDecoder::new();
        assert_eq!(
            decoder.read_window(&mut cursor).unwrap(),
            Some(sample_window())
        );
        assert_eq!(
            decoder.read_window(&mut cursor).unwrap(),
            Some(sample_window())
        );
        assert_eq!(decoder.read_window(&mut cursor).unwrap(), None);
    }

    #[test]
    fn truncated_stream_is_an_error() {
        let bytes = encode(&sample_window(), true);
        let mut cursor = std::io::Cursor::new(&bytes[..bytes.len() - 2]);
        let mut decoder = WindowDecoder::new();
        let err = decoder.read_window(&mut cursor).unwrap_err();
        assert!(matches!(err, DeltaError::CorruptWindow { .. }));
    }

    #[test]
    fn unknown_instruction_kind_rejected() {
        // 0b11 in the top two bits is reserved.
        let err = parse_instructions(&[0xc1]).unwrap_err();
        assert!(matches!(err, DeltaError::CorruptWindow { .. }));
    }

    #[test]
    fn instruction_bytes_truncated_mid_offset() {
        // copy-from-source, inline length 1, then a continuation byte
        // with no terminator.
        let err = parse_instructions(&[0x01, 0x81]).unwrap_err();
        assert_eq!(err, DeltaError::TruncatedInstructions);
    }
}
