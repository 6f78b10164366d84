//! Byte-at-a-time frame parsing.
//!
//! Responses arrive on a full-duplex link while the host clocks out filler,
//! so the parser consumes an iterator of inbound bytes rather than a
//! pre-delimited buffer.

use crate::command::Command;
use crate::error::ProtocolError;
use crate::frame::{Frame, ParamWidth};
use crate::{END_CMD, ERR_CMD, REPLY_FLAG, START_CMD, START_MARKER_BUDGET};
use bytes::Bytes;

/// Caller-provided storage for one reply parameter.
///
/// At most `capacity - 1` bytes are copied so a `0` terminator always fits
/// after the data; a 4-byte value therefore needs a 5-byte slot
/// (see [`Slot::for_value`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    buf: Vec<u8>,
    len: usize,
    reported: usize,
}

impl Slot {
    /// Creates an empty slot with `capacity` bytes of storage.
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0; capacity],
            len: 0,
            reported: 0,
        }
    }

    /// Creates a slot able to hold a `len`-byte value without truncation.
    pub fn for_value(len: usize) -> Self {
        Self::new(len + 1)
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Number of bytes actually copied into the slot.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Length the device announced for this parameter.
    pub fn reported_len(&self) -> usize {
        self.reported
    }

    /// Whether the device sent more bytes than the slot could keep.
    pub fn is_truncated(&self) -> bool {
        self.reported > self.len
    }

    /// Copied bytes, without the terminator.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Storage including the terminator position.
    pub fn raw(&self) -> &[u8] {
        &self.buf
    }

    pub fn as_u8(&self) -> Option<u8> {
        self.as_bytes().first().copied()
    }

    /// Big-endian 16-bit value, or a lone byte widened.
    pub fn as_u16(&self) -> Option<u16> {
        match *self.as_bytes() {
            [b] => Some(b as u16),
            [hi, lo, ..] => Some(u16::from_be_bytes([hi, lo])),
            [] => None,
        }
    }

    /// Big-endian 32-bit value.
    pub fn as_u32(&self) -> Option<u32> {
        let bytes: [u8; 4] = self.as_bytes().get(..4)?.try_into().ok()?;
        Some(u32::from_be_bytes(bytes))
    }

    /// Little-endian 16-bit value, or a lone byte widened. Scalar results
    /// the firmware copies out of its own memory use this order.
    pub fn as_u16_le(&self) -> Option<u16> {
        match *self.as_bytes() {
            [b] => Some(b as u16),
            [lo, hi, ..] => Some(u16::from_le_bytes([lo, hi])),
            [] => None,
        }
    }

    /// Little-endian 32-bit value.
    pub fn as_u32_le(&self) -> Option<u32> {
        let bytes: [u8; 4] = self.as_bytes().get(..4)?.try_into().ok()?;
        Some(u32::from_le_bytes(bytes))
    }

    /// UTF-8 view of the copied bytes.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(self.as_bytes()).ok()
    }

    pub fn into_vec(mut self) -> Vec<u8> {
        self.buf.truncate(self.len);
        self.buf
    }

    /// Forgets any previous contents.
    pub fn clear(&mut self) {
        self.buf.fill(0);
        self.len = 0;
        self.reported = 0;
    }

    fn fill<I: Iterator<Item = u8>>(
        &mut self,
        bytes: &mut I,
        reported: usize,
    ) -> Result<(), ProtocolError> {
        let copy = reported.min(self.capacity().saturating_sub(1));
        for dst in &mut self.buf[..copy] {
            *dst = bytes.next().ok_or(ProtocolError::StreamExhausted)?;
        }
        if copy < self.buf.len() {
            self.buf[copy] = 0;
        }
        skip(bytes, reported - copy)?;
        self.len = copy;
        self.reported = reported;
        Ok(())
    }
}

/// Parses one reply frame into caller-provided slots.
#[derive(Debug, Clone, Copy)]
pub struct ResponseParser {
    opcode: u8,
    width: ParamWidth,
    start_budget: usize,
}

impl ResponseParser {
    /// Creates a parser expecting the reply to `opcode` with `width`
    /// length prefixes.
    pub fn new(opcode: u8, width: ParamWidth) -> Self {
        Self {
            opcode: opcode & !REPLY_FLAG,
            width,
            start_budget: START_MARKER_BUDGET,
        }
    }

    /// Creates a parser for the reply to `command`.
    pub fn for_command(command: Command) -> Self {
        Self::new(command.opcode(), command.reply_width())
    }

    /// Overrides how many bytes are scanned for the start marker.
    pub fn with_start_budget(mut self, budget: usize) -> Self {
        self.start_budget = budget;
        self
    }

    /// Reply header byte this parser accepts.
    pub fn expected_header(&self) -> u8 {
        self.opcode | REPLY_FLAG
    }

    /// Parses a reply, returning the number of parameters stored.
    ///
    /// Parameters beyond `slots.len()` are consumed and dropped. Every slot
    /// is cleared first, so unfilled slots read as empty.
    pub fn parse<I>(&self, bytes: I, slots: &mut [Slot]) -> Result<usize, ProtocolError>
    where
        I: IntoIterator<Item = u8>,
    {
        let mut bytes = bytes.into_iter();
        for slot in slots.iter_mut() {
            slot.clear();
        }

        scan_for_start(&mut bytes, self.start_budget)?;

        let header = next(&mut bytes)?;
        if header != self.expected_header() {
            return Err(ProtocolError::UnexpectedReply {
                expected: self.expected_header(),
                actual: header,
            });
        }

        let announced = next(&mut bytes)? as usize;
        let kept = announced.min(slots.len());

        for (index, slot) in slots[..kept].iter_mut().enumerate() {
            let reported = read_len(&mut bytes, self.width)?;
            slot.fill(&mut bytes, reported)?;
            if slot.is_truncated() {
                tracing::warn!(
                    "reply {:#04x} param {} truncated: device sent {} bytes, kept {}",
                    self.opcode,
                    index,
                    reported,
                    slot.len()
                );
            }
        }

        for _ in kept..announced {
            let reported = read_len(&mut bytes, self.width)?;
            skip(&mut bytes, reported)?;
        }
        if announced > kept {
            tracing::debug!(
                "reply {:#04x}: dropped {} extra params",
                self.opcode,
                announced - kept
            );
        }

        expect_end(&mut bytes)?;
        Ok(kept)
    }
}

/// Reads a whole frame (command or reply) into an owned [`Frame`].
///
/// `width_of` maps the header byte to the parameter width in use.
pub(crate) fn read_frame<I, F>(
    bytes: I,
    start_budget: usize,
    width_of: F,
) -> Result<Frame, ProtocolError>
where
    I: IntoIterator<Item = u8>,
    F: Fn(u8) -> ParamWidth,
{
    let mut bytes = bytes.into_iter();
    scan_for_start(&mut bytes, start_budget)?;

    let header = next(&mut bytes)?;
    let width = width_of(header);
    let count = next(&mut bytes)? as usize;

    let mut params = Vec::with_capacity(count);
    for _ in 0..count {
        let len = read_len(&mut bytes, width)?;
        let mut param = Vec::with_capacity(len);
        for _ in 0..len {
            param.push(next(&mut bytes)?);
        }
        params.push(Bytes::from(param));
    }

    expect_end(&mut bytes)?;
    Ok(Frame::from_parts(header, width, params))
}

fn scan_for_start<I: Iterator<Item = u8>>(
    bytes: &mut I,
    budget: usize,
) -> Result<(), ProtocolError> {
    for _ in 0..budget {
        match bytes.next() {
            Some(START_CMD) => return Ok(()),
            Some(ERR_CMD) => return Err(ProtocolError::DeviceError),
            Some(_) => continue,
            None => break,
        }
    }
    Err(ProtocolError::MissingStart { budget })
}

/// Consumes alignment padding and the END marker.
fn expect_end<I: Iterator<Item = u8>>(bytes: &mut I) -> Result<(), ProtocolError> {
    loop {
        match next(bytes)? {
            0 => continue,
            END_CMD => return Ok(()),
            other => return Err(ProtocolError::MissingEnd { actual: other }),
        }
    }
}

fn next<I: Iterator<Item = u8>>(bytes: &mut I) -> Result<u8, ProtocolError> {
    bytes.next().ok_or(ProtocolError::StreamExhausted)
}

fn read_len<I: Iterator<Item = u8>>(
    bytes: &mut I,
    width: ParamWidth,
) -> Result<usize, ProtocolError> {
    match width {
        ParamWidth::Narrow => Ok(next(bytes)? as usize),
        ParamWidth::Wide => {
            let hi = next(bytes)?;
            let lo = next(bytes)?;
            Ok(u16::from_be_bytes([hi, lo]) as usize)
        }
    }
}

fn skip<I: Iterator<Item = u8>>(bytes: &mut I, count: usize) -> Result<(), ProtocolError> {
    for _ in 0..count {
        next(bytes)?;
    }
    Ok(())
}
