//! Command and reply frame layout.
//!
//! ```text
//! +-------+---------------+---------+-----------------------------+---------+-----+
//! | START | C/R | opcode  | N.PARAM | (LEN | LEN_HI LEN_LO) DATA  | pad 0x00| END |
//! | 8 bit | 1bit| 7 bit   | 8 bit   | narrow 8 bit / wide 16 bit  |   ...   | 8bit|
//! +-------+---------------+---------+-----------------------------+---------+-----+
//! ```
//!
//! Zero padding runs until the frame length is 3 mod 4, so the END byte
//! always lands the total on a multiple of 4.

use crate::command::Command;
use crate::error::ProtocolError;
use crate::{END_CMD, MAX_FRAME_SIZE, REPLY_FLAG, START_CMD};
use bytes::{BufMut, Bytes, BytesMut};
use std::net::Ipv4Addr;

/// Size of START + opcode + param count.
pub const FRAME_HEADER_SIZE: usize = 3;

/// Length prefix encoding for frame parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParamWidth {
    /// 1-byte length prefix; control fields up to 255 bytes.
    #[default]
    Narrow,
    /// 2-byte big-endian length prefix; bulk payloads.
    Wide,
}

impl ParamWidth {
    /// Size of the length prefix in bytes.
    pub fn prefix_len(self) -> usize {
        match self {
            ParamWidth::Narrow => 1,
            ParamWidth::Wide => 2,
        }
    }

    /// Largest parameter the prefix can describe.
    pub fn max_param_len(self) -> usize {
        match self {
            ParamWidth::Narrow => u8::MAX as usize,
            ParamWidth::Wide => u16::MAX as usize,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ParamWidth::Narrow => "narrow",
            ParamWidth::Wide => "wide",
        }
    }
}

/// A command or reply frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Opcode byte as it appears on the wire, reply flag included.
    header: u8,
    /// Length prefix encoding shared by every parameter.
    width: ParamWidth,
    /// Parameter payloads in order.
    params: Vec<Bytes>,
}

impl Frame {
    /// Creates a command frame, using the command's own request width.
    pub fn command(command: Command) -> Self {
        Self::raw(command.opcode(), command.request_width())
    }

    /// Creates a command frame from a raw opcode. The reply bit is cleared.
    pub fn raw(opcode: u8, width: ParamWidth) -> Self {
        Self {
            header: opcode & !REPLY_FLAG,
            width,
            params: Vec::new(),
        }
    }

    /// Creates the reply frame a device sends for `command`.
    pub fn reply(command: Command) -> Self {
        Self::raw_reply(command.opcode(), command.reply_width())
    }

    /// Creates a reply frame from a raw opcode.
    pub fn raw_reply(opcode: u8, width: ParamWidth) -> Self {
        Self {
            header: opcode | REPLY_FLAG,
            width,
            params: Vec::new(),
        }
    }

    pub(crate) fn from_parts(header: u8, width: ParamWidth, params: Vec<Bytes>) -> Self {
        Self {
            header,
            width,
            params,
        }
    }

    /// Appends a parameter.
    pub fn with_param(mut self, param: impl Into<Bytes>) -> Self {
        self.params.push(param.into());
        self
    }

    /// Appends a single-byte parameter.
    pub fn with_u8(self, value: u8) -> Self {
        self.with_param(Bytes::copy_from_slice(&[value]))
    }

    /// Appends a big-endian 16-bit parameter.
    pub fn with_u16(self, value: u16) -> Self {
        self.with_param(Bytes::copy_from_slice(&value.to_be_bytes()))
    }

    /// Appends a big-endian 32-bit parameter.
    pub fn with_u32(self, value: u32) -> Self {
        self.with_param(Bytes::copy_from_slice(&value.to_be_bytes()))
    }

    /// Appends a little-endian 16-bit parameter.
    pub fn with_u16_le(self, value: u16) -> Self {
        self.with_param(Bytes::copy_from_slice(&value.to_le_bytes()))
    }

    /// Appends a little-endian 32-bit parameter.
    pub fn with_u32_le(self, value: u32) -> Self {
        self.with_param(Bytes::copy_from_slice(&value.to_le_bytes()))
    }

    /// Appends an IPv4 address as four octets in network order.
    pub fn with_ipv4(self, addr: Ipv4Addr) -> Self {
        self.with_param(Bytes::copy_from_slice(&addr.octets()))
    }

    /// Appends a parameter in place.
    pub fn push_param(&mut self, param: impl Into<Bytes>) {
        self.params.push(param.into());
    }

    /// Opcode byte as sent, reply flag included.
    pub fn header(&self) -> u8 {
        self.header
    }

    /// Opcode without the reply flag.
    pub fn opcode(&self) -> u8 {
        self.header & !REPLY_FLAG
    }

    /// The command this frame carries, if the opcode is known.
    pub fn command_kind(&self) -> Option<Command> {
        Command::from_opcode(self.header)
    }

    pub fn is_reply(&self) -> bool {
        self.header & REPLY_FLAG != 0
    }

    pub fn width(&self) -> ParamWidth {
        self.width
    }

    pub fn params(&self) -> &[Bytes] {
        &self.params
    }

    /// Length of the encoded frame, padding and END included.
    pub fn encoded_len(&self) -> usize {
        let unpadded = FRAME_HEADER_SIZE
            + self
                .params
                .iter()
                .map(|p| self.width.prefix_len() + p.len())
                .sum::<usize>();
        (unpadded + 1).div_ceil(4) * 4
    }

    /// Encodes the frame into a fresh buffer.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf)?;
        Ok(buf)
    }

    /// Encodes the frame, appending to `buf`. Returns the number of bytes
    /// written.
    pub fn encode_into(&self, buf: &mut BytesMut) -> Result<usize, ProtocolError> {
        if self.params.len() > u8::MAX as usize {
            return Err(ProtocolError::TooManyParams(self.params.len()));
        }

        for (index, param) in self.params.iter().enumerate() {
            if param.len() > self.width.max_param_len() {
                return Err(ProtocolError::ParamTooLong {
                    index,
                    len: param.len(),
                    width: self.width.name(),
                });
            }
        }

        let total = self.encoded_len();
        if total > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: total,
                max: MAX_FRAME_SIZE,
            });
        }

        let start = buf.len();
        buf.reserve(total);

        buf.put_u8(START_CMD);
        buf.put_u8(self.header);
        buf.put_u8(self.params.len() as u8);

        for param in &self.params {
            match self.width {
                ParamWidth::Narrow => buf.put_u8(param.len() as u8),
                ParamWidth::Wide => buf.put_u16(param.len() as u16),
            }
            buf.put_slice(param);
        }

        while (buf.len() - start) & 3 != 3 {
            buf.put_u8(0);
        }
        buf.put_u8(END_CMD);

        Ok(buf.len() - start)
    }

    /// Decodes a command frame, picking the parameter width from the opcode.
    pub fn decode_command(bytes: &[u8]) -> Result<Self, ProtocolError> {
        crate::codec::read_frame(bytes.iter().copied(), crate::START_MARKER_BUDGET, |header| {
            Command::from_opcode(header)
                .map(Command::request_width)
                .unwrap_or_default()
        })
    }

    /// Decodes a reply frame, picking the parameter width from the opcode.
    pub fn decode_reply(bytes: &[u8]) -> Result<Self, ProtocolError> {
        crate::codec::read_frame(bytes.iter().copied(), crate::START_MARKER_BUDGET, |header| {
            Command::from_opcode(header)
                .map(Command::reply_width)
                .unwrap_or_default()
        })
    }

    /// Decodes a frame whose parameter width is already known.
    pub fn decode(bytes: &[u8], width: ParamWidth) -> Result<Self, ProtocolError> {
        crate::codec::read_frame(bytes.iter().copied(), crate::START_MARKER_BUDGET, |_| width)
    }
}
