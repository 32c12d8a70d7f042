use serde::{Deserialize, Serialize};

use crate::{PacketError, PacketHeader, read_u16, read_u32, write_u16};

pub const MIN_HEADER_LEN: usize = 20;

/// TCP Flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpFlags {
    pub fin: bool,
    pub syn: bool,
    pub rst: bool,
    pub psh: bool,
    pub ack: bool,
    pub urg: bool,
    pub ece: bool,
    pub cwr: bool,
}

impl TcpFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_u8(bits: u8) -> Self {
        Self {
            fin: bits & 0b00000001 != 0,
            syn: bits & 0b00000010 != 0,
            rst: bits & 0b00000100 != 0,
            psh: bits & 0b00001000 != 0,
            ack: bits & 0b00010000 != 0,
            urg: bits & 0b00100000 != 0,
            ece: bits & 0b01000000 != 0,
            cwr: bits & 0b10000000 != 0,
        }
    }

    pub fn as_u8(&self) -> u8 {
        let mut flags = 0u8;
        if self.fin { flags |= 0b00000001; }
        if self.syn { flags |= 0b00000010; }
        if self.rst { flags |= 0b00000100; }
        if self.psh { flags |= 0b00001000; }
        if self.ack { flags |= 0b00010000; }
        if self.urg { flags |= 0b00100000; }
        if self.ece { flags |= 0b01000000; }
        if self.cwr { flags |= 0b10000000; }
        flags
    }
}

/// TCP Header Options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TcpOption {
    EndOfOptionList,
    NoOperation,
    MaximumSegmentSize(u16),
    WindowScale(u8),
    SelectiveAckPermitted,
    Timestamp(u32, u32),
    Unknown(u8),
}

impl TcpOption {
    /// Decodes an options area. Decoding stops at the end-of-list marker or at
    /// the first option whose length runs past the area.
    pub fn parse_all(mut data: &[u8]) -> Vec<TcpOption> {
        let mut options = Vec::new();
        while let Some(&kind) = data.first() {
            match kind {
                0 => {
                    options.push(TcpOption::EndOfOptionList);
                    break;
                }
                1 => {
                    options.push(TcpOption::NoOperation);
                    data = &data[1..];
                    continue;
                }
                _ => {}
            }

            let len = match data.get(1) {
                Some(&len) if len >= 2 && len as usize <= data.len() => len as usize,
                _ => break,
            };
            let value = &data[2..len];
            let option = match (kind, value.len()) {
                (2, 2) => TcpOption::MaximumSegmentSize(read_u16(value, 0)),
                (3, 1) => TcpOption::WindowScale(value[0]),
                (4, 0) => TcpOption::SelectiveAckPermitted,
                (8, 8) => TcpOption::Timestamp(read_u32(value, 0), read_u32(value, 4)),
                _ => TcpOption::Unknown(kind),
            };
            options.push(option);
            data = &data[len..];
        }
        options
    }
}

mod field {
    pub const SRC_PORT: usize = 0;
    pub const DST_PORT: usize = 2;
    pub const SEQ_NUM: usize = 4;
    pub const ACK_NUM: usize = 8;
    pub const DATA_OFF: usize = 12;
    pub const FLAGS: usize = 13;
    pub const WINDOW: usize = 14;
    pub const CHECKSUM: usize = 16;
    pub const URGENT: usize = 18;
}

/// A read/write view of a TCP segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpHeader<T> {
    buffer: T,
}

impl<T: AsRef<[u8]>> TcpHeader<T> {
    pub fn new_unchecked(buffer: T) -> Self {
        Self { buffer }
    }

    pub fn new_checked(buffer: T) -> Result<Self, PacketError> {
        let header = Self::new_unchecked(buffer);
        header.check()?;
        Ok(header)
    }

    /// The segment must hold the fixed header, and the data offset must lie
    /// between 20 bytes and the end of the segment.
    pub fn check(&self) -> Result<(), PacketError> {
        let len = self.buffer.as_ref().len();
        if len < MIN_HEADER_LEN {
            return Err(PacketError::Truncated);
        }
        let header_len = self.header_len();
        if header_len < MIN_HEADER_LEN || header_len > len {
            return Err(PacketError::InvalidHeaderLength);
        }
        Ok(())
    }

    pub fn into_inner(self) -> T {
        self.buffer
    }

    pub fn src_port(&self) -> u16 {
        read_u16(self.buffer.as_ref(), field::SRC_PORT)
    }

    pub fn dst_port(&self) -> u16 {
        read_u16(self.buffer.as_ref(), field::DST_PORT)
    }

    pub fn seq_number(&self) -> u32 {
        read_u32(self.buffer.as_ref(), field::SEQ_NUM)
    }

    pub fn ack_number(&self) -> u32 {
        read_u32(self.buffer.as_ref(), field::ACK_NUM)
    }

    /// Header length in bytes (data offset × 4).
    pub fn header_len(&self) -> usize {
        (self.buffer.as_ref()[field::DATA_OFF] >> 4) as usize * 4
    }

    pub fn flags(&self) -> TcpFlags {
        TcpFlags::from_u8(self.buffer.as_ref()[field::FLAGS])
    }

    pub fn window_size(&self) -> u16 {
        read_u16(self.buffer.as_ref(), field::WINDOW)
    }

    pub fn checksum(&self) -> u16 {
        read_u16(self.buffer.as_ref(), field::CHECKSUM)
    }

    pub fn urgent_pointer(&self) -> u16 {
        read_u16(self.buffer.as_ref(), field::URGENT)
    }

    pub fn options(&self) -> Vec<TcpOption> {
        TcpOption::parse_all(&self.buffer.as_ref()[MIN_HEADER_LEN..self.header_len()])
    }

    pub fn payload(&self) -> &[u8] {
        &self.buffer.as_ref()[self.header_len()..]
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> TcpHeader<T> {
    pub fn set_src_port(&mut self, port: u16) {
        write_u16(self.buffer.as_mut(), field::SRC_PORT, port);
    }

    pub fn set_dst_port(&mut self, port: u16) {
        write_u16(self.buffer.as_mut(), field::DST_PORT, port);
    }

    pub fn set_checksum(&mut self, checksum: u16) {
        write_u16(self.buffer.as_mut(), field::CHECKSUM, checksum);
    }
}

impl<T: AsRef<[u8]>> PacketHeader for TcpHeader<T> {
    fn header_len(&self) -> usize {
        TcpHeader::header_len(self)
    }

    fn header_bytes(&self) -> &[u8] {
        &self.buffer.as_ref()[..TcpHeader::header_len(self)]
    }
}
