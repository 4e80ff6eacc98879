//! Serial frame model for the card-reader line.
//!
//! Wire layout (all fields one byte unless noted):
//!
//! ```text
//! [HDR=0x1B][CMD][SEQ][STATE][OPT][LEN][DATA: LEN bytes][CHK]
//! ```
//!
//! `CHK` is the XOR of every `DATA` byte (zero for an empty payload).

use thiserror::Error;

/// Protocol marker that starts every frame.
pub const HEADER: u8 = 0x1B;

/// Largest payload a single length byte can declare.
pub const MAX_PAYLOAD: usize = u8::MAX as usize;

/// Bytes surrounding the payload: header, five fixed fields, checksum.
pub const FRAME_OVERHEAD: usize = 7;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("payload of {0} bytes exceeds the {MAX_PAYLOAD}-byte frame limit")]
    PayloadTooLong(usize),
}

/// XOR of all payload bytes.
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, b| acc ^ b)
}

/// One complete frame (header implied).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HardwareFrame {
    pub command: u8,
    pub sequence: u8,
    pub status: u8,
    pub option: u8,
    pub data: Vec<u8>,
    pub checksum: u8,
}

impl HardwareFrame {
    /// Build a frame, computing its checksum.
    pub fn new(
        command: u8,
        sequence: u8,
        status: u8,
        option: u8,
        data: impl Into<Vec<u8>>,
    ) -> Result<Self, FrameError> {
        let data = data.into();
        if data.len() > MAX_PAYLOAD {
            return Err(FrameError::PayloadTooLong(data.len()));
        }
        let checksum = checksum(&data);
        Ok(Self {
            command,
            sequence,
            status,
            option,
            data,
            checksum,
        })
    }

    /// Declared payload length.
    pub fn len(&self) -> u8 {
        // Constructors bound `data` to MAX_PAYLOAD.
        self.data.len() as u8
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// True when the stored checksum matches the payload.
    pub fn is_valid(&self) -> bool {
        self.data.len() <= MAX_PAYLOAD && self.checksum == checksum(&self.data)
    }

    /// Encode into wire bytes, field by field in protocol order.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(FRAME_OVERHEAD + self.data.len());
        self.encode_into(&mut out);
        out
    }

    /// Append wire bytes to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.push(HEADER);
        out.push(self.command);
        out.push(self.sequence);
        out.push(self.status);
        out.push(self.option);
        out.push(self.len());
        out.extend_from_slice(&self.data);
        out.push(self.checksum);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_fixed_layout() {
        let frame = HardwareFrame::new(0x02, 0x01, 0x00, 0x00, vec![0x12, 0x34, 0x56]).unwrap();
        assert_eq!(
            frame.encode(),
            vec![HEADER, 0x02, 0x01, 0x00, 0x00, 0x03, 0x12, 0x34, 0x56, 0x12 ^ 0x34 ^ 0x56]
        );
    }

    #[test]
    fn empty_payload_has_zero_checksum() {
        let frame = HardwareFrame::new(0x01, 0, 0, 0, Vec::new()).unwrap();
        assert_eq!(frame.checksum, 0);
        assert_eq!(frame.encode(), vec![HEADER, 0x01, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let err = HardwareFrame::new(0x01, 0, 0, 0, vec![0u8; 256]).unwrap_err();
        assert_eq!(err, FrameError::PayloadTooLong(256));
    }
}
