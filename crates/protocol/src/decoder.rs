//! Byte-at-a-time frame decoder.
//!
//! One decoder per physical serial line. Bytes must be pushed strictly in
//! arrival order from a single consumer; the decoder holds no locks and never
//! blocks.
//!
//! The decoder is lenient: bytes before a header marker are skipped, and a
//! frame whose checksum does not match is dropped without surfacing an error
//! (it is logged at debug level and counted). Either way the state machine
//! returns to `Header` and resynchronizes on the next marker, so a corrupted
//! frame is lost but never blocks the frames behind it.

use tracing::debug;

use crate::frame::{HEADER, HardwareFrame};

/// Field the decoder expects next.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Expect {
    Header,
    Command,
    Sequence,
    Status,
    Option,
    Length,
    Data,
    Checksum,
}

#[derive(Debug, Clone)]
pub struct FrameDecoder {
    expect: Expect,
    command: u8,
    sequence: u8,
    status: u8,
    option: u8,
    length: u8,
    data: Vec<u8>,
    running_xor: u8,
    decoded: u64,
    dropped: u64,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            expect: Expect::Header,
            command: 0,
            sequence: 0,
            status: 0,
            option: 0,
            length: 0,
            data: Vec::new(),
            running_xor: 0,
            decoded: 0,
            dropped: 0,
        }
    }

    /// Current state of the machine.
    pub fn expecting(&self) -> Expect {
        self.expect
    }

    /// Frames successfully decoded so far.
    pub fn decoded_frames(&self) -> u64 {
        self.decoded
    }

    /// Frames dropped on checksum mismatch so far.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped
    }

    /// Feed one byte; returns a frame when this byte completes a valid one.
    pub fn push(&mut self, byte: u8) -> Option<HardwareFrame> {
        match self.expect {
            Expect::Header => {
                if byte == HEADER {
                    self.expect = Expect::Command;
                }
                None
            }
            Expect::Command => {
                self.command = byte;
                self.expect = Expect::Sequence;
                None
            }
            Expect::Sequence => {
                self.sequence = byte;
                self.expect = Expect::Status;
                None
            }
            Expect::Status => {
                self.status = byte;
                self.expect = Expect::Option;
                None
            }
            Expect::Option => {
                self.option = byte;
                self.expect = Expect::Length;
                None
            }
            Expect::Length => {
                self.length = byte;
                self.expect = if byte == 0 { Expect::Checksum } else { Expect::Data };
                None
            }
            Expect::Data => {
                self.data.push(byte);
                self.running_xor ^= byte;
                if self.data.len() == usize::from(self.length) {
                    self.expect = Expect::Checksum;
                }
                None
            }
            Expect::Checksum => self.finish(byte),
        }
    }

    /// Lazily decode frames out of `bytes`.
    pub fn frames<I>(&mut self, bytes: I) -> Frames<'_, I::IntoIter>
    where
        I: IntoIterator<Item = u8>,
    {
        Frames {
            decoder: self,
            bytes: bytes.into_iter(),
        }
    }

    fn finish(&mut self, received: u8) -> Option<HardwareFrame> {
        let data = std::mem::take(&mut self.data);
        let expected = self.running_xor;
        let frame = HardwareFrame {
            command: self.command,
            sequence: self.sequence,
            status: self.status,
            option: self.option,
            data,
            checksum: received,
        };
        self.reset();

        if received == expected {
            self.decoded += 1;
            Some(frame)
        } else {
            self.dropped += 1;
            debug!(
                command = frame.command,
                sequence = frame.sequence,
                expected,
                received,
                "dropping frame with checksum mismatch"
            );
            None
        }
    }

    fn reset(&mut self) {
        self.expect = Expect::Header;
        self.command = 0;
        self.sequence = 0;
        self.status = 0;
        self.option = 0;
        self.length = 0;
        self.data.clear();
        self.running_xor = 0;
    }
}

/// Iterator of frames decoded from a byte source.
///
/// Ends when the byte source ends; a trailing partial frame stays buffered in
/// the decoder and completes if more bytes are pushed later.
#[derive(Debug)]
pub struct Frames<'d, I> {
    decoder: &'d mut FrameDecoder,
    bytes: I,
}

impl<I> Iterator for Frames<'_, I>
where
    I: Iterator<Item = u8>,
{
    type Item = HardwareFrame;

    fn next(&mut self) -> Option<Self::Item> {
        for byte in self.bytes.by_ref() {
            if let Some(frame) = self.decoder.push(byte) {
                return Some(frame);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn frame(command: u8, data: &[u8]) -> HardwareFrame {
        HardwareFrame::new(command, 0, 0, 0, data.to_vec()).unwrap()
    }

    #[test]
    fn skips_noise_before_header() {
        let mut decoder = FrameDecoder::new();
        let mut bytes = vec![0x00, 0xFF, 0x42];
        bytes.extend(frame(0x02, &[0xAB, 0xCD]).encode());

        let frames: Vec<_> = decoder.frames(bytes).collect();
        assert_eq!(frames, vec![frame(0x02, &[0xAB, 0xCD])]);
    }

    #[test]
    fn zero_length_frame_goes_straight_to_checksum() {
        let mut decoder = FrameDecoder::new();
        let bytes = [HEADER, 0x05, 0x01, 0x02, 0x03, 0x00];
        for b in bytes {
            assert!(decoder.push(b).is_none());
        }
        assert_eq!(decoder.expecting(), Expect::Checksum);
        let decoded = decoder.push(0x00).expect("frame");
        assert_eq!(decoded.command, 0x05);
        assert_eq!(decoded.sequence, 0x01);
        assert_eq!(decoded.status, 0x02);
        assert_eq!(decoded.option, 0x03);
        assert!(decoded.data.is_empty());
    }

    #[test]
    fn bad_checksum_drops_frame_and_resyncs() {
        let mut decoder = FrameDecoder::new();
        let mut corrupted = frame(0x02, &[0x10, 0x20]).encode();
        let last = corrupted.len() - 1;
        corrupted[last] ^= 0xFF;

        let mut bytes = corrupted;
        bytes.extend(frame(0x03, &[0x99]).encode());

        let frames: Vec<_> = decoder.frames(bytes).collect();
        assert_eq!(frames, vec![frame(0x03, &[0x99])]);
        assert_eq!(decoder.dropped_frames(), 1);
        assert_eq!(decoder.decoded_frames(), 1);
    }

    #[test]
    fn partial_frame_completes_across_reads() {
        let mut decoder = FrameDecoder::new();
        let encoded = frame(0x02, &[1, 2, 3, 4]).encode();
        let (head, tail) = encoded.split_at(5);

        assert_eq!(decoder.frames(head.iter().copied()).count(), 0);
        let frames: Vec<_> = decoder.frames(tail.iter().copied()).collect();
        assert_eq!(frames, vec![frame(0x02, &[1, 2, 3, 4])]);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: encoding then decoding yields the identical frame.
        #[test]
        fn encode_then_decode_is_identity(
            command in any::<u8>(),
            sequence in any::<u8>(),
            status in any::<u8>(),
            option in any::<u8>(),
            data in prop::collection::vec(any::<u8>(), 0..=255),
        ) {
            let original = HardwareFrame::new(command, sequence, status, option, data).unwrap();
            let mut decoder = FrameDecoder::new();
            let frames: Vec<_> = decoder.frames(original.encode()).collect();
            prop_assert_eq!(frames, vec![original]);
        }

        /// Property: any single-bit flip in the checksum drops the frame and the
        /// next valid frame still decodes.
        #[test]
        fn checksum_bit_flip_drops_only_that_frame(
            data in prop::collection::vec(any::<u8>(), 0..64),
            bit in 0u8..8,
            follow_up in prop::collection::vec(any::<u8>(), 0..16),
        ) {
            let broken = HardwareFrame::new(0x02, 0, 0, 0, data).unwrap();
            let mut bytes = broken.encode();
            let last = bytes.len() - 1;
            bytes[last] ^= 1 << bit;

            let next = HardwareFrame::new(0x03, 1, 0, 0, follow_up).unwrap();
            bytes.extend(next.encode());

            let mut decoder = FrameDecoder::new();
            let frames: Vec<_> = decoder.frames(bytes).collect();
            prop_assert_eq!(frames, vec![next]);
            prop_assert_eq!(decoder.dropped_frames(), 1);
        }
    }
}
