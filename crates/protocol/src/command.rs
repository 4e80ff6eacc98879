use crate::frame::HEADER;

/// Command byte of the periodic reader poll.
pub const POLL_COMMAND: u8 = 0x01;

/// Fixed 7-byte command written to the card reader.
///
/// Layout: `[HDR][CMD][SEQ][STATE][OPT1][OPT2][OPT3]`. Unlike inbound frames it
/// carries no length or checksum.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ReaderCommand {
    pub command: u8,
    pub sequence: u8,
    pub state: u8,
    pub options: [u8; 3],
}

impl Default for ReaderCommand {
    fn default() -> Self {
        Self::poll()
    }
}

impl ReaderCommand {
    pub const LEN: usize = 7;

    /// The poll the reader expects roughly once a second.
    pub const fn poll() -> Self {
        Self {
            command: POLL_COMMAND,
            sequence: 0,
            state: 0,
            options: [0; 3],
        }
    }

    pub const fn with_sequence(mut self, sequence: u8) -> Self {
        self.sequence = sequence;
        self
    }

    pub const fn encode(&self) -> [u8; Self::LEN] {
        [
            HEADER,
            self.command,
            self.sequence,
            self.state,
            self.options[0],
            self.options[1],
            self.options[2],
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_encodes_header_and_command() {
        assert_eq!(
            ReaderCommand::poll().with_sequence(3).encode(),
            [0x1B, 0x01, 0x03, 0x00, 0x00, 0x00, 0x00]
        );
    }
}
