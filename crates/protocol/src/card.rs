use serde::{Deserialize, Serialize};

use crate::frame::HardwareFrame;

/// A card presented to the reader.
///
/// `card` is the frame payload rendered as uppercase hex, which is the form
/// the login flow keys accounts by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CardEvent {
    pub card: String,
    pub sequence: u8,
}

impl CardEvent {
    /// Interpret a decoded frame as a card scan. Frames without payload carry
    /// no card and are ignored.
    pub fn from_frame(frame: &HardwareFrame) -> Option<Self> {
        if frame.data.is_empty() {
            return None;
        }
        Some(Self {
            card: hex::encode_upper(&frame.data),
            sequence: frame.sequence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn card_id_is_uppercase_hex_of_payload() {
        let frame = HardwareFrame::new(0x02, 7, 0, 0, vec![0x0a, 0xbc, 0xde, 0x01]).unwrap();
        let event = CardEvent::from_frame(&frame).unwrap();
        assert_eq!(event.card, "0ABCDE01");
        assert_eq!(event.sequence, 7);
    }

    #[test]
    fn empty_payload_is_not_a_card() {
        let frame = HardwareFrame::new(0x02, 0, 0, 0, Vec::new()).unwrap();
        assert!(CardEvent::from_frame(&frame).is_none());
    }
}
