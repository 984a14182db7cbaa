//! Frame codec: payload segmentation and header classification.
//!
//! # Frame Format
//!
//! Every frame starts with a 1-byte header whose high nibble is the frame
//! type:
//! ```text
//! single:      [0x0N][payload: N bytes]            N = 0..=7
//! first:       [0x10][total][payload: 6 bytes]     total = 7..=118
//! consecutive: [0x2S][payload: 1..=7 bytes]        S = sequence 0..=15
//! ```
//!
//! Consecutive frames of one message are numbered from 0. The counter is
//! 4 bits wide; [`MAX_PAYLOAD`] is sized so a message never needs more than
//! 16 of them.
//!
//! # Example
//!
//! ```
//! use blik::frame::{classify, encode, Pdu};
//!
//! let frames = encode(0x42, &[7u8; 20]).unwrap();
//! assert_eq!(frames.len(), 3);
//!
//! match classify(frames[0].data()).unwrap() {
//!     Pdu::First { total, payload } => {
//!         assert_eq!(total, 20);
//!         assert_eq!(payload.len(), 6);
//!     }
//!     other => panic!("unexpected {:?}", other),
//! }
//! ```

use super::{Frame, FRAME_CAPACITY, MAX_EXTENDED_ID};
use crate::config::MAX_PAYLOAD;

/// Header high nibble of a single frame.
pub const PCI_SINGLE: u8 = 0x00;

/// Header byte of a first frame.
pub const PCI_FIRST: u8 = 0x10;

/// Header high nibble of a consecutive frame.
pub const PCI_CONSECUTIVE: u8 = 0x20;

/// Payload bytes carried by a single frame.
pub const SINGLE_FRAME_CAPACITY: usize = FRAME_CAPACITY - 1;

/// Payload bytes carried by a first frame.
pub const FIRST_FRAME_CAPACITY: usize = FRAME_CAPACITY - 2;

/// Payload bytes carried by a consecutive frame.
pub const CONSECUTIVE_FRAME_CAPACITY: usize = FRAME_CAPACITY - 1;

/// Number of distinct consecutive-frame sequence values.
pub const SEQUENCE_MODULUS: u8 = 16;

const PCI_TYPE_MASK: u8 = 0xF0;
const PCI_VALUE_MASK: u8 = 0x0F;

/// A classified inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pdu<'a> {
    /// Complete message in one frame.
    Single(&'a [u8]),
    /// Start of a segmented message.
    First {
        /// Total message length.
        total: u8,
        /// Leading payload bytes carried by this frame.
        payload: &'a [u8],
    },
    /// Continuation of a segmented message.
    Consecutive {
        /// 4-bit sequence number.
        seq: u8,
        /// Payload bytes carried by this frame.
        payload: &'a [u8],
    },
}

/// Errors that can occur while encoding a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// Payload is longer than the configured maximum.
    PayloadTooLarge {
        /// Payload length.
        len: usize,
        /// Largest accepted length.
        max: usize,
    },
    /// Source identifier does not fit in 29 bits.
    InvalidId(u32),
}

impl std::fmt::Display for EncodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PayloadTooLarge { len, max } => write!(
                f,
                "payload of {} bytes is too large (maximum: {})",
                len, max
            ),
            Self::InvalidId(id) => write!(f, "source id {:#x} exceeds 29 bits", id),
        }
    }
}

impl std::error::Error for EncodeError {}

/// Errors that can occur while classifying an inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Frame carries no header byte.
    EmptyFrame,
    /// Header high nibble is not a known frame type.
    UnknownFrameType(u8),
    /// Frame is shorter than its header promises.
    Truncated {
        /// Bytes the header requires.
        needed: usize,
        /// Bytes actually present.
        got: usize,
    },
    /// First frame announces a length that cannot be segmented: either
    /// above [`MAX_PAYLOAD`] or small enough (at most 6 bytes) to fit a
    /// single frame, which no sender segments.
    InvalidMessageLength(u8),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyFrame => write!(f, "empty frame"),
            Self::UnknownFrameType(header) => write!(f, "unknown frame type {:#04x}", header),
            Self::Truncated { needed, got } => write!(
                f,
                "frame truncated: needed {} bytes, got {}",
                needed, got
            ),
            Self::InvalidMessageLength(len) => {
                write!(f, "first frame announces invalid length {}", len)
            }
        }
    }
}

impl std::error::Error for DecodeError {}

/// Encode a payload into the frames that carry it, in transmission order.
///
/// Fails with [`EncodeError::PayloadTooLarge`] above [`MAX_PAYLOAD`]; no
/// frames are produced in that case.
pub fn encode(source_id: u32, payload: &[u8]) -> Result<Vec<Frame>, EncodeError> {
    encode_bounded(source_id, payload, MAX_PAYLOAD)
}

/// Encode a payload with a tighter length limit than [`MAX_PAYLOAD`].
///
/// `max_payload` is clamped to [`MAX_PAYLOAD`].
pub fn encode_bounded(
    source_id: u32,
    payload: &[u8],
    max_payload: usize,
) -> Result<Vec<Frame>, EncodeError> {
    let max = max_payload.min(MAX_PAYLOAD);
    if payload.len() > max {
        return Err(EncodeError::PayloadTooLarge {
            len: payload.len(),
            max,
        });
    }
    if source_id > MAX_EXTENDED_ID {
        return Err(EncodeError::InvalidId(source_id));
    }

    if payload.len() <= SINGLE_FRAME_CAPACITY {
        let header = PCI_SINGLE | (payload.len() as u8 & PCI_VALUE_MASK);
        return Ok(vec![Frame::from_parts(source_id, &[header], payload)]);
    }

    let (head, rest) = payload.split_at(FIRST_FRAME_CAPACITY);
    let mut frames = Vec::with_capacity(frame_count(payload.len()));
    frames.push(Frame::from_parts(
        source_id,
        &[PCI_FIRST, payload.len() as u8],
        head,
    ));

    for (seq, chunk) in rest.chunks(CONSECUTIVE_FRAME_CAPACITY).enumerate() {
        let header = PCI_CONSECUTIVE | (seq as u8 % SEQUENCE_MODULUS);
        frames.push(Frame::from_parts(source_id, &[header], chunk));
    }

    Ok(frames)
}

/// Number of frames needed to carry a payload of `len` bytes.
pub fn frame_count(len: usize) -> usize {
    if len <= SINGLE_FRAME_CAPACITY {
        1
    } else {
        1 + (len - FIRST_FRAME_CAPACITY).div_ceil(CONSECUTIVE_FRAME_CAPACITY)
    }
}

/// Classify the data bytes of one inbound frame.
///
/// Only as many bytes as the frame holds are read. Trailing padding after a
/// single frame's payload is ignored.
pub fn classify(data: &[u8]) -> Result<Pdu<'_>, DecodeError> {
    let header = *data.first().ok_or(DecodeError::EmptyFrame)?;

    match header & PCI_TYPE_MASK {
        PCI_SINGLE => {
            let len = (header & PCI_VALUE_MASK) as usize;
            if len > SINGLE_FRAME_CAPACITY {
                return Err(DecodeError::UnknownFrameType(header));
            }
            let payload = data.get(1..1 + len).ok_or(DecodeError::Truncated {
                needed: 1 + len,
                got: data.len(),
            })?;
            Ok(Pdu::Single(payload))
        }
        PCI_FIRST => {
            let total = *data.get(1).ok_or(DecodeError::Truncated {
                needed: 2,
                got: data.len(),
            })?;
            if (total as usize) <= FIRST_FRAME_CAPACITY || total as usize > MAX_PAYLOAD {
                return Err(DecodeError::InvalidMessageLength(total));
            }
            Ok(Pdu::First {
                total,
                payload: &data[2..],
            })
        }
        PCI_CONSECUTIVE => Ok(Pdu::Consecutive {
            seq: header & PCI_VALUE_MASK,
            payload: &data[1..],
        }),
        _ => Err(DecodeError::UnknownFrameType(header)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| i as u8).collect()
    }

    /// Classify frames in order and rebuild the payload.
    fn reassemble(frames: &[Frame]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut expected = None;
        for frame in frames {
            match classify(frame.data()).unwrap() {
                Pdu::Single(bytes) => return bytes.to_vec(),
                Pdu::First { total, payload } => {
                    expected = Some(total as usize);
                    out.extend_from_slice(payload);
                }
                Pdu::Consecutive { payload, .. } => out.extend_from_slice(payload),
            }
        }
        assert_eq!(Some(out.len()), expected);
        out
    }

    // ==================== Encode Tests ====================

    #[test]
    fn test_encode_empty_payload() {
        let frames = encode(1, &[]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data(), &[0x00]);
    }

    #[test]
    fn test_encode_single_frame_limit() {
        let data = payload(7);
        let frames = encode(1, &data).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data()[0], 0x07);
        assert_eq!(&frames[0].data()[1..], data.as_slice());
    }

    #[test]
    fn test_encode_eight_bytes() {
        let data = payload(8);
        let frames = encode(0x55, &data).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].data(), &[0x10, 0x08, 0, 1, 2, 3, 4, 5]);
        assert_eq!(frames[1].data(), &[0x20, 6, 7]);
        assert!(frames.iter().all(|f| f.id() == 0x55));
    }

    #[test]
    fn test_encode_max_payload_uses_all_sequences() {
        let frames = encode(1, &payload(MAX_PAYLOAD)).unwrap();
        assert_eq!(frames.len(), 17);
        for (seq, frame) in frames[1..].iter().enumerate() {
            assert_eq!(frame.data()[0], 0x20 | seq as u8);
            assert_eq!(frame.len(), 8);
        }
    }

    #[test]
    fn test_encode_too_large() {
        assert_eq!(
            encode(1, &payload(121)),
            Err(EncodeError::PayloadTooLarge { len: 121, max: 118 })
        );
        assert!(encode(1, &payload(119)).is_err());
    }

    #[test]
    fn test_encode_bounded_limit() {
        assert!(encode_bounded(1, &payload(32), 32).is_ok());
        assert_eq!(
            encode_bounded(1, &payload(33), 32),
            Err(EncodeError::PayloadTooLarge { len: 33, max: 32 })
        );
        // Limit above the protocol maximum is clamped
        assert_eq!(
            encode_bounded(1, &payload(119), 200),
            Err(EncodeError::PayloadTooLarge { len: 119, max: 118 })
        );
    }

    #[test]
    fn test_encode_invalid_id() {
        assert_eq!(
            encode(0x2000_0000, &[1]),
            Err(EncodeError::InvalidId(0x2000_0000))
        );
    }

    #[test]
    fn test_frame_count() {
        assert_eq!(frame_count(0), 1);
        assert_eq!(frame_count(7), 1);
        assert_eq!(frame_count(8), 2);
        assert_eq!(frame_count(13), 2);
        assert_eq!(frame_count(14), 3);
        assert_eq!(frame_count(118), 17);
        for len in 0..=MAX_PAYLOAD {
            assert_eq!(encode(1, &payload(len)).unwrap().len(), frame_count(len));
        }
    }

    // ==================== Classify Tests ====================

    #[test]
    fn test_classify_single() {
        assert_eq!(classify(&[0x03, 9, 8, 7]), Ok(Pdu::Single(&[9, 8, 7])));
        assert_eq!(classify(&[0x00]), Ok(Pdu::Single(&[])));
    }

    #[test]
    fn test_classify_single_ignores_padding() {
        assert_eq!(
            classify(&[0x02, 1, 2, 0xCC, 0xCC, 0xCC, 0xCC, 0xCC]),
            Ok(Pdu::Single(&[1, 2]))
        );
    }

    #[test]
    fn test_classify_single_truncated() {
        assert_eq!(
            classify(&[0x05, 1, 2]),
            Err(DecodeError::Truncated { needed: 6, got: 3 })
        );
    }

    #[test]
    fn test_classify_single_length_out_of_range() {
        assert_eq!(classify(&[0x08, 0]), Err(DecodeError::UnknownFrameType(0x08)));
    }

    #[test]
    fn test_classify_first() {
        assert_eq!(
            classify(&[0x10, 20, 1, 2, 3, 4, 5, 6]),
            Ok(Pdu::First {
                total: 20,
                payload: &[1, 2, 3, 4, 5, 6]
            })
        );
    }

    #[test]
    fn test_classify_short_first_frame() {
        // A short first frame yields what it carries, never a fixed 6 bytes
        assert_eq!(
            classify(&[0x10, 20, 1, 2]),
            Ok(Pdu::First {
                total: 20,
                payload: &[1, 2]
            })
        );
        assert_eq!(
            classify(&[0x10]),
            Err(DecodeError::Truncated { needed: 2, got: 1 })
        );
    }

    #[test]
    fn test_classify_first_invalid_length() {
        assert_eq!(
            classify(&[0x10, 6, 1, 2, 3, 4, 5, 6]),
            Err(DecodeError::InvalidMessageLength(6))
        );
        assert_eq!(
            classify(&[0x10, 119, 1, 2, 3, 4, 5, 6]),
            Err(DecodeError::InvalidMessageLength(119))
        );
    }

    #[test]
    fn test_classify_first_length_fitting_single_frame() {
        for total in 1..=6u8 {
            assert_eq!(
                classify(&[0x10, total, 1, 2, 3]),
                Err(DecodeError::InvalidMessageLength(total))
            );
        }
        // 7 bytes is the smallest length a sender segments
        assert!(matches!(
            classify(&[0x10, 7, 1, 2, 3, 4, 5, 6]),
            Ok(Pdu::First { total: 7, .. })
        ));
    }

    #[test]
    fn test_classify_consecutive() {
        assert_eq!(
            classify(&[0x2F, 1, 2]),
            Ok(Pdu::Consecutive {
                seq: 15,
                payload: &[1, 2]
            })
        );
    }

    #[test]
    fn test_classify_unknown_and_empty() {
        assert_eq!(classify(&[]), Err(DecodeError::EmptyFrame));
        assert_eq!(classify(&[0x30, 0]), Err(DecodeError::UnknownFrameType(0x30)));
        assert_eq!(classify(&[0xFF]), Err(DecodeError::UnknownFrameType(0xFF)));
    }

    // ==================== Round Trip ====================

    #[test]
    fn test_roundtrip_all_lengths() {
        for len in 0..=MAX_PAYLOAD {
            let data = payload(len);
            let frames = encode(3, &data).unwrap();
            assert_eq!(reassemble(&frames), data, "length {}", len);
        }
    }
}
