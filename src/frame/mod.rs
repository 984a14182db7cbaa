//! Bus frames and the segmentation codec.
//!
//! A frame is the atomic unit on the bus: an extended (29-bit) identifier and
//! up to 8 data bytes. The first data byte is the protocol header that tells
//! single, first and consecutive frames apart; see [`codec`] for the layout.

pub mod codec;

pub use codec::{classify, encode, encode_bounded, DecodeError, EncodeError, Pdu};

/// Maximum number of data bytes in one frame.
pub const FRAME_CAPACITY: usize = 8;

/// Largest valid extended (29-bit) frame identifier.
pub const MAX_EXTENDED_ID: u32 = 0x1FFF_FFFF;

/// A single bus frame.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    id: u32,
    len: u8,
    data: [u8; FRAME_CAPACITY],
}

impl Frame {
    /// Create a frame from an identifier and its data bytes.
    ///
    /// Returns an error if the identifier does not fit in 29 bits or the data
    /// is longer than [`FRAME_CAPACITY`].
    pub fn new(id: u32, data: &[u8]) -> Result<Self, FrameError> {
        if id > MAX_EXTENDED_ID {
            return Err(FrameError::InvalidId(id));
        }
        if data.len() > FRAME_CAPACITY {
            return Err(FrameError::TooLong(data.len()));
        }
        let mut frame = Self {
            id,
            len: data.len() as u8,
            data: [0; FRAME_CAPACITY],
        };
        frame.data[..data.len()].copy_from_slice(data);
        Ok(frame)
    }

    /// Build a frame from a header and a payload slice.
    ///
    /// Callers guarantee `id` is valid and `header.len() + payload.len()`
    /// fits the frame.
    pub(crate) fn from_parts(id: u32, header: &[u8], payload: &[u8]) -> Self {
        let total = header.len() + payload.len();
        debug_assert!(total <= FRAME_CAPACITY);
        let mut data = [0; FRAME_CAPACITY];
        data[..header.len()].copy_from_slice(header);
        data[header.len()..total].copy_from_slice(payload);
        Self {
            id,
            len: total as u8,
            data,
        }
    }

    /// Frame identifier (the sender id for this protocol).
    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// The data bytes actually carried by this frame.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    /// Number of data bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// Check if the frame carries no data at all.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Frame({:#x}, [", self.id)?;
        for (i, byte) in self.data().iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{:02X}", byte)?;
        }
        write!(f, "])")
    }
}

/// Errors from constructing a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Identifier does not fit in 29 bits.
    InvalidId(u32),
    /// More data bytes than a frame can hold.
    TooLong(usize),
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidId(id) => write!(f, "frame id {:#x} exceeds 29 bits", id),
            Self::TooLong(len) => write!(
                f,
                "frame data of {} bytes exceeds capacity of {}",
                len, FRAME_CAPACITY
            ),
        }
    }
}

impl std::error::Error for FrameError {}
