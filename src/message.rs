//! Application messages.

/// A complete application message.
///
/// Inbound messages carry the frame identifier they arrived on as
/// `source_id`. Outbound, the same field is the identifier every frame of the
/// message is sent with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Identifier of the sender.
    pub source_id: u32,
    /// Message bytes.
    pub payload: Vec<u8>,
}

impl Message {
    /// Create a new message.
    pub fn new(source_id: u32, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            source_id,
            payload: payload.into(),
        }
    }

    /// Message length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Check if the message has no payload.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Handler invoked with every completed inbound message.
pub type MessageHandler = Box<dyn FnMut(Message) + Send + 'static>;
