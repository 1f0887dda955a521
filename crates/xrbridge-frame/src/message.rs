use bytes::Bytes;

use crate::codec::Frame;

/// Upper bound on parts per message accepted by readers.
pub const MAX_PARTS: usize = 16;

/// An ordered list of parts sent as one unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    parts: Vec<Bytes>,
}

impl Message {
    /// Create an empty message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a single-part message.
    pub fn single(part: impl Into<Bytes>) -> Self {
        Self {
            parts: vec![part.into()],
        }
    }

    /// Append a part.
    pub fn push(&mut self, part: impl Into<Bytes>) {
        self.parts.push(part.into());
    }

    /// Builder form of [`Message::push`].
    pub fn with_part(mut self, part: impl Into<Bytes>) -> Self {
        self.push(part);
        self
    }

    pub fn parts(&self) -> &[Bytes] {
        &self.parts
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Total payload bytes across all parts.
    pub fn payload_len(&self) -> usize {
        self.parts.iter().map(Bytes::len).sum()
    }

    pub fn into_parts(self) -> Vec<Bytes> {
        self.parts
    }

    /// Frames for this message, with the more flag set on all but the last.
    pub fn frames(&self) -> impl Iterator<Item = Frame> + '_ {
        let last = self.parts.len().saturating_sub(1);
        self.parts.iter().enumerate().map(move |(i, part)| {
            if i < last {
                Frame::more(part.clone())
            } else {
                Frame::new(part.clone())
            }
        })
    }
}

impl From<Vec<Bytes>> for Message {
    fn from(parts: Vec<Bytes>) -> Self {
        Self { parts }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_flag_all_but_last() {
        let msg = Message::single("C").with_part("{}").with_part("tail");
        let flags: Vec<bool> = msg.frames().map(|f| f.has_more()).collect();
        assert_eq!(flags, vec![true, true, false]);
    }

    #[test]
    fn single_part_has_no_more_flag() {
        let msg = Message::single("L");
        let frames: Vec<Frame> = msg.frames().collect();
        assert_eq!(frames.len(), 1);
        assert!(!frames[0].has_more());
    }

    #[test]
    fn payload_len_sums_parts() {
        let msg = Message::single("O").with_part("12345");
        assert_eq!(msg.payload_len(), 6);
        assert_eq!(msg.len(), 2);
    }
}
