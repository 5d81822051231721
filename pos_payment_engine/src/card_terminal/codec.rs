//! Framing for the card terminal's TCP protocol.
//!
//! Every message is a UTF-8 XML document preceded by its length as a 4-byte big-endian unsigned integer. TCP gives no
//! message boundaries, so inbound bytes are accumulated in a [`FrameDecoder`] and cut into frames as they complete.
use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

pub const LENGTH_PREFIX_SIZE: usize = 4;
/// Frames larger than this can only come from a corrupted stream.
pub const MAX_FRAME_LENGTH: u32 = 10 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("Invalid frame length {0}. Frames must be between 1 and {MAX_FRAME_LENGTH} bytes.")]
    InvalidFrameLength(u32),
}

pub fn encode_frame(xml: &str) -> Bytes {
    let payload = xml.as_bytes();
    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    #[allow(clippy::cast_possible_truncation)]
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    buf.freeze()
}

fn check_length(len: u32) -> Result<usize, CodecError> {
    if len == 0 || len > MAX_FRAME_LENGTH {
        return Err(CodecError::InvalidFrameLength(len));
    }
    Ok(len as usize)
}

/// Cuts every complete frame out of `buffer`. Returns the frames in order, and the bytes of the incomplete frame that
/// follows them, if any.
pub fn decode_frames(buffer: &[u8]) -> Result<(Vec<String>, &[u8]), CodecError> {
    let mut frames = Vec::new();
    let mut rest = buffer;
    while rest.len() >= LENGTH_PREFIX_SIZE {
        let len = check_length(u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]))?;
        if rest.len() < LENGTH_PREFIX_SIZE + len {
            break;
        }
        let payload = &rest[LENGTH_PREFIX_SIZE..LENGTH_PREFIX_SIZE + len];
        frames.push(String::from_utf8_lossy(payload).into_owned());
        rest = &rest[LENGTH_PREFIX_SIZE + len..];
    }
    Ok((frames, rest))
}

/// Streaming counterpart of [`decode_frames`] that keeps partial frames across reads.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self { buffer: BytesMut::with_capacity(8 * 1024) }
    }

    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>, CodecError> {
        self.buffer.extend_from_slice(chunk);
        self.drain()
    }

    /// Returns every complete frame currently buffered.
    pub fn drain(&mut self) -> Result<Vec<String>, CodecError> {
        let mut frames = Vec::new();
        while self.buffer.len() >= LENGTH_PREFIX_SIZE {
            let prefix = [self.buffer[0], self.buffer[1], self.buffer[2], self.buffer[3]];
            let len = check_length(u32::from_be_bytes(prefix))?;
            if self.buffer.len() < LENGTH_PREFIX_SIZE + len {
                self.buffer.reserve(LENGTH_PREFIX_SIZE + len - self.buffer.len());
                break;
            }
            self.buffer.advance(LENGTH_PREFIX_SIZE);
            let payload = self.buffer.split_to(len);
            frames.push(String::from_utf8_lossy(&payload).into_owned());
        }
        Ok(frames)
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

//--------------------------------------------   Classification   ----------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    FinancialResult,
    AbortNotification,
    CardEntry,
    CardRemoval,
    Display,
    Error,
    Other,
}

const CLASSIFIERS: [(&str, MessageKind); 7] = [
    ("FinancialTransactionResponse", MessageKind::FinancialResult),
    ("AbortTransactionResponse", MessageKind::AbortNotification),
    ("AbortNotification", MessageKind::AbortNotification),
    ("ErrorNotification", MessageKind::Error),
    ("CardEntryNotification", MessageKind::CardEntry),
    ("CardRemovalNotification", MessageKind::CardRemoval),
    ("DisplayNotification", MessageKind::Display),
];

/// Classifies a frame by the element names it contains. Earlier entries win, so a financial result that also carries
/// display text is still a financial result.
pub fn classify(xml: &str) -> MessageKind {
    CLASSIFIERS
        .iter()
        .find(|(name, _)| has_element(xml, name))
        .map(|(_, kind)| *kind)
        .unwrap_or(MessageKind::Other)
}

/// True if `xml` contains an opening (or self-closing) tag named exactly `name`.
pub(crate) fn has_element(xml: &str, name: &str) -> bool {
    let needle = format!("<{name}");
    let mut offset = 0;
    while let Some(pos) = xml[offset..].find(&needle) {
        let end = offset + pos + needle.len();
        match xml[end..].chars().next() {
            Some('>') | Some('/') => return true,
            Some(c) if c.is_whitespace() => return true,
            _ => offset = end,
        }
    }
    false
}
