use super::message::{Envelope, MessageType};
use crate::{Error, Result};

/// Default upper bound of a frame, the payload of one Ethernet MTU.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1500;

/// Encodes an envelope as `[type tag][bincode envelope]`.
///
/// Frames larger than `max_frame_size` are refused: datagrams are never fragmented.
pub fn encode(envelope: &Envelope, max_frame_size: usize) -> Result<Vec<u8>> {
    let tag: u8 = envelope.message.message_type().into();
    let body = bincode::serialize(envelope)?;
    let size = body.len() + 1;
    if size > max_frame_size {
        return Err(Error::FrameTooLarge {
            size,
            max: max_frame_size,
        });
    }
    let mut frame = Vec::with_capacity(size);
    frame.push(tag);
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Decodes a frame produced by [encode]. The tag is checked before the body is decoded,
/// and must agree with the decoded message.
pub fn decode(frame: &[u8]) -> Result<Envelope> {
    let (tag, body) = frame
        .split_first()
        .ok_or_else(|| Error::MalformedMessage("empty frame".to_string()))?;
    let message_type = MessageType::try_from(*tag)
        .map_err(|_| Error::MalformedMessage(format!("unknown message type {}", tag)))?;
    let envelope: Envelope = bincode::deserialize(body)?;
    if envelope.message.message_type() != message_type {
        return Err(Error::MalformedMessage(format!(
            "frame tagged {:?} carries {:?}",
            message_type,
            envelope.message.message_type()
        )));
    }
    Ok(envelope)
}

/// Peeks at the type tag of a frame without decoding its body
pub fn peek_type(frame: &[u8]) -> Option<MessageType> {
    frame
        .first()
        .and_then(|tag| MessageType::try_from(*tag).ok())
}
