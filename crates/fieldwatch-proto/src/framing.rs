//! Relay message framing for the network transport.
//!
//! A frame is the channel name, one NUL byte, then the payload:
//! `[channel (UTF-8)][0x00][payload]`. Putting the channel first lets
//! prefix-based subscription filters match on the literal channel prefix.

use bytes::{BufMut, Bytes, BytesMut};

use crate::Error;

/// Maximum frame size (4 MB).
pub const MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Separator between channel and payload.
pub const CHANNEL_SEPARATOR: u8 = 0;

/// Encode a channel and payload into one frame.
pub fn encode_frame(channel: &str, payload: &[u8]) -> Result<Bytes, Error> {
    if channel.as_bytes().contains(&CHANNEL_SEPARATOR) {
        return Err(Error::InvalidMessage(format!(
            "channel {:?} contains a NUL byte",
            channel
        )));
    }

    let total = channel.len() + 1 + payload.len();
    if total > MAX_MESSAGE_SIZE {
        return Err(Error::InvalidMessage(format!(
            "frame size {} exceeds maximum {}",
            total, MAX_MESSAGE_SIZE
        )));
    }

    let mut frame = BytesMut::with_capacity(total);
    frame.put_slice(channel.as_bytes());
    frame.put_u8(CHANNEL_SEPARATOR);
    frame.put_slice(payload);
    Ok(frame.freeze())
}

/// Split a frame into its channel and payload.
pub fn decode_frame(data: &[u8]) -> Result<(&str, &[u8]), Error> {
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(Error::InvalidMessage(format!(
            "frame size {} exceeds maximum {}",
            data.len(),
            MAX_MESSAGE_SIZE
        )));
    }

    let split = data
        .iter()
        .position(|b| *b == CHANNEL_SEPARATOR)
        .ok_or_else(|| Error::InvalidMessage("frame has no channel separator".to_string()))?;

    let channel = std::str::from_utf8(&data[..split])
        .map_err(|e| Error::InvalidMessage(format!("channel is not UTF-8: {}", e)))?;
    Ok((channel, &data[split + 1..]))
}
