//! Frame layout: a big-endian `u32` payload length, then the MessagePack payload.

use serde::{de::DeserializeOwned, Serialize};

/// Upper bound on a single RPC frame payload.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

const HEADER_LEN: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame header needs 4 bytes, got {0}")]
    MissingHeader(usize),
    #[error("frame announces {announced} payload bytes but carries {carried}")]
    Incomplete { announced: usize, carried: usize },
    #[error("frame payload of {0} bytes exceeds the limit")]
    TooLarge(usize),
    #[error("failed to encode frame payload: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("failed to decode frame payload: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

pub fn encode_frame<T: Serialize>(msg: &T) -> Result<Vec<u8>, FrameError> {
    let payload = rmp_serde::to_vec(msg)?;
    let announced = u32::try_from(payload.len())
        .ok()
        .filter(|&len| len as usize <= MAX_FRAME_LEN)
        .ok_or(FrameError::TooLarge(payload.len()))?;
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&announced.to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Decodes exactly the announced payload; bytes after it are ignored.
pub fn decode_frame<T: DeserializeOwned>(frame: &[u8]) -> Result<T, FrameError> {
    let header: [u8; HEADER_LEN] = frame
        .get(..HEADER_LEN)
        .and_then(|header| header.try_into().ok())
        .ok_or(FrameError::MissingHeader(frame.len()))?;
    let announced = u32::from_be_bytes(header) as usize;
    if announced > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge(announced));
    }
    let rest = &frame[HEADER_LEN..];
    let payload = rest
        .get(..announced)
        .ok_or(FrameError::Incomplete { announced, carried: rest.len() })?;
    Ok(rmp_serde::from_slice(payload)?)
}
