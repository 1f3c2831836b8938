// SPDX-License-Identifier: Apache-2.0
//! Length-prefixed JSON framing for session messages.
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Message;

/// Errors raised while framing or parsing packets.
#[derive(Debug, Error)]
pub enum WireError {
    /// The buffer ends before the length prefix completes.
    #[error("incomplete length prefix")]
    IncompleteLength,
    /// The buffer ends before the announced frame completes.
    #[error("incomplete frame: need {need} bytes, have {have}")]
    IncompleteFrame {
        /// Bytes the frame announces.
        need: usize,
        /// Bytes available after the prefix.
        have: usize,
    },
    /// The payload was not valid JSON for a [`Message`].
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// A framed packet: len (u32, BE) + JSON payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Packet {
    /// Raw JSON payload bytes.
    pub bytes: Vec<u8>,
}

impl Packet {
    /// Encodes a [`Message`] into a length-prefixed JSON packet.
    pub fn encode(msg: &Message) -> Result<Vec<u8>, WireError> {
        let body = serde_json::to_vec(msg)?;
        let mut out = Vec::with_capacity(4 + body.len());
        out.extend_from_slice(&(body.len() as u32).to_be_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Decodes one packet from the buffer, returning the message and the
    /// number of bytes consumed.
    pub fn decode(stream: &[u8]) -> Result<(Message, usize), WireError> {
        if stream.len() < 4 {
            return Err(WireError::IncompleteLength);
        }
        let len = u32::from_be_bytes([stream[0], stream[1], stream[2], stream[3]]) as usize;
        if stream.len() < 4 + len {
            return Err(WireError::IncompleteFrame {
                need: len,
                have: stream.len() - 4,
            });
        }
        let msg = serde_json::from_slice(&stream[4..4 + len])?;
        Ok((msg, 4 + len))
    }
}
