// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Wire format of chat frames.
//!
//! A frame body is the UTF-8 text followed by one ASCII digit naming the
//! sender (`0` client, `1` server). How bodies are delimited on the stream
//! depends on the [`Framing`] in use.

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::state::Role;

/// Largest body a length-prefixed frame can carry.
pub const MAX_PREFIXED_BODY: usize = u16::MAX as usize;

/// Size of the length header used by [`Framing::LengthPrefixed`].
const LENGTH_HEADER: usize = 2;

/// One chat message as it travels between peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub content: String,
    pub sender: Role,
}

impl Frame {
    pub fn new(content: impl Into<String>, sender: Role) -> Self {
        Self {
            content: content.into(),
            sender,
        }
    }

    /// Encode the body: content bytes plus the trailing sender tag.
    pub fn encode_body(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(self.content.len() + 1);
        body.extend_from_slice(self.content.as_bytes());
        body.push(self.sender.tag());
        body
    }

    /// Decode a body produced by [`Frame::encode_body`].
    pub fn decode_body(body: &[u8]) -> Result<Self> {
        let (&tag, content) = body
            .split_last()
            .ok_or_else(|| anyhow!("Empty frame"))?;

        let sender = Role::from_tag(tag)
            .ok_or_else(|| anyhow!("Invalid sender tag: 0x{:02x}", tag))?;

        Ok(Self {
            content: String::from_utf8_lossy(content).into_owned(),
            sender,
        })
    }
}

/// How frame bodies are delimited on the stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Framing {
    /// No delimiter: every read returns exactly one body. This is what
    /// existing peers speak, and it breaks when the transport splits or
    /// coalesces writes.
    #[default]
    Raw,
    /// Each body is preceded by its length as a little-endian `u16`.
    LengthPrefixed,
}

impl Framing {
    /// Encode a frame into the bytes written in a single call.
    pub fn encode(&self, frame: &Frame) -> Result<Vec<u8>> {
        let body = frame.encode_body();
        match self {
            Framing::Raw => Ok(body),
            Framing::LengthPrefixed => {
                if body.len() > MAX_PREFIXED_BODY {
                    bail!(
                        "Frame too large: {} bytes (max {})",
                        body.len(),
                        MAX_PREFIXED_BODY
                    );
                }
                let mut out = Vec::with_capacity(LENGTH_HEADER + body.len());
                out.extend_from_slice(&(body.len() as u16).to_le_bytes());
                out.extend_from_slice(&body);
                Ok(out)
            }
        }
    }

    /// Create the per-stream decoder for this framing.
    pub fn decoder(&self) -> FrameDecoder {
        FrameDecoder::new(*self)
    }
}

/// Turns chunks returned by stream reads into frames.
#[derive(Debug)]
pub struct FrameDecoder {
    framing: Framing,
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new(framing: Framing) -> Self {
        Self {
            framing,
            buffer: Vec::new(),
        }
    }

    /// Feed the bytes of one read.
    ///
    /// Returns every frame completed by this chunk. Malformed frames are
    /// returned as errors in position so the caller can log and skip them.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<Frame>> {
        if chunk.is_empty() {
            return Vec::new();
        }

        match self.framing {
            Framing::Raw => vec![Frame::decode_body(chunk)],
            Framing::LengthPrefixed => {
                self.buffer.extend_from_slice(chunk);
                let mut frames = Vec::new();

                while self.buffer.len() >= LENGTH_HEADER {
                    let len = u16::from_le_bytes([self.buffer[0], self.buffer[1]]) as usize;
                    if self.buffer.len() < LENGTH_HEADER + len {
                        break;
                    }
                    let body: Vec<u8> = self
                        .buffer
                        .drain(..LENGTH_HEADER + len)
                        .skip(LENGTH_HEADER)
                        .collect();
                    frames.push(Frame::decode_body(&body));
                }

                if !self.buffer.is_empty() {
                    debug!("Holding {} bytes of a partial frame", self.buffer.len());
                }
                frames
            }
        }
    }

    /// Bytes received but not yet part of a complete frame.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_client_frame() {
        let frame = Frame::new("hi", Role::Client);
        assert_eq!(Framing::Raw.encode(&frame).unwrap(), b"hi0".to_vec());
    }

    #[test]
    fn test_decode_server_frame() {
        let frame = Frame::decode_body(b"hello1").unwrap();
        assert_eq!(frame.content, "hello");
        assert_eq!(frame.sender, Role::Server);
    }

    #[test]
    fn test_roundtrip_unicode() {
        let frame = Frame::new("¿qué tal? 👋", Role::Server);
        let decoded = Frame::decode_body(&frame.encode_body()).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_trailing_digit_in_content() {
        // The tag is always the last byte, so content may end in a digit.
        let frame = Frame::new("room 7", Role::Client);
        let decoded = Frame::decode_body(&frame.encode_body()).unwrap();
        assert_eq!(decoded.content, "room 7");
        assert_eq!(decoded.sender, Role::Client);
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let frame = Frame::decode_body(&[0xff, b'a', b'1']).unwrap();
        assert_eq!(frame.content, "\u{fffd}a");
        assert_eq!(frame.sender, Role::Server);
    }

    #[test]
    fn test_tag_only_frame() {
        let frame = Frame::decode_body(b"1").unwrap();
        assert_eq!(frame.content, "");
        assert_eq!(frame.sender, Role::Server);
    }

    #[test]
    fn test_malformed_frames() {
        assert!(Frame::decode_body(b"").is_err());
        assert!(Frame::decode_body(b"hello").is_err());
        assert!(Frame::decode_body(b"hello2").is_err());
    }

    #[test]
    fn test_raw_decoder_one_frame_per_read() {
        let mut decoder = Framing::Raw.decoder();
        let frames = decoder.push(b"hello1");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_ref().unwrap(), &Frame::new("hello", Role::Server));
        assert!(decoder.push(b"").is_empty());
    }

    #[test]
    fn test_length_prefixed_split_and_coalesced() {
        let a = Framing::LengthPrefixed
            .encode(&Frame::new("first", Role::Client))
            .unwrap();
        let b = Framing::LengthPrefixed
            .encode(&Frame::new("second", Role::Server))
            .unwrap();
        assert_eq!(&a[..2], &[6, 0]);

        let mut stream = a.clone();
        stream.extend_from_slice(&b);

        let mut decoder = Framing::LengthPrefixed.decoder();
        let first = decoder.push(&stream[..3]);
        assert!(first.is_empty());
        assert_eq!(decoder.pending(), 3);

        let rest: Vec<Frame> = decoder
            .push(&stream[3..])
            .into_iter()
            .map(|f| f.unwrap())
            .collect();
        assert_eq!(
            rest,
            vec![Frame::new("first", Role::Client), Frame::new("second", Role::Server)]
        );
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn test_length_prefixed_rejects_oversized() {
        let frame = Frame::new("x".repeat(MAX_PREFIXED_BODY), Role::Client);
        assert!(Framing::LengthPrefixed.encode(&frame).is_err());
        assert!(Framing::Raw.encode(&frame).is_ok());
    }

    #[test]
    fn test_framing_config_names() {
        #[derive(Deserialize)]
        struct Wrapper {
            framing: Framing,
        }
        let parsed: Wrapper = toml::from_str("framing = \"length-prefixed\"").unwrap();
        assert_eq!(parsed.framing, Framing::LengthPrefixed);
        let parsed: Wrapper = toml::from_str("framing = \"raw\"").unwrap();
        assert_eq!(parsed.framing, Framing::Raw);
    }
}
