//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

use super::{CodecError, Framing, NetconfFrame, PeerHeader, consts};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{trace, warn};

/// Header handling at the start of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeaderState {
    /// A `[`-prefixed first line is decoded as a peer header
    Expected,
    /// Header seen, skipped, or disabled
    Done,
}

/// Chunked decoder position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    /// Expecting `\n#<size>\n` or `\n##\n`
    Header,
    /// Inside a chunk with this many bytes left
    Data(usize),
}

/// A codec for NETCONF message framing.
///
/// Decodes a byte stream into [`NetconfFrame`]s and encodes message bodies
/// with the active [`Framing`]. Every connection starts in end-of-message
/// framing; after a hello exchange in which both peers advertise base 1.1 the
/// owner switches to chunked framing with [`NetconfCodec::set_framing`].
///
/// The decoder never yields a partial message: a frame is produced only once
/// its delimiter (or its final chunk) has been received in full.
#[derive(Debug)]
pub struct NetconfCodec {
    framing: Framing,
    header: HeaderState,
    chunk: ChunkState,
    assembled: BytesMut,
    scanned: usize,
    max_message_size: usize,
    max_chunk_size: usize,
}

impl NetconfCodec {
    /// Create a codec in end-of-message framing without header support
    pub fn new() -> NetconfCodec {
        NetconfCodec {
            framing: Framing::EndOfMessage,
            header: HeaderState::Done,
            chunk: ChunkState::Header,
            assembled: BytesMut::new(),
            scanned: 0,
            max_message_size: consts::DEFAULT_MAX_MESSAGE_SIZE,
            max_chunk_size: consts::DEFAULT_MAX_CHUNK_SIZE,
        }
    }

    /// Decode a leading `[...]` line as a [`PeerHeader`] frame
    pub fn with_peer_header(mut self) -> Self {
        self.header = HeaderState::Expected;
        self
    }

    /// Bound the size of a single message
    pub fn with_max_message_size(mut self, limit: usize) -> Self {
        self.max_message_size = limit;
        self
    }

    /// Bound the size of a single chunk
    pub fn with_max_chunk_size(mut self, limit: usize) -> Self {
        self.max_chunk_size = limit.min(consts::MAX_CHUNK_SIZE_LIMIT as usize);
        self
    }

    /// Active framing
    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// Switch framing for all following messages in both directions
    pub fn set_framing(&mut self, framing: Framing) {
        trace!(from = ?self.framing, to = ?framing, "Switching framing");
        self.framing = framing;
        self.chunk = ChunkState::Header;
        self.assembled.clear();
        self.scanned = 0;
    }

    /// Configured message size limit
    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    fn decode_header(&mut self, src: &mut BytesMut) -> Result<Option<NetconfFrame>, CodecError> {
        if src.is_empty() {
            return Ok(None);
        }
        if src[0] != b'[' {
            self.header = HeaderState::Done;
            return Ok(None);
        }
        let Some(end) = src.iter().position(|b| *b == b'\n') else {
            if src.len() > consts::MAX_HEADER_LEN {
                return Err(CodecError::MalformedHeader(format!(
                    "no newline within {} bytes",
                    consts::MAX_HEADER_LEN
                )));
            }
            return Ok(None);
        };
        let line = src.split_to(end + 1);
        let text = std::str::from_utf8(&line)
            .map_err(|e| CodecError::MalformedHeader(e.to_string()))?;
        let header = PeerHeader::parse(text)?;
        self.header = HeaderState::Done;
        Ok(Some(NetconfFrame::Header(header)))
    }

    fn decode_end_of_message(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, CodecError> {
        let start = self.scanned.saturating_sub(consts::EOM.len() - 1);
        let found = src[start..]
            .windows(consts::EOM.len())
            .position(|window| window == consts::EOM)
            .map(|offset| start + offset);

        match found {
            Some(end) => {
                if end > self.max_message_size {
                    return Err(CodecError::MessageTooLarge {
                        size: end,
                        limit: self.max_message_size,
                    });
                }
                let message = src.split_to(end).freeze();
                src.advance(consts::EOM.len());
                self.scanned = 0;
                Ok(Some(message))
            }
            None => {
                if src.len() > self.max_message_size + consts::EOM.len() {
                    return Err(CodecError::MessageTooLarge {
                        size: src.len(),
                        limit: self.max_message_size,
                    });
                }
                self.scanned = src.len();
                Ok(None)
            }
        }
    }

    fn decode_chunked(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, CodecError> {
        loop {
            match self.chunk {
                ChunkState::Header => {
                    if src.len() < 3 {
                        return Ok(None);
                    }
                    if src[0] != b'\n' || src[1] != b'#' {
                        return Err(CodecError::Framing(format!(
                            "expected chunk header, found 0x{:02X} 0x{:02X}",
                            src[0], src[1]
                        )));
                    }
                    if src[2] == b'#' {
                        if src.len() < 4 {
                            return Ok(None);
                        }
                        if src[3] != b'\n' {
                            return Err(CodecError::Framing(
                                "malformed end-of-chunks marker".to_string(),
                            ));
                        }
                        src.advance(consts::END_OF_CHUNKS.len());
                        if self.assembled.is_empty() {
                            return Err(CodecError::Framing(
                                "end-of-chunks without any chunk".to_string(),
                            ));
                        }
                        return Ok(Some(self.assembled.split().freeze()));
                    }

                    // "\n#" + at most 10 digits + "\n"
                    let Some(newline) = src[2..].iter().take(11).position(|b| *b == b'\n') else {
                        if src.len() >= 13 {
                            return Err(CodecError::Framing("chunk size too long".to_string()));
                        }
                        return Ok(None);
                    };
                    let size = parse_chunk_size(&src[2..2 + newline])?;
                    if size > self.max_chunk_size {
                        return Err(CodecError::MessageTooLarge {
                            size,
                            limit: self.max_chunk_size,
                        });
                    }
                    src.advance(2 + newline + 1);
                    self.chunk = ChunkState::Data(size);
                }
                ChunkState::Data(remaining) => {
                    if src.is_empty() {
                        return Ok(None);
                    }
                    let take = remaining.min(src.len());
                    if self.assembled.len() + take > self.max_message_size {
                        return Err(CodecError::MessageTooLarge {
                            size: self.assembled.len() + take,
                            limit: self.max_message_size,
                        });
                    }
                    self.assembled.extend_from_slice(&src.split_to(take));
                    self.chunk = if take == remaining {
                        ChunkState::Header
                    } else {
                        ChunkState::Data(remaining - take)
                    };
                }
            }
        }
    }
}

fn parse_chunk_size(digits: &[u8]) -> Result<usize, CodecError> {
    if digits.is_empty() || digits[0] == b'0' || !digits.iter().all(u8::is_ascii_digit) {
        return Err(CodecError::Framing(format!(
            "invalid chunk size '{}'",
            String::from_utf8_lossy(digits)
        )));
    }
    let size = digits
        .iter()
        .fold(0u64, |acc, d| acc * 10 + u64::from(d - b'0'));
    if size > consts::MAX_CHUNK_SIZE_LIMIT {
        return Err(CodecError::Framing(format!("chunk size {} out of range", size)));
    }
    Ok(size as usize)
}

impl Default for NetconfCodec {
    fn default() -> Self {
        NetconfCodec::new()
    }
}

impl Decoder for NetconfCodec {
    type Item = NetconfFrame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<NetconfFrame>, Self::Error> {
        if self.header == HeaderState::Expected {
            if let Some(frame) = self.decode_header(src)? {
                return Ok(Some(frame));
            }
            if self.header == HeaderState::Expected {
                return Ok(None);
            }
        }
        let message = match self.framing {
            Framing::EndOfMessage => self.decode_end_of_message(src)?,
            Framing::Chunked => self.decode_chunked(src)?,
        };
        Ok(message.map(NetconfFrame::Message))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<NetconfFrame>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        let dangling = !self.assembled.is_empty() || self.chunk != ChunkState::Header;
        if dangling || src.iter().any(|b| !b.is_ascii_whitespace()) {
            warn!(
                remaining = src.len(),
                "Connection closed in the middle of a message"
            );
            return Err(CodecError::Framing("truncated message at end of stream".to_string()));
        }
        src.clear();
        Ok(None)
    }
}

impl Encoder<Bytes> for NetconfCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.len() > self.max_message_size {
            return Err(CodecError::MessageTooLarge {
                size: item.len(),
                limit: self.max_message_size,
            });
        }
        match self.framing {
            Framing::EndOfMessage => {
                dst.reserve(item.len() + consts::EOM.len());
                dst.put_slice(&item);
                dst.put_slice(consts::EOM);
            }
            Framing::Chunked => {
                if item.is_empty() {
                    return Err(CodecError::Framing("cannot chunk an empty message".to_string()));
                }
                for chunk in item.chunks(self.max_chunk_size) {
                    dst.reserve(chunk.len() + 14);
                    dst.put_slice(format!("\n#{}\n", chunk.len()).as_bytes());
                    dst.put_slice(chunk);
                }
                dst.put_slice(consts::END_OF_CHUNKS);
            }
        }
        Ok(())
    }
}

impl Encoder<&str> for NetconfCodec {
    type Error = CodecError;

    fn encode(&mut self, item: &str, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.encode(Bytes::copy_from_slice(item.as_bytes()), dst)
    }
}

impl Encoder<NetconfFrame> for NetconfCodec {
    type Error = CodecError;

    /// Headers are written verbatim as one line, messages with the active framing.
    fn encode(&mut self, item: NetconfFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            NetconfFrame::Header(header) => {
                dst.put_slice(header.to_line().as_bytes());
                Ok(())
            }
            NetconfFrame::Message(body) => self.encode(body, dst),
        }
    }
}
