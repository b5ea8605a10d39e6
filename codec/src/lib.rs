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

//! # Netconfd NETCONF Codec
//!
//! Message framing and document helpers for NETCONF (RFC 6241) carried over
//! a byte stream (RFC 6242).
//!
//! ## Core Components
//!
//! ### [`NetconfCodec`]
//!
//! Implements [`Decoder`] and [`Encoder`] from `tokio_util::codec`. Handles both
//! framings:
//!
//! - **End-of-message**: each document is followed by `]]>]]>`. Used by base 1.0
//!   sessions and by every `<hello>`.
//! - **Chunked**: `\n#<size>\n<data>` chunks closed by `\n##\n`. Used once both
//!   peers advertised base 1.1.
//!
//! When built [`NetconfCodec::with_peer_header`], a connection that starts with
//! `[` yields a [`PeerHeader`] frame first.
//!
//! ### Documents
//!
//! - [`HelloMessage`]: capability exchange
//! - [`RpcMessage`]: inbound requests
//! - [`RpcError`], [`ok_reply`], [`data_reply`], [`notification`]: outbound documents
//!
//! ## Usage Example
//!
//! ```rust
//! use netconfd_codec::{CapabilitySet, HelloMessage, NetconfCodec, NetconfFrame};
//! use bytes::BytesMut;
//! use tokio_util::codec::{Decoder, Encoder};
//!
//! # fn example() -> Result<(), netconfd_codec::CodecError> {
//! let mut codec = NetconfCodec::new();
//! let hello = HelloMessage::server(CapabilitySet::known_base(), 1);
//!
//! let mut wire = BytesMut::new();
//! codec.encode(hello.to_bytes(), &mut wire)?;
//!
//! if let Some(NetconfFrame::Message(body)) = codec.decode(&mut wire)? {
//!     assert_eq!(HelloMessage::parse(&body)?.session_id(), Some(1));
//! }
//! # Ok(())
//! # }
//! ```
//!
//! [`Decoder`]: tokio_util::codec::Decoder
//! [`Encoder`]: tokio_util::codec::Encoder

#![warn(missing_docs, future_incompatible, rust_2018_idioms)]

mod capability;
mod codec;
pub mod consts;
mod frame;
mod header;
mod hello;
mod result;
mod rpc;

pub use self::capability::CapabilitySet;
pub use self::codec::NetconfCodec;
pub use self::frame::{Framing, NetconfFrame};
pub use self::header::{DEFAULT_SESSION_TAG, PeerHeader, TransportKind, UNKNOWN_USER};
pub use self::hello::HelloMessage;
pub use self::result::{CodecError, CodecResult};
pub use self::rpc::{
    ErrorSeverity, ErrorTag, ErrorType, RpcError, RpcMessage, data_reply, notification, ok_reply,
    rpc_reply,
};
