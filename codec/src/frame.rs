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

use crate::PeerHeader;
use bytes::Bytes;

/// Message delimiting scheme of a NETCONF connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Framing {
    /// `]]>]]>` terminated messages (base 1.0, and every hello)
    #[default]
    EndOfMessage,
    /// RFC 6242 chunked framing (base 1.1)
    Chunked,
}

/// One decoded unit of a NETCONF connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetconfFrame {
    /// Peer identity line, only ever first on a relayed connection
    Header(PeerHeader),
    /// One complete XML document
    Message(Bytes),
}

impl NetconfFrame {
    /// Message body, if this is a message
    pub fn into_message(self) -> Option<Bytes> {
        match self {
            NetconfFrame::Message(body) => Some(body),
            NetconfFrame::Header(_) => None,
        }
    }
}
