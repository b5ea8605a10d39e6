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

//! Peer identity header
//!
//! A connection relayed through a loop-back socket loses the address of the
//! real client. The relay therefore writes one line before any NETCONF data:
//!
//! ```text
//! [admin@192.0.2.7:50122;transport="ssh";session-id="ssh-3"]
//! ```

use crate::{CodecError, CodecResult};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

/// Username used when a connection carries no header
pub const UNKNOWN_USER: &str = "unknown";
/// Session tag used when a connection carries no header
pub const DEFAULT_SESSION_TAG: &str = "client";

/// How the client reached the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// NETCONF over SSH
    Ssh,
    /// Plain TCP
    Tcp,
}

impl TransportKind {
    /// Wire name
    pub fn as_str(self) -> &'static str {
        match self {
            TransportKind::Ssh => "ssh",
            TransportKind::Tcp => "tcp",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = CodecError;

    fn from_str(s: &str) -> CodecResult<Self> {
        match s {
            "ssh" => Ok(TransportKind::Ssh),
            "tcp" => Ok(TransportKind::Tcp),
            other => Err(CodecError::MalformedHeader(format!(
                "unknown transport '{}'",
                other
            ))),
        }
    }
}

/// Identity of the real peer of a relayed connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerHeader {
    username: String,
    source_host: String,
    source_port: u16,
    transport: TransportKind,
    session_tag: String,
}

impl PeerHeader {
    /// Create a header.
    ///
    /// Characters that would break the line format are replaced by `_`.
    pub fn new(
        username: impl AsRef<str>,
        source: SocketAddr,
        transport: TransportKind,
        session_tag: impl AsRef<str>,
    ) -> Self {
        Self {
            username: sanitize(username.as_ref()),
            source_host: source.ip().to_string(),
            source_port: source.port(),
            transport,
            session_tag: sanitize(session_tag.as_ref()),
        }
    }

    /// Header for a directly connected client that sent none
    pub fn unknown(source: SocketAddr) -> Self {
        Self::new(UNKNOWN_USER, source, TransportKind::Tcp, DEFAULT_SESSION_TAG)
    }

    /// Authenticated user name
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Client address as text
    pub fn source_host(&self) -> &str {
        &self.source_host
    }

    /// Client port
    pub fn source_port(&self) -> u16 {
        self.source_port
    }

    /// Transport the client used
    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    /// Relay-assigned session tag
    pub fn session_tag(&self) -> &str {
        &self.session_tag
    }

    /// Header line including the terminating newline
    pub fn to_line(&self) -> String {
        format!("{}\n", self)
    }

    /// Parse a header line, with or without its newline
    pub fn parse(line: &str) -> CodecResult<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        let inner = line
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
            .ok_or_else(|| CodecError::MalformedHeader("missing brackets".to_string()))?;

        let (identity, attributes) = inner
            .split_once(';')
            .ok_or_else(|| CodecError::MalformedHeader("missing attributes".to_string()))?;
        let (username, endpoint) = identity
            .rsplit_once('@')
            .ok_or_else(|| CodecError::MalformedHeader("missing '@'".to_string()))?;
        let (host, port) = endpoint
            .rsplit_once(':')
            .ok_or_else(|| CodecError::MalformedHeader("missing port".to_string()))?;
        let source_port = port
            .parse::<u16>()
            .map_err(|_| CodecError::MalformedHeader(format!("bad port '{}'", port)))?;
        if username.is_empty() || host.is_empty() {
            return Err(CodecError::MalformedHeader(
                "empty username or host".to_string(),
            ));
        }

        let mut transport = None;
        let mut session_tag = None;
        for attribute in attributes.split(';').filter(|a| !a.is_empty()) {
            let (key, value) = attribute.split_once('=').ok_or_else(|| {
                CodecError::MalformedHeader(format!("bad attribute '{}'", attribute))
            })?;
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .ok_or_else(|| {
                    CodecError::MalformedHeader(format!("unquoted value for '{}'", key))
                })?;
            match key {
                "transport" => transport = Some(value.parse::<TransportKind>()?),
                "session-id" => session_tag = Some(value.to_string()),
                // Unknown attributes are tolerated for forward compatibility.
                _ => {}
            }
        }

        Ok(Self {
            username: username.to_string(),
            source_host: host.trim_start_matches('[').trim_end_matches(']').to_string(),
            source_port,
            transport: transport
                .ok_or_else(|| CodecError::MalformedHeader("missing transport".to_string()))?,
            session_tag: session_tag
                .ok_or_else(|| CodecError::MalformedHeader("missing session-id".to_string()))?,
        })
    }
}

impl fmt::Display for PeerHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}@{}:{};transport=\"{}\";session-id=\"{}\"]",
            self.username, self.source_host, self.source_port, self.transport, self.session_tag
        )
    }
}

fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            ';' | '"' | '[' | ']' | '\r' | '\n' => '_',
            c => c,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format() {
        let header = PeerHeader::new(
            "admin",
            "192.0.2.7:50122".parse().unwrap(),
            TransportKind::Ssh,
            "ssh-3",
        );
        assert_eq!(
            header.to_line(),
            "[admin@192.0.2.7:50122;transport=\"ssh\";session-id=\"ssh-3\"]\n"
        );
    }

    #[test]
    fn test_parse_ipv6_and_at_in_username() {
        let header = PeerHeader::new(
            "ops@example.com",
            "[2001:db8::1]:830".parse().unwrap(),
            TransportKind::Ssh,
            "ssh-1",
        );
        let parsed = PeerHeader::parse(&header.to_line()).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(parsed.username(), "ops@example.com");
        assert_eq!(parsed.source_host(), "2001:db8::1");
        assert_eq!(parsed.source_port(), 830);
    }

    #[test]
    fn test_unknown_defaults() {
        let header = PeerHeader::unknown("127.0.0.1:4000".parse().unwrap());
        assert_eq!(header.username(), UNKNOWN_USER);
        assert_eq!(header.transport(), TransportKind::Tcp);
        assert_eq!(header.session_tag(), DEFAULT_SESSION_TAG);
    }

    #[test]
    fn test_sanitized_username() {
        let header = PeerHeader::new(
            "evil;user\"]",
            "127.0.0.1:1".parse().unwrap(),
            TransportKind::Ssh,
            "t",
        );
        assert_eq!(header.username(), "evil_user__");
        assert_eq!(PeerHeader::parse(&header.to_line()).unwrap(), header);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for line in [
            "admin@host:1;transport=\"ssh\";session-id=\"x\"",
            "[admin@host;transport=\"ssh\";session-id=\"x\"]",
            "[admin@host:99999;transport=\"ssh\";session-id=\"x\"]",
            "[admin@host:22;transport=\"udp\";session-id=\"x\"]",
            "[admin@host:22;transport=\"ssh\"]",
            "[admin@host:22;transport=ssh;session-id=\"x\"]",
        ] {
            assert!(
                matches!(PeerHeader::parse(line), Err(CodecError::MalformedHeader(_))),
                "accepted {}",
                line
            );
        }
    }
}
