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

//! `<hello>` documents

use crate::consts::BASE_NAMESPACE;
use crate::{CapabilitySet, CodecError, CodecResult};
use bytes::Bytes;
use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};

/// A parsed or locally built `<hello>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelloMessage {
    capabilities: CapabilitySet,
    session_id: Option<u64>,
}

impl HelloMessage {
    /// Hello as sent by a server, carrying the session id
    pub fn server(capabilities: CapabilitySet, session_id: u64) -> Self {
        Self {
            capabilities,
            session_id: Some(session_id),
        }
    }

    /// Hello as sent by a client
    pub fn client(capabilities: CapabilitySet) -> Self {
        Self {
            capabilities,
            session_id: None,
        }
    }

    /// Advertised capabilities
    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    /// Session id, present only in a server hello
    pub fn session_id(&self) -> Option<u64> {
        self.session_id
    }

    /// Serialize to an XML document (without framing)
    pub fn to_xml(&self) -> String {
        let mut xml = String::with_capacity(256);
        xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        xml.push_str(&format!("<hello xmlns=\"{}\">\n", BASE_NAMESPACE));
        xml.push_str("  <capabilities>\n");
        for capability in self.capabilities.iter() {
            xml.push_str(&format!(
                "    <capability>{}</capability>\n",
                escape(capability)
            ));
        }
        xml.push_str("  </capabilities>\n");
        if let Some(id) = self.session_id {
            xml.push_str(&format!("  <session-id>{}</session-id>\n", id));
        }
        xml.push_str("</hello>");
        xml
    }

    /// Serialize to bytes ready for the encoder
    pub fn to_bytes(&self) -> Bytes {
        Bytes::from(self.to_xml())
    }

    /// Parse a hello document.
    ///
    /// The root must be `hello` in the base namespace and list at least one
    /// capability. A `session-id` is accepted here; whether it is allowed
    /// depends on which side received the hello.
    pub fn parse(document: &[u8]) -> CodecResult<Self> {
        let text = std::str::from_utf8(document)?;
        let mut reader = Reader::from_str(text);
        reader.config_mut().trim_text(true);

        let mut path: Vec<String> = Vec::new();
        let mut capabilities = CapabilitySet::new();
        let mut session_id = None;

        loop {
            match reader.read_event()? {
                Event::Start(element) => {
                    let name = local_name(&element)?;
                    if path.is_empty() {
                        check_root(&element, &name)?;
                    }
                    path.push(name);
                }
                Event::Empty(element) => {
                    let name = local_name(&element)?;
                    if path.is_empty() {
                        check_root(&element, &name)?;
                        return Err(CodecError::MalformedDocument(
                            "hello without capabilities".to_string(),
                        ));
                    }
                }
                Event::End(_) => {
                    path.pop();
                }
                Event::Text(text) => {
                    let value = text.unescape()?;
                    let value = value.trim();
                    match path.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
                        ["hello", "capabilities", "capability"] if !value.is_empty() => {
                            capabilities.insert(value);
                        }
                        ["hello", "session-id"] => {
                            let id = value.parse::<u64>().map_err(|_| {
                                CodecError::MalformedDocument(format!(
                                    "invalid session-id '{}'",
                                    value
                                ))
                            })?;
                            if id == 0 {
                                return Err(CodecError::MalformedDocument(
                                    "session-id must be positive".to_string(),
                                ));
                            }
                            session_id = Some(id);
                        }
                        _ => {}
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if capabilities.is_empty() {
            return Err(CodecError::MalformedDocument(
                "hello without capabilities".to_string(),
            ));
        }
        Ok(Self {
            capabilities,
            session_id,
        })
    }
}

fn local_name(element: &BytesStart<'_>) -> CodecResult<String> {
    Ok(std::str::from_utf8(element.local_name().as_ref())?.to_string())
}

fn check_root(element: &BytesStart<'_>, name: &str) -> CodecResult<()> {
    if name != "hello" {
        return Err(CodecError::UnexpectedDocument {
            expected: "hello",
            found: name.to_string(),
        });
    }
    if !declares_namespace(element, BASE_NAMESPACE)? {
        return Err(CodecError::MalformedDocument(format!(
            "hello is not in namespace {}",
            BASE_NAMESPACE
        )));
    }
    Ok(())
}

/// Whether `element` itself is in `namespace`
///
/// Only the binding for the element's own prefix counts (`xmlns:p` for
/// `<p:name>`, `xmlns` when unprefixed).
pub(crate) fn declares_namespace(element: &BytesStart<'_>, namespace: &str) -> CodecResult<bool> {
    let binding = match element.name().prefix() {
        Some(prefix) => [b"xmlns:".as_slice(), prefix.as_ref()].concat(),
        None => b"xmlns".to_vec(),
    };
    for attribute in element.attributes() {
        let attribute = attribute?;
        if attribute.key.as_ref() == binding.as_slice() {
            return Ok(attribute.unescape_value()? == namespace);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::{BASE_1_0, BASE_1_1, EXI_1_0};

    #[test]
    fn test_server_hello_parses_back() {
        let hello = HelloMessage::server(CapabilitySet::known_base(), 7);
        let parsed = HelloMessage::parse(hello.to_xml().as_bytes()).unwrap();
        assert_eq!(parsed, hello);
        assert!(parsed.capabilities().contains(EXI_1_0));
    }

    #[test]
    fn test_prefixed_client_hello() {
        let xml = br#"<nc:hello xmlns:nc="urn:ietf:params:xml:ns:netconf:base:1.0">
            <nc:capabilities>
              <nc:capability>urn:ietf:params:netconf:base:1.1</nc:capability>
              <nc:capability> urn:ietf:params:netconf:base:1.0 </nc:capability>
            </nc:capabilities>
          </nc:hello>"#;
        let hello = HelloMessage::parse(xml).unwrap();
        assert_eq!(hello.session_id(), None);
        assert!(hello.capabilities().contains(BASE_1_0));
        assert!(hello.capabilities().contains(BASE_1_1));
    }

    #[test]
    fn test_wrong_namespace() {
        let xml = br#"<hello xmlns="urn:example"><capabilities><capability>x</capability></capabilities></hello>"#;
        assert!(matches!(
            HelloMessage::parse(xml),
            Err(CodecError::MalformedDocument(_))
        ));
    }

    #[test]
    fn test_base_namespace_bound_to_another_prefix() {
        // The root's own prefix is bound elsewhere.
        let xml = br#"<x:hello xmlns:x="urn:example" xmlns:nc="urn:ietf:params:xml:ns:netconf:base:1.0">
            <nc:capabilities><nc:capability>urn:ietf:params:netconf:base:1.0</nc:capability></nc:capabilities>
          </x:hello>"#;
        assert!(matches!(
            HelloMessage::parse(xml),
            Err(CodecError::MalformedDocument(_))
        ));

        // Unprefixed root with the base namespace only on a prefix.
        let xml = br#"<hello xmlns="urn:example" xmlns:nc="urn:ietf:params:xml:ns:netconf:base:1.0">
            <capabilities><capability>urn:ietf:params:netconf:base:1.0</capability></capabilities>
          </hello>"#;
        assert!(matches!(
            HelloMessage::parse(xml),
            Err(CodecError::MalformedDocument(_))
        ));
    }

    #[test]
    fn test_rpc_instead_of_hello() {
        let xml = br#"<rpc xmlns="urn:ietf:params:xml:ns:netconf:base:1.0" message-id="1"><get/></rpc>"#;
        assert!(matches!(
            HelloMessage::parse(xml),
            Err(CodecError::UnexpectedDocument { expected: "hello", .. })
        ));
    }

    #[test]
    fn test_empty_hello() {
        let xml = br#"<hello xmlns="urn:ietf:params:xml:ns:netconf:base:1.0"/>"#;
        assert!(HelloMessage::parse(xml).is_err());
    }

    #[test]
    fn test_not_xml() {
        assert!(HelloMessage::parse(b"<hello xmlns=").is_err());
        assert!(HelloMessage::parse(&[0xff, 0xfe]).is_err());
    }
}
