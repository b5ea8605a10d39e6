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

//! `<rpc>`, `<rpc-reply>`, `<rpc-error>` and `<notification>` documents

use crate::consts::{BASE_NAMESPACE, NOTIFICATION_NAMESPACE};
use crate::hello::declares_namespace;
use crate::{CodecError, CodecResult};
use bytes::Bytes;
use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::Event;
use std::fmt;

/// An inbound `<rpc>` request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcMessage {
    message_id: Option<String>,
    operation: String,
    document: Bytes,
}

impl RpcMessage {
    /// Parse a request document.
    ///
    /// Fails with [`CodecError::UnexpectedDocument`] when the root is not
    /// `rpc`, and with [`CodecError::MalformedDocument`] when the request has
    /// no operation element.
    pub fn parse(document: Bytes) -> CodecResult<Self> {
        let text = std::str::from_utf8(&document)?;
        let mut reader = Reader::from_str(text);
        reader.config_mut().trim_text(true);

        let mut depth = 0usize;
        let mut message_id = None;
        let mut operation = None;

        loop {
            let (element, is_empty) = match reader.read_event()? {
                Event::Start(element) => (element, false),
                Event::Empty(element) => (element, true),
                Event::End(_) => {
                    depth = depth.saturating_sub(1);
                    continue;
                }
                Event::Eof => break,
                _ => continue,
            };
            let name = std::str::from_utf8(element.local_name().as_ref())?.to_string();
            match depth {
                0 => {
                    if name != "rpc" {
                        return Err(CodecError::UnexpectedDocument {
                            expected: "rpc",
                            found: name,
                        });
                    }
                    if !declares_namespace(&element, BASE_NAMESPACE)? {
                        return Err(CodecError::MalformedDocument(format!(
                            "rpc is not in namespace {}",
                            BASE_NAMESPACE
                        )));
                    }
                    for attribute in element.attributes() {
                        let attribute = attribute?;
                        if attribute.key.local_name().as_ref() == b"message-id" {
                            message_id = Some(attribute.unescape_value()?.into_owned());
                        }
                    }
                }
                1 if operation.is_none() => operation = Some(name),
                _ => {}
            }
            if !is_empty {
                depth += 1;
            }
        }

        let operation = operation
            .ok_or_else(|| CodecError::MalformedDocument("rpc without operation".to_string()))?;
        Ok(Self {
            message_id,
            operation,
            document,
        })
    }

    /// `message-id` attribute, echoed in the reply
    pub fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref()
    }

    /// Local name of the operation element
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Raw request document
    pub fn document(&self) -> &Bytes {
        &self.document
    }

    /// Text of the first `<name>` element directly inside the operation
    pub fn operation_parameter(&self, name: &str) -> Option<String> {
        let text = std::str::from_utf8(&self.document).ok()?;
        let mut reader = Reader::from_str(text);
        reader.config_mut().trim_text(true);

        let mut depth = 0usize;
        let mut capture = false;
        loop {
            match reader.read_event().ok()? {
                Event::Start(element) => {
                    capture = depth == 2 && element.local_name().as_ref() == name.as_bytes();
                    depth += 1;
                }
                Event::Text(text) if capture => {
                    return text.unescape().ok().map(|value| value.trim().to_string());
                }
                Event::End(_) => {
                    capture = false;
                    depth = depth.saturating_sub(1);
                }
                Event::Eof => return None,
                _ => {}
            }
        }
    }
}

/// `error-type` of an `<rpc-error>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    /// Secure transport layer
    Transport,
    /// Messages layer
    Rpc,
    /// Operations layer
    Protocol,
    /// Content layer
    Application,
}

impl ErrorType {
    /// Wire name
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorType::Transport => "transport",
            ErrorType::Rpc => "rpc",
            ErrorType::Protocol => "protocol",
            ErrorType::Application => "application",
        }
    }
}

/// `error-tag` of an `<rpc-error>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum ErrorTag {
    InUse,
    InvalidValue,
    TooBig,
    MissingAttribute,
    BadAttribute,
    UnknownAttribute,
    MissingElement,
    BadElement,
    UnknownElement,
    UnknownNamespace,
    AccessDenied,
    LockDenied,
    ResourceDenied,
    RollbackFailed,
    DataExists,
    DataMissing,
    OperationNotSupported,
    OperationFailed,
    MalformedMessage,
}

impl ErrorTag {
    /// Wire name
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorTag::InUse => "in-use",
            ErrorTag::InvalidValue => "invalid-value",
            ErrorTag::TooBig => "too-big",
            ErrorTag::MissingAttribute => "missing-attribute",
            ErrorTag::BadAttribute => "bad-attribute",
            ErrorTag::UnknownAttribute => "unknown-attribute",
            ErrorTag::MissingElement => "missing-element",
            ErrorTag::BadElement => "bad-element",
            ErrorTag::UnknownElement => "unknown-element",
            ErrorTag::UnknownNamespace => "unknown-namespace",
            ErrorTag::AccessDenied => "access-denied",
            ErrorTag::LockDenied => "lock-denied",
            ErrorTag::ResourceDenied => "resource-denied",
            ErrorTag::RollbackFailed => "rollback-failed",
            ErrorTag::DataExists => "data-exists",
            ErrorTag::DataMissing => "data-missing",
            ErrorTag::OperationNotSupported => "operation-not-supported",
            ErrorTag::OperationFailed => "operation-failed",
            ErrorTag::MalformedMessage => "malformed-message",
        }
    }
}

/// `error-severity` of an `<rpc-error>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorSeverity {
    /// The request failed
    #[default]
    Error,
    /// Reported, but the request was processed
    Warning,
}

impl ErrorSeverity {
    /// Wire name
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorSeverity::Error => "error",
            ErrorSeverity::Warning => "warning",
        }
    }
}

/// A protocol-level error reported to the peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcError {
    error_type: ErrorType,
    error_tag: ErrorTag,
    severity: ErrorSeverity,
    message: Option<String>,
}

impl RpcError {
    /// Create an error of severity `error`
    pub fn new(error_type: ErrorType, error_tag: ErrorTag) -> Self {
        Self {
            error_type,
            error_tag,
            severity: ErrorSeverity::Error,
            message: None,
        }
    }

    /// Attach a human readable `error-message`
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Change the severity
    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }

    /// `error-type`
    pub fn error_type(&self) -> ErrorType {
        self.error_type
    }

    /// `error-tag`
    pub fn error_tag(&self) -> ErrorTag {
        self.error_tag
    }

    /// `error-message`, if any
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Full `<rpc-reply>` carrying this error
    pub fn to_reply(&self, message_id: Option<&str>) -> Bytes {
        let mut body = String::with_capacity(256);
        body.push_str("<rpc-error>");
        body.push_str(&format!("<error-type>{}</error-type>", self.error_type.as_str()));
        body.push_str(&format!("<error-tag>{}</error-tag>", self.error_tag.as_str()));
        body.push_str(&format!(
            "<error-severity>{}</error-severity>",
            self.severity.as_str()
        ));
        if let Some(message) = &self.message {
            body.push_str(&format!(
                "<error-message xml:lang=\"en\">{}</error-message>",
                escape(message.as_str())
            ));
        }
        body.push_str("</rpc-error>");
        rpc_reply(message_id, &body)
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.error_type.as_str(), self.error_tag.as_str())?;
        if let Some(message) = &self.message {
            write!(f, ": {}", message)?;
        }
        Ok(())
    }
}

impl std::error::Error for RpcError {}

/// `<rpc-reply>` wrapping arbitrary content
pub fn rpc_reply(message_id: Option<&str>, body: &str) -> Bytes {
    let id = message_id
        .map(|id| format!(" message-id=\"{}\"", escape(id)))
        .unwrap_or_default();
    Bytes::from(format!(
        "<rpc-reply xmlns=\"{}\"{}>{}</rpc-reply>",
        BASE_NAMESPACE, id, body
    ))
}

/// `<rpc-reply>` containing `<ok/>`
pub fn ok_reply(message_id: Option<&str>) -> Bytes {
    rpc_reply(message_id, "<ok/>")
}

/// `<rpc-reply>` containing `<data>`
pub fn data_reply(message_id: Option<&str>, data: &str) -> Bytes {
    rpc_reply(message_id, &format!("<data>{}</data>", data))
}

/// `<notification>` with the given RFC 3339 event time
pub fn notification(event_time: &str, content: &str) -> Bytes {
    Bytes::from(format!(
        "<notification xmlns=\"{}\"><eventTime>{}</eventTime>{}</notification>",
        NOTIFICATION_NAMESPACE,
        escape(event_time),
        content
    ))
}
