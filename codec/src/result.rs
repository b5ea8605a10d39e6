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

use thiserror::Error;

/// Result Type for Codec Operations
pub type CodecResult<T> = Result<T, CodecError>;

/// Represents possible errors that can occur while framing or parsing NETCONF traffic.
#[derive(Debug, Error)]
pub enum CodecError {
    /// An I/O error occurred while reading from or writing to the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The byte stream violates the active framing.
    #[error("Framing error: {0}")]
    Framing(String),

    /// A message or chunk exceeded the configured bound.
    #[error("Message of at least {size} bytes exceeds the limit of {limit} bytes")]
    MessageTooLarge {
        /// Bytes seen so far
        size: usize,
        /// Configured limit
        limit: usize,
    },

    /// The peer identity header line could not be parsed.
    #[error("Malformed peer header: {0}")]
    MalformedHeader(String),

    /// The document is not well-formed XML or misses required content.
    #[error("Malformed document: {0}")]
    MalformedDocument(String),

    /// A well-formed document of the wrong kind arrived.
    #[error("Unexpected <{found}> document, expected <{expected}>")]
    UnexpectedDocument {
        /// Root element that was expected
        expected: &'static str,
        /// Root element that arrived
        found: String,
    },
}

impl CodecError {
    /// Whether the error concerns document content rather than the byte stream
    pub fn is_document_error(&self) -> bool {
        matches!(
            self,
            CodecError::MalformedDocument(_) | CodecError::UnexpectedDocument { .. }
        )
    }
}

impl From<quick_xml::Error> for CodecError {
    fn from(err: quick_xml::Error) -> Self {
        CodecError::MalformedDocument(err.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for CodecError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        CodecError::MalformedDocument(err.to_string())
    }
}

impl From<std::str::Utf8Error> for CodecError {
    fn from(err: std::str::Utf8Error) -> Self {
        CodecError::MalformedDocument(err.to_string())
    }
}
