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

//! NETCONF protocol constants

/// NETCONF 1.0 base capability
pub const BASE_1_0: &str = "urn:ietf:params:netconf:base:1.0";
/// NETCONF 1.1 base capability (enables chunked framing)
pub const BASE_1_1: &str = "urn:ietf:params:netconf:base:1.1";
/// EXI encoding capability
pub const EXI_1_0: &str = "urn:ietf:params:netconf:capability:exi:1.0";

/// XML namespace of every base protocol element
pub const BASE_NAMESPACE: &str = "urn:ietf:params:xml:ns:netconf:base:1.0";
/// XML namespace of `<notification>`
pub const NOTIFICATION_NAMESPACE: &str = "urn:ietf:params:xml:ns:netconf:notification:1.0";

/// End-of-message delimiter of 1.0 framing
pub const EOM: &[u8] = b"]]>]]>";
/// Terminator of a chunked message
pub const END_OF_CHUNKS: &[u8] = b"\n##\n";

/// Largest message accepted by default
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;
/// Largest single chunk accepted by default
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;
/// Largest chunk size RFC 6242 allows
pub const MAX_CHUNK_SIZE_LIMIT: u64 = 4_294_967_295;
/// Longest peer header line
pub const MAX_HEADER_LEN: usize = 1024;
