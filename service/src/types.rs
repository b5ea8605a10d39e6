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

//! Core types for the NETCONF session engine

use netconfd_codec::{CapabilitySet, TransportKind};
use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant, SystemTime};

/// NETCONF session identifier (positive, monotonically increasing, never reused)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    /// Create a new session ID
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the underlying u64 value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Hello exchange progress (stored as atomic u8)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NegotiationState {
    /// Local hello sent, waiting for the peer
    AwaitingHello = 0,
    /// Hello exchange completed, session running
    Negotiated = 1,
    /// Peer hello missing or unacceptable
    NegotiationFailed = 2,
    /// Connection released
    Closed = 3,
}

impl NegotiationState {
    /// Convert from u8 (for atomic operations)
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::AwaitingHello,
            1 => Self::Negotiated,
            2 => Self::NegotiationFailed,
            _ => Self::Closed,
        }
    }

    /// Convert to u8 (for atomic operations)
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Whether `next` is a legal successor of `self`
    pub fn can_transition_to(self, next: NegotiationState) -> bool {
        matches!(
            (self, next),
            (Self::AwaitingHello, Self::Negotiated)
                | (Self::AwaitingHello, Self::NegotiationFailed)
                | (Self::Negotiated, Self::Closed)
                | (Self::NegotiationFailed, Self::Closed)
        )
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AwaitingHello => write!(f, "awaiting-hello"),
            Self::Negotiated => write!(f, "negotiated"),
            Self::NegotiationFailed => write!(f, "negotiation-failed"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Session state (stored as atomic u8 for lock-free state management)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    /// Session is serving requests
    Active = 0,
    /// Session has seen no recent activity
    Idle = 1,
    /// Session is closing (cleanup in progress)
    Closing = 2,
    /// Session is closed
    Closed = 3,
}

impl SessionState {
    /// Convert from u8 (for atomic operations)
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Active,
            1 => Self::Idle,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }

    /// Convert to u8 (for atomic operations)
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Check if the session is in a terminal state
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closing | Self::Closed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Idle => write!(f, "idle"),
            Self::Closing => write!(f, "closing"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Something that happened on a running session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// An rpc was answered with a reply
    RpcSucceeded {
        /// Operation name
        operation: String,
    },
    /// An rpc was answered with an `<rpc-error>`
    RpcFailed {
        /// Operation name, if the request could be parsed
        operation: Option<String>,
    },
    /// A notification was written
    NotificationSent,
    /// The session will close after its next write
    DelayedCloseRequested,
}

/// Read-only view of a session for monitoring
#[derive(Debug, Clone)]
pub struct ManagementSession {
    /// Session ID
    pub session_id: SessionId,
    /// Authenticated user name
    pub username: String,
    /// Source host of the physical connection
    pub source_host: String,
    /// Source port of the physical connection
    pub source_port: u16,
    /// Outer transport
    pub transport: TransportKind,
    /// Wall-clock time the session was established
    pub login_time: SystemTime,
    /// Current state
    pub state: SessionState,
    /// Requests answered successfully
    pub in_rpc_ok: u64,
    /// Requests answered with an error
    pub in_rpc_fail: u64,
    /// `<rpc-error>` replies sent
    pub out_rpc_err: u64,
    /// Notifications sent
    pub out_notif: u64,
    /// Negotiated capabilities
    pub capabilities: CapabilitySet,
}

/// Server snapshot for non-blocking debug information
#[derive(Debug, Clone)]
pub struct ServerSnapshot {
    /// Number of live sessions
    pub active_sessions: usize,
    /// Total sessions since server start
    pub total_sessions: u64,
    /// Loop-back bind address
    pub bind_address: SocketAddr,
    /// Server uptime
    pub uptime: Duration,
    /// Server start time
    pub started_at: Instant,
}

impl fmt::Display for ServerSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "NetconfServer {{ active: {}, total: {}, addr: {}, uptime: {:?} }}",
            self.active_sessions, self.total_sessions, self.bind_address, self.uptime
        )
    }
}
