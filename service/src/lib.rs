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

//! NETCONF Session Engine
//!
//! The internal NETCONF server that external front ends relay into. Every
//! connection goes through the same steps:
//!
//! - A [`NegotiatorFactory`] allocates a session ID and builds the server hello
//! - A [`NetconfNegotiator`] runs the hello exchange and agrees on capabilities
//! - A [`NetconfServerSession`] answers requests until either side closes
//!
//! # Architecture
//!
//! ```text
//! NetconfServer (loop-back listener)
//!     ↓
//! NegotiatorFactory → NetconfNegotiator
//!     ↓
//! SessionManager
//!     ↓
//! NetconfServerSession → RpcHandler
//! ```
//!
//! Front ends identify the physical peer by writing a one-line peer header
//! before the client's hello; connections without one are attributed to an
//! `unknown` user.
//!
//! # Example
//!
//! ```no_run
//! use netconfd_service::{
//!     DefaultRpcHandler, EngineConfig, NegotiatorFactoryBuilder, NetconfServer,
//!     TracingMonitoringSink,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = NetconfServer::new(EngineConfig::default()).await?;
//!     let factory = NegotiatorFactoryBuilder::new()
//!         .with_monitoring(Arc::new(TracingMonitoringSink))
//!         .build()?;
//!     let handler = DefaultRpcHandler::new(server.manager());
//!     server.start(Arc::new(factory), Arc::new(handler)).await?;
//!     Ok(())
//! }
//! ```

mod config;
mod error;
mod factory;
mod handler;
mod id;
mod manager;
mod negotiator;
mod server;
mod session;
mod types;

pub use config::EngineConfig;
pub use error::{NetconfError, Result};
pub use factory::{
    DEFAULT_CONNECTION_TIMEOUT, NegotiationProposal, NegotiatorFactory, NegotiatorFactoryBuilder,
};
pub use handler::{DefaultRpcHandler, MonitoringSink, RpcHandler, TracingMonitoringSink};
pub use id::SessionIdProvider;
pub use manager::{BroadcastResult, SessionManager};
pub use negotiator::NetconfNegotiator;
pub use server::NetconfServer;
pub use session::{ControlMessage, NetconfServerSession, SessionConfig, SessionHandle};
pub use types::{
    ManagementSession, NegotiationState, ServerSnapshot, SessionEvent, SessionId, SessionState,
};
