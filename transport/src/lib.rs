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

//! # Netconfd Transport Selector
//!
//! Picks the best native I/O backend for the process once, and exposes the
//! socket and runtime constructors the rest of the server builds on:
//!
//! - [`select_backend`]: `epoll`, `kqueue` or a portable fallback
//! - [`tcp_socket`], [`bind_listener`], [`bind_datagram`] and [`ClientBootstrap`]
//! - [`EventLoopGroup`] and the [`NoShutdownExecutor`] guard
//! - [`keepalive_options`] and [`set_tcp_md5`] for optional socket tuning
//!
//! This crate has no protocol knowledge.

mod backend;
mod error;
mod executor;
mod keepalive;
mod md5;
mod socket;

pub use backend::{Backend, PORTABLE_TRANSPORT_ENV, select_backend};
pub use error::{TransportError, TransportResult};
pub use executor::{CurrentRuntime, EventLoopGroup, Executor, NoShutdownExecutor};
pub use keepalive::{KeepaliveOptions, apply_keepalive, keepalive_options};
pub use md5::{Md5Secrets, TCP_MD5_MAX_KEY_LEN, set_tcp_md5};
pub use socket::{ClientBootstrap, DEFAULT_BACKLOG, bind_datagram, bind_listener, tcp_socket};
