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

//! NETCONF over SSH Server Example
//!
//! Starts the internal engine and an SSH listener on port 8830 that accepts
//! the user `admin` with password `admin`.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --example netconf_ssh_server
//! ```
//!
//! Set `NETCONFD_HOST_KEY` to an OpenSSH private key file to use a stable host
//! key instead of a generated one. Then connect with:
//! ```bash
//! ssh -p 8830 admin@localhost -s netconf
//! ```

use netconfd_server::{
    FileKeyPairProvider, GeneratedKeyPairProvider, KeyPairProvider, NetconfSshServer,
    SshServerConfig, StaticPasswordAuthenticator,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = SshServerConfig::new("127.0.0.1:8830".parse()?);
    let keys: Arc<dyn KeyPairProvider> = match std::env::var("NETCONFD_HOST_KEY") {
        Ok(path) => Arc::new(FileKeyPairProvider::new([path])?),
        Err(_) => Arc::new(GeneratedKeyPairProvider::new()?),
    };
    let auth = Arc::new(StaticPasswordAuthenticator::new().with_user("admin", "admin"));

    let server = NetconfSshServer::new(config, keys, auth).await?;
    println!(
        "NETCONF SSH server on {} (engine on {})",
        server.local_address(),
        server.engine_address()
    );
    println!("Press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;

    let metrics = server.metrics();
    println!(
        "Served {} tunnels over {} connections",
        metrics.total_tunnels, metrics.total_connections
    );
    server.shutdown().await?;

    Ok(())
}
