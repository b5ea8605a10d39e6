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

//! Lock-free metrics for the SSH front end

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Lock-free front end counters
///
/// Everything is an atomic; `snapshot()` gives a point-in-time copy.
/// The same events are also reported through the `metrics` facade under
/// `netconfd.ssh.*`.
#[derive(Debug)]
pub struct ServerMetrics {
    // SSH connections
    total_connections: AtomicU64,
    active_connections: AtomicU64,

    // Authentication
    auth_succeeded: AtomicU64,
    auth_rejected: AtomicU64,

    // Tunnels
    total_tunnels: AtomicU64,
    active_tunnels: AtomicU64,
    failed_tunnels: AtomicU64,
    rejected_subsystems: AtomicU64,

    total_tunnel_duration_ns: AtomicU64,
    started_at: Instant,
}

impl Default for ServerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self {
            total_connections: AtomicU64::new(0),
            active_connections: AtomicU64::new(0),
            auth_succeeded: AtomicU64::new(0),
            auth_rejected: AtomicU64::new(0),
            total_tunnels: AtomicU64::new(0),
            active_tunnels: AtomicU64::new(0),
            failed_tunnels: AtomicU64::new(0),
            rejected_subsystems: AtomicU64::new(0),
            total_tunnel_duration_ns: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    /// Record a new SSH connection
    pub fn connection_opened(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("netconfd.ssh.connections").increment(1);
    }

    /// Record an SSH connection ending
    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn active_connections(&self) -> u64 {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Record the result of one authentication attempt
    pub fn auth_attempt(&self, accepted: bool) {
        if accepted {
            self.auth_succeeded.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("netconfd.ssh.auth.succeeded").increment(1);
        } else {
            self.auth_rejected.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("netconfd.ssh.auth.rejected").increment(1);
        }
    }

    /// Record a tunnel being started
    pub fn tunnel_opened(&self) {
        self.total_tunnels.fetch_add(1, Ordering::Relaxed);
        self.active_tunnels.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a tunnel ending
    pub fn tunnel_closed(&self, duration: Duration, success: bool) {
        self.active_tunnels.fetch_sub(1, Ordering::Relaxed);
        if !success {
            self.failed_tunnels.fetch_add(1, Ordering::Relaxed);
        }
        self.total_tunnel_duration_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
        metrics::histogram!("netconfd.ssh.tunnel.duration").record(duration.as_secs_f64());
    }

    pub fn active_tunnels(&self) -> u64 {
        self.active_tunnels.load(Ordering::Relaxed)
    }

    /// Record a refused subsystem or channel request
    pub fn subsystem_rejected(&self) {
        self.rejected_subsystems.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("netconfd.ssh.subsystems.rejected").increment(1);
    }

    /// Get a snapshot of all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            auth_succeeded: self.auth_succeeded.load(Ordering::Relaxed),
            auth_rejected: self.auth_rejected.load(Ordering::Relaxed),
            total_tunnels: self.total_tunnels.load(Ordering::Relaxed),
            active_tunnels: self.active_tunnels.load(Ordering::Relaxed),
            failed_tunnels: self.failed_tunnels.load(Ordering::Relaxed),
            rejected_subsystems: self.rejected_subsystems.load(Ordering::Relaxed),
            uptime: self.started_at.elapsed(),
            avg_tunnel_duration: self.average_tunnel_duration(),
        }
    }

    fn average_tunnel_duration(&self) -> Duration {
        let total = self.total_tunnels.load(Ordering::Relaxed);
        if total == 0 {
            return Duration::ZERO;
        }
        let total_ns = self.total_tunnel_duration_ns.load(Ordering::Relaxed);
        Duration::from_nanos(total_ns / total)
    }
}

/// A snapshot of front end metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub total_connections: u64,
    pub active_connections: u64,
    pub auth_succeeded: u64,
    pub auth_rejected: u64,
    pub total_tunnels: u64,
    pub active_tunnels: u64,
    pub failed_tunnels: u64,
    pub rejected_subsystems: u64,
    pub uptime: Duration,
    pub avg_tunnel_duration: Duration,
}

impl MetricsSnapshot {
    /// Share of authentication attempts that were rejected
    pub fn auth_rejection_ratio(&self) -> f64 {
        let attempts = self.auth_succeeded + self.auth_rejected;
        if attempts == 0 {
            return 0.0;
        }
        self.auth_rejected as f64 / attempts as f64
    }

    /// Tunnels started per second of uptime
    pub fn tunnels_per_sec(&self) -> f64 {
        if self.uptime.is_zero() {
            return 0.0;
        }
        self.total_tunnels as f64 / self.uptime.as_secs_f64()
    }
}
