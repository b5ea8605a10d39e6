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

//! Session ID allocation

use crate::SessionId;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide source of session IDs.
///
/// IDs start at 1 and are never reused, including IDs whose negotiation
/// failed. Share one provider (behind an `Arc`) between every factory that
/// serves the same NETCONF server.
#[derive(Debug)]
pub struct SessionIdProvider {
    next_id: AtomicU64,
}

impl SessionIdProvider {
    /// Create a provider whose first ID is 1
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocate the next ID
    pub fn next_id(&self) -> SessionId {
        SessionId::new(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// The ID the next call to `next_id` would return
    pub fn peek(&self) -> SessionId {
        SessionId::new(self.next_id.load(Ordering::SeqCst))
    }
}

impl Default for SessionIdProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_starts_at_one() {
        let provider = SessionIdProvider::new();
        assert_eq!(provider.peek(), SessionId::new(1));
        assert_eq!(provider.next_id(), SessionId::new(1));
        assert_eq!(provider.next_id(), SessionId::new(2));
    }

    #[test]
    fn test_concurrent_allocation_is_unique() {
        let provider = Arc::new(SessionIdProvider::new());
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let provider = provider.clone();
                std::thread::spawn(move || {
                    (0..100).map(|_| provider.next_id()).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for thread in threads {
            for id in thread.join().unwrap() {
                assert!(seen.insert(id));
            }
        }
        assert_eq!(seen.len(), 800);
        assert_eq!(provider.peek(), SessionId::new(801));
    }
}
