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

use crate::consts::{BASE_1_0, BASE_1_1, EXI_1_0};
use std::collections::BTreeSet;
use std::fmt;

/// An ordered set of capability URIs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitySet(BTreeSet<String>);

impl CapabilitySet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// The base capabilities this implementation understands
    pub fn known_base() -> Self {
        [BASE_1_0, BASE_1_1, EXI_1_0].into_iter().collect()
    }

    /// Add a capability, returning whether it was new
    pub fn insert(&mut self, capability: impl Into<String>) -> bool {
        self.0.insert(capability.into())
    }

    /// Add a capability (builder style)
    pub fn with(mut self, capability: impl Into<String>) -> Self {
        self.insert(capability);
        self
    }

    /// Membership test
    pub fn contains(&self, capability: &str) -> bool {
        self.0.contains(capability)
    }

    /// Capabilities present in both sets
    pub fn intersection(&self, other: &CapabilitySet) -> CapabilitySet {
        CapabilitySet(self.0.intersection(&other.0).cloned().collect())
    }

    /// Add every capability of `other`
    pub fn extend(&mut self, other: &CapabilitySet) {
        self.0.extend(other.0.iter().cloned());
    }

    /// Capabilities of `self` missing from `other`
    pub fn difference(&self, other: &CapabilitySet) -> CapabilitySet {
        CapabilitySet(self.0.difference(&other.0).cloned().collect())
    }

    /// Whether `self` only contains members of `other`
    pub fn is_subset(&self, other: &CapabilitySet) -> bool {
        self.0.is_subset(&other.0)
    }

    /// Whether a base protocol version is present
    pub fn has_base(&self) -> bool {
        self.contains(BASE_1_0) || self.contains(BASE_1_1)
    }

    /// Iterate in sorted order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Number of capabilities
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for CapabilitySet {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        CapabilitySet(iter.into_iter().map(Into::into).collect())
    }
}

impl<'a> IntoIterator for &'a CapabilitySet {
    type Item = &'a String;
    type IntoIter = std::collections::btree_set::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, capability) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", capability)?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intersection() {
        let local = CapabilitySet::known_base();
        let peer: CapabilitySet = [BASE_1_0, "urn:example:other"].into_iter().collect();
        let common = local.intersection(&peer);
        assert_eq!(common, CapabilitySet::new().with(BASE_1_0));
        assert!(common.has_base());
    }

    #[test]
    fn test_subset_and_difference() {
        let configured = CapabilitySet::new().with(BASE_1_1).with("urn:bogus");
        assert!(!configured.is_subset(&CapabilitySet::known_base()));
        let unknown = configured.difference(&CapabilitySet::known_base());
        assert_eq!(unknown.iter().collect::<Vec<_>>(), vec!["urn:bogus"]);
    }

    #[test]
    fn test_exi_alone_is_not_base() {
        assert!(!CapabilitySet::new().with(EXI_1_0).has_base());
    }
}
