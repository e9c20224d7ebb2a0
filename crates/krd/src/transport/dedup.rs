//! Replay filter for relay messages.
//!
//! The relay delivers at-least-once, so the same base64 body can show up more
//! than once. Bodies are keyed by their SHA-256 digest in a small LRU.

use std::collections::{HashSet, VecDeque};

use sha2::{Digest, Sha256};

type MessageDigest = [u8; 32];

/// Bounded LRU set of recently seen message digests.
#[derive(Debug)]
pub struct RecentMessages {
    capacity: usize,
    order: VecDeque<MessageDigest>,
    seen: HashSet<MessageDigest>,
}

impl RecentMessages {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
        }
    }

    /// Record `body`; returns `false` if it was seen recently.
    pub fn first_sighting(&mut self, body: &str) -> bool {
        let digest: MessageDigest = Sha256::digest(body.as_bytes()).into();

        if self.seen.contains(&digest) {
            if let Some(pos) = self.order.iter().position(|d| *d == digest) {
                self.order.remove(pos);
            }
            self.order.push_back(digest);
            return false;
        }

        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.order.push_back(digest);
        self.seen.insert(digest);
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_body_is_filtered() {
        let mut recent = RecentMessages::new(4);
        assert!(recent.first_sighting("AAEC"));
        assert!(!recent.first_sighting("AAEC"));
        assert!(recent.first_sighting("AAED"));
        assert_eq!(recent.len(), 2);
    }

    #[test]
    fn oldest_digest_is_evicted_at_capacity() {
        let mut recent = RecentMessages::new(2);
        assert!(recent.first_sighting("a"));
        assert!(recent.first_sighting("b"));
        assert!(recent.first_sighting("c"));
        assert_eq!(recent.len(), 2);
        // "a" fell out, so it counts as new again
        assert!(recent.first_sighting("a"));
        assert!(!recent.first_sighting("c"));
    }

    #[test]
    fn hit_refreshes_recency() {
        let mut recent = RecentMessages::new(2);
        recent.first_sighting("a");
        recent.first_sighting("b");
        assert!(!recent.first_sighting("a"));
        recent.first_sighting("c");
        // "b" was least recently used
        assert!(!recent.first_sighting("a"));
        assert!(recent.first_sighting("b"));
    }

    #[test]
    fn zero_capacity_still_filters_back_to_back_replays() {
        let mut recent = RecentMessages::new(0);
        assert!(recent.first_sighting("x"));
        assert!(!recent.first_sighting("x"));
    }
}
