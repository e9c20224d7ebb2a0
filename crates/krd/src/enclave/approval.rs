//! Approval window: signing requests the user pre-approved until a deadline.

use std::collections::HashMap;

use kr_core::protocol::Fingerprint;

#[derive(Debug, Default)]
pub struct ApprovalWindow {
    until: HashMap<Fingerprint, i64>,
}

impl ApprovalWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Approve `fingerprint` until unix second `until`. Deadlines in the past are ignored.
    pub fn grant(&mut self, fingerprint: Fingerprint, until: i64, now: i64) {
        if until > now {
            self.until.insert(fingerprint, until);
        }
    }

    /// Whether `fingerprint` is approved at `now`. Expired entries are evicted.
    pub fn is_approved(&mut self, fingerprint: &Fingerprint, now: i64) -> bool {
        match self.until.get(fingerprint) {
            Some(&until) if now < until => true,
            Some(_) => {
                self.until.remove(fingerprint);
                false
            }
            None => false,
        }
    }

    pub fn revoke(&mut self, fingerprint: &Fingerprint) -> bool {
        self.until.remove(fingerprint).is_some()
    }

    pub fn clear(&mut self) {
        self.until.clear();
    }

    pub fn live_count(&self, now: i64) -> usize {
        self.until.values().filter(|&&until| now < until).count()
    }
}
