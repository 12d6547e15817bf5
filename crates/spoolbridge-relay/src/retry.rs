// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Bounded redelivery for print messages.
//
// Attempts are counted per *distinct message body* (SHA-256 of the raw
// bytes), not per broker delivery tag: a redelivered message gets a new tag
// but the same fingerprint.  Two independently published messages with
// identical bytes therefore share one budget.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

/// Outcome of recording a transient failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Put the message back on the queue.  `attempt` is the number of
    /// failures recorded for this body so far (1-based).
    Requeue { attempt: u32 },
    /// Budget exhausted; drop the message for good.
    Discard,
}

/// Compute the retry-tracking key for a message body (lowercase hex).
pub fn fingerprint(body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    hex::encode(hasher.finalize())
}

/// Concurrent failure counter shared by every topic consumer.
///
/// Invariant: a stored count is always in `1..=max_retries`; an entry is
/// removed on success and on discard.
#[derive(Debug)]
pub struct RetryTracker {
    attempts: DashMap<String, u32>,
    max_retries: u32,
}

impl RetryTracker {
    pub fn new(max_retries: u32) -> Self {
        Self {
            attempts: DashMap::new(),
            max_retries,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Record a transient failure for `fingerprint` and decide its fate.
    ///
    /// The first `max_retries` failures requeue; the next one discards and
    /// forgets the entry.
    pub fn record_failure(&self, fingerprint: &str) -> RetryDecision {
        match self.attempts.entry(fingerprint.to_owned()) {
            Entry::Occupied(mut entry) => {
                if *entry.get() >= self.max_retries {
                    entry.remove();
                    warn!(
                        fingerprint,
                        max = self.max_retries,
                        "retry budget exhausted"
                    );
                    RetryDecision::Discard
                } else {
                    *entry.get_mut() += 1;
                    let attempt = *entry.get();
                    debug!(fingerprint, attempt, max = self.max_retries, "scheduling requeue");
                    RetryDecision::Requeue { attempt }
                }
            }
            Entry::Vacant(entry) => {
                if self.max_retries == 0 {
                    warn!(fingerprint, "retries disabled, discarding on first failure");
                    return RetryDecision::Discard;
                }
                entry.insert(1);
                debug!(fingerprint, attempt = 1, max = self.max_retries, "scheduling requeue");
                RetryDecision::Requeue { attempt: 1 }
            }
        }
    }

    /// Forget `fingerprint` after a successful delivery.
    pub fn clear(&self, fingerprint: &str) {
        if self.attempts.remove(fingerprint).is_some() {
            debug!(fingerprint, "retry entry cleared");
        }
    }

    /// Failures recorded for `fingerprint` since its last clear, if any.
    pub fn attempts(&self, fingerprint: &str) -> Option<u32> {
        self.attempts.get(fingerprint).map(|count| *count)
    }

    /// Number of bodies currently being tracked.
    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }
}

impl Default for RetryTracker {
    fn default() -> Self {
        Self::new(3)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn fingerprint_is_sha256_hex() {
        // SHA-256("hello") as printed by coreutils sha256sum.
        assert_eq!(
            fingerprint(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn identical_bodies_share_a_fingerprint() {
        let body = br#"{"id":"abc","printer_name":""}"#;
        assert_eq!(fingerprint(body), fingerprint(&body.to_vec()));
        assert_ne!(fingerprint(body), fingerprint(br#"{"id":"abd","printer_name":""}"#));
    }

    #[test]
    fn three_requeues_then_discard() {
        let tracker = RetryTracker::new(3);
        let key = fingerprint(b"job");

        assert_eq!(tracker.record_failure(&key), RetryDecision::Requeue { attempt: 1 });
        assert_eq!(tracker.record_failure(&key), RetryDecision::Requeue { attempt: 2 });
        assert_eq!(tracker.record_failure(&key), RetryDecision::Requeue { attempt: 3 });
        assert_eq!(tracker.attempts(&key), Some(3));

        assert_eq!(tracker.record_failure(&key), RetryDecision::Discard);
        assert_eq!(tracker.attempts(&key), None);
        assert!(tracker.is_empty());
    }

    #[test]
    fn discard_resets_the_budget() {
        let tracker = RetryTracker::new(1);
        assert_eq!(tracker.record_failure("k"), RetryDecision::Requeue { attempt: 1 });
        assert_eq!(tracker.record_failure("k"), RetryDecision::Discard);
        assert_eq!(tracker.record_failure("k"), RetryDecision::Requeue { attempt: 1 });
    }

    #[test]
    fn clear_forgets_previous_failures() {
        let tracker = RetryTracker::new(3);
        tracker.record_failure("k");
        tracker.record_failure("k");
        tracker.clear("k");
        assert_eq!(tracker.attempts("k"), None);
        assert_eq!(tracker.record_failure("k"), RetryDecision::Requeue { attempt: 1 });
    }

    #[test]
    fn clearing_unknown_key_is_harmless() {
        let tracker = RetryTracker::default();
        tracker.clear("never-seen");
        assert!(tracker.is_empty());
    }

    #[test]
    fn zero_budget_discards_immediately() {
        let tracker = RetryTracker::new(0);
        assert_eq!(tracker.record_failure("k"), RetryDecision::Discard);
        assert!(tracker.is_empty());
    }

    #[test]
    fn keys_are_independent() {
        let tracker = RetryTracker::new(2);
        tracker.record_failure("a");
        tracker.record_failure("a");
        assert_eq!(tracker.record_failure("b"), RetryDecision::Requeue { attempt: 1 });
        assert_eq!(tracker.record_failure("a"), RetryDecision::Discard);
        assert_eq!(tracker.attempts("b"), Some(1));
    }

    #[test]
    fn discard_happens_exactly_once_under_contention() {
        let tracker = Arc::new(RetryTracker::new(3));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    (0..4)
                        .map(|_| tracker.record_failure("shared"))
                        .filter(|d| *d == RetryDecision::Discard)
                        .count()
                })
            })
            .collect();

        let discards: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        // 32 failures with a budget of 3 → every 4th failure discards.
        assert_eq!(discards, 8);
        assert!(tracker.is_empty());
    }
}
