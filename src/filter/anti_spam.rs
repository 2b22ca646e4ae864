//! Sliding window of recent copies per token

use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;

pub const ANTI_SPAM_WINDOW_SECS: i64 = 300;
pub const MAX_COPIES_PER_WINDOW: usize = 2;

/// Limits how often the same token is copied. Entries older than the window
/// are pruned on every check.
#[derive(Debug)]
pub struct AntiSpamWindow {
    window: Duration,
    max_copies: usize,
    copies: VecDeque<(String, DateTime<Utc>)>,
}

impl Default for AntiSpamWindow {
    fn default() -> Self {
        Self::new(Duration::seconds(ANTI_SPAM_WINDOW_SECS), MAX_COPIES_PER_WINDOW)
    }
}

impl AntiSpamWindow {
    pub fn new(window: Duration, max_copies: usize) -> Self {
        Self {
            window,
            max_copies,
            copies: VecDeque::new(),
        }
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.window;
        while let Some((_, at)) = self.copies.front() {
            if *at > cutoff {
                break;
            }
            self.copies.pop_front();
        }
    }

    /// Copies of `token` still inside the window
    pub fn recent_count(&mut self, token: &str, now: DateTime<Utc>) -> usize {
        self.prune(now);
        self.copies
            .iter()
            .filter(|(t, _)| t.eq_ignore_ascii_case(token))
            .count()
    }

    /// True when another copy of `token` is allowed
    pub fn allows(&mut self, token: &str, now: DateTime<Utc>) -> bool {
        self.recent_count(token, now) < self.max_copies
    }

    pub fn record(&mut self, token: &str, now: DateTime<Utc>) {
        self.copies.push_back((token.to_lowercase(), now));
    }

    pub fn len(&self) -> usize {
        self.copies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.copies.is_empty()
    }
}
