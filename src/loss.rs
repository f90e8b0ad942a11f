//! # Package-Loss Tracker
//!
//! Sliding-window and whole-session accounting of lost receiver frames.
//!
//! This module handles:
//! - A 100 entry window of loss flags for the live loss percentage
//! - Consecutive loss runs ("episodes") collected into a histogram
//! - End-of-stream statistics over the full session

use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use tracing::info;

/// Capacity of the sliding window
pub const WINDOW_CAPACITY: usize = 100;

/// Package-loss state, one per session or capture import
#[derive(Debug, Clone, Default)]
pub struct PackageLoss {
    /// true = frame lost
    window: VecDeque<bool>,
    /// Number of `true` entries in `window`
    lost_in_window: usize,
    /// Length of the currently open loss run
    consecutive: u32,
    /// Episode length -> number of episodes
    episodes: BTreeMap<u32, u32>,
    /// Sum of all closed episode lengths
    lost_total: u32,
    /// All recorded frames, present or lost
    total_samples: u32,
    /// Session loss percentage, set by `finalize`
    session_percentage: Option<f64>,
}

impl PackageLoss {
    pub fn new() -> Self {
        Self {
            window: VecDeque::with_capacity(WINDOW_CAPACITY),
            ..Default::default()
        }
    }

    /// Record one expected receiver frame
    ///
    /// # Arguments
    ///
    /// * `is_present` - true if the frame arrived, false if it was lost
    pub fn record(&mut self, is_present: bool) {
        let lost = !is_present;

        if self.window.len() == WINDOW_CAPACITY {
            if let Some(true) = self.window.pop_front() {
                self.lost_in_window -= 1;
            }
        }
        self.window.push_back(lost);
        if lost {
            self.lost_in_window += 1;
            self.consecutive += 1;
        } else {
            self.close_episode();
        }

        self.total_samples += 1;
    }

    /// Move an open loss run into the histogram
    ///
    /// Returns true if a run was open.
    pub fn close_episode(&mut self) -> bool {
        if self.consecutive == 0 {
            return false;
        }
        *self.episodes.entry(self.consecutive).or_insert(0) += 1;
        self.lost_total += self.consecutive;
        self.consecutive = 0;
        true
    }

    /// Finish the session and compute the overall loss percentage
    ///
    /// The open run is excluded from the denominator, then flushed into the
    /// histogram.
    pub fn finalize(&mut self) -> f64 {
        let open = self.consecutive;
        self.close_episode();

        let tracked = self.total_samples.saturating_sub(open);
        let percentage = if tracked == 0 {
            0.0
        } else {
            self.lost_total as f64 * 100.0 / tracked as f64
        };
        self.session_percentage = Some(percentage);

        info!(
            "Package loss: {} lost of {} frames, {:.1}%",
            self.lost_total, self.total_samples, percentage
        );
        percentage
    }

    /// Loss percentage of the sliding window, scaled by 1000
    ///
    /// Returns 0 before any frame was recorded.
    pub fn current_percentage_permille(&self) -> i32 {
        self.current_percentage() * 1000
    }

    /// Integer loss percentage of the sliding window
    pub fn current_percentage(&self) -> i32 {
        if self.window.is_empty() {
            return 0;
        }
        (self.lost_in_window * 100 / self.window.len()) as i32
    }

    /// All lost frames, closed episodes plus the open run
    pub fn total_lost(&self) -> u32 {
        self.lost_total + self.consecutive
    }

    pub fn consecutive_losses(&self) -> u32 {
        self.consecutive
    }

    pub fn total_samples(&self) -> u32 {
        self.total_samples
    }

    /// Episode histogram, episode length -> count
    pub fn episodes(&self) -> &BTreeMap<u32, u32> {
        &self.episodes
    }

    /// Overall percentage once `finalize` has run
    pub fn session_percentage(&self) -> Option<f64> {
        self.session_percentage
    }

    /// Longest closed episode
    pub fn max_episode(&self) -> u32 {
        self.episodes.keys().next_back().copied().unwrap_or(0)
    }

    /// Snapshot of the session statistics
    pub fn summary(&self) -> LossSummary {
        LossSummary {
            total_samples: self.total_samples,
            total_lost: self.total_lost(),
            percentage: self.session_percentage,
            max_episode: self.max_episode(),
            episodes: self.episodes.clone(),
        }
    }
}

/// Session loss statistics, as reported at the end of a replay or listen run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LossSummary {
    pub total_samples: u32,
    pub total_lost: u32,
    /// Set once the tracker was finalized
    pub percentage: Option<f64>,
    pub max_episode: u32,
    pub episodes: BTreeMap<u32, u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_tracker() {
        let loss = PackageLoss::new();
        assert_eq!(loss.current_percentage_permille(), 0, "no samples must not divide by zero");
        assert_eq!(loss.total_lost(), 0);
    }

    #[test]
    fn test_all_lost() {
        let mut loss = PackageLoss::new();
        for _ in 0..100 {
            loss.record(false);
        }
        loss.finalize();

        assert_eq!(loss.total_lost(), 100);
        assert_eq!(loss.current_percentage_permille(), 100_000);
        assert_eq!(loss.episodes().get(&100), Some(&1));
    }

    #[test]
    fn test_window_before_capacity() {
        let mut loss = PackageLoss::new();
        loss.record(true);
        loss.record(false);
        loss.record(true);
        loss.record(false);

        assert_eq!(loss.current_percentage(), 50, "percentage over entries seen so far");
    }

    #[test]
    fn test_window_eviction() {
        let mut loss = PackageLoss::new();
        for _ in 0..100 {
            loss.record(false);
        }
        for _ in 0..50 {
            loss.record(true);
        }

        assert_eq!(loss.current_percentage(), 50);
        assert_eq!(loss.total_samples(), 150);
        assert_eq!(loss.total_lost(), 100, "evicted window entries stay counted in totals");
    }

    #[test]
    fn test_percentage_always_in_range() {
        let mut loss = PackageLoss::new();
        for i in 0..100u32 {
            loss.record(i % 3 == 0 || i % 7 == 0);
            let pct = loss.current_percentage_permille() / 1000;
            assert!((0..=100).contains(&pct), "percentage {} out of range", pct);
        }
    }

    #[test]
    fn test_episode_histogram() {
        let mut loss = PackageLoss::new();
        for present in [true, false, false, true, false, true, false, false, true] {
            loss.record(present);
        }

        assert_eq!(loss.episodes().get(&2), Some(&2));
        assert_eq!(loss.episodes().get(&1), Some(&1));
        assert_eq!(loss.total_lost(), 5);
        assert_eq!(loss.consecutive_losses(), 0);
        assert_eq!(loss.max_episode(), 2);
    }

    #[test]
    fn test_finalize_excludes_open_run() {
        let mut loss = PackageLoss::new();
        for present in [true, false, true, true, false, false] {
            loss.record(present);
        }
        assert_eq!(loss.total_lost(), 3, "open run counts toward the total");

        let pct = loss.finalize();
        // 3 lost frames over 6 - 2 open-run samples
        assert!((pct - 75.0).abs() < f64::EPSILON, "unexpected session percentage {}", pct);
        assert_eq!(loss.total_lost(), 3);
        assert_eq!(loss.session_percentage(), Some(pct));
    }

    #[test]
    fn test_summary_after_finalize() {
        let mut loss = PackageLoss::new();
        for present in [true, false, false, true] {
            loss.record(present);
        }
        assert_eq!(loss.summary().percentage, None, "no percentage before finalize");

        loss.finalize();
        let summary = loss.summary();
        assert_eq!(summary.total_samples, 4);
        assert_eq!(summary.total_lost, 2);
        assert_eq!(summary.max_episode, 2);
        assert_eq!(summary.percentage, Some(50.0));
    }
}
