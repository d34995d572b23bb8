//! Stats retention policy
//!
//! A container keeps at most `stats_depth` snapshots spanning at most
//! `stats_span` of wall time. Both limits co-apply; room is made at append.

use crate::config::SystemConfig;
use crate::models::ContainerStats;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone, Copy)]
pub struct Retention {
    depth: usize,
    span: Duration,
}

impl Retention {
    pub fn new(depth: usize, span: Duration) -> Self {
        Self { depth, span }
    }

    pub fn from_config(config: &SystemConfig) -> Result<Self> {
        let span = config
            .stats_span()
            .with_context(|| format!("invalid stats_span '{}'", config.stats_span))?;
        let span = Duration::from_std(span).context("stats_span out of range")?;
        Ok(Self::new(config.stats_depth, span))
    }

    /// Drops leading elements of `list` so that appending an element stamped
    /// `incoming` keeps the list within both limits. A zero depth or span
    /// disables that limit.
    pub fn make_room(&self, list: &mut Vec<ContainerStats>, incoming: DateTime<Utc>) {
        let mut valid_ofs = 0;
        if self.depth > 0 && list.len() == self.depth {
            valid_ofs = 1;
        }
        if self.span > Duration::zero() {
            while valid_ofs < list.len() && incoming - list[valid_ofs].timestamp > self.span {
                valid_ofs += 1;
            }
        }
        if valid_ofs > 0 {
            list.drain(..valid_ofs);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stamped(offset_secs: i64) -> ContainerStats {
        ContainerStats::new(DateTime::UNIX_EPOCH + Duration::seconds(offset_secs))
    }

    fn append(retention: &Retention, list: &mut Vec<ContainerStats>, offset_secs: i64) {
        let stats = stamped(offset_secs);
        retention.make_room(list, stats.timestamp);
        list.push(stats);
    }

    #[test]
    fn depth_limit_keeps_a_fifo_window() {
        let retention = Retention::new(2, Duration::zero());
        let mut list = Vec::new();
        for offset in [1, 2, 3] {
            append(&retention, &mut list, offset);
        }
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].timestamp, stamped(2).timestamp);
        assert_eq!(list[1].timestamp, stamped(3).timestamp);
    }

    #[test]
    fn span_limit_drops_stale_elements() {
        let retention = Retention::new(0, Duration::seconds(10));
        let mut list = Vec::new();
        for offset in [0, 5, 20] {
            append(&retention, &mut list, offset);
        }
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].timestamp, stamped(20).timestamp);
    }

    #[test]
    fn span_keeps_elements_exactly_at_the_boundary() {
        let retention = Retention::new(0, Duration::seconds(10));
        let mut list = Vec::new();
        for offset in [0, 10] {
            append(&retention, &mut list, offset);
        }
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn stricter_of_both_limits_wins() {
        let retention = Retention::new(3, Duration::seconds(4));
        let mut list = Vec::new();
        for offset in [0, 1, 2, 3, 9] {
            append(&retention, &mut list, offset);
        }
        // depth alone would keep three, the span permits only the last one
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].timestamp, stamped(9).timestamp);
    }

    #[test]
    fn disabled_limits_keep_everything() {
        let retention = Retention::new(0, Duration::zero());
        let mut list = Vec::new();
        for offset in 0..32 {
            append(&retention, &mut list, offset);
        }
        assert_eq!(list.len(), 32);
    }
}
