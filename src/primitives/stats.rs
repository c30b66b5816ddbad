// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::primitives::{Address, PostId, ReferralRecord};
use chrono::prelude::*;
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};

/// Materialized rollup for one (referrer, post) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferralStats {
    pub referrer_address: Address,
    pub post_id: PostId,
    pub total_referrals: u64,
    pub valid_referrals: u64,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_rewards: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub claimed_rewards: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl ReferralStats {
    /// Builds the stats row for a freshly computed rollup. Claimed rewards are
    /// not derivable from referral records and are carried over.
    #[must_use]
    pub fn from_rollup(
        referrer_address: Address,
        post_id: PostId,
        rollup: &Rollup,
        claimed_rewards: Decimal,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            referrer_address,
            post_id,
            total_referrals: rollup.total_referrals,
            valid_referrals: rollup.valid_referrals,
            total_rewards: rollup.total_rewards,
            claimed_rewards,
            updated_at,
        }
    }

    #[must_use]
    pub fn unclaimed_rewards(&self) -> Decimal {
        self.total_rewards - self.claimed_rewards
    }
}

/// Counts derived from a set of referral records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rollup {
    pub total_referrals: u64,
    pub valid_referrals: u64,
    pub total_rewards: Decimal,
    pub latest_referral: Option<DateTime<Utc>>,
}

impl Rollup {
    pub fn push(&mut self, record: &ReferralRecord) {
        self.total_referrals += 1;

        if record.is_valid {
            self.valid_referrals += 1;
            self.total_rewards += record.credited_reward();
        }

        match self.latest_referral {
            Some(latest) if latest >= record.created_at => {}
            _ => self.latest_referral = Some(record.created_at),
        }
    }
}

impl<'a> FromIterator<&'a ReferralRecord> for Rollup {
    fn from_iter<I: IntoIterator<Item = &'a ReferralRecord>>(iter: I) -> Self {
        let mut rollup = Self::default();
        for record in iter {
            rollup.push(record);
        }
        rollup
    }
}

/// Stats summed over any number of rows. All zero when there are none.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSummary {
    pub total_referrals: u64,
    pub valid_referrals: u64,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_rewards: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub claimed_rewards: Decimal,
}

impl<'a> FromIterator<&'a ReferralStats> for StatsSummary {
    fn from_iter<I: IntoIterator<Item = &'a ReferralStats>>(iter: I) -> Self {
        iter.into_iter().fold(Self::default(), |mut acc, row| {
            acc.total_referrals += row.total_referrals;
            acc.valid_referrals += row.valid_referrals;
            acc.total_rewards += row.total_rewards;
            acc.claimed_rewards += row.claimed_rewards;
            acc
        })
    }
}

/// Dashboard view of a referrer across every post they shared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferrerSummary {
    pub referrer_address: Address,
    #[serde(flatten)]
    pub totals: StatsSummary,
    #[serde(with = "rust_decimal::serde::float")]
    pub unclaimed_rewards: Decimal,

    /// Percentage of tracked visits that validated
    pub conversion_rate: f64,
    pub posts: usize,
}

impl ReferrerSummary {
    #[must_use]
    pub fn new(referrer_address: Address, rows: &[ReferralStats]) -> Self {
        let totals: StatsSummary = rows.iter().collect();
        let conversion_rate = if totals.total_referrals == 0 {
            0.0
        } else {
            totals.valid_referrals as f64 / totals.total_referrals as f64 * 100.0
        };

        Self {
            referrer_address,
            unclaimed_rewards: totals.total_rewards - totals.claimed_rewards,
            conversion_rate,
            posts: rows.len(),
            totals,
        }
    }
}

/// Ranked row of a post leaderboard. Computed on demand, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub referrer_address: Address,
    pub total_referrals: u64,
    pub valid_referrals: u64,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_rewards: Decimal,
    pub latest_referral: DateTime<Utc>,
}
