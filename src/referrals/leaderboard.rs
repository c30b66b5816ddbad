// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::primitives::*;
use crate::referrals::{ReferralErr, ReferralService};
use crate::store::ReferralBackend;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// How the bulk reward total is derived from the eligible referrers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PayoutMode {
    /// Every eligible referrer receives `reward_amount` once
    #[default]
    Flat,

    /// Every valid referral of an eligible referrer earns `reward_amount`
    PerReferral,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkRewardRequest {
    #[serde(default)]
    pub post_id: Option<Value>,
    #[serde(default)]
    pub reward_amount: Option<Decimal>,
    #[serde(default)]
    pub min_valid_referrals: Option<u64>,
    #[serde(default)]
    pub payout_mode: PayoutMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EligibleReferrer {
    pub address: Address,
    pub count: u64,
    #[serde(with = "rust_decimal::serde::float")]
    pub payout: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkReward {
    pub eligible_referrers: Vec<EligibleReferrer>,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_reward_amount: Decimal,
}

impl BulkReward {
    /// Applies the eligibility threshold to `(referrer, valid count)` pairs
    /// and prices the result. A threshold of 0 behaves like 1 since
    /// referrers without valid referrals never make it into `counts`.
    ///
    /// Fails when a payout or the total does not fit in a `Decimal`.
    pub fn compute(
        counts: Vec<(Address, u64)>,
        min_valid_referrals: u64,
        reward_amount: Decimal,
        mode: PayoutMode,
    ) -> Result<Self, ReferralErr> {
        let mut eligible_referrers = Vec::with_capacity(counts.len());
        let mut total_reward_amount = Decimal::ZERO;

        for (address, count) in counts {
            if count < min_valid_referrals {
                continue;
            }

            let payout = match mode {
                PayoutMode::Flat => Some(reward_amount),
                PayoutMode::PerReferral => reward_amount.checked_mul(Decimal::from(count)),
            }
            .ok_or_else(|| ReferralErr::invalid("rewardAmount too large"))?;

            total_reward_amount = total_reward_amount
                .checked_add(payout)
                .ok_or_else(|| ReferralErr::invalid("rewardAmount too large"))?;

            eligible_referrers.push(EligibleReferrer {
                address,
                count,
                payout,
            });
        }

        Ok(Self {
            eligible_referrers,
            total_reward_amount,
        })
    }
}

/// Groups referrals by referrer in first seen order.
fn group_by_referrer(records: &[ReferralRecord]) -> Vec<(Address, Rollup)> {
    let mut index: HashMap<&Address, usize> = HashMap::new();
    let mut groups: Vec<(Address, Rollup)> = Vec::new();

    for record in records {
        let i = *index.entry(&record.referrer_address).or_insert_with(|| {
            groups.push((record.referrer_address.clone(), Rollup::default()));
            groups.len() - 1
        });
        groups[i].1.push(record);
    }

    groups
}

/// Ranks referrers by valid referrals, descending. Ties keep first seen order.
#[must_use]
pub fn rank(records: &[ReferralRecord]) -> Vec<LeaderboardEntry> {
    let mut entries: Vec<_> = group_by_referrer(records)
        .into_iter()
        .filter_map(|(referrer_address, rollup)| {
            Some(LeaderboardEntry {
                referrer_address,
                total_referrals: rollup.total_referrals,
                valid_referrals: rollup.valid_referrals,
                total_rewards: rollup.total_rewards,
                latest_referral: rollup.latest_referral?,
            })
        })
        .collect();

    entries.sort_by(|a, b| b.valid_referrals.cmp(&a.valid_referrals));
    entries
}

/// Counts valid referrals per referrer in first seen order, skipping
/// referrers without any.
#[must_use]
pub fn valid_counts(records: &[ReferralRecord]) -> Vec<(Address, u64)> {
    let valid: Vec<_> = records.iter().filter(|r| r.is_valid).cloned().collect();

    group_by_referrer(&valid)
        .into_iter()
        .map(|(address, rollup)| (address, rollup.valid_referrals))
        .collect()
}

impl<B: ReferralBackend> ReferralService<B> {
    pub fn leaderboard(&self, post_id: PostId) -> Result<Vec<LeaderboardEntry>, ReferralErr> {
        let records = self.backend.referrals_for_post(post_id)?;
        Ok(rank(&records))
    }

    #[tracing::instrument(level = "debug", skip_all)]
    pub fn bulk_reward(&self, request: BulkRewardRequest) -> Result<BulkReward, ReferralErr> {
        let post_id = request
            .post_id
            .as_ref()
            .and_then(parse_post_id)
            .ok_or_else(|| ReferralErr::invalid("postId must be a positive integer"))?;
        let reward_amount = request
            .reward_amount
            .ok_or_else(|| ReferralErr::invalid("rewardAmount is required"))?;

        if reward_amount.is_sign_negative() && !reward_amount.is_zero() {
            return Err(ReferralErr::invalid("rewardAmount cannot be negative"));
        }

        let min_valid_referrals = request.min_valid_referrals.unwrap_or(1).max(1);
        let records = self.backend.referrals_for_post(post_id)?;

        BulkReward::compute(
            valid_counts(&records),
            min_valid_referrals,
            reward_amount,
            request.payout_mode,
        )
    }
}
