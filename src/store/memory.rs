// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::primitives::*;
use crate::store::*;
use chrono::prelude::*;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use triomphe::Arc;

/// Volatile backend. Every operation runs under a single lock, which makes
/// each trait method atomic with respect to the others.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    tables: Arc<RwLock<Tables>>,
}

#[derive(Default)]
struct Tables {
    next_id: ReferralId,
    referrals: BTreeMap<ReferralId, ReferralRecord>,
    visitors: HashMap<(PostId, Address, String), ReferralId>,
    post_referrals: BTreeMap<PostId, Vec<ReferralId>>,
    stats: BTreeMap<(PostId, Address), ReferralStats>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Tables {
    fn referrals_for_key(&self, referrer: &Address, post_id: PostId) -> Vec<&ReferralRecord> {
        self.post_referrals
            .get(&post_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.referrals.get(id))
            .filter(|r| &r.referrer_address == referrer)
            .collect()
    }
}

impl ReferralBackend for MemoryBackend {
    fn track_referral(&self, referral: NewReferral) -> Result<TrackOutcome, BackendErr> {
        let mut tables = self.tables.write();
        let vkey = (
            referral.post_id,
            referral.referrer_address.clone(),
            referral.visitor_ip.clone(),
        );

        if let Some(id) = tables.visitors.get(&vkey) {
            return Ok(TrackOutcome::AlreadyTracked(*id));
        }

        tables.next_id += 1;
        let id = tables.next_id;
        let record = referral.into_record(id);

        tables.visitors.insert(vkey, id);
        tables
            .post_referrals
            .entry(record.post_id)
            .or_default()
            .push(id);
        tables.referrals.insert(id, record.clone());

        Ok(TrackOutcome::Tracked(record))
    }

    fn get_referral(&self, id: ReferralId) -> Result<Option<ReferralRecord>, BackendErr> {
        Ok(self.tables.read().referrals.get(&id).cloned())
    }

    fn mark_valid(&self, id: ReferralId, reward: Decimal) -> Result<MarkValidOutcome, BackendErr> {
        let mut tables = self.tables.write();
        let Some(record) = tables.referrals.get_mut(&id) else {
            return Ok(MarkValidOutcome::NotFound);
        };

        if record.is_valid {
            return Ok(MarkValidOutcome::AlreadyValid(record.clone()));
        }

        record.is_valid = true;
        record.reward_amount = Some(reward);
        Ok(MarkValidOutcome::Validated(record.clone()))
    }

    fn referrals_for_post(&self, post_id: PostId) -> Result<Vec<ReferralRecord>, BackendErr> {
        let tables = self.tables.read();
        Ok(tables
            .post_referrals
            .get(&post_id)
            .into_iter()
            .flatten()
            .filter_map(|id| tables.referrals.get(id).cloned())
            .collect())
    }

    fn referrals_for_key(
        &self,
        referrer: &Address,
        post_id: PostId,
    ) -> Result<Vec<ReferralRecord>, BackendErr> {
        Ok(self
            .tables
            .read()
            .referrals_for_key(referrer, post_id)
            .into_iter()
            .cloned()
            .collect())
    }

    fn recompute_stats(
        &self,
        referrer: &Address,
        post_id: PostId,
        now: DateTime<Utc>,
    ) -> Result<ReferralStats, BackendErr> {
        let mut tables = self.tables.write();
        let rollup: Rollup = tables
            .referrals_for_key(referrer, post_id)
            .into_iter()
            .collect();
        let key = (post_id, referrer.clone());
        let claimed = tables
            .stats
            .get(&key)
            .map_or(Decimal::ZERO, |s| s.claimed_rewards);
        let stats = ReferralStats::from_rollup(referrer.clone(), post_id, &rollup, claimed, now);

        tables.stats.insert(key, stats.clone());
        Ok(stats)
    }

    fn get_stats(
        &self,
        referrer: &Address,
        post_id: PostId,
    ) -> Result<Option<ReferralStats>, BackendErr> {
        Ok(self
            .tables
            .read()
            .stats
            .get(&(post_id, referrer.clone()))
            .cloned())
    }

    fn stats_for_post(&self, post_id: PostId) -> Result<Vec<ReferralStats>, BackendErr> {
        Ok(self
            .tables
            .read()
            .stats
            .iter()
            .filter(|((post, _), _)| *post == post_id)
            .map(|(_, s)| s.clone())
            .collect())
    }

    fn stats_for_referrer(&self, referrer: &Address) -> Result<Vec<ReferralStats>, BackendErr> {
        Ok(self
            .tables
            .read()
            .stats
            .iter()
            .filter(|((_, addr), _)| addr == referrer)
            .map(|(_, s)| s.clone())
            .collect())
    }

    fn record_claim(
        &self,
        referrer: &Address,
        post_id: PostId,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome, BackendErr> {
        let mut tables = self.tables.write();
        let Some(stats) = tables.stats.get_mut(&(post_id, referrer.clone())) else {
            return Ok(ClaimOutcome::NoStats);
        };

        let unclaimed = stats.unclaimed_rewards();
        if amount > unclaimed {
            return Ok(ClaimOutcome::ExceedsUnclaimed { unclaimed });
        }

        stats.claimed_rewards += amount;
        stats.updated_at = now;
        Ok(ClaimOutcome::Claimed(stats.clone()))
    }
}
