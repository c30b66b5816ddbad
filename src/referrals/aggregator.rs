// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::primitives::*;
use crate::referrals::{ReferralErr, ReferralService};
use crate::store::ReferralBackend;
use chrono::prelude::*;
use log::*;

impl<B: ReferralBackend> ReferralService<B> {
    /// Recomputes the stats row of a (referrer, post) pair from its referrals.
    pub fn refresh_stats(
        &self,
        referrer: &Address,
        post_id: PostId,
    ) -> Result<ReferralStats, ReferralErr> {
        Ok(self
            .backend
            .recompute_stats(referrer, post_id, Utc::now())?)
    }

    /// Recomputes the stats row of a (referrer, post) pair only when its
    /// credited referrals disagree with the records, which happens when a
    /// recompute failed after a referral was marked valid. Returns whether
    /// it wrote.
    pub fn heal_stats(&self, referrer: &Address, post_id: PostId) -> Result<bool, ReferralErr> {
        let rollup: Rollup = self
            .backend
            .referrals_for_key(referrer, post_id)?
            .iter()
            .collect();
        let current = self.backend.get_stats(referrer, post_id)?;

        let in_sync = current.map_or(false, |stats| {
            stats.valid_referrals == rollup.valid_referrals
                && stats.total_rewards == rollup.total_rewards
        });

        if in_sync {
            return Ok(false);
        }

        warn!("Stats of {referrer} on post {post_id} are stale, recomputing");
        self.refresh_stats(referrer, post_id)?;
        Ok(true)
    }

    /// Stats of a post summed over all of its referrers.
    pub fn post_stats(&self, post_id: PostId) -> Result<StatsSummary, ReferralErr> {
        let rows = self.backend.stats_for_post(post_id)?;
        Ok(rows.iter().collect())
    }

    /// Stats of a referrer summed over every post they shared.
    pub fn referrer_stats(&self, referrer: &str) -> Result<ReferrerSummary, ReferralErr> {
        let referrer = Address::parse(referrer)?;
        let rows = self.backend.stats_for_referrer(&referrer)?;
        Ok(ReferrerSummary::new(referrer, &rows))
    }
}
