// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::primitives::*;
use crate::referrals::{ReferralErr, ReferralService};
use crate::store::{ClaimOutcome, ReferralBackend};
use chrono::prelude::*;
use log::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A reward the post author paid out on chain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimRequest {
    #[serde(default)]
    pub referrer_address: Option<String>,
    #[serde(default)]
    pub post_id: Option<Value>,
    #[serde(default)]
    pub amount: Option<Decimal>,

    /// Payout transaction, kept for the audit log only
    #[serde(default)]
    pub tx_hash: Option<String>,
}

impl<B: ReferralBackend> ReferralService<B> {
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn claim(&self, request: ClaimRequest) -> Result<ReferralStats, ReferralErr> {
        let referrer = request
            .referrer_address
            .as_deref()
            .ok_or_else(|| ReferralErr::invalid("referrerAddress is required"))?;
        let referrer = Address::parse(referrer)?;
        let post_id = request
            .post_id
            .as_ref()
            .and_then(parse_post_id)
            .ok_or_else(|| ReferralErr::invalid("postId must be a positive integer"))?;
        let amount = request
            .amount
            .ok_or_else(|| ReferralErr::invalid("amount is required"))?;

        if amount <= Decimal::ZERO {
            return Err(ReferralErr::invalid("amount must be positive"));
        }

        match self
            .backend
            .record_claim(&referrer, post_id, amount, Utc::now())?
        {
            ClaimOutcome::Claimed(stats) => {
                info!(
                    "Recorded claim of {} for {} on post {} (tx: {})",
                    amount,
                    referrer,
                    post_id,
                    request.tx_hash.as_deref().unwrap_or("none")
                );
                Ok(stats)
            }
            ClaimOutcome::ExceedsUnclaimed { unclaimed } => Err(ReferralErr::Validation(format!(
                "amount exceeds unclaimed rewards of {unclaimed}"
            ))),
            ClaimOutcome::NoStats => Err(ReferralErr::NotFound("No rewards for referrer on post")),
        }
    }
}
