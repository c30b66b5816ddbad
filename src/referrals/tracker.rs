// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::primitives::*;
use crate::referrals::{ReferralErr, ReferralService};
use crate::store::{ReferralBackend, TrackOutcome};
use chrono::prelude::*;
use log::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::SocketAddr;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackRequest {
    #[serde(default)]
    pub referrer_address: Option<String>,

    /// Number or numeric string
    #[serde(default)]
    pub post_id: Option<Value>,

    #[serde(default)]
    pub visitor_info: Option<VisitorInfo>,
}

/// Connection metadata a visit is attributed to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VisitorContext {
    pub forwarded_for: Option<String>,
    pub real_ip: Option<String>,
    pub remote_addr: Option<SocketAddr>,
    pub user_agent: Option<String>,
}

impl VisitorContext {
    /// Resolves the visitor ip, preferring proxy headers over the peer address.
    /// Returns the empty string when nothing is known.
    #[must_use]
    pub fn visitor_ip(&self) -> String {
        let forwarded = self
            .forwarded_for
            .as_deref()
            .map(normalize_visitor_ip)
            .filter(|ip| !ip.is_empty());

        if let Some(ip) = forwarded {
            return ip;
        }

        let real_ip = self
            .real_ip
            .as_deref()
            .map(str::trim)
            .filter(|ip| !ip.is_empty());

        if let Some(ip) = real_ip {
            return ip.to_owned();
        }

        self.remote_addr
            .map(|addr| addr.ip().to_string())
            .unwrap_or_default()
    }
}

impl<B: ReferralBackend> ReferralService<B> {
    /// Records a visit as a pending referral. At most one record exists per
    /// referrer, post and visitor ip.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn track(
        &self,
        request: TrackRequest,
        visitor: &VisitorContext,
    ) -> Result<TrackOutcome, ReferralErr> {
        let referrer_address = request
            .referrer_address
            .as_deref()
            .ok_or_else(|| ReferralErr::invalid("referrerAddress is required"))?;
        let referrer_address = Address::parse(referrer_address)?;
        let post_id = request
            .post_id
            .as_ref()
            .and_then(parse_post_id)
            .ok_or_else(|| ReferralErr::invalid("postId must be a positive integer"))?;

        // The header wins over what the page reports about itself
        let visitor_user_agent = visitor
            .user_agent
            .clone()
            .or_else(|| request.visitor_info.and_then(|info| info.user_agent))
            .unwrap_or_default();

        let outcome = self.backend.track_referral(NewReferral {
            referrer_address,
            post_id,
            visitor_ip: visitor.visitor_ip(),
            visitor_user_agent,
            created_at: Utc::now(),
        })?;

        match &outcome {
            TrackOutcome::Tracked(record) => debug!(
                "Tracked referral {} for post {} by {}",
                record.id, record.post_id, record.referrer_address
            ),
            TrackOutcome::AlreadyTracked(id) => {
                debug!("Visitor already tracked as referral {id}");
            }
        }

        Ok(outcome)
    }
}
