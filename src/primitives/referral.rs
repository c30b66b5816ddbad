// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::primitives::Address;
use chrono::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub type ReferralId = u64;
pub type PostId = u64;

/// One tracked visit attributable to a referrer for a post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferralRecord {
    pub id: ReferralId,
    pub referrer_address: Address,
    pub post_id: PostId,

    /// First hop of the forwarded-for chain.
    pub visitor_ip: String,
    pub visitor_user_agent: String,

    /// Set once, by a successful engagement validation.
    pub is_valid: bool,

    /// Present iff `is_valid`.
    #[serde(with = "rust_decimal::serde::float_option")]
    pub reward_amount: Option<Decimal>,
    pub created_at: DateTime<Utc>,
}

impl ReferralRecord {
    /// Returns the reward credited by this record, zero while pending.
    #[must_use]
    pub fn credited_reward(&self) -> Decimal {
        if self.is_valid {
            self.reward_amount.unwrap_or_default()
        } else {
            Decimal::ZERO
        }
    }
}

/// A visit that has not been assigned an identifier yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewReferral {
    pub referrer_address: Address,
    pub post_id: PostId,
    pub visitor_ip: String,
    pub visitor_user_agent: String,
    pub created_at: DateTime<Utc>,
}

impl NewReferral {
    #[must_use]
    pub fn into_record(self, id: ReferralId) -> ReferralRecord {
        ReferralRecord {
            id,
            referrer_address: self.referrer_address,
            post_id: self.post_id,
            visitor_ip: self.visitor_ip,
            visitor_user_agent: self.visitor_user_agent,
            is_valid: false,
            reward_amount: None,
            created_at: self.created_at,
        }
    }
}

/// Metadata the browser sends along with a tracked visit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitorInfo {
    /// Client clock in milliseconds. Informational only, the server clock
    /// stamps records.
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

/// Client measured engagement for a pending referral.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngagementData {
    /// Milliseconds between page load and the validation call
    #[serde(default, deserialize_with = "null_as_default")]
    pub time_spent: u64,

    /// Maximum scroll position reached, in percent. Browsers report `null`
    /// for pages too short to scroll, which counts as 0.
    #[serde(default, deserialize_with = "null_as_default")]
    pub scroll_depth: f64,

    /// Clicks and key presses
    #[serde(default, deserialize_with = "null_as_default")]
    pub interactions: u64,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Parses a post id as sent by clients, either a JSON number or a numeric string.
#[must_use]
pub fn parse_post_id(value: &Value) -> Option<PostId> {
    match value {
        Value::Number(n) => n.as_u64().filter(|id| *id > 0),
        Value::String(s) => parse_post_id_str(s),
        _ => None,
    }
}

#[must_use]
pub fn parse_post_id_str(raw: &str) -> Option<PostId> {
    raw.trim().parse::<PostId>().ok().filter(|id| *id > 0)
}

/// Normalizes a forwarded-for header to the originating client address.
#[must_use]
pub fn normalize_visitor_ip(forwarded: &str) -> String {
    forwarded.split(',').next().unwrap_or("").trim().to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn post_ids_accept_numbers_and_numeric_strings() {
        assert_eq!(parse_post_id(&json!(7)), Some(7));
        assert_eq!(parse_post_id(&json!("7")), Some(7));
        assert_eq!(parse_post_id(&json!(" 12 ")), Some(12));
        assert_eq!(parse_post_id(&json!(0)), None);
        assert_eq!(parse_post_id(&json!(-1)), None);
        assert_eq!(parse_post_id(&json!(1.5)), None);
        assert_eq!(parse_post_id(&json!("abc")), None);
        assert_eq!(parse_post_id(&json!(null)), None);
    }

    #[test]
    fn visitor_ip_takes_first_hop() {
        assert_eq!(
            normalize_visitor_ip("203.0.113.7, 10.0.0.1, 10.0.0.2"),
            "203.0.113.7"
        );
        assert_eq!(normalize_visitor_ip(" 198.51.100.3 "), "198.51.100.3");
        assert_eq!(normalize_visitor_ip(""), "");
    }

    #[test]
    fn engagement_fields_default_when_missing() {
        let engagement: EngagementData = serde_json::from_str(r#"{"scrollDepth": 72.5}"#).unwrap();
        assert_eq!(engagement.time_spent, 0);
        assert_eq!(engagement.interactions, 0);
        assert!((engagement.scroll_depth - 72.5).abs() < f64::EPSILON);
    }

    #[test]
    fn null_engagement_fields_count_as_zero() {
        let engagement: EngagementData = serde_json::from_str(
            r#"{"timeSpent": 45000, "scrollDepth": null, "interactions": 2}"#,
        )
        .unwrap();
        assert_eq!(engagement.time_spent, 45_000);
        assert_eq!(engagement.scroll_depth, 0.0);
        assert_eq!(engagement.interactions, 2);

        let engagement: EngagementData =
            serde_json::from_str(r#"{"timeSpent": null, "scrollDepth": 80}"#).unwrap();
        assert_eq!(engagement.time_spent, 0);
        assert_eq!(engagement.scroll_depth, 80.0);
    }

    #[test]
    fn pending_records_credit_nothing() {
        let mut record = NewReferral {
            referrer_address: Address::parse("0x1111111111111111111111111111111111111111")
                .unwrap(),
            post_id: 1,
            visitor_ip: "203.0.113.7".to_owned(),
            visitor_user_agent: String::new(),
            created_at: Utc::now(),
        }
        .into_record(1);
        assert_eq!(record.credited_reward(), Decimal::ZERO);

        record.is_valid = true;
        record.reward_amount = Some(Decimal::TEN);
        assert_eq!(record.credited_reward(), Decimal::TEN);
    }
}
