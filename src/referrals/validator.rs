// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::primitives::*;
use crate::referrals::{ReferralErr, ReferralService};
use crate::settings;
use crate::store::{MarkValidOutcome, ReferralBackend};
use config::ConfigError;
use log::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateRequest {
    #[serde(default)]
    pub referral_id: Option<ReferralId>,
    #[serde(default)]
    pub engagement_data: Option<EngagementData>,
}

impl ValidateRequest {
    #[must_use]
    pub fn new(referral_id: ReferralId, engagement_data: EngagementData) -> Self {
        Self {
            referral_id: Some(referral_id),
            engagement_data: Some(engagement_data),
        }
    }
}

/// Reward credited per valid referral and the engagement it takes to earn it.
#[derive(Debug, Clone, PartialEq)]
pub struct RewardPolicy {
    pub reward_per_referral: Decimal,

    /// Engagement must exceed at least one of these
    pub min_time_spent_ms: u64,
    pub min_scroll_depth: f64,
    pub min_interactions: u64,
}

impl Default for RewardPolicy {
    fn default() -> Self {
        Self {
            reward_per_referral: Decimal::TEN,
            min_time_spent_ms: 30_000,
            min_scroll_depth: 50.0,
            min_interactions: 0,
        }
    }
}

impl RewardPolicy {
    pub fn from_settings(referrals: &settings::Referrals) -> Result<Self, ConfigError> {
        let reward_per_referral = Decimal::from_str(referrals.reward_per_referral.trim())
            .map_err(|err| {
                ConfigError::Message(format!("invalid referrals.reward_per_referral: {err}"))
            })?;

        if reward_per_referral.is_sign_negative() {
            return Err(ConfigError::Message(
                "referrals.reward_per_referral cannot be negative".to_owned(),
            ));
        }

        Ok(Self {
            reward_per_referral,
            min_time_spent_ms: referrals.min_time_spent_ms,
            min_scroll_depth: f64::from(referrals.min_scroll_depth),
            min_interactions: referrals.min_interactions,
        })
    }

    #[must_use]
    pub fn is_engaged(&self, engagement: &EngagementData) -> bool {
        engagement.time_spent > self.min_time_spent_ms
            || engagement.scroll_depth > self.min_scroll_depth
            || engagement.interactions > self.min_interactions
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Validation {
    /// This call transitioned the referral to valid
    Validated(ReferralRecord),

    /// The referral was already valid, nothing changed
    AlreadyValid,

    /// Engagement too weak, the referral stays pending
    Insufficient,
}

impl Validation {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !matches!(self, Self::Insufficient)
    }
}

impl<B: ReferralBackend> ReferralService<B> {
    /// Validates a pending referral against the reported engagement. Each
    /// referral transitions at most once, however many validations race.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn validate(&self, request: ValidateRequest) -> Result<Validation, ReferralErr> {
        let id = request
            .referral_id
            .ok_or_else(|| ReferralErr::invalid("referralId is required"))?;
        let engagement = request
            .engagement_data
            .ok_or_else(|| ReferralErr::invalid("engagementData is required"))?;

        if !engagement.scroll_depth.is_finite() || engagement.scroll_depth < 0.0 {
            return Err(ReferralErr::invalid(
                "scrollDepth must be a non negative number",
            ));
        }

        let record = self
            .backend
            .get_referral(id)?
            .ok_or(ReferralErr::NotFound("Referral not found"))?;

        if record.is_valid {
            self.heal_stats(&record.referrer_address, record.post_id)?;
            return Ok(Validation::AlreadyValid);
        }

        if !self.policy.is_engaged(&engagement) {
            debug!("Referral {id} not engaged enough: {engagement:?}");
            return Ok(Validation::Insufficient);
        }

        match self
            .backend
            .mark_valid(id, self.policy.reward_per_referral)?
        {
            MarkValidOutcome::Validated(record) => {
                // A failure here leaves the stats stale until the referral
                // is validated again or another one for the same key is.
                if let Err(err) = self.refresh_stats(&record.referrer_address, record.post_id) {
                    error!("Failed to refresh stats after validating referral {id}: {err}");
                    return Err(err);
                }

                info!(
                    "Referral {} validated for {} on post {}",
                    id, record.referrer_address, record.post_id
                );
                Ok(Validation::Validated(record))
            }
            MarkValidOutcome::AlreadyValid(record) => {
                self.heal_stats(&record.referrer_address, record.post_id)?;
                Ok(Validation::AlreadyValid)
            }
            MarkValidOutcome::NotFound => Err(ReferralErr::NotFound("Referral not found")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::referrals::test_util::*;
    use crate::referrals::TrackRequest;
    use crate::store::{BackendErr, ClaimOutcome, MemoryBackend, TrackOutcome};
    use chrono::prelude::*;
    use quickcheck::*;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn engagement(time_spent: u64, scroll_depth: f64, interactions: u64) -> EngagementData {
        EngagementData {
            time_spent,
            scroll_depth,
            interactions,
        }
    }

    quickcheck! {
        fn interactions_always_engage(time_spent: u64, scroll: u8, interactions: u64) -> TestResult {
            if interactions == 0 {
                return TestResult::discard();
            }

            let policy = RewardPolicy::default();
            TestResult::from_bool(policy.is_engaged(&engagement(time_spent, f64::from(scroll), interactions)))
        }

        fn nothing_at_or_below_thresholds_engages(time_spent: u16, scroll: u8) -> bool {
            let policy = RewardPolicy::default();
            let time_spent = u64::from(time_spent) % 30_001;
            let scroll = f64::from(scroll % 51);

            !policy.is_engaged(&engagement(time_spent, scroll, 0))
        }
    }

    #[test]
    fn thresholds_are_strict() {
        let policy = RewardPolicy::default();
        assert!(!policy.is_engaged(&engagement(30_000, 0.0, 0)));
        assert!(policy.is_engaged(&engagement(30_001, 0.0, 0)));
        assert!(!policy.is_engaged(&engagement(0, 50.0, 0)));
        assert!(policy.is_engaged(&engagement(0, 50.5, 0)));
        assert!(policy.is_engaged(&engagement(0, 0.0, 1)));
    }

    #[test]
    fn it_builds_policy_from_settings() {
        let mut referrals = settings::Referrals::default();
        referrals.reward_per_referral = "2.5".to_owned();
        referrals.min_interactions = 3;
        let policy = RewardPolicy::from_settings(&referrals).unwrap();
        assert_eq!(policy.reward_per_referral, dec!(2.5));
        assert!(!policy.is_engaged(&engagement(0, 0.0, 3)));

        referrals.reward_per_referral = "-1".to_owned();
        assert!(RewardPolicy::from_settings(&referrals).is_err());
        referrals.reward_per_referral = "ten".to_owned();
        assert!(RewardPolicy::from_settings(&referrals).is_err());
    }

    #[test]
    fn it_validates_engaged_referrals() {
        let service = service();
        let id = track(&service, ALICE, 1, "203.0.113.7");

        match service.validate(ValidateRequest::new(id, engaged())).unwrap() {
            Validation::Validated(record) => {
                assert!(record.is_valid);
                assert_eq!(record.reward_amount, Some(dec!(10)));
            }
            other => panic!("unexpected outcome {other:?}"),
        }

        let stats = service
            .backend()
            .get_stats(&Address::parse(ALICE).unwrap(), 1)
            .unwrap()
            .unwrap();
        assert_eq!(stats.total_referrals, 1);
        assert_eq!(stats.valid_referrals, 1);
        assert_eq!(stats.total_rewards, dec!(10));
    }

    #[test]
    fn it_is_idempotent() {
        let service = service();
        let id = track(&service, ALICE, 1, "203.0.113.7");
        service.validate(ValidateRequest::new(id, engaged())).unwrap();
        let before = service
            .backend()
            .get_stats(&Address::parse(ALICE).unwrap(), 1)
            .unwrap();

        // Even weak engagement reports the record as valid
        let again = service
            .validate(ValidateRequest::new(id, engagement(0, 0.0, 0)))
            .unwrap();
        assert_eq!(again, Validation::AlreadyValid);
        assert!(again.is_valid());

        let after = service
            .backend()
            .get_stats(&Address::parse(ALICE).unwrap(), 1)
            .unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn it_leaves_weak_referrals_pending() {
        let service = service();
        let id = track(&service, ALICE, 1, "203.0.113.7");
        let outcome = service
            .validate(ValidateRequest::new(id, engagement(1_000, 10.0, 0)))
            .unwrap();
        assert_eq!(outcome, Validation::Insufficient);
        assert!(!outcome.is_valid());

        let record = service.backend().get_referral(id).unwrap().unwrap();
        assert!(!record.is_valid);
        assert_eq!(record.reward_amount, None);
        assert_eq!(
            service
                .backend()
                .get_stats(&Address::parse(ALICE).unwrap(), 1)
                .unwrap(),
            None
        );

        // A later, stronger report still counts
        assert!(matches!(
            service.validate(ValidateRequest::new(id, engaged())).unwrap(),
            Validation::Validated(_)
        ));
    }

    #[test]
    fn it_rejects_unknown_and_malformed_requests() {
        let service = service();
        assert!(matches!(
            service.validate(ValidateRequest::new(42, engaged())),
            Err(ReferralErr::NotFound(_))
        ));
        assert!(matches!(
            service.validate(ValidateRequest::default()),
            Err(ReferralErr::Validation(_))
        ));

        let id = track(&service, ALICE, 1, "203.0.113.7");
        assert!(matches!(
            service.validate(ValidateRequest::new(id, engagement(0, -5.0, 0))),
            Err(ReferralErr::Validation(_))
        ));
        assert!(matches!(
            service.validate(ValidateRequest {
                referral_id: Some(id),
                engagement_data: None,
            }),
            Err(ReferralErr::Validation(_))
        ));
    }

    /// Memory backend whose next stats recompute fails.
    #[derive(Clone)]
    struct FlakyRecompute {
        inner: MemoryBackend,
        fail_next: Arc<AtomicBool>,
    }

    impl ReferralBackend for FlakyRecompute {
        fn track_referral(&self, referral: NewReferral) -> Result<TrackOutcome, BackendErr> {
            self.inner.track_referral(referral)
        }

        fn get_referral(&self, id: ReferralId) -> Result<Option<ReferralRecord>, BackendErr> {
            self.inner.get_referral(id)
        }

        fn mark_valid(&self, id: ReferralId, reward: Decimal) -> Result<MarkValidOutcome, BackendErr> {
            self.inner.mark_valid(id, reward)
        }

        fn referrals_for_post(&self, post_id: PostId) -> Result<Vec<ReferralRecord>, BackendErr> {
            self.inner.referrals_for_post(post_id)
        }

        fn recompute_stats(
            &self,
            referrer: &Address,
            post_id: PostId,
            now: DateTime<Utc>,
        ) -> Result<ReferralStats, BackendErr> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(BackendErr::Error("lock timeout"));
            }
            self.inner.recompute_stats(referrer, post_id, now)
        }

        fn get_stats(
            &self,
            referrer: &Address,
            post_id: PostId,
        ) -> Result<Option<ReferralStats>, BackendErr> {
            self.inner.get_stats(referrer, post_id)
        }

        fn stats_for_post(&self, post_id: PostId) -> Result<Vec<ReferralStats>, BackendErr> {
            self.inner.stats_for_post(post_id)
        }

        fn stats_for_referrer(&self, referrer: &Address) -> Result<Vec<ReferralStats>, BackendErr> {
            self.inner.stats_for_referrer(referrer)
        }

        fn record_claim(
            &self,
            referrer: &Address,
            post_id: PostId,
            amount: Decimal,
            now: DateTime<Utc>,
        ) -> Result<ClaimOutcome, BackendErr> {
            self.inner.record_claim(referrer, post_id, amount, now)
        }
    }

    #[test]
    fn revalidation_repairs_stats_after_failed_recompute() {
        let fail_next = Arc::new(AtomicBool::new(false));
        let service = ReferralService::new(
            FlakyRecompute {
                inner: MemoryBackend::new(),
                fail_next: fail_next.clone(),
            },
            RewardPolicy::default(),
        );
        let alice = Address::parse(ALICE).unwrap();

        let mut ids = Vec::new();
        for ip in ["203.0.113.7", "203.0.113.8"] {
            let request = TrackRequest {
                referrer_address: Some(ALICE.to_owned()),
                post_id: Some(serde_json::json!(1)),
                visitor_info: None,
            };
            match service.track(request, &visitor(ip)).unwrap() {
                TrackOutcome::Tracked(record) => ids.push(record.id),
                other => panic!("unexpected outcome {other:?}"),
            }
        }

        service.validate(ValidateRequest::new(ids[0], engaged())).unwrap();

        fail_next.store(true, Ordering::SeqCst);
        assert!(matches!(
            service.validate(ValidateRequest::new(ids[1], engaged())),
            Err(ReferralErr::Backend(_))
        ));
        assert!(service.backend().get_referral(ids[1]).unwrap().unwrap().is_valid);
        let stale = service.backend().get_stats(&alice, 1).unwrap().unwrap();
        assert_eq!(stale.valid_referrals, 1);

        // The client retries with the same referral
        assert_eq!(
            service.validate(ValidateRequest::new(ids[1], engaged())).unwrap(),
            Validation::AlreadyValid
        );
        let healed = service.backend().get_stats(&alice, 1).unwrap().unwrap();
        assert_eq!(healed.valid_referrals, 2);
        assert_eq!(healed.total_rewards, dec!(20));

        // Nothing left to repair
        assert!(!service.heal_stats(&alice, 1).unwrap());
    }

    #[test]
    fn concurrent_validations_credit_once() {
        let service = service();
        let id = track(&service, ALICE, 1, "203.0.113.7");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let service = service.clone();
                std::thread::spawn(move || service.validate(ValidateRequest::new(id, engaged())))
            })
            .collect();

        let validated = handles
            .into_iter()
            .map(|h| h.join().unwrap().unwrap())
            .filter(|v| matches!(v, Validation::Validated(_)))
            .count();
        assert_eq!(validated, 1);

        let stats = service
            .backend()
            .get_stats(&Address::parse(ALICE).unwrap(), 1)
            .unwrap()
            .unwrap();
        assert_eq!(stats.valid_referrals, 1);
        assert_eq!(stats.total_rewards, dec!(10));
    }
}
