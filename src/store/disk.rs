// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::codec::{self, decimal_from_bytes, decimal_to_bytes, u64_from_key, u64_key};
use crate::primitives::*;
use crate::store::*;
use bincode::{Decode, Encode};
use chrono::prelude::*;
use rocksdb::{BoundColumnFamily, Direction, IteratorMode, MultiThreaded, TransactionDB};
use rust_decimal::Decimal;
use std::sync::Arc as StdArc;
use triomphe::Arc;

pub type DB = TransactionDB<MultiThreaded>;

/// Referral records keyed by id
pub const REFERRALS_CF: &str = "referrals";

/// Dedup index: post | referrer | visitor ip -> id
pub const VISITORS_CF: &str = "visitors";

/// Scan index: post | id -> ()
pub const POST_REFERRALS_CF: &str = "post_referrals";

/// Stats rows keyed by post | referrer
pub const STATS_CF: &str = "referral_stats";

/// Scan index: referrer | post -> ()
pub const REFERRER_STATS_CF: &str = "referrer_stats";

/// Counters
pub const META_CF: &str = "meta";

pub const COLUMN_FAMILIES: [&str; 6] = [
    REFERRALS_CF,
    VISITORS_CF,
    POST_REFERRALS_CF,
    STATS_CF,
    REFERRER_STATS_CF,
    META_CF,
];

const NEXT_REFERRAL_ID_KEY: &[u8] = b"next_referral_id";

#[derive(Clone)]
pub struct DiskBackend {
    db: Arc<DB>,
}

impl DiskBackend {
    #[must_use]
    pub fn new(db: Arc<DB>) -> Self {
        Self { db }
    }

    fn cf(&self, name: &'static str) -> Result<StdArc<BoundColumnFamily<'_>>, BackendErr> {
        self.db
            .cf_handle(name)
            .ok_or(BackendErr::Error("missing column family"))
    }

    /// Collects the keys and values of a column family that start with `prefix`.
    fn scan_prefix(
        &self,
        cf_name: &'static str,
        prefix: &[u8],
    ) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>, BackendErr> {
        let cf = self.cf(cf_name)?;
        let mut out = Vec::new();

        for item in self
            .db
            .iterator_cf(&cf, IteratorMode::From(prefix, Direction::Forward))
        {
            let (k, v) = item?;
            if !k.starts_with(prefix) {
                break;
            }
            out.push((k, v));
        }

        Ok(out)
    }

    fn read_referral(&self, id: ReferralId) -> Result<Option<ReferralRecord>, BackendErr> {
        let referrals = self.cf(REFERRALS_CF)?;
        self.db
            .get_cf(&referrals, u64_key(id))?
            .map(|bytes| decode_referral(&bytes))
            .transpose()
    }
}

impl ReferralBackend for DiskBackend {
    fn track_referral(&self, referral: NewReferral) -> Result<TrackOutcome, BackendErr> {
        let referrals = self.cf(REFERRALS_CF)?;
        let visitors = self.cf(VISITORS_CF)?;
        let post_referrals = self.cf(POST_REFERRALS_CF)?;
        let meta = self.cf(META_CF)?;
        let vkey = visitor_key(
            referral.post_id,
            &referral.referrer_address,
            &referral.visitor_ip,
        );
        let tx = self.db.transaction();

        if let Some(existing) = tx.get_for_update_cf(&visitors, &vkey, true)? {
            let id = u64_from_key(&existing).ok_or(BackendErr::CorruptData)?;
            return Ok(TrackOutcome::AlreadyTracked(id));
        }

        let id = match tx.get_for_update_cf(&meta, NEXT_REFERRAL_ID_KEY, true)? {
            Some(bytes) => u64_from_key(&bytes).ok_or(BackendErr::CorruptData)?,
            None => 1,
        };
        let record = referral.into_record(id);

        tx.put_cf(&referrals, u64_key(id), encode_referral(&record)?)?;
        tx.put_cf(&visitors, &vkey, u64_key(id))?;
        tx.put_cf(
            &post_referrals,
            [u64_key(record.post_id), u64_key(id)].concat(),
            b"",
        )?;
        tx.put_cf(&meta, NEXT_REFERRAL_ID_KEY, u64_key(id + 1))?;
        tx.commit()?;

        Ok(TrackOutcome::Tracked(record))
    }

    fn get_referral(&self, id: ReferralId) -> Result<Option<ReferralRecord>, BackendErr> {
        self.read_referral(id)
    }

    fn mark_valid(&self, id: ReferralId, reward: Decimal) -> Result<MarkValidOutcome, BackendErr> {
        let referrals = self.cf(REFERRALS_CF)?;
        let tx = self.db.transaction();
        let key = u64_key(id);

        let mut record = match tx.get_for_update_cf(&referrals, key, true)? {
            Some(bytes) => decode_referral(&bytes)?,
            None => return Ok(MarkValidOutcome::NotFound),
        };

        if record.is_valid {
            return Ok(MarkValidOutcome::AlreadyValid(record));
        }

        record.is_valid = true;
        record.reward_amount = Some(reward);
        tx.put_cf(&referrals, key, encode_referral(&record)?)?;
        tx.commit()?;

        Ok(MarkValidOutcome::Validated(record))
    }

    fn referrals_for_post(&self, post_id: PostId) -> Result<Vec<ReferralRecord>, BackendErr> {
        let mut out = Vec::new();

        for (k, _) in self.scan_prefix(POST_REFERRALS_CF, &u64_key(post_id))? {
            let id = k
                .get(8..)
                .and_then(u64_from_key)
                .ok_or(BackendErr::CorruptData)?;
            out.push(self.read_referral(id)?.ok_or(BackendErr::CorruptData)?);
        }

        Ok(out)
    }

    fn recompute_stats(
        &self,
        referrer: &Address,
        post_id: PostId,
        now: DateTime<Utc>,
    ) -> Result<ReferralStats, BackendErr> {
        let stats_cf = self.cf(STATS_CF)?;
        let referrer_stats = self.cf(REFERRER_STATS_CF)?;
        let key = stats_key(post_id, referrer);
        let tx = self.db.transaction();

        // Lock the row first so that the scan below observes every
        // validation committed before we got the lock.
        let claimed = match tx.get_for_update_cf(&stats_cf, &key, true)? {
            Some(bytes) => decode_stats(&bytes)?.claimed_rewards,
            None => Decimal::ZERO,
        };
        let records = self.referrals_for_key(referrer, post_id)?;
        let rollup: Rollup = records.iter().collect();
        let stats = ReferralStats::from_rollup(referrer.clone(), post_id, &rollup, claimed, now);

        tx.put_cf(&stats_cf, &key, encode_stats(&stats)?)?;
        tx.put_cf(&referrer_stats, referrer_stats_key(referrer, post_id), b"")?;
        tx.commit()?;

        Ok(stats)
    }

    fn get_stats(
        &self,
        referrer: &Address,
        post_id: PostId,
    ) -> Result<Option<ReferralStats>, BackendErr> {
        let stats_cf = self.cf(STATS_CF)?;
        self.db
            .get_cf(&stats_cf, stats_key(post_id, referrer))?
            .map(|bytes| decode_stats(&bytes))
            .transpose()
    }

    fn stats_for_post(&self, post_id: PostId) -> Result<Vec<ReferralStats>, BackendErr> {
        self.scan_prefix(STATS_CF, &u64_key(post_id))?
            .into_iter()
            .map(|(_, v)| decode_stats(&v))
            .collect()
    }

    fn stats_for_referrer(&self, referrer: &Address) -> Result<Vec<ReferralStats>, BackendErr> {
        let mut out = Vec::new();

        for (k, _) in self.scan_prefix(REFERRER_STATS_CF, referrer.as_bytes())? {
            let post_id = k
                .get(ADDRESS_LEN..)
                .and_then(u64_from_key)
                .ok_or(BackendErr::CorruptData)?;
            out.push(
                self.get_stats(referrer, post_id)?
                    .ok_or(BackendErr::CorruptData)?,
            );
        }

        Ok(out)
    }

    fn record_claim(
        &self,
        referrer: &Address,
        post_id: PostId,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome, BackendErr> {
        let stats_cf = self.cf(STATS_CF)?;
        let key = stats_key(post_id, referrer);
        let tx = self.db.transaction();

        let mut stats = match tx.get_for_update_cf(&stats_cf, &key, true)? {
            Some(bytes) => decode_stats(&bytes)?,
            None => return Ok(ClaimOutcome::NoStats),
        };

        let unclaimed = stats.unclaimed_rewards();
        if amount > unclaimed {
            return Ok(ClaimOutcome::ExceedsUnclaimed { unclaimed });
        }

        stats.claimed_rewards += amount;
        stats.updated_at = now;
        tx.put_cf(&stats_cf, &key, encode_stats(&stats)?)?;
        tx.commit()?;

        Ok(ClaimOutcome::Claimed(stats))
    }
}

fn visitor_key(post_id: PostId, referrer: &Address, visitor_ip: &str) -> Vec<u8> {
    [
        u64_key(post_id).as_slice(),
        referrer.as_bytes(),
        visitor_ip.as_bytes(),
    ]
    .concat()
}

fn stats_key(post_id: PostId, referrer: &Address) -> Vec<u8> {
    [u64_key(post_id).as_slice(), referrer.as_bytes()].concat()
}

fn referrer_stats_key(referrer: &Address, post_id: PostId) -> Vec<u8> {
    [referrer.as_bytes(), u64_key(post_id).as_slice()].concat()
}

#[derive(Debug, Clone, Encode, Decode)]
/// On disk layout of a referral record
struct StoredReferral {
    id: u64,
    referrer_address: String,
    post_id: u64,
    visitor_ip: String,
    visitor_user_agent: String,
    is_valid: bool,
    reward_amount: Option<[u8; 16]>,
    created_at_ms: i64,
}

impl From<&ReferralRecord> for StoredReferral {
    fn from(record: &ReferralRecord) -> Self {
        Self {
            id: record.id,
            referrer_address: record.referrer_address.to_string(),
            post_id: record.post_id,
            visitor_ip: record.visitor_ip.clone(),
            visitor_user_agent: record.visitor_user_agent.clone(),
            is_valid: record.is_valid,
            reward_amount: record.reward_amount.as_ref().map(decimal_to_bytes),
            created_at_ms: record.created_at.timestamp_millis(),
        }
    }
}

impl TryFrom<StoredReferral> for ReferralRecord {
    type Error = BackendErr;

    fn try_from(stored: StoredReferral) -> Result<Self, Self::Error> {
        Ok(Self {
            id: stored.id,
            referrer_address: Address::parse(&stored.referrer_address)
                .map_err(|_| BackendErr::CorruptData)?,
            post_id: stored.post_id,
            visitor_ip: stored.visitor_ip,
            visitor_user_agent: stored.visitor_user_agent,
            is_valid: stored.is_valid,
            reward_amount: stored.reward_amount.map(decimal_from_bytes),
            created_at: from_millis(stored.created_at_ms)?,
        })
    }
}

#[derive(Debug, Clone, Encode, Decode)]
/// On disk layout of a stats row
struct StoredStats {
    referrer_address: String,
    post_id: u64,
    total_referrals: u64,
    valid_referrals: u64,
    total_rewards: [u8; 16],
    claimed_rewards: [u8; 16],
    updated_at_ms: i64,
}

impl From<&ReferralStats> for StoredStats {
    fn from(stats: &ReferralStats) -> Self {
        Self {
            referrer_address: stats.referrer_address.to_string(),
            post_id: stats.post_id,
            total_referrals: stats.total_referrals,
            valid_referrals: stats.valid_referrals,
            total_rewards: decimal_to_bytes(&stats.total_rewards),
            claimed_rewards: decimal_to_bytes(&stats.claimed_rewards),
            updated_at_ms: stats.updated_at.timestamp_millis(),
        }
    }
}

impl TryFrom<StoredStats> for ReferralStats {
    type Error = BackendErr;

    fn try_from(stored: StoredStats) -> Result<Self, Self::Error> {
        Ok(Self {
            referrer_address: Address::parse(&stored.referrer_address)
                .map_err(|_| BackendErr::CorruptData)?,
            post_id: stored.post_id,
            total_referrals: stored.total_referrals,
            valid_referrals: stored.valid_referrals,
            total_rewards: decimal_from_bytes(stored.total_rewards),
            claimed_rewards: decimal_from_bytes(stored.claimed_rewards),
            updated_at: from_millis(stored.updated_at_ms)?,
        })
    }
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, BackendErr> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or(BackendErr::CorruptData)
}

fn encode_referral(record: &ReferralRecord) -> Result<Vec<u8>, BackendErr> {
    Ok(codec::encode_to_vec(&StoredReferral::from(record))?)
}

fn decode_referral(bytes: &[u8]) -> Result<ReferralRecord, BackendErr> {
    codec::decode::<StoredReferral>(bytes)?.try_into()
}

fn encode_stats(stats: &ReferralStats) -> Result<Vec<u8>, BackendErr> {
    Ok(codec::encode_to_vec(&StoredStats::from(stats))?)
}

fn decode_stats(bytes: &[u8]) -> Result<ReferralStats, BackendErr> {
    codec::decode::<StoredStats>(bytes)?.try_into()
}
