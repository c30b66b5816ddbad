// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::primitives::{
    Address, NewReferral, PostId, ReferralId, ReferralRecord, ReferralStats,
};
use crate::settings::Storage;
use bincode::error::{DecodeError as BincodeDecodeErr, EncodeError as BincodeEncodeErr};
use chrono::prelude::*;
use rocksdb::Error as RocksDBErr;
use rocksdb::{ColumnFamilyDescriptor, LogLevel, Options, TransactionDBOptions};
use rust_decimal::Decimal;
use std::fmt;
use std::path::{Path, PathBuf};
use triomphe::Arc;

pub mod disk;
pub mod memory;

pub use disk::DiskBackend;
pub use memory::MemoryBackend;

/// Trait for the referral state backend as used by the referral pipeline.
///
/// Every method is a single atomic unit against the underlying store. Callers
/// never hold backend locks across calls.
pub trait ReferralBackend: Sized + Clone + Send + Sync + 'static {
    /// Inserts a pending referral unless one already exists for the same
    /// referrer, post and visitor. The check and the insert are atomic.
    fn track_referral(&self, referral: NewReferral) -> Result<TrackOutcome, BackendErr>;

    /// Returns the referral with the given id
    fn get_referral(&self, id: ReferralId) -> Result<Option<ReferralRecord>, BackendErr>;

    /// Transitions a pending referral to valid, crediting `reward`. A referral
    /// that is already valid is returned untouched.
    fn mark_valid(&self, id: ReferralId, reward: Decimal) -> Result<MarkValidOutcome, BackendErr>;

    /// Returns every referral for the post in creation order
    fn referrals_for_post(&self, post_id: PostId) -> Result<Vec<ReferralRecord>, BackendErr>;

    /// Returns every referral for the post credited to the given referrer
    fn referrals_for_key(
        &self,
        referrer: &Address,
        post_id: PostId,
    ) -> Result<Vec<ReferralRecord>, BackendErr> {
        Ok(self
            .referrals_for_post(post_id)?
            .into_iter()
            .filter(|r| &r.referrer_address == referrer)
            .collect())
    }

    /// Rescans the referrals of a (referrer, post) pair and upserts its stats row.
    ///
    /// The scan and the write are serialized per key, so concurrent recomputes
    /// always converge on the record state.
    fn recompute_stats(
        &self,
        referrer: &Address,
        post_id: PostId,
        now: DateTime<Utc>,
    ) -> Result<ReferralStats, BackendErr>;

    /// Returns the stats row of a (referrer, post) pair
    fn get_stats(
        &self,
        referrer: &Address,
        post_id: PostId,
    ) -> Result<Option<ReferralStats>, BackendErr>;

    /// Returns the stats rows of every referrer of a post
    fn stats_for_post(&self, post_id: PostId) -> Result<Vec<ReferralStats>, BackendErr>;

    /// Returns the stats rows of every post shared by a referrer
    fn stats_for_referrer(&self, referrer: &Address) -> Result<Vec<ReferralStats>, BackendErr>;

    /// Adds `amount` to the claimed rewards of a (referrer, post) pair,
    /// refusing to claim more than what is unclaimed.
    fn record_claim(
        &self,
        referrer: &Address,
        post_id: PostId,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome, BackendErr>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrackOutcome {
    /// A new pending referral was stored
    Tracked(ReferralRecord),

    /// The visitor was already tracked for this referrer and post
    AlreadyTracked(ReferralId),
}

#[derive(Debug, Clone, PartialEq)]
pub enum MarkValidOutcome {
    /// The referral transitioned from pending to valid
    Validated(ReferralRecord),

    /// The referral was valid before the call
    AlreadyValid(ReferralRecord),

    /// No referral with the given id
    NotFound,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// The claim was recorded
    Claimed(ReferralStats),

    /// The claim is larger than the unclaimed rewards
    ExceedsUnclaimed { unclaimed: Decimal },

    /// Nothing was ever credited to this pair
    NoStats,
}

#[derive(Debug)]
pub enum BackendErr {
    /// Backend data is corrupted
    CorruptData,

    /// Rocksdb error
    RocksDB(RocksDBErr),

    /// Bincode encode error
    BincodeEncode(BincodeEncodeErr),

    /// Bincode decode error
    BincodeDecode(BincodeDecodeErr),

    /// Generic error
    Error(&'static str),
}

impl fmt::Display for BackendErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CorruptData => f.write_str("backend data is corrupted"),
            Self::RocksDB(err) => write!(f, "rocksdb error: {err}"),
            Self::BincodeEncode(err) => write!(f, "encode error: {err}"),
            Self::BincodeDecode(err) => write!(f, "decode error: {err}"),
            Self::Error(err) => f.write_str(err),
        }
    }
}

impl std::error::Error for BackendErr {}

impl From<RocksDBErr> for BackendErr {
    fn from(other: RocksDBErr) -> Self {
        Self::RocksDB(other)
    }
}

impl From<BincodeEncodeErr> for BackendErr {
    fn from(other: BincodeEncodeErr) -> Self {
        Self::BincodeEncode(other)
    }
}

impl From<BincodeDecodeErr> for BackendErr {
    fn from(other: BincodeDecodeErr) -> Self {
        Self::BincodeDecode(other)
    }
}

/// Opens the referral database under the configured data directory.
pub fn create_rocksdb_backend(storage: &Storage) -> Result<Arc<disk::DB>, BackendErr> {
    let mut path = PathBuf::from(&storage.data_dir);
    path.push("referrals");
    open_rocksdb(&path)
}

pub fn open_rocksdb(path: &Path) -> Result<Arc<disk::DB>, BackendErr> {
    let mut cf_opts = Options::default();
    cf_opts.set_max_write_buffer_number(3);
    let cfs: Vec<_> = disk::COLUMN_FAMILIES
        .iter()
        .map(|name| ColumnFamilyDescriptor::new(*name, cf_opts.clone()))
        .collect();

    let mut db_opts = Options::default();
    db_opts.create_missing_column_families(true);
    db_opts.create_if_missing(true);
    db_opts.set_log_level(LogLevel::Warn);
    db_opts.set_keep_log_file_num(1);
    let db = disk::DB::open_cf_descriptors(&db_opts, &TransactionDBOptions::default(), path, cfs)?;
    Ok(Arc::new(db))
}

/// Behaviour every backend has to satisfy. Each backend's test module runs
/// these against its own instance.
#[cfg(test)]
pub(crate) mod conformance {
    use super::*;
    use rust_decimal_macros::dec;

    pub const ALICE: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    pub const BOB: &str = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    pub fn address(raw: &str) -> Address {
        Address::parse(raw).unwrap()
    }

    pub fn visit(referrer: &str, post_id: PostId, ip: &str) -> NewReferral {
        NewReferral {
            referrer_address: address(referrer),
            post_id,
            visitor_ip: ip.to_owned(),
            visitor_user_agent: "Mozilla/5.0".to_owned(),
            created_at: Utc::now(),
        }
    }

    fn tracked_id<B: ReferralBackend>(backend: &B, referral: NewReferral) -> ReferralId {
        match backend.track_referral(referral).unwrap() {
            TrackOutcome::Tracked(record) => record.id,
            TrackOutcome::AlreadyTracked(id) => panic!("referral {id} already tracked"),
        }
    }

    pub fn it_dedups_visitors<B: ReferralBackend>(backend: B) {
        let first = tracked_id(&backend, visit(ALICE, 1, "203.0.113.7"));
        assert_eq!(
            backend
                .track_referral(visit(ALICE, 1, "203.0.113.7"))
                .unwrap(),
            TrackOutcome::AlreadyTracked(first)
        );

        // Any other component of the triple makes a new visit
        let other_ip = tracked_id(&backend, visit(ALICE, 1, "203.0.113.8"));
        let other_post = tracked_id(&backend, visit(ALICE, 2, "203.0.113.7"));
        let other_referrer = tracked_id(&backend, visit(BOB, 1, "203.0.113.7"));

        assert!(first < other_ip && other_ip < other_post && other_post < other_referrer);
        assert_eq!(backend.referrals_for_post(1).unwrap().len(), 3);
        assert_eq!(backend.referrals_for_post(2).unwrap().len(), 1);
        assert_eq!(
            backend.referrals_for_key(&address(ALICE), 1).unwrap().len(),
            2
        );
    }

    pub fn it_stores_pending_referrals<B: ReferralBackend>(backend: B) {
        let id = tracked_id(&backend, visit(ALICE, 5, "198.51.100.1"));
        let record = backend.get_referral(id).unwrap().unwrap();
        assert_eq!(record.id, id);
        assert_eq!(record.referrer_address, address(ALICE));
        assert_eq!(record.post_id, 5);
        assert_eq!(record.visitor_ip, "198.51.100.1");
        assert!(!record.is_valid);
        assert_eq!(record.reward_amount, None);
        assert_eq!(backend.get_referral(id + 100).unwrap(), None);
    }

    pub fn it_marks_valid_once<B: ReferralBackend>(backend: B) {
        let id = tracked_id(&backend, visit(ALICE, 1, "198.51.100.1"));

        let record = match backend.mark_valid(id, dec!(10)).unwrap() {
            MarkValidOutcome::Validated(record) => record,
            other => panic!("unexpected outcome {other:?}"),
        };
        assert!(record.is_valid);
        assert_eq!(record.reward_amount, Some(dec!(10)));

        // A second transition keeps the first reward
        match backend.mark_valid(id, dec!(99)).unwrap() {
            MarkValidOutcome::AlreadyValid(record) => {
                assert_eq!(record.reward_amount, Some(dec!(10)))
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(
            backend.mark_valid(id + 1, dec!(10)).unwrap(),
            MarkValidOutcome::NotFound
        );
        assert_eq!(
            backend.get_referral(id).unwrap().unwrap().reward_amount,
            Some(dec!(10))
        );
    }

    pub fn it_recomputes_stats<B: ReferralBackend>(backend: B) {
        let alice = address(ALICE);
        let ids: Vec<_> = (0..4)
            .map(|i| tracked_id(&backend, visit(ALICE, 9, &format!("10.0.0.{i}"))))
            .collect();
        tracked_id(&backend, visit(BOB, 9, "10.0.0.1"));

        for id in &ids[..3] {
            backend.mark_valid(*id, dec!(0.1)).unwrap();
        }

        let now = Utc::now();
        let stats = backend.recompute_stats(&alice, 9, now).unwrap();
        assert_eq!(stats.total_referrals, 4);
        assert_eq!(stats.valid_referrals, 3);
        assert_eq!(stats.total_rewards, dec!(0.3));
        assert_eq!(stats.claimed_rewards, Decimal::ZERO);

        // Recomputing twice does not drift
        let again = backend.recompute_stats(&alice, 9, now).unwrap();
        assert_eq!(again, stats);
        assert_eq!(backend.get_stats(&alice, 9).unwrap(), Some(stats));
        assert_eq!(backend.get_stats(&address(BOB), 9).unwrap(), None);
    }

    pub fn it_lists_stats_by_post_and_referrer<B: ReferralBackend>(backend: B) {
        let alice = address(ALICE);
        let bob = address(BOB);
        let now = Utc::now();

        for (referrer, post_id, ip) in [(ALICE, 1, "1.1.1.1"), (ALICE, 2, "1.1.1.1"), (BOB, 1, "1.1.1.1")] {
            let id = tracked_id(&backend, visit(referrer, post_id, ip));
            backend.mark_valid(id, dec!(10)).unwrap();
            backend
                .recompute_stats(&address(referrer), post_id, now)
                .unwrap();
        }

        let post_rows = backend.stats_for_post(1).unwrap();
        assert_eq!(post_rows.len(), 2);
        assert!(post_rows.iter().all(|row| row.post_id == 1));

        let alice_rows = backend.stats_for_referrer(&alice).unwrap();
        assert_eq!(alice_rows.len(), 2);
        assert!(alice_rows.iter().all(|row| row.referrer_address == alice));

        assert_eq!(backend.stats_for_referrer(&bob).unwrap().len(), 1);
        assert!(backend.stats_for_post(3).unwrap().is_empty());
    }

    pub fn it_records_claims<B: ReferralBackend>(backend: B) {
        let alice = address(ALICE);
        let now = Utc::now();

        assert_eq!(
            backend.record_claim(&alice, 4, dec!(1), now).unwrap(),
            ClaimOutcome::NoStats
        );

        for i in 0..2 {
            let id = tracked_id(&backend, visit(ALICE, 4, &format!("10.1.0.{i}")));
            backend.mark_valid(id, dec!(10)).unwrap();
        }
        backend.recompute_stats(&alice, 4, now).unwrap();

        match backend.record_claim(&alice, 4, dec!(15), now).unwrap() {
            ClaimOutcome::Claimed(stats) => assert_eq!(stats.claimed_rewards, dec!(15)),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(
            backend.record_claim(&alice, 4, dec!(6), now).unwrap(),
            ClaimOutcome::ExceedsUnclaimed {
                unclaimed: dec!(5)
            }
        );

        // Claims survive a recompute
        let stats = backend.recompute_stats(&alice, 4, now).unwrap();
        assert_eq!(stats.claimed_rewards, dec!(15));
        assert_eq!(stats.unclaimed_rewards(), dec!(5));
    }

    pub fn it_survives_concurrent_validations<B: ReferralBackend>(backend: B) {
        let alice = address(ALICE);
        let ids: Vec<_> = (0..16)
            .map(|i| tracked_id(&backend, visit(ALICE, 11, &format!("10.2.0.{i}"))))
            .collect();

        let handles: Vec<_> = ids
            .into_iter()
            .flat_map(|id| [id, id])
            .map(|id| {
                let backend = backend.clone();
                let alice = alice.clone();
                std::thread::spawn(move || {
                    if let MarkValidOutcome::Validated(_) = backend.mark_valid(id, dec!(1)).unwrap() {
                        backend.recompute_stats(&alice, 11, Utc::now()).unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let stats = backend.get_stats(&alice, 11).unwrap().unwrap();
        assert_eq!(stats.total_referrals, 16);
        assert_eq!(stats.valid_referrals, 16);
        assert_eq!(stats.total_rewards, dec!(16));
    }
}
