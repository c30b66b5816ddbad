// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

//! # Postref
//! Referral attribution and reward eligibility for decentralized blog posts.
//!
//! Readers arrive at a post through a share link carrying the referrer's wallet
//! address. Postref:
//! * **Tracks** every visit as a pending referral, once per referrer, post and visitor.
//! * **Validates** a referral when the visitor's engagement crosses a threshold and
//!   credits the referrer a configurable reward.
//! * **Aggregates** per referrer and post stats, recomputed from the referral records
//!   on every validation so they never drift.
//! * **Ranks** referrers of a post and computes bulk reward payouts for its author.
//! * **Records claims** paid out on chain, so unclaimed balances stay meaningful.
//!
//! State lives in RocksDB by default, or in memory when `storage.memory_only` is set.

pub mod codec;
pub mod global;
pub mod http;
pub mod primitives;
pub mod referrals;
pub mod settings;
pub mod store;
