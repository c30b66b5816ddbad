// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

//! Referral attribution pipeline.
//!
//! A visit is tracked as a pending referral, validated once the visitor's
//! engagement is known, and rolled up into per (referrer, post) stats which
//! feed the leaderboard, the bulk reward calculation and the claims ledger.

use crate::primitives::AddressErr;
use crate::store::{BackendErr, ReferralBackend};
use std::fmt;

mod aggregator;
mod claims;
mod leaderboard;
mod tracker;
mod validator;

pub use claims::*;
pub use leaderboard::*;
pub use tracker::*;
pub use validator::*;

#[derive(Clone)]
pub struct ReferralService<B: ReferralBackend> {
    backend: B,
    policy: RewardPolicy,
}

impl<B: ReferralBackend> ReferralService<B> {
    #[must_use]
    pub fn new(backend: B, policy: RewardPolicy) -> Self {
        Self { backend, policy }
    }

    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    #[must_use]
    pub fn policy(&self) -> &RewardPolicy {
        &self.policy
    }
}

#[derive(Debug)]
pub enum ReferralErr {
    /// Missing or malformed request input
    Validation(String),

    /// A referenced entity does not exist
    NotFound(&'static str),

    /// Store failure
    Backend(BackendErr),
}

impl fmt::Display for ReferralErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation(msg) => f.write_str(msg),
            Self::NotFound(msg) => f.write_str(msg),
            Self::Backend(err) => write!(f, "backend error: {err}"),
        }
    }
}

impl std::error::Error for ReferralErr {}

impl From<BackendErr> for ReferralErr {
    fn from(other: BackendErr) -> Self {
        Self::Backend(other)
    }
}

impl From<AddressErr> for ReferralErr {
    fn from(other: AddressErr) -> Self {
        Self::Validation(other.to_string())
    }
}

impl ReferralErr {
    pub(crate) fn invalid(msg: &str) -> Self {
        Self::Validation(msg.to_owned())
    }
}
