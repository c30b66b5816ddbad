// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Length in characters of an encoded address, including the `0x` prefix.
pub const ADDRESS_LEN: usize = 42;

/// Wallet address credited for a referral.
///
/// Addresses are `0x` followed by 40 hex digits and are stored in lowercase so
/// that the same wallet typed with a different checksum casing aggregates
/// under a single key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    pub fn parse(raw: &str) -> Result<Self, AddressErr> {
        let raw = raw.trim();

        if raw.is_empty() {
            return Err(AddressErr::Empty);
        }

        let digits = raw
            .strip_prefix("0x")
            .or_else(|| raw.strip_prefix("0X"))
            .ok_or(AddressErr::MissingPrefix)?;

        if digits.len() != ADDRESS_LEN - 2 {
            return Err(AddressErr::InvalidLength);
        }

        if hex::decode(digits).is_err() {
            return Err(AddressErr::InvalidHex);
        }

        Ok(Self(format!("0x{}", digits.to_ascii_lowercase())))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Fixed width key bytes, used when composing storage keys.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl FromStr for Address {
    type Err = AddressErr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Address {
    type Error = AddressErr;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressErr {
    /// No address was given
    Empty,

    /// Address does not start with `0x`
    MissingPrefix,

    /// Address is not 40 hex digits long
    InvalidLength,

    /// Address contains non hex characters
    InvalidHex,
}

impl fmt::Display for AddressErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("referrer address is empty"),
            Self::MissingPrefix => f.write_str("referrer address must start with 0x"),
            Self::InvalidLength => f.write_str("referrer address must be 40 hex digits"),
            Self::InvalidHex => f.write_str("referrer address contains non hex characters"),
        }
    }
}

impl std::error::Error for AddressErr {}
