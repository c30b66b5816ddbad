// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use rust_decimal::Decimal;

pub const CODEC_BYTES_LIMIT: usize = 1_000_000;

pub fn encode_to_vec<T: bincode::Encode>(val: &T) -> Result<Vec<u8>, bincode::error::EncodeError> {
    let config = bincode::config::standard()
        .with_little_endian()
        .with_variable_int_encoding()
        .with_limit::<CODEC_BYTES_LIMIT>();

    bincode::encode_to_vec(val, config)
}

pub fn decode<T: bincode::Decode>(bytes: &[u8]) -> Result<T, bincode::error::DecodeError> {
    let config = bincode::config::standard()
        .with_little_endian()
        .with_variable_int_encoding()
        .with_limit::<CODEC_BYTES_LIMIT>();

    bincode::decode_from_slice(bytes, config).map(|r| r.0)
}

/// Decimals are stored in their fixed 16 byte representation so that scale
/// survives a round trip.
#[inline]
#[must_use]
pub fn decimal_to_bytes(d: &Decimal) -> [u8; 16] {
    d.serialize()
}

#[inline]
#[must_use]
pub fn decimal_from_bytes(bytes: [u8; 16]) -> Decimal {
    Decimal::deserialize(bytes)
}

/// Encodes an identifier or counter as big endian, so that keys sort numerically.
#[inline]
#[must_use]
pub fn u64_key(v: u64) -> [u8; 8] {
    v.to_be_bytes()
}

#[inline]
pub fn u64_from_key(bytes: &[u8]) -> Option<u64> {
    let v: [u8; 8] = bytes.get(..8)?.try_into().ok()?;
    Some(u64::from_be_bytes(v))
}
