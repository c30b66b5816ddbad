// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

//! JSON over HTTP surface of the referral service.

use crate::http::api::ErrorReply;
use crate::referrals::*;
use crate::settings;
use crate::store::ReferralBackend;
use log::*;
use serde::de::DeserializeOwned;
use std::convert::Infallible;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

pub mod api;
mod handlers;

/// Maximum accepted request body
pub const MAX_BODY_BYTES: u64 = 1024 * 64;

const BASIC_AUTH_CONTEXT: &str = "postref.basic_auth";

/// Credentials guarding the admin endpoints. Only a keyed hash of
/// `username:password` is kept around.
#[derive(Clone)]
pub struct AdminCredentials {
    oracle_hash: [u8; 32],
}

impl AdminCredentials {
    #[must_use]
    pub fn new(username: &str, password: &str) -> Self {
        let oracle_key = format!("{username}:{password}");
        Self {
            oracle_hash: blake3::derive_key(BASIC_AUTH_CONTEXT, oracle_key.as_bytes()),
        }
    }

    #[must_use]
    pub fn from_settings(http: &settings::Http) -> Self {
        Self::new(&http.admin_username, &http.admin_password)
    }

    /// Checks a `Basic` authorization header against the stored credentials.
    #[must_use]
    pub fn check_authorization_header(&self, auth: Option<&str>) -> bool {
        let Some(auth) = auth else {
            return false;
        };
        let split: Vec<_> = auth.split(' ').collect();

        if split.len() != 2 {
            return false;
        }

        if split[0] != "Basic" {
            return false;
        }

        let decoded = match base64::decode(split[1]) {
            Ok(decoded) => decoded,
            Err(_) => return false,
        };

        // Hash the given credentials the same way and constant compare the two hashes
        let hash = blake3::derive_key(BASIC_AUTH_CONTEXT, &decoded);
        constant_time_eq::constant_time_eq_32(&self.oracle_hash, &hash)
    }
}

/// Builds every route of the service.
pub fn routes<B: ReferralBackend>(
    service: ReferralService<B>,
    admin: AdminCredentials,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let service = warp::any().map(move || service.clone());
    let admin = warp::any().map(move || admin.clone());

    let track = warp::path!("referrals" / "track")
        .and(warp::post())
        .and(service.clone())
        .and(visitor_context())
        .and(json_body::<TrackRequest>())
        .and_then(handlers::track::<B>);

    let validate = warp::path!("referrals" / "validate")
        .and(warp::post())
        .and(service.clone())
        .and(json_body::<ValidateRequest>())
        .and_then(handlers::validate::<B>);

    let post_stats = warp::path!("referrals" / "stats" / String)
        .and(warp::get())
        .and(service.clone())
        .and_then(handlers::post_stats::<B>);

    let leaderboard = warp::path!("referrals" / "leaderboard" / String)
        .and(warp::get())
        .and(service.clone())
        .and_then(handlers::leaderboard::<B>);

    let bulk_reward = warp::path!("referrals" / "bulk-reward")
        .and(warp::post())
        .and(service.clone())
        .and(json_body::<BulkRewardRequest>())
        .and_then(handlers::bulk_reward::<B>);

    let claims = warp::path!("referrals" / "claims")
        .and(warp::post())
        .and(service.clone())
        .and(admin)
        .and(warp::header::optional::<String>("authorization"))
        .and(json_body::<ClaimRequest>())
        .and_then(handlers::claim::<B>);

    let referrer_stats = warp::path!("referrals" / "referrer" / String / "stats")
        .and(warp::get())
        .and(service)
        .and_then(handlers::referrer_stats::<B>);

    let health = warp::path!("health")
        .and(warp::get())
        .and_then(handlers::health);

    let cors = warp::cors()
        .allow_any_origin()
        .allow_methods(vec!["GET", "POST"])
        .allow_headers(vec!["content-type", "authorization"]);

    track
        .or(validate)
        .or(post_stats)
        .or(leaderboard)
        .or(bulk_reward)
        .or(claims)
        .or(referrer_stats)
        .or(health)
        .with(cors)
        .with(warp::log("postref::http"))
        .recover(handle_rejection)
}

/// Collects what a visit is attributed to from the request.
fn visitor_context() -> impl Filter<Extract = (VisitorContext,), Error = Rejection> + Clone {
    warp::header::optional::<String>("x-forwarded-for")
        .and(warp::header::optional::<String>("x-real-ip"))
        .and(warp::addr::remote())
        .and(warp::header::optional::<String>("user-agent"))
        .map(
            |forwarded_for, real_ip, remote_addr, user_agent| VisitorContext {
                forwarded_for,
                real_ip,
                remote_addr,
                user_agent,
            },
        )
}

fn json_body<T: DeserializeOwned + Send>(
) -> impl Filter<Extract = (T,), Error = Rejection> + Clone {
    // When accepting a body, we want a JSON body
    // (and to reject huge payloads)...
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json::<T>())
}

/// Turns warp rejections into the same JSON envelope handlers reply with.
async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not found".to_owned())
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, format!("Invalid request body: {e}"))
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "Payload too large".to_owned())
    } else if err.find::<warp::reject::LengthRequired>().is_some() {
        (StatusCode::LENGTH_REQUIRED, "Content length required".to_owned())
    } else if err.find::<warp::reject::UnsupportedMediaType>().is_some() {
        (
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "Unsupported media type".to_owned(),
        )
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed".to_owned())
    } else {
        error!("Unhandled rejection: {:?}", err);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error".to_owned(),
        )
    };

    Ok(handlers::reply(&ErrorReply::new(message), status))
}
