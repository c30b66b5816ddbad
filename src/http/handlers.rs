// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::http::api::*;
use crate::http::AdminCredentials;
use crate::primitives::parse_post_id_str;
use crate::referrals::*;
use crate::store::{BackendErr, ReferralBackend, TrackOutcome};
use log::*;
use serde::Serialize;
use warp::http::StatusCode;
use warp::reply::{Json, WithStatus};

type Reply = WithStatus<Json>;

impl ReferralErr {
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub(crate) fn reply<T: Serialize>(body: &T, status: StatusCode) -> Reply {
    warp::reply::with_status(warp::reply::json(body), status)
}

fn error_reply(err: &ReferralErr) -> Reply {
    match err {
        // Store details stay in the logs
        ReferralErr::Backend(err) => {
            error!("Backend error: {err}");
            reply(
                &ErrorReply::new("Internal server error"),
                StatusCode::INTERNAL_SERVER_ERROR,
            )
        }
        err => reply(&ErrorReply::new(err.to_string()), err.status_code()),
    }
}

fn respond<T: Serialize>(result: Result<T, ReferralErr>) -> Reply {
    match result {
        Ok(body) => reply(&body, StatusCode::OK),
        Err(err) => error_reply(&err),
    }
}

/// Runs store work off the async workers.
async fn run_blocking<T, F>(f: F) -> Result<T, ReferralErr>
where
    F: FnOnce() -> Result<T, ReferralErr> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result,
        Err(err) => {
            error!("Blocking task failed: {err}");
            Err(ReferralErr::Backend(BackendErr::Error("blocking task failed")))
        }
    }
}

fn post_id_param(raw: &str) -> Result<u64, ReferralErr> {
    parse_post_id_str(raw).ok_or_else(|| ReferralErr::invalid("postId must be a positive integer"))
}

pub async fn track<B: ReferralBackend>(
    service: ReferralService<B>,
    visitor: VisitorContext,
    request: TrackRequest,
) -> Result<Reply, warp::Rejection> {
    let result = run_blocking(move || service.track(request, &visitor))
        .await
        .map(|outcome| match outcome {
            TrackOutcome::Tracked(record) => TrackReply::tracked(record.id),
            TrackOutcome::AlreadyTracked(_) => TrackReply::already_tracked(),
        });

    Ok(respond(result))
}

pub async fn validate<B: ReferralBackend>(
    service: ReferralService<B>,
    request: ValidateRequest,
) -> Result<Reply, warp::Rejection> {
    let result = run_blocking(move || service.validate(request))
        .await
        .map(|validation| ValidateReply {
            success: true,
            is_valid: validation.is_valid(),
        });

    Ok(respond(result))
}

pub async fn post_stats<B: ReferralBackend>(
    raw_post_id: String,
    service: ReferralService<B>,
) -> Result<Reply, warp::Rejection> {
    let result = match post_id_param(&raw_post_id) {
        Ok(post_id) => run_blocking(move || service.post_stats(post_id))
            .await
            .map(|stats| PostStatsReply {
                success: true,
                stats,
            }),
        Err(err) => Err(err),
    };

    Ok(respond(result))
}

pub async fn referrer_stats<B: ReferralBackend>(
    referrer: String,
    service: ReferralService<B>,
) -> Result<Reply, warp::Rejection> {
    let result = run_blocking(move || service.referrer_stats(&referrer))
        .await
        .map(|stats| ReferrerStatsReply {
            success: true,
            stats,
        });

    Ok(respond(result))
}

pub async fn leaderboard<B: ReferralBackend>(
    raw_post_id: String,
    service: ReferralService<B>,
) -> Result<Reply, warp::Rejection> {
    let result = match post_id_param(&raw_post_id) {
        Ok(post_id) => run_blocking(move || service.leaderboard(post_id))
            .await
            .map(|leaderboard| LeaderboardReply {
                success: true,
                leaderboard,
            }),
        Err(err) => Err(err),
    };

    Ok(respond(result))
}

pub async fn bulk_reward<B: ReferralBackend>(
    service: ReferralService<B>,
    request: BulkRewardRequest,
) -> Result<Reply, warp::Rejection> {
    let result = run_blocking(move || service.bulk_reward(request))
        .await
        .map(|reward| BulkRewardReply {
            success: true,
            reward,
        });

    Ok(respond(result))
}

pub async fn claim<B: ReferralBackend>(
    service: ReferralService<B>,
    admin: AdminCredentials,
    authorization: Option<String>,
    request: ClaimRequest,
) -> Result<Reply, warp::Rejection> {
    if !admin.check_authorization_header(authorization.as_deref()) {
        warn!("Rejected unauthorized claim request");
        return Ok(reply(
            &ErrorReply::new("Unauthorized"),
            StatusCode::UNAUTHORIZED,
        ));
    }

    let result = run_blocking(move || service.claim(request))
        .await
        .map(|stats| ClaimReply {
            success: true,
            stats,
        });

    Ok(respond(result))
}

pub async fn health() -> Result<Reply, warp::Rejection> {
    Ok(reply(
        &HealthReply {
            success: true,
            version: env!("CARGO_PKG_VERSION").to_owned(),
        },
        StatusCode::OK,
    ))
}
