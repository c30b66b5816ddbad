// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use log::*;
use mimalloc::MiMalloc;
use postref::global::*;
use postref::http::{routes, AdminCredentials};
use postref::referrals::{ReferralService, RewardPolicy};
use postref::settings::{Telemetry, SETTINGS};
use postref::store::*;
use std::env;
use std::net::SocketAddr;
use tokio::runtime::Builder;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::prelude::*;

#[cfg(not(windows))]
use signal_hook::consts::TERM_SIGNALS;
#[cfg(not(windows))]
use signal_hook::flag;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn main() -> anyhow::Result<()> {
    #[cfg(not(windows))]
    for sig in TERM_SIGNALS {
        // When terminated by a second term signal, exit with exit code 1.
        // This will do nothing the first time (because term_now is false).
        flag::register_conditional_shutdown(*sig, 1, EXIT_SIGNAL.clone())?;
        // But this will "arm" the above for the second time, by setting it to true.
        // The order of registering these is important, if you put this one first, it will
        // first arm and then terminate, all in the first round.
        flag::register(*sig, EXIT_SIGNAL.clone())?;
    }

    start_runtime()
}

fn start_runtime() -> anyhow::Result<()> {
    SETTINGS.validate()?;

    let worker_threads = if SETTINGS.http.worker_threads == 0 {
        num_cpus::get()
    } else {
        SETTINGS.http.worker_threads as usize
    };

    let runtime = Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_io()
        .enable_time()
        .build()?;

    runtime.block_on(run())
}

async fn run() -> anyhow::Result<()> {
    init_tracing(&SETTINGS.telemetry)?;

    let policy = RewardPolicy::from_settings(&SETTINGS.referrals)?;
    let admin = AdminCredentials::from_settings(&SETTINGS.http);

    if SETTINGS.storage.memory_only {
        info!(
            "Running Postref v{} in memory only mode",
            env!("CARGO_PKG_VERSION")
        );
        serve(ReferralService::new(MemoryBackend::new(), policy), admin).await
    } else {
        let db = create_rocksdb_backend(&SETTINGS.storage)?;
        info!(
            "Running Postref v{} with data dir {}",
            env!("CARGO_PKG_VERSION"),
            SETTINGS.storage.data_dir
        );
        serve(ReferralService::new(DiskBackend::new(db), policy), admin).await
    }
}

async fn serve<B: ReferralBackend>(
    service: ReferralService<B>,
    admin: AdminCredentials,
) -> anyhow::Result<()> {
    let addr: SocketAddr = format!(
        "{}:{}",
        SETTINGS.http.listen_addr, SETTINGS.http.listen_port
    )
    .parse()?;

    let (addr, server) = warp::serve(routes(service, admin))
        .try_bind_with_graceful_shutdown(addr, check_exit_signal())?;

    info!(
        "Postref v{} listening on {}",
        env!("CARGO_PKG_VERSION"),
        addr
    );

    server.await;
    Ok(())
}

async fn check_exit_signal() {
    wait_for_exit_signal().await;

    info!(
        "Postref v{} shutting down...",
        env!("CARGO_PKG_VERSION")
    );
}

/// Installs the tracing subscriber, exporting to Jaeger when enabled.
fn init_tracing(telemetry: &Telemetry) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer());

    if telemetry.jaeger_enabled {
        env::set_var("OTEL_BSP_MAX_EXPORT_BATCH_SIZE", "12");
        let tracer = opentelemetry_jaeger::new_pipeline()
            .with_service_name(telemetry.service_name.as_str())
            .with_max_packet_size(2usize.pow(13))
            .install_batch(opentelemetry::runtime::Tokio)?;

        registry
            .with(tracing_opentelemetry::layer().with_tracer(tracer))
            .try_init()?;
    } else {
        registry.try_init()?;
    }

    Ok(())
}
