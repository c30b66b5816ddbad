// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use lazy_static::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

lazy_static! {
    /// Set by the termination signal handlers
    pub static ref EXIT_SIGNAL: Arc<AtomicBool> = Arc::new(AtomicBool::new(false));
}

#[must_use]
pub fn exit_requested() -> bool {
    EXIT_SIGNAL.load(Ordering::Relaxed)
}

/// Resolves once an exit has been requested.
pub async fn wait_for_exit_signal() {
    while !exit_requested() {
        sleep(Duration::from_millis(100)).await;
    }
}
