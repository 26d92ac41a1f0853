// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Poison-tolerant lock helpers.
//!
//! A panic while holding a std mutex poisons it. The state guarded here
//! (circuit-breaker counters, fake clocks, test recorders) is always
//! left consistent between statements, so recovering the guard is preferable
//! to propagating the panic into every later caller.

use std::sync::{Mutex, MutexGuard};

/// Acquire a mutex, recovering from poisoning if necessary.
#[inline]
pub fn resilient_lock<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::error!(
                target: "arrgate::locks",
                event = "LOCK_POISONED_MUTEX",
                "Mutex was poisoned; recovering"
            );
            poisoned.into_inner()
        }
    }
}
