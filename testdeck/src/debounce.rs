// Copyright (c) The testdeck Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Coalescing rapid inputs into a single delayed delivery.

use pin_project_lite::pin_project;
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};
use tokio::time::{Instant, Sleep};

/// The default quiet period before a scheduled value is delivered.
pub const DEFAULT_DEBOUNCE_PERIOD: Duration = Duration::from_millis(500);

pin_project! {
    /// A single-slot debouncer.
    ///
    /// [`schedule`](Self::schedule) stores a value and restarts the quiet-period timer, replacing
    /// any value that was already pending. Awaiting the debouncer yields the latest value once
    /// the timer expires, exactly once.
    ///
    /// The debouncer is meant to be owned by one task and polled from a `select!` loop, guarded
    /// by [`is_pending`](Self::is_pending). Because scheduling and delivery happen on the same
    /// task, a replaced value can never be delivered.
    #[derive(Debug)]
    pub struct Debouncer<T> {
        #[pin]
        sleep: Sleep,
        period: Duration,
        pending: Option<T>,
    }
}

impl<T> Debouncer<T> {
    /// Creates an idle debouncer with the given quiet period.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(period: Duration) -> Self {
        Self {
            sleep: tokio::time::sleep_until(far_future()),
            period,
            pending: None,
        }
    }

    /// Returns the quiet period.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Returns true if a value is waiting for its quiet period to end.
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Schedules `value` for delivery after the quiet period, restarting the timer.
    ///
    /// Returns the value that was pending before, which will now never be delivered.
    pub fn schedule(self: Pin<&mut Self>, value: T) -> Option<T> {
        let this = self.project();
        this.sleep.reset(Instant::now() + *this.period);
        this.pending.replace(value)
    }

    /// Cancels the pending value, if any, and returns it.
    pub fn cancel(self: Pin<&mut Self>) -> Option<T> {
        let this = self.project();
        this.sleep.reset(far_future());
        this.pending.take()
    }
}

impl<T> Future for Debouncer<T> {
    type Output = T;

    /// Completes with the pending value once the quiet period has elapsed.
    ///
    /// An idle debouncer never completes.
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let mut this = self.project();
        if this.pending.is_none() {
            return Poll::Pending;
        }
        match this.sleep.as_mut().poll(cx) {
            Poll::Ready(()) => {
                this.sleep.reset(far_future());
                match this.pending.take() {
                    Some(value) => Poll::Ready(value),
                    None => Poll::Pending,
                }
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

// Roughly 30 years from now, the same horizon tokio uses for an unarmed timer.
fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86400 * 365 * 30)
}
