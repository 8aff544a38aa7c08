// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::time::{Duration, Instant};

/// A cooperative time budget for a [`crate::Asset::process`] call. Sinks check
/// it between the resumable steps of their work, and return
/// [`crate::Status::Pending`] once it has run out.
#[derive(Debug, Clone, Copy)]
pub struct TimeSlice {
    deadline: Option<Instant>,
}

impl TimeSlice {
    /// A time slice that never runs out. Sinks may block on I/O with these.
    pub const INFINITE: TimeSlice = TimeSlice { deadline: None };

    pub fn new(budget: Duration) -> TimeSlice {
        TimeSlice {
            deadline: Some(Instant::now() + budget),
        }
    }

    /// A time slice that has already run out.
    pub fn expired_now() -> TimeSlice {
        TimeSlice {
            deadline: Some(Instant::now()),
        }
    }

    pub fn is_infinite(&self) -> bool {
        self.deadline.is_none()
    }

    /// The time left, or `None` for an infinite slice.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn expired(&self) -> bool {
        self.remaining().is_some_and(|left| left.is_zero())
    }
}
