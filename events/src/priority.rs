// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Delivery ordering keys
//!
//! [`Priority`] is the only sort key used by a drain pass. [`DispatchMethod`] selects
//! the insertion/removal discipline of the buffer an event lands in.
//!

use serde::{Deserialize, Serialize};

use std::fmt;

/// Delivery priority of a submitted event. `High > Normal > Low`.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
)]
pub enum Priority {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
}

impl Priority {
    /// Number of priority levels.
    pub const COUNT: usize = 3;

    /// Drain order: highest priority first.
    pub const DESCENDING: [Priority; Priority::COUNT] =
        [Priority::High, Priority::Normal, Priority::Low];

    /// Slot index of this priority inside per-priority storage.
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Next priority, wrapping from `High` back to `Low`.
    pub const fn next(self) -> Self {
        match self {
            Priority::Low => Priority::Normal,
            Priority::Normal => Priority::High,
            Priority::High => Priority::Low,
        }
    }

    /// Previous priority, wrapping from `Low` to `High`.
    pub const fn previous(self) -> Self {
        match self {
            Priority::Low => Priority::High,
            Priority::Normal => Priority::Low,
            Priority::High => Priority::Normal,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Normal => write!(f, "normal"),
            Priority::High => write!(f, "high"),
        }
    }
}

/// How a buffered event is taken out of an inbox.
///
/// `Queue` delivers in submission order, `Stack` delivers the most recently
/// stacked event first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum DispatchMethod {
    Stack,
    Queue,
}

impl DispatchMethod {
    /// Order in which a drain pass visits the buffers.
    pub const DRAIN_ORDER: [DispatchMethod; 2] =
        [DispatchMethod::Stack, DispatchMethod::Queue];

    /// The other dispatch method.
    pub const fn next(self) -> Self {
        match self {
            DispatchMethod::Stack => DispatchMethod::Queue,
            DispatchMethod::Queue => DispatchMethod::Stack,
        }
    }

    /// The other dispatch method (there are only two).
    pub const fn previous(self) -> Self {
        self.next()
    }
}

impl fmt::Display for DispatchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchMethod::Stack => write!(f, "stack"),
            DispatchMethod::Queue => write!(f, "queue"),
        }
    }
}
