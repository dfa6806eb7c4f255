// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! pb-core: token model, hierarchical names, and payloads for Pinball.

pub mod macros;

pub mod clock;
pub mod config;
pub mod data;
pub mod id;
pub mod name;
pub mod token;

pub use clock::{Clock, FakeClock, SystemClock};
pub use config::{ConfigError, PinballConfig};
pub use data::{
    substitute_template, EventPayload, ExecutionRecord, JobPayload, OverrunPolicy, PayloadError,
    SchedulePayload, SignalAction, SignalPayload, TokenPayload, EVENT_ATTRIBUTE_PREFIX,
    GENERATION_ATTR, TIMESTAMP_ATTR,
};
pub use id::unique_name;
pub use name::{Name, JobState, DELIMITER, SCHEDULE_PREFIX, WORKFLOW_PREFIX, WORKFLOW_START_INPUT};
#[cfg(any(test, feature = "test-support"))]
pub use token::TokenBuilder;
pub use token::{Token, EXPIRATION_NEVER};
