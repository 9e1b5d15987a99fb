// Copyright ⓒ 2024-2025 Peter Morgan <peter.james.morgan@gmail.com>
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Consumer group coordinator.
//!
//! The [`Controller`] owns every consumer group known to this coordinator,
//! each group being a [`Group`] state machine behind its own lock. Members
//! join, sync, heartbeat and leave through the [`Coordinator`] trait, either
//! directly or over a channel with [`service::CoordinatorService`]. A
//! periodic [`sweep`] evicts members that stop heartbeating, completes
//! rebalances that have run out of time, notices topic partition count
//! changes, and forgets groups that have been idle for too long.

use std::{
    fmt, result,
    str::FromStr,
    sync::{LazyLock, PoisonError},
};

use corral_sans_io::Body;
use opentelemetry::{InstrumentationScope, global, metrics::Meter};
use opentelemetry_semantic_conventions::SCHEMA_URL;
use thiserror::Error;
use tokio::task::JoinError;
use tracing_subscriber::{filter::ParseError, util::TryInitError};

pub mod config;
pub mod coordinator;
pub mod otel;
pub mod service;
pub mod sweep;

pub use config::CoordinatorConfig;
pub use coordinator::{
    Coordinator, GroupDescription, MemberDescription,
    controller::Controller,
    group::{Group, Join, State},
};

pub(crate) static METER: LazyLock<Meter> = LazyLock::new(|| {
    global::meter_with_scope(
        InstrumentationScope::builder(env!("CARGO_PKG_NAME"))
            .with_version(env!("CARGO_PKG_VERSION"))
            .with_schema_url(SCHEMA_URL)
            .build(),
    )
});

#[derive(Error, Debug)]
pub enum Error {
    InvalidConfig(String),
    Join(#[from] JoinError),
    Json(#[from] serde_json::Error),
    Message(String),
    ParseFilter(#[from] ParseError),
    Poison,
    SansIo(#[from] corral_sans_io::Error),
    Service(#[from] corral_service::Error),
    Storage(#[from] corral_storage::Error),
    TryInit(#[from] TryInitError),
    UnexpectedBody(Box<Body>),
    UnsupportedTracingFormat(String),
    Url(#[from] url::ParseError),
}

impl<T> From<PoisonError<T>> for Error {
    fn from(_value: PoisonError<T>) -> Self {
        Self::Poison
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Message(msg) => write!(f, "{msg}"),
            error => write!(f, "{error:?}"),
        }
    }
}

pub type Result<T, E = Error> = result::Result<T, E>;

#[derive(Copy, Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum TracingFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for TracingFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            otherwise => Err(Error::UnsupportedTracingFormat(otherwise.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracing_format() -> Result<()> {
        assert_eq!(TracingFormat::Json, TracingFormat::from_str("json")?);
        assert_eq!(TracingFormat::Text, TracingFormat::from_str("text")?);

        assert!(matches!(
            TracingFormat::from_str("yaml"),
            Err(Error::UnsupportedTracingFormat(format)) if format == "yaml"
        ));

        Ok(())
    }
}
