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

//! Consumer side group membership.
//!
//! A [`MembershipAgent`] discovers the coordinator of its group, joins it,
//! collects its share of the partitions and heartbeats in the background.
//! Ownership changes are reported to the application through a
//! [`RebalanceListener`]: partitions are always revoked (giving the
//! application a chance to commit their offsets) before any newly assigned
//! partition is handed over, and are reported lost when the member was
//! evicted before it could revoke them.

use std::{
    error, fmt, result,
    sync::{LazyLock, PoisonError},
};

use corral_sans_io::ErrorCode;
use opentelemetry::{InstrumentationScope, global, metrics::Meter};
use opentelemetry_semantic_conventions::SCHEMA_URL;
use thiserror::Error;

mod agent;
pub mod config;
mod listener;
mod retry;

pub use agent::{AgentState, MembershipAgent};
pub use config::AgentConfig;
pub use listener::RebalanceListener;
pub use retry::Backoff;

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
    /// The coordinator answered with an error that no retry will fix.
    Api(ErrorCode),

    /// A rebalance listener callback exceeded its time budget.
    CallbackTimeout(&'static str),

    GroupDead,
    InvalidConfig(String),
    Json(#[from] serde_json::Error),
    Listener(Box<dyn error::Error + Send + Sync>),
    Message(String),
    NotJoined,
    PollIntervalExceeded,
    Poison,
    RebalanceTimeout,
    SansIo(#[from] corral_sans_io::Error),
    Storage(#[from] corral_storage::Error),
    Transport(#[from] corral_service::Error),
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

impl From<ErrorCode> for Error {
    fn from(value: ErrorCode) -> Self {
        if value == ErrorCode::GroupDead {
            Self::GroupDead
        } else {
            Self::Api(value)
        }
    }
}

pub type Result<T, E = Error> = result::Result<T, E>;
