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

use std::{ops::RangeInclusive, str::FromStr, time::Duration};

use corral_sans_io::Assignor;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Error, Result};

/// Coordinator configuration.
///
/// Deserialized from JSON with camel case names (`sessionTimeoutMs`, ...),
/// every field is optional and defaults as described below.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CoordinatorConfig {
    /// Returned by FindCoordinator, when absent the coordinator is not available.
    pub advertised_listener: Option<Url>,

    /// Used when a join request does not carry a session timeout.
    pub session_timeout_ms: i32,

    pub min_session_timeout_ms: i32,
    pub max_session_timeout_ms: i32,

    /// Used when a join request does not carry a rebalance timeout.
    pub rebalance_timeout_ms: i32,

    /// The strategy used by a group whose first member names none that is known.
    pub assignment_strategy: Assignor,

    pub sweep_interval_ms: u64,

    /// How long an empty or deleted group is retained.
    pub group_idle_timeout_ms: u64,

    /// Poll topic partition counts of stable groups on every sweep.
    pub poll_metadata: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            advertised_listener: None,
            session_timeout_ms: 30_000,
            min_session_timeout_ms: 6_000,
            max_session_timeout_ms: 1_800_000,
            rebalance_timeout_ms: 60_000,
            assignment_strategy: Assignor::default(),
            sweep_interval_ms: 1_000,
            group_idle_timeout_ms: 600_000,
            poll_metadata: true,
        }
    }
}

impl CoordinatorConfig {
    pub fn advertised_listener(self, advertised_listener: Url) -> Self {
        Self {
            advertised_listener: Some(advertised_listener),
            ..self
        }
    }

    pub fn session_timeout_ms(self, session_timeout_ms: i32) -> Self {
        Self {
            session_timeout_ms,
            ..self
        }
    }

    pub fn min_session_timeout_ms(self, min_session_timeout_ms: i32) -> Self {
        Self {
            min_session_timeout_ms,
            ..self
        }
    }

    pub fn max_session_timeout_ms(self, max_session_timeout_ms: i32) -> Self {
        Self {
            max_session_timeout_ms,
            ..self
        }
    }

    pub fn rebalance_timeout_ms(self, rebalance_timeout_ms: i32) -> Self {
        Self {
            rebalance_timeout_ms,
            ..self
        }
    }

    pub fn assignment_strategy(self, assignment_strategy: Assignor) -> Self {
        Self {
            assignment_strategy,
            ..self
        }
    }

    pub fn sweep_interval_ms(self, sweep_interval_ms: u64) -> Self {
        Self {
            sweep_interval_ms,
            ..self
        }
    }

    pub fn group_idle_timeout_ms(self, group_idle_timeout_ms: u64) -> Self {
        Self {
            group_idle_timeout_ms,
            ..self
        }
    }

    pub fn poll_metadata(self, poll_metadata: bool) -> Self {
        Self {
            poll_metadata,
            ..self
        }
    }

    /// The session timeouts acceptable in a join request.
    pub fn session_timeout_range(&self) -> RangeInclusive<i32> {
        self.min_session_timeout_ms..=self.max_session_timeout_ms
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn group_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.group_idle_timeout_ms)
    }

    pub fn validate(self) -> Result<Self> {
        if self.min_session_timeout_ms <= 0
            || self.min_session_timeout_ms > self.max_session_timeout_ms
        {
            return Err(Error::InvalidConfig(format!(
                "session timeout range: {:?}",
                self.session_timeout_range()
            )));
        }

        if !self.session_timeout_range().contains(&self.session_timeout_ms) {
            return Err(Error::InvalidConfig(format!(
                "session timeout: {} outside: {:?}",
                self.session_timeout_ms,
                self.session_timeout_range()
            )));
        }

        if self.rebalance_timeout_ms <= 0 {
            return Err(Error::InvalidConfig(format!(
                "rebalance timeout: {}",
                self.rebalance_timeout_ms
            )));
        }

        if self.sweep_interval_ms == 0 {
            return Err(Error::InvalidConfig(String::from("sweep interval: 0")));
        }

        Ok(self)
    }
}

impl FromStr for CoordinatorConfig {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_str::<Self>(s)
            .map_err(Into::into)
            .and_then(Self::validate)
    }
}
