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

use std::{str::FromStr, time::Duration};

use corral_sans_io::{Assignor, CONSUMER};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Error, Result};

fn millis(ms: i32) -> Duration {
    Duration::from_millis(u64::try_from(ms).unwrap_or_default())
}

/// Membership agent configuration.
///
/// Deserialized from JSON with camel case names (`groupId`,
/// `sessionTimeoutMs`, ...). Only the group id is required.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentConfig {
    pub group_id: String,
    pub client_instance_id: String,

    /// Where the coordinator is discovered, otherwise the bootstrap
    /// address of the transport.
    pub bootstrap: Option<Url>,

    pub protocol_type: String,
    pub session_timeout_ms: i32,

    /// A third of the session timeout when absent.
    pub heartbeat_interval_ms: Option<i32>,

    pub rebalance_timeout_ms: i32,

    /// The longest the application may go between polls before this
    /// member leaves the group.
    pub max_poll_interval_ms: i32,

    /// The time budget of each rebalance listener callback.
    pub callback_timeout_ms: i32,

    pub assignment_strategy: Assignor,
    pub retry_backoff_ms: i32,
    pub retry_backoff_max_ms: i32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            group_id: String::new(),
            client_instance_id: String::new(),
            bootstrap: None,
            protocol_type: CONSUMER.into(),
            session_timeout_ms: 30_000,
            heartbeat_interval_ms: None,
            rebalance_timeout_ms: 60_000,
            max_poll_interval_ms: 300_000,
            callback_timeout_ms: 60_000,
            assignment_strategy: Assignor::default(),
            retry_backoff_ms: 100,
            retry_backoff_max_ms: 1_000,
        }
    }
}

impl AgentConfig {
    pub fn group_id(self, group_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            ..self
        }
    }

    pub fn client_instance_id(self, client_instance_id: impl Into<String>) -> Self {
        Self {
            client_instance_id: client_instance_id.into(),
            ..self
        }
    }

    pub fn bootstrap(self, bootstrap: Url) -> Self {
        Self {
            bootstrap: Some(bootstrap),
            ..self
        }
    }

    pub fn session_timeout_ms(self, session_timeout_ms: i32) -> Self {
        Self {
            session_timeout_ms,
            ..self
        }
    }

    pub fn heartbeat_interval_ms(self, heartbeat_interval_ms: i32) -> Self {
        Self {
            heartbeat_interval_ms: Some(heartbeat_interval_ms),
            ..self
        }
    }

    pub fn rebalance_timeout_ms(self, rebalance_timeout_ms: i32) -> Self {
        Self {
            rebalance_timeout_ms,
            ..self
        }
    }

    pub fn max_poll_interval_ms(self, max_poll_interval_ms: i32) -> Self {
        Self {
            max_poll_interval_ms,
            ..self
        }
    }

    pub fn callback_timeout_ms(self, callback_timeout_ms: i32) -> Self {
        Self {
            callback_timeout_ms,
            ..self
        }
    }

    pub fn assignment_strategy(self, assignment_strategy: Assignor) -> Self {
        Self {
            assignment_strategy,
            ..self
        }
    }

    pub fn retry_backoff_ms(self, retry_backoff_ms: i32) -> Self {
        Self {
            retry_backoff_ms,
            ..self
        }
    }

    pub fn retry_backoff_max_ms(self, retry_backoff_max_ms: i32) -> Self {
        Self {
            retry_backoff_max_ms,
            ..self
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        millis(
            self.heartbeat_interval_ms
                .unwrap_or(self.session_timeout_ms / 3),
        )
    }

    pub fn session_timeout(&self) -> Duration {
        millis(self.session_timeout_ms)
    }

    pub fn rebalance_timeout(&self) -> Duration {
        millis(self.rebalance_timeout_ms)
    }

    pub fn max_poll_interval(&self) -> Duration {
        millis(self.max_poll_interval_ms)
    }

    pub fn callback_timeout(&self) -> Duration {
        millis(self.callback_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        millis(self.retry_backoff_ms)
    }

    pub fn retry_backoff_max(&self) -> Duration {
        millis(self.retry_backoff_max_ms)
    }

    pub fn validate(self) -> Result<Self> {
        if self.group_id.is_empty() {
            return Err(Error::InvalidConfig(String::from("group id: empty")));
        }

        for (name, value) in [
            ("session timeout", self.session_timeout_ms),
            ("rebalance timeout", self.rebalance_timeout_ms),
            ("max poll interval", self.max_poll_interval_ms),
            ("callback timeout", self.callback_timeout_ms),
            ("retry backoff", self.retry_backoff_ms),
        ] {
            if value <= 0 {
                return Err(Error::InvalidConfig(format!("{name}: {value}")));
            }
        }

        if self.heartbeat_interval().is_zero()
            || self.heartbeat_interval() >= self.session_timeout()
        {
            return Err(Error::InvalidConfig(format!(
                "heartbeat interval: {:?}, session timeout: {:?}",
                self.heartbeat_interval(),
                self.session_timeout()
            )));
        }

        if self.retry_backoff_ms > self.retry_backoff_max_ms {
            return Err(Error::InvalidConfig(format!(
                "retry backoff: {}, max: {}",
                self.retry_backoff_ms, self.retry_backoff_max_ms
            )));
        }

        Ok(self)
    }
}

impl FromStr for AgentConfig {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_str::<Self>(s)
            .map_err(Into::into)
            .and_then(Self::validate)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn from_json() -> Result<()> {
        let config = AgentConfig::from_str(
            r#"{
                "groupId": "g1",
                "clientInstanceId": "c1",
                "bootstrap": "tcp://localhost:9092",
                "sessionTimeoutMs": 45000,
                "assignmentStrategy": "sticky",
                "maxPollIntervalMs": 60000
            }"#,
        )?;

        assert_eq!(
            AgentConfig::default()
                .group_id("g1")
                .client_instance_id("c1")
                .bootstrap(Url::parse("tcp://localhost:9092")?)
                .session_timeout_ms(45_000)
                .assignment_strategy(Assignor::Sticky)
                .max_poll_interval_ms(60_000),
            config
        );

        assert_eq!(Duration::from_secs(15), config.heartbeat_interval());

        Ok(())
    }

    #[test]
    fn heartbeat_interval_within_session() {
        assert!(matches!(
            AgentConfig::default()
                .group_id("g1")
                .heartbeat_interval_ms(30_000)
                .validate(),
            Err(Error::InvalidConfig(_))
        ));

        assert!(
            AgentConfig::default()
                .group_id("g1")
                .heartbeat_interval_ms(3_000)
                .validate()
                .is_ok()
        );
    }

    #[test]
    fn invalid() {
        assert!(matches!(
            AgentConfig::default().validate(),
            Err(Error::InvalidConfig(_))
        ));

        assert!(matches!(
            AgentConfig::default()
                .group_id("g1")
                .retry_backoff_ms(2_000)
                .validate(),
            Err(Error::InvalidConfig(_))
        ));

        assert!(matches!(
            AgentConfig::from_str(r#"{"groupId": "g1", "assignmentStrategy": "uniform"}"#),
            Err(Error::Json(_))
        ));
    }
}
