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

#![allow(dead_code)]

use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use corral_client::{AgentConfig, Error, RebalanceListener, Result};
use corral_coordinator::{Controller, Coordinator, CoordinatorConfig, GroupDescription, service};
use corral_sans_io::{ErrorCode, LeaveGroupRequest, Topition};
use corral_service::{ChannelTransport, RequestSender, bounded_channel};
use corral_storage::{Engine, OffsetStore};
use tokio::{task::JoinHandle, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::EnvFilter;
use url::Url;

pub(crate) const GROUP_ID: &str = "g1";
pub(crate) const TOPIC: &str = "t";

pub(crate) fn init_tracing() -> Result<DefaultGuard> {
    Ok(tracing::subscriber::set_default(
        tracing_subscriber::fmt()
            .with_level(true)
            .with_line_number(true)
            .with_thread_names(false)
            .with_target(true)
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(
                    format!("{}=debug", env!("CARGO_PKG_NAME").replace("-", "_"))
                        .parse()
                        .map_err(|err| Error::Message(format!("{err}")))?,
                ),
            )
            .with_test_writer()
            .finish(),
    ))
}

pub(crate) fn topitions(partitions: impl IntoIterator<Item = i32>) -> BTreeSet<Topition> {
    partitions
        .into_iter()
        .map(|partition| Topition::new(TOPIC, partition))
        .collect()
}

pub(crate) fn config(client_instance_id: &str) -> AgentConfig {
    AgentConfig::default()
        .group_id(GROUP_ID)
        .client_instance_id(client_instance_id)
}

#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub(crate) enum Event {
    Assigned(String, BTreeSet<Topition>),
    Committed(String, Topition),
    Lost(String, BTreeSet<Topition>),
    Revoked(String, BTreeSet<Topition>),
}

/// Records every callback, committing the offsets of revoked partitions.
#[derive(Clone, Debug)]
pub(crate) struct Recorder {
    name: String,
    events: Arc<Mutex<Vec<Event>>>,
    offsets: Engine,
    assign_delay: Option<Duration>,
}

impl Recorder {
    pub(crate) fn new(name: &str, events: Arc<Mutex<Vec<Event>>>, offsets: Engine) -> Self {
        Self {
            name: name.into(),
            events,
            offsets,
            assign_delay: None,
        }
    }

    pub(crate) fn assign_delay(self, assign_delay: Duration) -> Self {
        Self {
            assign_delay: Some(assign_delay),
            ..self
        }
    }

    fn record(&self, event: Event) -> Result<()> {
        self.events
            .lock()
            .map(|mut events| events.push(event))
            .map_err(Into::into)
    }
}

#[async_trait]
impl RebalanceListener for Recorder {
    async fn on_partitions_revoked(&self, revoked: &BTreeSet<Topition>) -> Result<()> {
        for topition in revoked {
            self.offsets
                .commit(GROUP_ID, topition, i64::from(topition.partition()) * 10)
                .await?;

            self.record(Event::Committed(self.name.clone(), topition.clone()))?;
        }

        self.record(Event::Revoked(self.name.clone(), revoked.clone()))
    }

    async fn on_partitions_assigned(&self, assigned: &BTreeSet<Topition>) -> Result<()> {
        if let Some(assign_delay) = self.assign_delay {
            sleep(assign_delay).await;
        }

        self.record(Event::Assigned(self.name.clone(), assigned.clone()))
    }

    async fn on_partitions_lost(&self, lost: &BTreeSet<Topition>) -> Result<()> {
        self.record(Event::Lost(self.name.clone(), lost.clone()))
    }
}

/// A coordinator served over an in-process channel.
pub(crate) struct Cluster {
    pub(crate) controller: Controller<Engine>,
    address: Url,
    sender: RequestSender,
    cancellation: CancellationToken,
    server: JoinHandle<corral_coordinator::Result<()>>,
}

impl Cluster {
    pub(crate) fn address() -> Result<Url> {
        Url::parse("tcp://localhost:9092").map_err(Into::into)
    }

    /// A coordinator configuration advertising the cluster address.
    pub(crate) fn coordinator_config() -> Result<CoordinatorConfig> {
        Self::address().map(|address| CoordinatorConfig::default().advertised_listener(address))
    }

    pub(crate) fn start(config: CoordinatorConfig, metadata: Engine) -> Result<Self> {
        let address = Self::address()?;
        let controller = Controller::new(config, metadata);

        let (sender, receiver) = bounded_channel(64);
        let cancellation = CancellationToken::new();

        let server = tokio::spawn(service::run(
            controller.clone(),
            receiver,
            cancellation.clone(),
        ));

        Ok(Self {
            controller,
            address,
            sender,
            cancellation,
            server,
        })
    }

    pub(crate) fn transport(&self) -> Result<ChannelTransport> {
        ChannelTransport::new(self.address.clone())
            .route(self.address.clone(), self.sender.clone())
            .map_err(Into::into)
    }

    pub(crate) async fn describe(&self) -> Result<Option<GroupDescription>> {
        self.controller
            .describe_group(GROUP_ID)
            .await
            .map_err(|err| Error::Message(format!("{err}")))
    }

    /// Remove a member as an administrator would.
    pub(crate) async fn kick(&self, member_id: &str) -> Result<ErrorCode> {
        self.controller
            .leave(
                LeaveGroupRequest::default()
                    .group_id(GROUP_ID.into())
                    .member_id(member_id.into()),
            )
            .await
            .map(|response| response.error_code)
            .map_err(|err| Error::Message(format!("{err}")))
    }

    pub(crate) async fn delete(&self) -> Result<ErrorCode> {
        self.controller
            .delete_group(GROUP_ID)
            .await
            .map_err(|err| Error::Message(format!("{err}")))
    }

    pub(crate) async fn shutdown(self) -> Result<()> {
        self.cancellation.cancel();

        self.server
            .await
            .map_err(|err| Error::Message(format!("{err}")))?
            .map_err(|err| Error::Message(format!("{err}")))
    }
}

/// Wait, in steps of `period`, until `f` holds.
pub(crate) async fn eventually<F, Fut>(period: Duration, attempts: usize, mut f: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    for _ in 0..attempts {
        if f().await? {
            return Ok(());
        }

        sleep(period).await;
    }

    Err(Error::Message(format!("not within {attempts} attempts")))
}
