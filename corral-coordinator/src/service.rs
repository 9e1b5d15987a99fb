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

//! Serving a [`Coordinator`] over a request channel.

use async_trait::async_trait;
use corral_sans_io::Body;
use corral_service::{Handler, RequestReceiver};
use corral_storage::TopicMetadata;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{Controller, Coordinator, Error, Result, sweep};

/// Dispatch request bodies to a [`Coordinator`].
#[derive(Clone, Debug)]
pub struct CoordinatorService<C> {
    coordinator: C,
}

impl<C> CoordinatorService<C>
where
    C: Coordinator,
{
    pub fn new(coordinator: C) -> Self {
        Self { coordinator }
    }
}

#[async_trait]
impl<C> Handler for CoordinatorService<C>
where
    C: Coordinator,
{
    type Error = Error;

    async fn handle(&self, body: Body) -> Result<Body> {
        match body {
            Body::FindCoordinatorRequest(find_coordinator) => self
                .coordinator
                .find_coordinator(find_coordinator)
                .await
                .map(Into::into),

            Body::JoinGroupRequest(join) => self.coordinator.join(join).await.map(Into::into),

            Body::SyncGroupRequest(sync) => self.coordinator.sync(sync).await.map(Into::into),

            Body::HeartbeatRequest(heartbeat) => self
                .coordinator
                .heartbeat(heartbeat)
                .await
                .map(Into::into),

            Body::LeaveGroupRequest(leave) => {
                self.coordinator.leave(leave).await.map(Into::into)
            }

            unexpected => Err(Error::UnexpectedBody(Box::new(unexpected))),
        }
    }
}

/// Serve a controller over a request channel, sweeping its groups in the
/// background, until cancelled.
pub async fn run<M>(
    controller: Controller<M>,
    requests: RequestReceiver,
    cancellation: CancellationToken,
) -> Result<()>
where
    M: TopicMetadata,
{
    let mut set = JoinSet::new();

    _ = set.spawn(sweep::run(controller.clone(), cancellation.clone()));

    corral_service::serve(
        CoordinatorService::new(controller),
        requests,
        cancellation,
    )
    .await;

    while let Some(joined) = set.join_next().await {
        debug!(?joined);
        joined??;
    }

    Ok(())
}
