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

//! Periodic maintenance of every group registered with a [`Controller`].

use corral_storage::TopicMetadata;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Level, debug, error, span};

use crate::{Controller, Result};

/// Sweep the groups of a controller every sweep interval, until cancelled.
pub async fn run<M>(controller: Controller<M>, cancellation: CancellationToken) -> Result<()>
where
    M: TopicMetadata,
{
    let mut interval = time::interval(controller.config().sweep_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let span = span!(Level::DEBUG, "sweep");

                if let Err(err) = controller.sweep().instrument(span).await {
                    error!(?err);
                }
            }

            cancelled = cancellation.cancelled() => {
                debug!(?cancelled);
                break;
            }
        }
    }

    Ok(())
}
