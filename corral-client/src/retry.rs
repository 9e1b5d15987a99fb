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

use std::time::Duration;

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder, backoff::Backoff as _};
use tokio::time::sleep;
use tracing::debug;

/// Bounded exponential backoff with jitter.
///
/// Each delay doubles up to the maximum, randomized by a quarter either way
/// so that members do not retry in lockstep. There is no elapsed time
/// limit: retries are bounded by the deadline of the caller.
#[derive(Clone, Debug)]
pub struct Backoff {
    maximum: Duration,
    exponential: ExponentialBackoff,
}

impl Backoff {
    pub fn new(initial: Duration, maximum: Duration) -> Self {
        let maximum = maximum.max(initial);

        Self {
            maximum,
            exponential: ExponentialBackoffBuilder::new()
                .with_initial_interval(initial)
                .with_max_interval(maximum)
                .with_multiplier(2.0)
                .with_randomization_factor(0.25)
                .with_max_elapsed_time(None)
                .build(),
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        self.exponential.next_backoff().unwrap_or(self.maximum)
    }

    pub fn reset(&mut self) {
        self.exponential.reset();
    }

    pub async fn wait(&mut self) {
        let delay = self.next_delay();
        debug!(?delay);
        sleep(delay).await
    }
}
