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

use std::collections::BTreeSet;

use async_trait::async_trait;
use corral_sans_io::Topition;

use crate::Result;

/// Notified as partition ownership changes.
///
/// Every callback runs within the callback timeout of the agent. A callback
/// that overruns it leaves the member torn down as if it had crashed, while
/// an error returned by a callback is only logged.
#[async_trait]
pub trait RebalanceListener: Send + Sync + 'static {
    /// These partitions are no longer owned, commit their offsets now.
    ///
    /// Completes before any partition is assigned to another member.
    async fn on_partitions_revoked(&self, revoked: &BTreeSet<Topition>) -> Result<()>;

    async fn on_partitions_assigned(&self, assigned: &BTreeSet<Topition>) -> Result<()>;

    /// These partitions were owned by a member that has been evicted, they
    /// may already be owned by another member.
    async fn on_partitions_lost(&self, lost: &BTreeSet<Topition>) -> Result<()>;
}
