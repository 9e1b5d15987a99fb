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

//! Collaborators of the group coordinator and its consumers.
//!
//! [`OffsetStore`] holds the offsets committed by a consumer group, and
//! [`TopicMetadata`] supplies the partition count of each topic. Both are
//! implemented by the in-memory [`Engine`], which is sufficient for tests
//! and for embedding a coordinator in a single process.

use std::{
    collections::BTreeMap,
    fmt::{self, Debug, Display, Formatter},
    result,
    sync::PoisonError,
};

use async_trait::async_trait;
use corral_sans_io::Topition;

mod memory;

pub use memory::Engine;

/// Storage Errors
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    Message(String),
    NegativeOffset { topition: Topition, offset: i64 },
    NegativePartitionCount { topic: String, partitions: i32 },
    Poison,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Message(msg) => write!(f, "{msg}"),
            error => write!(f, "{error:?}"),
        }
    }
}

impl<T> From<PoisonError<T>> for Error {
    fn from(_value: PoisonError<T>) -> Self {
        Self::Poison
    }
}

pub type Result<T, E = Error> = result::Result<T, E>;

/// Durable offsets committed by consumer groups.
#[async_trait]
pub trait OffsetStore: Clone + Debug + Send + Sync + 'static {
    /// Commit the next offset to be consumed by a group for a topic partition.
    async fn commit(&self, group_id: &str, topition: &Topition, offset: i64) -> Result<()>;

    /// The last offset committed by a group for a topic partition.
    async fn fetch(&self, group_id: &str, topition: &Topition) -> Result<Option<i64>>;

    /// Every offset committed by a group.
    async fn committed(&self, group_id: &str) -> Result<BTreeMap<Topition, i64>>;
}

/// Partition counts of the topics known to the broker.
#[async_trait]
pub trait TopicMetadata: Clone + Debug + Send + Sync + 'static {
    /// The number of partitions in a topic, or `None` when the topic is unknown.
    async fn partition_count(&self, topic: &str) -> Result<Option<i32>>;
}
