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

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use corral_sans_io::Topition;
use tracing::{debug, instrument};

use crate::{Error, OffsetStore, Result, TopicMetadata};

/// An in-memory offset store and topic catalogue.
///
/// Clones share the same state, so a clone handed to a coordinator sees
/// partition count changes made through the original.
#[derive(Clone, Debug, Default)]
pub struct Engine {
    topics: Arc<Mutex<BTreeMap<String, i32>>>,
    offsets: Arc<Mutex<BTreeMap<(String, Topition), i64>>>,
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder style registration of a topic.
    pub fn topic(self, name: impl Into<String>, partitions: i32) -> Result<Self> {
        self.partitions(name, partitions).map(|_| self)
    }

    /// Create or resize a topic, returning its previous partition count.
    pub fn partitions(&self, name: impl Into<String>, partitions: i32) -> Result<Option<i32>> {
        let topic = name.into();

        if partitions < 0 {
            return Err(Error::NegativePartitionCount { topic, partitions });
        }

        self.topics
            .lock()
            .map(|mut topics| topics.insert(topic, partitions))
            .map_err(Into::into)
    }

    /// Forget a topic.
    pub fn delete_topic(&self, name: &str) -> Result<Option<i32>> {
        self.topics
            .lock()
            .map(|mut topics| topics.remove(name))
            .map_err(Into::into)
    }
}

#[async_trait]
impl OffsetStore for Engine {
    #[instrument(skip(self))]
    async fn commit(&self, group_id: &str, topition: &Topition, offset: i64) -> Result<()> {
        if offset < 0 {
            return Err(Error::NegativeOffset {
                topition: topition.clone(),
                offset,
            });
        }

        self.offsets
            .lock()
            .map(|mut offsets| {
                let previous = offsets.insert((group_id.to_owned(), topition.clone()), offset);
                debug!(?previous);
            })
            .map_err(Into::into)
    }

    #[instrument(skip(self))]
    async fn fetch(&self, group_id: &str, topition: &Topition) -> Result<Option<i64>> {
        self.offsets
            .lock()
            .map(|offsets| {
                offsets
                    .get(&(group_id.to_owned(), topition.clone()))
                    .copied()
            })
            .map_err(Into::into)
    }

    #[instrument(skip(self))]
    async fn committed(&self, group_id: &str) -> Result<BTreeMap<Topition, i64>> {
        self.offsets
            .lock()
            .map(|offsets| {
                offsets
                    .iter()
                    .filter(|((group, _), _)| group == group_id)
                    .map(|((_, topition), offset)| (topition.clone(), *offset))
                    .collect()
            })
            .map_err(Into::into)
    }
}

#[async_trait]
impl TopicMetadata for Engine {
    #[instrument(skip(self))]
    async fn partition_count(&self, topic: &str) -> Result<Option<i32>> {
        self.topics
            .lock()
            .map(|topics| topics.get(topic).copied())
            .map_err(Into::into)
    }
}
