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
    collections::{BTreeMap, BTreeSet},
    fmt::{self, Debug, Formatter},
    pin::pin,
    sync::{Arc, LazyLock, Mutex},
};

use async_trait::async_trait;
use corral_sans_io::{
    ErrorCode, FindCoordinatorRequest, FindCoordinatorResponse, HeartbeatRequest,
    HeartbeatResponse, JoinGroupRequest, JoinGroupResponse, LeaveGroupRequest,
    LeaveGroupResponse, SyncGroupRequest, SyncGroupResponse,
};
use corral_storage::TopicMetadata;
use opentelemetry::{KeyValue, metrics::Counter};
use tokio::{
    sync::{Mutex as AsyncMutex, Notify, OwnedMutexGuard},
    time::{Instant, timeout_at},
};
use tracing::{debug, info, instrument, warn};

use crate::{
    CoordinatorConfig, Error, METER, Result,
    coordinator::{
        Coordinator, GroupDescription,
        group::{Group, Join},
    },
};

static COORDINATOR_REQUESTS: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("corral_group_coordinator_requests")
        .with_description("consumer group coordinator requests")
        .build()
});

static GROUPS_RETIRED: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("corral_group_coordinator_groups_retired")
        .with_description("idle consumer groups forgotten by the coordinator")
        .build()
});

/// A registered group, with the waiters for its rebalances to complete.
#[derive(Clone, Debug)]
struct Slot {
    group: Arc<AsyncMutex<Group>>,
    notify: Arc<Notify>,
}

impl Slot {
    fn new(group: Group) -> Self {
        Self {
            group: Arc::new(AsyncMutex::new(group)),
            notify: Arc::new(Notify::new()),
        }
    }
}

/// The group coordinator.
///
/// Groups are created on the first join and each is locked independently,
/// the registry lock is only held while looking up a group. Joining members
/// wait (without holding the group lock) until their rebalance completes.
#[derive(Clone)]
pub struct Controller<M> {
    config: CoordinatorConfig,
    metadata: M,
    groups: Arc<Mutex<BTreeMap<String, Slot>>>,
}

impl<M> Debug for Controller<M> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct(stringify!(Controller))
            .field("config", &self.config)
            .finish()
    }
}

fn now() -> std::time::Instant {
    Instant::now().into_std()
}

impl<M> Controller<M>
where
    M: TopicMetadata,
{
    pub fn new(config: CoordinatorConfig, metadata: M) -> Self {
        Self {
            config,
            metadata,
            groups: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// The identifiers of every registered group.
    pub fn group_ids(&self) -> Result<Vec<String>> {
        self.groups
            .lock()
            .map(|groups| groups.keys().cloned().collect())
            .map_err(Into::into)
    }

    /// Evict expired members, complete overdue rebalances, poll for
    /// partition count changes and forget idle groups.
    #[instrument(skip(self))]
    pub async fn sweep(&self) -> Result<()> {
        for (group_id, slot) in self.slots()? {
            if let Err(err) = self.sweep_group(&group_id, &slot).await {
                warn!(group_id, ?err);
            }
        }

        Ok(())
    }

    async fn sweep_group(&self, group_id: &str, slot: &Slot) -> Result<()> {
        let mut group = slot.group.lock().await;

        if group.is_retired() {
            return Ok(());
        }

        let (partitions_per_topic, answered) = self.partitions_per_topic(&group.topics()).await;

        let now = now();
        let mut changed = group.expire(now, &partitions_per_topic);

        // an unanswered lookup is not a change in partition count
        if self.config.poll_metadata && answered {
            changed |= group.metadata(now, &partitions_per_topic);
        }

        if changed {
            slot.notify.notify_waiters();
        }

        if group.is_idle(now, self.config.group_idle_timeout()) {
            let mut groups = self.groups.lock()?;

            if groups
                .get(group_id)
                .is_some_and(|registered| Arc::ptr_eq(&registered.group, &slot.group))
            {
                _ = groups.remove(group_id);
                group.retire();

                info!(group_id, state = %group.state(), "retired");
                GROUPS_RETIRED.add(1, &[]);
            }
        }

        Ok(())
    }

    fn slots(&self) -> Result<Vec<(String, Slot)>> {
        self.groups
            .lock()
            .map(|groups| {
                groups
                    .iter()
                    .map(|(group_id, slot)| (group_id.clone(), slot.clone()))
                    .collect()
            })
            .map_err(Into::into)
    }

    /// Lock a group, creating it when required.
    async fn locked(
        &self,
        group_id: &str,
        create: bool,
    ) -> Result<Option<(Slot, OwnedMutexGuard<Group>)>> {
        loop {
            let slot = {
                let mut groups = self.groups.lock()?;

                if let Some(slot) = groups.get(group_id) {
                    slot.clone()
                } else if create {
                    debug!(group_id, assignor = %self.config.assignment_strategy, "created");

                    let slot = Slot::new(Group::new(
                        group_id,
                        self.config.assignment_strategy,
                        now(),
                    ));
                    _ = groups.insert(group_id.to_owned(), slot.clone());
                    slot
                } else {
                    return Ok(None);
                }
            };

            let group = slot.group.clone().lock_owned().await;

            // raced with the sweep, the group has gone
            if group.is_retired() {
                continue;
            }

            return Ok(Some((slot, group)));
        }
    }

    /// The partition counts of `topics`, and whether every lookup was
    /// answered. A topic whose lookup fails is left out, as if unknown.
    async fn partitions_per_topic(
        &self,
        topics: &BTreeSet<String>,
    ) -> (BTreeMap<String, i32>, bool) {
        let mut partitions_per_topic = BTreeMap::new();
        let mut answered = true;

        for topic in topics {
            match self.metadata.partition_count(topic).await {
                Ok(Some(partitions)) => {
                    _ = partitions_per_topic.insert(topic.clone(), partitions);
                }

                Ok(None) => {}

                Err(err) => {
                    warn!(topic, ?err, "partition count unavailable");
                    answered = false;
                }
            }
        }

        (partitions_per_topic, answered)
    }

    /// Expire a group on behalf of a member waiting for its rebalance deadline.
    async fn expire(&self, slot: &Slot) -> Result<()> {
        let mut group = slot.group.lock().await;

        let (partitions_per_topic, _) = self.partitions_per_topic(&group.topics()).await;

        if group.expire(now(), &partitions_per_topic) {
            slot.notify.notify_waiters();
        }

        Ok(())
    }

    /// Wait for the rebalance joined by `member_id` to complete.
    async fn joined(
        &self,
        slot: Slot,
        mut group: OwnedMutexGuard<Group>,
        member_id: String,
    ) -> Result<JoinGroupResponse> {
        loop {
            if let Some(response) = group.join_outcome(&member_id) {
                return Ok(response);
            }

            let deadline = group.rebalance_deadline();

            let notified = slot.notify.notified();
            let mut notified = pin!(notified);
            _ = notified.as_mut().enable();

            drop(group);

            COORDINATOR_REQUESTS.add(1, &[KeyValue::new("method", "join_wait")]);

            if let Some(deadline) = deadline {
                if timeout_at(Instant::from_std(deadline), notified)
                    .await
                    .is_err()
                {
                    debug!(member_id, "rebalance deadline");
                    self.expire(&slot).await?;
                }
            } else {
                notified.await;
            }

            group = slot.group.clone().lock_owned().await;
        }
    }

    fn session_timeout_ms(&self, session_timeout_ms: i32) -> Option<i32> {
        if session_timeout_ms == 0 {
            Some(self.config.session_timeout_ms)
        } else {
            self.config
                .session_timeout_range()
                .contains(&session_timeout_ms)
                .then_some(session_timeout_ms)
        }
    }
}

#[async_trait]
impl<M> Coordinator for Controller<M>
where
    M: TopicMetadata,
{
    #[instrument(skip(self))]
    async fn find_coordinator(
        &self,
        find_coordinator: FindCoordinatorRequest,
    ) -> Result<FindCoordinatorResponse> {
        COORDINATOR_REQUESTS.add(1, &[KeyValue::new("method", "find_coordinator")]);

        let response = FindCoordinatorResponse::default().key(find_coordinator.key);

        Ok(if let Some(listener) = self.config.advertised_listener.clone() {
            response.coordinator(Some(listener))
        } else {
            response.error_code(ErrorCode::CoordinatorNotAvailable)
        })
    }

    #[instrument(skip(self))]
    async fn join(&self, join: JoinGroupRequest) -> Result<JoinGroupResponse> {
        COORDINATOR_REQUESTS.add(1, &[KeyValue::new("method", "join")]);

        if join.group_id.is_empty() {
            return Ok(JoinGroupResponse::default()
                .error_code(ErrorCode::InvalidGroupId)
                .generation_id(-1)
                .member_id(join.member_id));
        }

        let Some(session_timeout_ms) = self.session_timeout_ms(join.session_timeout_ms) else {
            return Ok(JoinGroupResponse::default()
                .error_code(ErrorCode::InvalidSessionTimeout)
                .generation_id(-1)
                .member_id(join.member_id));
        };

        let rebalance_timeout_ms = if join.rebalance_timeout_ms > 0 {
            join.rebalance_timeout_ms
        } else {
            self.config.rebalance_timeout_ms
        };

        let join = join
            .session_timeout_ms(session_timeout_ms)
            .rebalance_timeout_ms(rebalance_timeout_ms);

        let Some((slot, mut group)) = self.locked(&join.group_id, true).await? else {
            return Err(Error::Message(format!("group: {}", join.group_id)));
        };

        let mut topics = group.topics();
        topics.extend(join.topics.iter().cloned());
        let (partitions_per_topic, _) = self.partitions_per_topic(&topics).await;

        let outcome = group.join(now(), &join, &partitions_per_topic);
        slot.notify.notify_waiters();

        match outcome {
            Join::Complete(response) => Ok(response),
            Join::Pending(member_id) => self.joined(slot, group, member_id).await,
        }
    }

    #[instrument(skip(self))]
    async fn sync(&self, sync: SyncGroupRequest) -> Result<SyncGroupResponse> {
        COORDINATOR_REQUESTS.add(1, &[KeyValue::new("method", "sync")]);

        let Some((slot, mut group)) = self.locked(&sync.group_id, false).await? else {
            return Ok(SyncGroupResponse::default().error_code(ErrorCode::UnknownMemberId));
        };

        let response = group.sync(now(), &sync);
        slot.notify.notify_waiters();

        Ok(response)
    }

    #[instrument(skip(self))]
    async fn heartbeat(&self, heartbeat: HeartbeatRequest) -> Result<HeartbeatResponse> {
        COORDINATOR_REQUESTS.add(1, &[KeyValue::new("method", "heartbeat")]);

        let Some((_, mut group)) = self.locked(&heartbeat.group_id, false).await? else {
            return Ok(HeartbeatResponse::default().error_code(ErrorCode::UnknownMemberId));
        };

        Ok(group.heartbeat(now(), &heartbeat))
    }

    #[instrument(skip(self))]
    async fn leave(&self, leave: LeaveGroupRequest) -> Result<LeaveGroupResponse> {
        COORDINATOR_REQUESTS.add(1, &[KeyValue::new("method", "leave")]);

        let Some((slot, mut group)) = self.locked(&leave.group_id, false).await? else {
            return Ok(LeaveGroupResponse::default().error_code(ErrorCode::UnknownMemberId));
        };

        let (partitions_per_topic, _) = self.partitions_per_topic(&group.topics()).await;

        let response = group.leave(now(), &leave, &partitions_per_topic);
        slot.notify.notify_waiters();

        Ok(response)
    }

    #[instrument(skip(self))]
    async fn delete_group(&self, group_id: &str) -> Result<ErrorCode> {
        COORDINATOR_REQUESTS.add(1, &[KeyValue::new("method", "delete_group")]);

        let Some((slot, mut group)) = self.locked(group_id, false).await? else {
            return Ok(ErrorCode::GroupIdNotFound);
        };

        let error_code = group.delete(now());
        slot.notify.notify_waiters();

        Ok(error_code)
    }

    #[instrument(skip(self))]
    async fn describe_group(&self, group_id: &str) -> Result<Option<GroupDescription>> {
        COORDINATOR_REQUESTS.add(1, &[KeyValue::new("method", "describe_group")]);

        Ok(self
            .locked(group_id, false)
            .await?
            .map(|(_, group)| group.describe()))
    }

    #[instrument(skip(self))]
    async fn metadata_changed(&self, topic: &str) -> Result<()> {
        COORDINATOR_REQUESTS.add(1, &[KeyValue::new("method", "metadata_changed")]);

        for (_, slot) in self.slots()? {
            let mut group = slot.group.lock().await;

            let topics = group.topics();
            if group.is_retired() || !topics.contains(topic) {
                continue;
            }

            let (partitions_per_topic, answered) = self.partitions_per_topic(&topics).await;

            if answered && group.metadata(now(), &partitions_per_topic) {
                slot.notify.notify_waiters();
            }
        }

        Ok(())
    }
}
