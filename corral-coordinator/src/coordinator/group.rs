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
    cmp::Reverse,
    collections::{BTreeMap, BTreeSet},
    fmt::{self, Display, Formatter},
    time::{Duration, Instant},
};

use corral_sans_io::{
    Assignment, Assignor, ConsumerAssignor, ErrorCode, HeartbeatRequest, HeartbeatResponse,
    JoinGroupRequest, JoinGroupResponse, JoinGroupResponseMember, LeaveGroupRequest,
    LeaveGroupResponse, RebalanceProtocol, Subscription, SyncGroupRequest, SyncGroupResponse,
    Topition, consumer::subscribed_topitions,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{GroupDescription, MemberDescription};

#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
pub enum State {
    #[default]
    Empty,
    PreparingRebalance,
    CompletingRebalance,
    Stable,
    Dead,
}

impl Display for State {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Empty => "Empty",
            Self::PreparingRebalance => "PreparingRebalance",
            Self::CompletingRebalance => "CompletingRebalance",
            Self::Stable => "Stable",
            Self::Dead => "Dead",
        })
    }
}

/// The outcome of a join request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Join {
    /// Answered immediately, with an error or the current generation.
    Complete(JoinGroupResponse),

    /// The member has joined the rebalance, the response is available from
    /// [`Group::join_outcome`] once the rebalance completes.
    Pending(String),
}

#[derive(Clone, Debug, Eq, PartialEq)]
struct Member {
    client_instance_id: String,
    topics: BTreeSet<String>,
    owned_partitions: BTreeSet<Topition>,
    session_timeout: Duration,
    rebalance_timeout: Duration,
    last_heartbeat: Instant,

    /// When this member joined the rebalance in progress.
    joined_at: Option<Instant>,

    /// The generation last handed to this member in a join response.
    join_generation: Option<i32>,

    synced: bool,
}

impl Member {
    fn subscription(&self, member_id: &str) -> Subscription {
        Subscription::new(member_id)
            .topics(self.topics.iter().cloned())
            .owned_partitions(self.owned_partitions.clone())
    }

    fn has_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_heartbeat) > self.session_timeout
    }

    fn is_generation(&self, generation_id: i32, current: i32) -> bool {
        generation_id == current || self.join_generation == Some(generation_id)
    }
}

fn millis(ms: i32) -> Duration {
    Duration::from_millis(u64::try_from(ms).unwrap_or_default())
}

/// A consumer group, without any I/O.
///
/// Every operation takes the current time, and those that may complete a
/// rebalance take the partition count of the topics subscribed to by the
/// group. Topics missing from the partition counts are excluded from the
/// assignment.
#[derive(Clone, Debug)]
pub struct Group {
    group_id: String,
    default_assignor: Assignor,
    generation_id: i32,
    state: State,
    protocol_type: Option<String>,
    assignor: Option<Assignor>,
    members: BTreeMap<String, Member>,
    leader: Option<String>,
    assignment: Assignment,
    partitions_per_topic: BTreeMap<String, i32>,
    rebalance_deadline: Option<Instant>,
    undelivered: BTreeMap<String, JoinGroupResponse>,
    follow_up: bool,
    idle_since: Option<Instant>,
    retired: bool,
}

impl Group {
    pub fn new(group_id: impl Into<String>, default_assignor: Assignor, now: Instant) -> Self {
        Self {
            group_id: group_id.into(),
            default_assignor,
            generation_id: 0,
            state: State::Empty,
            protocol_type: None,
            assignor: None,
            members: BTreeMap::new(),
            leader: None,
            assignment: Assignment::default(),
            partitions_per_topic: BTreeMap::new(),
            rebalance_deadline: None,
            undelivered: BTreeMap::new(),
            follow_up: false,
            idle_since: Some(now),
            retired: false,
        }
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn generation_id(&self) -> i32 {
        self.generation_id
    }

    pub fn leader(&self) -> Option<&str> {
        self.leader.as_deref()
    }

    pub fn assignor(&self) -> Option<Assignor> {
        self.assignor
    }

    /// The assignment of the current generation.
    pub fn assignment(&self) -> &Assignment {
        &self.assignment
    }

    pub fn rebalance_deadline(&self) -> Option<Instant> {
        self.rebalance_deadline
    }

    pub fn members(&self) -> impl Iterator<Item = &str> {
        self.members.keys().map(String::as_str)
    }

    /// Every topic subscribed to by a member.
    pub fn topics(&self) -> BTreeSet<String> {
        self.members
            .values()
            .flat_map(|member| member.topics.iter().cloned())
            .collect()
    }

    /// Empty or dead for at least `timeout`.
    pub fn is_idle(&self, now: Instant, timeout: Duration) -> bool {
        matches!(self.state, State::Empty | State::Dead)
            && self
                .idle_since
                .is_some_and(|since| now.saturating_duration_since(since) >= timeout)
    }

    /// Mark this group as no longer registered with its coordinator.
    pub fn retire(&mut self) {
        self.retired = true;
    }

    pub fn is_retired(&self) -> bool {
        self.retired
    }

    pub fn join(
        &mut self,
        now: Instant,
        join: &JoinGroupRequest,
        partitions_per_topic: &BTreeMap<String, i32>,
    ) -> Join {
        debug!(group_id = self.group_id, ?join, state = %self.state);

        if self.state == State::Dead {
            return Join::Complete(self.join_error(ErrorCode::GroupDead, &join.member_id));
        }

        let assignor = match self.protocol(join) {
            Ok(assignor) => assignor,
            Err(error_code) => {
                debug!(join_outcome = ?error_code);
                return Join::Complete(self.join_error(error_code, &join.member_id));
            }
        };

        let member_id = if join.member_id.is_empty() {
            let member_id = if join.client_instance_id.is_empty() {
                Uuid::new_v4().to_string()
            } else {
                format!("{}-{}", join.client_instance_id, Uuid::new_v4())
            };

            if self.members.is_empty() {
                self.protocol_type = Some(join.protocol_type.clone());
                self.assignor = Some(assignor);
                self.idle_since = None;
            }

            info!(
                group_id = self.group_id,
                member_id,
                generation_id = self.generation_id,
                %assignor
            );

            _ = self.members.insert(
                member_id.clone(),
                Member {
                    client_instance_id: join.client_instance_id.clone(),
                    topics: join.topics.clone(),
                    owned_partitions: join.owned_partitions.clone(),
                    session_timeout: millis(join.session_timeout_ms),
                    rebalance_timeout: millis(join.rebalance_timeout_ms),
                    last_heartbeat: now,
                    joined_at: None,
                    join_generation: None,
                    synced: false,
                },
            );

            if self.state != State::PreparingRebalance {
                self.rebalance(now, "member joined");
            }

            member_id
        } else if let Some(member) = self.members.get_mut(&join.member_id) {
            let subscription_changed = member.topics != join.topics;

            member.last_heartbeat = now;
            member.topics = join.topics.clone();
            member.owned_partitions = join.owned_partitions.clone();
            member.session_timeout = millis(join.session_timeout_ms);
            member.rebalance_timeout = millis(join.rebalance_timeout_ms);

            match self.state {
                State::PreparingRebalance => {}

                State::CompletingRebalance | State::Stable if !subscription_changed => {
                    debug!(member_metadata = "existing", member_id = join.member_id);
                    _ = self.undelivered.remove(&join.member_id);
                    return Join::Complete(self.join_response(&join.member_id));
                }

                _ => self.rebalance(now, "subscription changed"),
            }

            join.member_id.clone()
        } else {
            debug!(join_outcome = ?ErrorCode::UnknownMemberId);
            return Join::Complete(self.join_error(ErrorCode::UnknownMemberId, &join.member_id));
        };

        if let Some(member) = self.members.get_mut(&member_id) {
            member.joined_at = Some(now);
            member.synced = false;
        }

        _ = self.complete(now, partitions_per_topic);

        Join::Pending(member_id)
    }

    /// The response to a pending join, or none while the rebalance is still
    /// being prepared.
    pub fn join_outcome(&mut self, member_id: &str) -> Option<JoinGroupResponse> {
        if self.state == State::Dead {
            return Some(self.join_error(ErrorCode::GroupDead, member_id));
        }

        if let Some(response) = self.undelivered.remove(member_id) {
            return Some(response);
        }

        if !self.members.contains_key(member_id) {
            Some(self.join_error(ErrorCode::UnknownMemberId, member_id))
        } else if self.state == State::PreparingRebalance {
            None
        } else {
            Some(self.join_response(member_id))
        }
    }

    pub fn sync(&mut self, now: Instant, sync: &SyncGroupRequest) -> SyncGroupResponse {
        debug!(group_id = self.group_id, ?sync, state = %self.state);

        let response =
            SyncGroupResponse::default().protocol_name(self.assignor.map(String::from));

        if self.state == State::Dead {
            return response.error_code(ErrorCode::GroupDead);
        }

        let generation_id = self.generation_id;
        let state = self.state;

        let Some(member) = self.members.get_mut(&sync.member_id) else {
            return response.error_code(ErrorCode::UnknownMemberId);
        };

        if !member.is_generation(sync.generation_id, generation_id) {
            return response.error_code(ErrorCode::IllegalGeneration);
        }

        member.last_heartbeat = now;

        if state == State::PreparingRebalance {
            return response.error_code(ErrorCode::RebalanceInProgress);
        }

        if sync.generation_id != generation_id {
            return response.error_code(ErrorCode::IllegalGeneration);
        }

        member.synced = true;
        _ = self.undelivered.remove(&sync.member_id);

        let assignment = self
            .assignment
            .get(&sync.member_id)
            .cloned()
            .unwrap_or_default();

        if state == State::CompletingRebalance && self.members.values().all(|member| member.synced)
        {
            self.state = State::Stable;

            info!(
                group_id = self.group_id,
                generation_id = self.generation_id,
                leader = self.leader,
                "stable"
            );

            if self.follow_up {
                self.rebalance(now, "partitions revoked");
            }
        }

        response.assignment(assignment)
    }

    /// Refresh the session of a member of the current generation, or of the
    /// generation it last joined.
    ///
    /// While preparing a rebalance every member is answered with
    /// `RebalanceInProgress`. While completing one the error code is `None`,
    /// and only a member that has yet to sync has `rebalance_in_progress`
    /// set, so a member that has already synced is not sent back to join.
    pub fn heartbeat(&mut self, now: Instant, heartbeat: &HeartbeatRequest) -> HeartbeatResponse {
        debug!(group_id = self.group_id, ?heartbeat, state = %self.state);

        if self.state == State::Dead {
            return HeartbeatResponse::default().error_code(ErrorCode::GroupDead);
        }

        let generation_id = self.generation_id;

        let Some(member) = self.members.get_mut(&heartbeat.member_id) else {
            return HeartbeatResponse::default().error_code(ErrorCode::UnknownMemberId);
        };

        if !member.is_generation(heartbeat.generation_id, generation_id) {
            return HeartbeatResponse::default().error_code(ErrorCode::IllegalGeneration);
        }

        member.last_heartbeat = now;

        match self.state {
            State::PreparingRebalance => HeartbeatResponse::default()
                .error_code(ErrorCode::RebalanceInProgress)
                .rebalance_in_progress(true),

            State::CompletingRebalance => {
                HeartbeatResponse::default().rebalance_in_progress(!member.synced)
            }

            State::Empty | State::Stable | State::Dead => HeartbeatResponse::default(),
        }
    }

    pub fn leave(
        &mut self,
        now: Instant,
        leave: &LeaveGroupRequest,
        partitions_per_topic: &BTreeMap<String, i32>,
    ) -> LeaveGroupResponse {
        debug!(group_id = self.group_id, ?leave, state = %self.state);

        if self.state == State::Dead {
            return LeaveGroupResponse::default().error_code(ErrorCode::GroupDead);
        }

        if self.remove(&leave.member_id) {
            info!(
                group_id = self.group_id,
                member_id = leave.member_id,
                reason = leave.reason,
                generation_id = self.generation_id,
                "left"
            );

            self.departed(now, partitions_per_topic, "member left");
            LeaveGroupResponse::default()
        } else {
            LeaveGroupResponse::default().error_code(ErrorCode::UnknownMemberId)
        }
    }

    /// Evict members whose session has expired and complete a rebalance
    /// that has reached its deadline, returning true when the group changed.
    pub fn expire(&mut self, now: Instant, partitions_per_topic: &BTreeMap<String, i32>) -> bool {
        if matches!(self.state, State::Empty | State::Dead) {
            return false;
        }

        let preparing = self.state == State::PreparingRebalance;

        let expired = self
            .members
            .iter()
            .filter(|(_, member)| !(preparing && member.joined_at.is_some()))
            .filter(|(_, member)| member.has_expired(now))
            .map(|(member_id, _)| member_id.clone())
            .collect::<Vec<_>>();

        for member_id in &expired {
            if self.remove(member_id) {
                info!(
                    group_id = self.group_id,
                    member_id,
                    generation_id = self.generation_id,
                    "session expired"
                );
            }
        }

        if !expired.is_empty() {
            self.departed(now, partitions_per_topic, "session expired");
        }

        let completed = self.complete(now, partitions_per_topic);

        !expired.is_empty() || completed
    }

    /// Rebalance a stable group when the partition count of a subscribed
    /// topic has changed, returning true when a rebalance was started.
    pub fn metadata(&mut self, now: Instant, partitions_per_topic: &BTreeMap<String, i32>) -> bool {
        if self.state != State::Stable {
            return false;
        }

        let current = self.known_partitions(partitions_per_topic);

        if current == self.partitions_per_topic {
            return false;
        }

        info!(
            group_id = self.group_id,
            ?current,
            previous = ?self.partitions_per_topic,
            "topic metadata changed"
        );

        self.rebalance(now, "topic metadata changed");
        true
    }

    pub fn delete(&mut self, now: Instant) -> ErrorCode {
        if self.state == State::Dead {
            return ErrorCode::GroupDead;
        }

        info!(group_id = self.group_id, generation_id = self.generation_id, "deleted");

        self.members.clear();
        self.undelivered.clear();
        self.leader = None;
        self.assignment = Assignment::default();
        self.partitions_per_topic.clear();
        self.rebalance_deadline = None;
        self.follow_up = false;
        self.state = State::Dead;
        self.idle_since = Some(now);

        ErrorCode::None
    }

    pub fn describe(&self) -> GroupDescription {
        GroupDescription {
            group_id: self.group_id.clone(),
            state: self.state,
            generation_id: self.generation_id,
            protocol_type: self.protocol_type.clone(),
            protocol_name: self.assignor.map(String::from),
            leader: self.leader.clone(),
            members: self
                .members
                .iter()
                .map(|(member_id, member)| MemberDescription {
                    member_id: member_id.clone(),
                    client_instance_id: member.client_instance_id.clone(),
                    topics: member.topics.clone(),
                    assignment: self.assignment.get(member_id).cloned().unwrap_or_default(),
                })
                .collect(),
        }
    }

    /// The group protocol used for this join, or the reason it is refused.
    fn protocol(&self, join: &JoinGroupRequest) -> Result<Assignor, ErrorCode> {
        if self.members.is_empty() {
            return Ok(join
                .protocols
                .iter()
                .find_map(|protocol| protocol.parse::<Assignor>().ok())
                .unwrap_or(self.default_assignor));
        }

        if self
            .protocol_type
            .as_deref()
            .is_some_and(|protocol_type| protocol_type != join.protocol_type)
        {
            return Err(ErrorCode::InconsistentGroupProtocol);
        }

        let assignor = self.assignor.unwrap_or(self.default_assignor);

        if join.protocols.is_empty()
            || join
                .protocols
                .iter()
                .any(|protocol| protocol == assignor.as_ref())
        {
            Ok(assignor)
        } else {
            Err(ErrorCode::InconsistentGroupProtocol)
        }
    }

    /// Start a new generation, every member must join again.
    fn rebalance(&mut self, now: Instant, reason: &str) {
        if self.members.is_empty() {
            self.empty(now);
            return;
        }

        self.generation_id += 1;
        self.state = State::PreparingRebalance;
        self.follow_up = false;

        self.rebalance_deadline = self
            .members
            .values()
            .map(|member| member.rebalance_timeout)
            .max()
            .map(|timeout| now + timeout);

        // a member still waiting on its join response is part of this rebalance
        for (member_id, member) in self.members.iter_mut() {
            member.synced = false;
            member.joined_at = self.undelivered.remove(member_id).map(|_| now);
        }

        self.undelivered.clear();

        if self
            .leader
            .as_ref()
            .is_none_or(|leader| !self.members.contains_key(leader))
        {
            self.leader = self.elect();
        }

        info!(
            group_id = self.group_id,
            generation_id = self.generation_id,
            reason,
            "preparing rebalance"
        );
    }

    /// Complete a rebalance once every member has joined, or the deadline
    /// has passed (dropping the members that did not join).
    fn complete(&mut self, now: Instant, partitions_per_topic: &BTreeMap<String, i32>) -> bool {
        if self.state != State::PreparingRebalance {
            return false;
        }

        let joined = self.members.values().all(|member| member.joined_at.is_some());
        let elapsed = self
            .rebalance_deadline
            .is_some_and(|deadline| now >= deadline);

        if !joined && !elapsed {
            return false;
        }

        let group_id = &self.group_id;
        let generation_id = self.generation_id;

        self.members.retain(|member_id, member| {
            member.joined_at.is_some() || {
                info!(group_id, member_id, generation_id, "did not join");
                false
            }
        });

        if self.members.is_empty() {
            self.empty(now);
            return true;
        }

        self.leader = self.elect();
        self.assign(partitions_per_topic);
        self.state = State::CompletingRebalance;
        self.rebalance_deadline = None;

        for member in self.members.values_mut() {
            member.join_generation = Some(self.generation_id);
        }

        let responses = self
            .members
            .keys()
            .map(|member_id| (member_id.clone(), self.join_response(member_id)))
            .collect::<Vec<_>>();

        self.undelivered.extend(responses);

        info!(
            group_id = self.group_id,
            generation_id = self.generation_id,
            leader = self.leader,
            "completing rebalance"
        );

        true
    }

    /// The earliest joiner, then the member owning the most partitions, then by id.
    fn elect(&self) -> Option<String> {
        self.members
            .iter()
            .min_by_key(|(member_id, member)| {
                (
                    member.joined_at.is_none(),
                    member.joined_at,
                    Reverse(member.owned_partitions.len()),
                    (*member_id).clone(),
                )
            })
            .map(|(member_id, _)| member_id.clone())
    }

    fn assign(&mut self, partitions_per_topic: &BTreeMap<String, i32>) {
        let subscriptions = self
            .members
            .iter()
            .map(|(member_id, member)| member.subscription(member_id))
            .collect::<Vec<_>>();

        for topic in self.topics() {
            if !partitions_per_topic.contains_key(&topic) {
                warn!(group_id = self.group_id, topic, "unknown partition count");
            }
        }

        let partitions_per_topic = self.known_partitions(partitions_per_topic);
        let previous = self.previous();
        let assignor = self.assignor.unwrap_or(self.default_assignor);

        let assignment = assignor.assign(&subscriptions, &partitions_per_topic, Some(&previous));

        self.follow_up = assignor.protocol() == RebalanceProtocol::Cooperative
            && !assignment
                .unassigned(&subscribed_topitions(&subscriptions, &partitions_per_topic))
                .is_empty();

        debug!(group_id = self.group_id, %assignor, ?assignment, follow_up = self.follow_up);

        self.assignment = assignment;
        self.partitions_per_topic = partitions_per_topic;
    }

    /// The current assignment of the remaining members, or when there is
    /// none, the partitions the members report owning.
    fn previous(&self) -> Assignment {
        let mut previous = self.assignment.clone();
        previous.retain(|member_id| self.members.contains_key(member_id));

        if !previous.topitions().is_empty() {
            return previous;
        }

        let mut claimed = BTreeSet::new();
        let mut owned = Assignment::default();

        for (member_id, member) in &self.members {
            for topition in &member.owned_partitions {
                if claimed.insert(topition) {
                    _ = owned.insert(member_id, topition.clone());
                }
            }
        }

        owned
    }

    /// The partition counts of the topics subscribed to by this group.
    fn known_partitions(
        &self,
        partitions_per_topic: &BTreeMap<String, i32>,
    ) -> BTreeMap<String, i32> {
        self.topics()
            .into_iter()
            .filter_map(|topic| {
                partitions_per_topic
                    .get(&topic)
                    .map(|partitions| (topic, *partitions))
            })
            .collect()
    }

    fn remove(&mut self, member_id: &str) -> bool {
        _ = self.undelivered.remove(member_id);
        _ = self.assignment.remove_member(member_id);
        self.members.remove(member_id).is_some()
    }

    fn departed(
        &mut self,
        now: Instant,
        partitions_per_topic: &BTreeMap<String, i32>,
        reason: &str,
    ) {
        if self.members.is_empty() {
            self.empty(now);
            return;
        }

        match self.state {
            State::PreparingRebalance => {
                if self
                    .leader
                    .as_ref()
                    .is_none_or(|leader| !self.members.contains_key(leader))
                {
                    self.leader = self.elect();
                }

                _ = self.complete(now, partitions_per_topic);
            }

            State::CompletingRebalance | State::Stable => self.rebalance(now, reason),

            State::Empty | State::Dead => {}
        }
    }

    fn empty(&mut self, now: Instant) {
        info!(group_id = self.group_id, generation_id = self.generation_id, "empty");

        self.state = State::Empty;
        self.protocol_type = None;
        self.assignor = None;
        self.leader = None;
        self.assignment = Assignment::default();
        self.partitions_per_topic.clear();
        self.rebalance_deadline = None;
        self.undelivered.clear();
        self.follow_up = false;
        self.idle_since = Some(now);
    }

    fn join_response(&self, member_id: &str) -> JoinGroupResponse {
        let members = if self.leader.as_deref() == Some(member_id) {
            self.members
                .iter()
                .map(|(member_id, member)| {
                    JoinGroupResponseMember::default()
                        .member_id(member_id.clone())
                        .client_instance_id(member.client_instance_id.clone())
                        .topics(member.topics.clone())
                        .owned_partitions(member.owned_partitions.clone())
                })
                .collect()
        } else {
            Vec::new()
        };

        JoinGroupResponse::default()
            .generation_id(self.generation_id)
            .protocol_type(self.protocol_type.clone())
            .protocol_name(self.assignor.map(String::from))
            .leader(self.leader.clone().unwrap_or_default())
            .member_id(member_id.to_owned())
            .members(members)
    }

    fn join_error(&self, error_code: ErrorCode, member_id: &str) -> JoinGroupResponse {
        JoinGroupResponse::default()
            .error_code(error_code)
            .generation_id(-1)
            .protocol_type(self.protocol_type.clone())
            .protocol_name(self.assignor.map(String::from))
            .member_id(member_id.to_owned())
    }
}
