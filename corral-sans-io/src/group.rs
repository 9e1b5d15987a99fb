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

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{CONSUMER, ErrorCode, Topition};

#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct FindCoordinatorRequest {
    pub key: String,
}

impl FindCoordinatorRequest {
    pub fn key(self, key: String) -> Self {
        Self { key }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct FindCoordinatorResponse {
    pub error_code: ErrorCode,
    pub key: String,
    pub coordinator: Option<Url>,
}

impl FindCoordinatorResponse {
    pub fn error_code(self, error_code: ErrorCode) -> Self {
        Self { error_code, ..self }
    }

    pub fn key(self, key: String) -> Self {
        Self { key, ..self }
    }

    pub fn coordinator(self, coordinator: Option<Url>) -> Self {
        Self {
            coordinator,
            ..self
        }
    }
}

/// A request to join (or rejoin) a group.
///
/// An empty `member_id` asks the coordinator to issue a new one. The
/// `protocols` are the assignment strategy names acceptable to this member,
/// in order of preference.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct JoinGroupRequest {
    pub group_id: String,
    pub member_id: String,
    pub client_instance_id: String,
    pub protocol_type: String,
    pub protocols: Vec<String>,
    pub topics: BTreeSet<String>,
    pub owned_partitions: BTreeSet<Topition>,
    pub session_timeout_ms: i32,
    pub rebalance_timeout_ms: i32,
}

impl Default for JoinGroupRequest {
    fn default() -> Self {
        Self {
            group_id: Default::default(),
            member_id: Default::default(),
            client_instance_id: Default::default(),
            protocol_type: CONSUMER.into(),
            protocols: Default::default(),
            topics: Default::default(),
            owned_partitions: Default::default(),
            session_timeout_ms: 30_000,
            rebalance_timeout_ms: 60_000,
        }
    }
}

impl JoinGroupRequest {
    pub fn group_id(self, group_id: String) -> Self {
        Self { group_id, ..self }
    }

    pub fn member_id(self, member_id: String) -> Self {
        Self { member_id, ..self }
    }

    pub fn client_instance_id(self, client_instance_id: String) -> Self {
        Self {
            client_instance_id,
            ..self
        }
    }

    pub fn protocol_type(self, protocol_type: String) -> Self {
        Self {
            protocol_type,
            ..self
        }
    }

    pub fn protocols(self, protocols: Vec<String>) -> Self {
        Self { protocols, ..self }
    }

    pub fn topics(self, topics: impl IntoIterator<Item = String>) -> Self {
        Self {
            topics: topics.into_iter().collect(),
            ..self
        }
    }

    pub fn owned_partitions(self, owned_partitions: BTreeSet<Topition>) -> Self {
        Self {
            owned_partitions,
            ..self
        }
    }

    pub fn session_timeout_ms(self, session_timeout_ms: i32) -> Self {
        Self {
            session_timeout_ms,
            ..self
        }
    }

    pub fn rebalance_timeout_ms(self, rebalance_timeout_ms: i32) -> Self {
        Self {
            rebalance_timeout_ms,
            ..self
        }
    }
}

/// A member as described to the group leader.
#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct JoinGroupResponseMember {
    pub member_id: String,
    pub client_instance_id: String,
    pub topics: BTreeSet<String>,
    pub owned_partitions: BTreeSet<Topition>,
}

impl JoinGroupResponseMember {
    pub fn member_id(self, member_id: String) -> Self {
        Self { member_id, ..self }
    }

    pub fn client_instance_id(self, client_instance_id: String) -> Self {
        Self {
            client_instance_id,
            ..self
        }
    }

    pub fn topics(self, topics: BTreeSet<String>) -> Self {
        Self { topics, ..self }
    }

    pub fn owned_partitions(self, owned_partitions: BTreeSet<Topition>) -> Self {
        Self {
            owned_partitions,
            ..self
        }
    }
}

/// The outcome of a join, `members` is only populated for the leader.
#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct JoinGroupResponse {
    pub error_code: ErrorCode,
    pub generation_id: i32,
    pub protocol_type: Option<String>,
    pub protocol_name: Option<String>,
    pub leader: String,
    pub member_id: String,
    pub members: Vec<JoinGroupResponseMember>,
}

impl JoinGroupResponse {
    pub fn error_code(self, error_code: ErrorCode) -> Self {
        Self { error_code, ..self }
    }

    pub fn generation_id(self, generation_id: i32) -> Self {
        Self {
            generation_id,
            ..self
        }
    }

    pub fn protocol_type(self, protocol_type: Option<String>) -> Self {
        Self {
            protocol_type,
            ..self
        }
    }

    pub fn protocol_name(self, protocol_name: Option<String>) -> Self {
        Self {
            protocol_name,
            ..self
        }
    }

    pub fn leader(self, leader: String) -> Self {
        Self { leader, ..self }
    }

    pub fn member_id(self, member_id: String) -> Self {
        Self { member_id, ..self }
    }

    pub fn members(self, members: Vec<JoinGroupResponseMember>) -> Self {
        Self { members, ..self }
    }

    pub fn is_leader(&self) -> bool {
        !self.member_id.is_empty() && self.member_id == self.leader
    }
}

#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct SyncGroupRequest {
    pub group_id: String,
    pub generation_id: i32,
    pub member_id: String,
}

impl SyncGroupRequest {
    pub fn group_id(self, group_id: String) -> Self {
        Self { group_id, ..self }
    }

    pub fn generation_id(self, generation_id: i32) -> Self {
        Self {
            generation_id,
            ..self
        }
    }

    pub fn member_id(self, member_id: String) -> Self {
        Self { member_id, ..self }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct SyncGroupResponse {
    pub error_code: ErrorCode,
    pub protocol_name: Option<String>,
    pub assignment: BTreeSet<Topition>,
}

impl SyncGroupResponse {
    pub fn error_code(self, error_code: ErrorCode) -> Self {
        Self { error_code, ..self }
    }

    pub fn protocol_name(self, protocol_name: Option<String>) -> Self {
        Self {
            protocol_name,
            ..self
        }
    }

    pub fn assignment(self, assignment: BTreeSet<Topition>) -> Self {
        Self { assignment, ..self }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct HeartbeatRequest {
    pub group_id: String,
    pub generation_id: i32,
    pub member_id: String,
}

impl HeartbeatRequest {
    pub fn group_id(self, group_id: String) -> Self {
        Self { group_id, ..self }
    }

    pub fn generation_id(self, generation_id: i32) -> Self {
        Self {
            generation_id,
            ..self
        }
    }

    pub fn member_id(self, member_id: String) -> Self {
        Self { member_id, ..self }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct HeartbeatResponse {
    pub error_code: ErrorCode,
    pub rebalance_in_progress: bool,
}

impl HeartbeatResponse {
    pub fn error_code(self, error_code: ErrorCode) -> Self {
        Self { error_code, ..self }
    }

    pub fn rebalance_in_progress(self, rebalance_in_progress: bool) -> Self {
        Self {
            rebalance_in_progress,
            ..self
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct LeaveGroupRequest {
    pub group_id: String,
    pub member_id: String,
    pub reason: Option<String>,
}

impl LeaveGroupRequest {
    pub fn group_id(self, group_id: String) -> Self {
        Self { group_id, ..self }
    }

    pub fn member_id(self, member_id: String) -> Self {
        Self { member_id, ..self }
    }

    pub fn reason(self, reason: Option<String>) -> Self {
        Self { reason, ..self }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct LeaveGroupResponse {
    pub error_code: ErrorCode,
}

impl LeaveGroupResponse {
    pub fn error_code(self, error_code: ErrorCode) -> Self {
        Self { error_code }
    }
}
