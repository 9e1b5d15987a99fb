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

use std::{collections::BTreeSet, fmt::Debug};

use async_trait::async_trait;
use corral_sans_io::{
    ErrorCode, FindCoordinatorRequest, FindCoordinatorResponse, HeartbeatRequest,
    HeartbeatResponse, JoinGroupRequest, JoinGroupResponse, LeaveGroupRequest,
    LeaveGroupResponse, SyncGroupRequest, SyncGroupResponse, Topition,
};
use serde::{Deserialize, Serialize};

use crate::{Result, State};

pub mod controller;
pub mod group;

/// A snapshot of a group, for operators and tests.
#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct GroupDescription {
    pub group_id: String,
    pub state: State,
    pub generation_id: i32,
    pub protocol_type: Option<String>,
    pub protocol_name: Option<String>,
    pub leader: Option<String>,
    pub members: Vec<MemberDescription>,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct MemberDescription {
    pub member_id: String,
    pub client_instance_id: String,
    pub topics: BTreeSet<String>,
    pub assignment: BTreeSet<Topition>,
}

#[async_trait]
pub trait Coordinator: Clone + Debug + Send + Sync + 'static {
    async fn find_coordinator(
        &self,
        find_coordinator: FindCoordinatorRequest,
    ) -> Result<FindCoordinatorResponse>;

    /// Join a group, the response is held until the rebalance completes.
    async fn join(&self, join: JoinGroupRequest) -> Result<JoinGroupResponse>;

    async fn sync(&self, sync: SyncGroupRequest) -> Result<SyncGroupResponse>;

    async fn heartbeat(&self, heartbeat: HeartbeatRequest) -> Result<HeartbeatResponse>;

    async fn leave(&self, leave: LeaveGroupRequest) -> Result<LeaveGroupResponse>;

    /// Delete a group, any remaining members are answered with [`ErrorCode::GroupDead`].
    async fn delete_group(&self, group_id: &str) -> Result<ErrorCode>;

    async fn describe_group(&self, group_id: &str) -> Result<Option<GroupDescription>>;

    /// The partition count of a topic has changed.
    async fn metadata_changed(&self, topic: &str) -> Result<()>;
}
