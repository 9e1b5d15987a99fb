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

use std::collections::BTreeMap;

use tracing::debug;

use crate::consumer::{Assignment, ConsumerAssignor, Subscription, subscribed_topitions};

use super::by_member_id;

/// Deals every subscribed partition, across all topics, to the members in
/// turn. A member not subscribed to a partition's topic is skipped.
#[derive(Clone, Default, Eq, Hash, Debug, Ord, PartialEq, PartialOrd)]
pub struct RoundRobinAssignor;

impl ConsumerAssignor for RoundRobinAssignor {
    fn assign(
        &self,
        members: &[Subscription],
        partitions_per_topic: &BTreeMap<String, i32>,
        _previous: Option<&Assignment>,
    ) -> Assignment {
        let members = by_member_id(members);
        let mut assignment = Assignment::with_members(members.keys().copied());

        let subscribed = members.values().copied().cloned().collect::<Vec<_>>();
        let mut circle = members.values().cycle();

        for topition in subscribed_topitions(&subscribed, partitions_per_topic) {
            if let Some(member) = circle
                .by_ref()
                .take(members.len())
                .find(|member| member.is_subscribed(topition.topic()))
            {
                _ = assignment.insert(&member.member_id, topition);
            }
        }

        debug!(?assignment);
        assignment
    }
}
