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

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::consumer::{Assignment, ConsumerAssignor, StickyAssignor, Subscription};

/// The [`StickyAssignor`] target, handed out over two generations.
///
/// A partition moving between two members that are both still in the group
/// is withheld from its new owner in this generation: the previous owner
/// revokes it, and it is assigned in the following generation when it
/// has no owner. Partitions without a current owner are assigned at once.
#[derive(Clone, Default, Eq, Hash, Debug, Ord, PartialEq, PartialOrd)]
pub struct CooperativeStickyAssignor;

impl ConsumerAssignor for CooperativeStickyAssignor {
    fn assign(
        &self,
        members: &[Subscription],
        partitions_per_topic: &BTreeMap<String, i32>,
        previous: Option<&Assignment>,
    ) -> Assignment {
        let target = StickyAssignor.assign(members, partitions_per_topic, previous);

        let Some(previous) = previous else {
            return target;
        };

        let present = members
            .iter()
            .map(|member| member.member_id.as_str())
            .collect::<BTreeSet<_>>();

        let owners = previous.owners();

        let assignment = target
            .into_iter()
            .map(|(member_id, topitions)| {
                let topitions = topitions
                    .into_iter()
                    .filter(|topition| {
                        owners.get(topition).is_none_or(|owner| {
                            owner == &member_id || !present.contains(owner.as_str())
                        })
                    })
                    .collect::<BTreeSet<_>>();

                (member_id, topitions)
            })
            .collect::<Assignment>();

        debug!(?assignment);
        assignment
    }
}
