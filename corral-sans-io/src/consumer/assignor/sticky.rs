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

use crate::{
    Topition,
    consumer::{Assignment, ConsumerAssignor, Subscription, subscribed_topitions},
};

use super::by_member_id;

/// Keeps partitions with their previous owner where possible.
///
/// A partition stays with its previous owner while that owner is still a
/// member subscribed to the topic. Orphaned partitions go to the least
/// loaded eligible member (ties broken by member id). Finally partitions
/// are moved, one at a time, from the most loaded member to an eligible
/// member holding at least two fewer, until no such move remains.
#[derive(Clone, Default, Eq, Hash, Debug, Ord, PartialEq, PartialOrd)]
pub struct StickyAssignor;

impl ConsumerAssignor for StickyAssignor {
    fn assign(
        &self,
        members: &[Subscription],
        partitions_per_topic: &BTreeMap<String, i32>,
        previous: Option<&Assignment>,
    ) -> Assignment {
        let by_id = by_member_id(members);
        let mut assignment = Assignment::with_members(by_id.keys().copied());
        let owners = previous.map(Assignment::owners).unwrap_or_default();

        let mut orphans = Vec::new();

        for topition in subscribed_topitions(members, partitions_per_topic) {
            let owner = owners
                .get(&topition)
                .and_then(|owner| by_id.get(owner.as_str()))
                .filter(|owner| owner.is_subscribed(topition.topic()))
                .map(|owner| owner.member_id.as_str());

            if let Some(owner) = owner {
                _ = assignment.insert(owner, topition);
            } else {
                orphans.push(topition);
            }
        }

        debug!(?orphans);

        for topition in orphans {
            if let Some(member) = least_loaded(&by_id, &assignment, &topition, None) {
                _ = assignment.insert(member, topition);
            }
        }

        while let Some((donor, topition, receiver)) = next_move(&by_id, &assignment) {
            debug!(%donor, %topition, %receiver);

            _ = assignment.remove(&donor, &topition);
            _ = assignment.insert(&receiver, topition);
        }

        debug!(?assignment);
        assignment
    }
}

/// The eligible member with the fewest partitions, ties going to the
/// lowest member id.
fn least_loaded<'a>(
    members: &BTreeMap<&'a str, &'a Subscription>,
    assignment: &Assignment,
    topition: &Topition,
    excluding: Option<&str>,
) -> Option<&'a str> {
    members
        .iter()
        .filter(|(member_id, member)| {
            excluding.is_none_or(|excluded| excluded != **member_id)
                && member.is_subscribed(topition.topic())
        })
        .min_by_key(|(member_id, _)| (assignment.load(member_id), **member_id))
        .map(|(member_id, _)| *member_id)
}

fn next_move(
    members: &BTreeMap<&str, &Subscription>,
    assignment: &Assignment,
) -> Option<(String, Topition, String)> {
    let mut donors = assignment
        .iter()
        .map(|(member_id, topitions)| (member_id.as_str(), topitions))
        .collect::<Vec<_>>();

    // most loaded first, ties to the greatest member id
    donors.sort_by(|(a_id, a), (b_id, b)| b.len().cmp(&a.len()).then(b_id.cmp(a_id)));

    for (donor, topitions) in donors {
        for topition in topitions.iter().rev() {
            if let Some(receiver) = least_loaded(members, assignment, topition, Some(donor))
                .filter(|receiver| assignment.load(receiver) + 2 <= topitions.len())
            {
                return Some((donor.to_owned(), topition.clone(), receiver.to_owned()));
            }
        }
    }

    None
}
