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
    consumer::{Assignment, ConsumerAssignor, Subscription},
};

use super::by_member_id;

/// Assigns each topic independently in contiguous ranges.
///
/// The members subscribed to a topic are ordered by id, each taking
/// `P / M` partitions with the first `P % M` members taking one more.
#[derive(Clone, Default, Eq, Hash, Debug, Ord, PartialEq, PartialOrd)]
pub struct RangeAssignor;

impl ConsumerAssignor for RangeAssignor {
    fn assign(
        &self,
        members: &[Subscription],
        partitions_per_topic: &BTreeMap<String, i32>,
        _previous: Option<&Assignment>,
    ) -> Assignment {
        let members = by_member_id(members);
        let mut assignment = Assignment::with_members(members.keys().copied());

        for (topic, partitions) in partitions_per_topic {
            let subscribers = members
                .values()
                .filter(|member| member.is_subscribed(topic))
                .collect::<Vec<_>>();

            if subscribers.is_empty() || *partitions < 0 {
                continue;
            }

            let (allocation, mut remainder, mut partition) = {
                let count = *partitions as usize;
                (
                    count / subscribers.len(),
                    0..(count % subscribers.len()),
                    0..*partitions,
                )
            };

            for member in subscribers {
                let take = if remainder.next().is_some() {
                    allocation + 1
                } else {
                    allocation
                };

                for index in partition.by_ref().take(take) {
                    _ = assignment.insert(&member.member_id, Topition::new(topic.as_str(), index));
                }
            }
        }

        debug!(?assignment);
        assignment
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::consumer::assignor::tests::{partitions, topitions};

    #[test]
    fn evenly_divided() {
        const T: &str = "t";

        let members = [
            Subscription::new("m3").topics([T]),
            Subscription::new("m1").topics([T]),
            Subscription::new("m2").topics([T]),
        ];

        let assignment =
            RangeAssignor.assign(&members, &BTreeMap::from([(T.to_owned(), 6)]), None);

        assert_eq!(vec![0, 1], partitions(&assignment, "m1"));
        assert_eq!(vec![2, 3], partitions(&assignment, "m2"));
        assert_eq!(vec![4, 5], partitions(&assignment, "m3"));
    }

    #[test]
    fn remainder() {
        const T0: &str = "t0";
        const T1: &str = "t1";

        let members = [
            Subscription::new("C0").topics([T0, T1]),
            Subscription::new("C1").topics([T0, T1]),
        ];

        let assignment = RangeAssignor.assign(
            &members,
            &BTreeMap::from([(T0.to_owned(), 3), (T1.to_owned(), 3)]),
            None,
        );

        let c0 = assignment.get("C0").cloned().unwrap_or_default();
        assert_eq!(
            topitions(T0, &[0, 1])
                .into_iter()
                .chain(topitions(T1, &[0, 1]))
                .collect::<std::collections::BTreeSet<_>>(),
            c0
        );

        let c1 = assignment.get("C1").cloned().unwrap_or_default();
        assert_eq!(
            topitions(T0, &[2])
                .into_iter()
                .chain(topitions(T1, &[2]))
                .collect::<std::collections::BTreeSet<_>>(),
            c1
        );
    }

    #[test]
    fn only_subscribers_share_a_topic() {
        let members = [
            Subscription::new("a").topics(["orders"]),
            Subscription::new("b").topics(["orders", "payments"]),
        ];

        let assignment = RangeAssignor.assign(
            &members,
            &BTreeMap::from([("orders".to_owned(), 2), ("payments".to_owned(), 2)]),
            None,
        );

        assert_eq!(
            Some(&topitions("orders", &[0])),
            assignment.get("a")
        );
        assert_eq!(
            topitions("orders", &[1])
                .into_iter()
                .chain(topitions("payments", &[0, 1]))
                .collect::<std::collections::BTreeSet<_>>(),
            assignment.get("b").cloned().unwrap_or_default()
        );
    }

    #[test]
    fn more_members_than_partitions() {
        let members = [
            Subscription::new("a").topics(["t"]),
            Subscription::new("b").topics(["t"]),
            Subscription::new("c").topics(["t"]),
        ];

        let assignment =
            RangeAssignor.assign(&members, &BTreeMap::from([("t".to_owned(), 2)]), None);

        assert_eq!(vec![0], partitions(&assignment, "a"));
        assert_eq!(vec![1], partitions(&assignment, "b"));
        assert!(partitions(&assignment, "c").is_empty());
        assert!(assignment.contains_member("c"));
    }
}
