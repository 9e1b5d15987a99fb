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
    collections::{BTreeMap, BTreeSet, btree_map},
    fmt::{self, Display, Formatter},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::{Error, JoinGroupResponseMember, Topition};

mod assignor;

pub use assignor::{CooperativeStickyAssignor, RangeAssignor, RoundRobinAssignor, StickyAssignor};

/// What a member brings to an assignment: the topics it subscribes to and
/// the partitions it currently owns.
#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Subscription {
    pub member_id: String,
    pub topics: BTreeSet<String>,
    pub owned_partitions: BTreeSet<Topition>,
}

impl Subscription {
    pub fn new(member_id: impl Into<String>) -> Self {
        Self {
            member_id: member_id.into(),
            ..Default::default()
        }
    }

    pub fn topics<I, T>(self, topics: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            topics: topics.into_iter().map(Into::into).collect(),
            ..self
        }
    }

    pub fn owned_partitions(self, owned_partitions: BTreeSet<Topition>) -> Self {
        Self {
            owned_partitions,
            ..self
        }
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.topics.contains(topic)
    }
}

impl From<&JoinGroupResponseMember> for Subscription {
    fn from(value: &JoinGroupResponseMember) -> Self {
        Self {
            member_id: value.member_id.clone(),
            topics: value.topics.clone(),
            owned_partitions: value.owned_partitions.clone(),
        }
    }
}

/// The partitions owned by each member in one generation.
#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Assignment(BTreeMap<String, BTreeSet<Topition>>);

impl Assignment {
    /// An assignment with an empty partition set for every member.
    pub fn with_members<I, T>(members: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self(
            members
                .into_iter()
                .map(|member_id| (member_id.into(), BTreeSet::new()))
                .collect(),
        )
    }

    pub fn get(&self, member_id: &str) -> Option<&BTreeSet<Topition>> {
        self.0.get(member_id)
    }

    pub fn insert(&mut self, member_id: &str, topition: Topition) -> bool {
        self.0
            .entry(member_id.to_owned())
            .or_default()
            .insert(topition)
    }

    pub fn remove(&mut self, member_id: &str, topition: &Topition) -> bool {
        self.0
            .get_mut(member_id)
            .is_some_and(|topitions| topitions.remove(topition))
    }

    pub fn remove_member(&mut self, member_id: &str) -> Option<BTreeSet<Topition>> {
        self.0.remove(member_id)
    }

    pub fn contains_member(&self, member_id: &str) -> bool {
        self.0.contains_key(member_id)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, BTreeSet<Topition>> {
        self.0.iter()
    }

    pub fn members(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The number of partitions owned by a member.
    pub fn load(&self, member_id: &str) -> usize {
        self.0.get(member_id).map_or(0, BTreeSet::len)
    }

    /// The owner of each assigned partition. Should a partition appear more
    /// than once, the member that sorts first wins.
    pub fn owners(&self) -> BTreeMap<Topition, String> {
        self.0
            .iter()
            .rev()
            .flat_map(|(member_id, topitions)| {
                topitions
                    .iter()
                    .map(move |topition| (topition.clone(), member_id.clone()))
            })
            .collect()
    }

    /// Every assigned partition.
    pub fn topitions(&self) -> BTreeSet<Topition> {
        self.0.values().flatten().cloned().collect()
    }

    /// No partition is owned by more than one member.
    pub fn is_exclusive(&self) -> bool {
        let total: usize = self.0.values().map(BTreeSet::len).sum();
        total == self.topitions().len()
    }

    /// The partitions in `topitions` that no member owns.
    pub fn unassigned(&self, topitions: &BTreeSet<Topition>) -> BTreeSet<Topition> {
        topitions.difference(&self.topitions()).cloned().collect()
    }

    /// Restrict the assignment to the members for which `f` holds.
    pub fn retain<F>(&mut self, mut f: F)
    where
        F: FnMut(&str) -> bool,
    {
        self.0.retain(|member_id, _| f(member_id))
    }
}

impl<T> FromIterator<(T, BTreeSet<Topition>)> for Assignment
where
    T: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (T, BTreeSet<Topition>)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(member_id, topitions)| (member_id.into(), topitions))
                .collect(),
        )
    }
}

impl From<BTreeMap<String, BTreeSet<Topition>>> for Assignment {
    fn from(value: BTreeMap<String, BTreeSet<Topition>>) -> Self {
        Self(value)
    }
}

impl IntoIterator for Assignment {
    type Item = (String, BTreeSet<Topition>);
    type IntoIter = btree_map::IntoIter<String, BTreeSet<Topition>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Assignment {
    type Item = (&'a String, &'a BTreeSet<Topition>);
    type IntoIter = btree_map::Iter<'a, String, BTreeSet<Topition>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// How ownership moves between generations.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum RebalanceProtocol {
    /// Every member gives up everything before the new assignment is handed out.
    #[default]
    Eager,

    /// Only partitions that move are given up, over two generations.
    Cooperative,
}

/// A deterministic, side effect free, partition assignment.
///
/// Every member is present in the resulting [`Assignment`], possibly with
/// no partitions. Topics missing from `partitions_per_topic` (or with a
/// negative count) are not assigned.
pub trait ConsumerAssignor {
    fn assign(
        &self,
        members: &[Subscription],
        partitions_per_topic: &BTreeMap<String, i32>,
        previous: Option<&Assignment>,
    ) -> Assignment;
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(try_from = "String", into = "String")]
pub enum Assignor {
    #[default]
    Range,
    RoundRobin,
    Sticky,
    CooperativeSticky,
}

impl Assignor {
    const COOPERATIVE_STICKY: &str = "cooperative-sticky";
    const RANGE: &str = "range";
    const ROUND_ROBIN: &str = "roundrobin";
    const STICKY: &str = "sticky";

    pub fn protocol(&self) -> RebalanceProtocol {
        match self {
            Self::CooperativeSticky => RebalanceProtocol::Cooperative,
            Self::Range | Self::RoundRobin | Self::Sticky => RebalanceProtocol::Eager,
        }
    }
}

impl AsRef<str> for Assignor {
    fn as_ref(&self) -> &str {
        match self {
            Self::CooperativeSticky => Self::COOPERATIVE_STICKY,
            Self::Range => Self::RANGE,
            Self::RoundRobin => Self::ROUND_ROBIN,
            Self::Sticky => Self::STICKY,
        }
    }
}

impl Display for Assignor {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

impl FromStr for Assignor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            Self::COOPERATIVE_STICKY => Ok(Self::CooperativeSticky),
            Self::RANGE => Ok(Self::Range),
            Self::ROUND_ROBIN => Ok(Self::RoundRobin),
            Self::STICKY => Ok(Self::Sticky),
            otherwise => Err(Error::UnknownAssignor(otherwise.into())),
        }
    }
}

impl TryFrom<String> for Assignor {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_str(&value)
    }
}

impl From<Assignor> for String {
    fn from(value: Assignor) -> Self {
        value.as_ref().to_owned()
    }
}

impl ConsumerAssignor for Assignor {
    fn assign(
        &self,
        members: &[Subscription],
        partitions_per_topic: &BTreeMap<String, i32>,
        previous: Option<&Assignment>,
    ) -> Assignment {
        match self {
            Self::Range => RangeAssignor.assign(members, partitions_per_topic, previous),
            Self::RoundRobin => RoundRobinAssignor.assign(members, partitions_per_topic, previous),
            Self::Sticky => StickyAssignor.assign(members, partitions_per_topic, previous),
            Self::CooperativeSticky => {
                CooperativeStickyAssignor.assign(members, partitions_per_topic, previous)
            }
        }
    }
}

/// Every partition of the topics subscribed to by at least one member
/// with a known partition count.
pub fn subscribed_topitions(
    members: &[Subscription],
    partitions_per_topic: &BTreeMap<String, i32>,
) -> BTreeSet<Topition> {
    partitions_per_topic
        .iter()
        .filter(|(topic, partitions)| {
            **partitions >= 0 && members.iter().any(|member| member.is_subscribed(topic))
        })
        .flat_map(|(topic, partitions)| {
            (0..*partitions).map(|partition| Topition::new(topic.as_str(), partition))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn assignor_names() -> Result<(), Error> {
        for assignor in [
            Assignor::Range,
            Assignor::RoundRobin,
            Assignor::Sticky,
            Assignor::CooperativeSticky,
        ] {
            assert_eq!(assignor, Assignor::from_str(assignor.as_ref())?);
        }

        assert_eq!(
            Err(Error::UnknownAssignor("uniform".into())),
            Assignor::from_str("uniform")
        );

        assert_eq!(
            RebalanceProtocol::Cooperative,
            Assignor::CooperativeSticky.protocol()
        );
        assert_eq!(RebalanceProtocol::Eager, Assignor::Sticky.protocol());

        Ok(())
    }

    #[test]
    fn exclusive() {
        let mut assignment = Assignment::with_members(["a", "b"]);
        assert!(assignment.insert("a", Topition::new("t", 0)));
        assert!(assignment.insert("b", Topition::new("t", 1)));
        assert!(assignment.is_exclusive());

        assert!(assignment.insert("b", Topition::new("t", 0)));
        assert!(!assignment.is_exclusive());
        assert_eq!(Some(&"a".to_owned()), assignment.owners().get(&Topition::new("t", 0)));
    }

    #[test]
    fn unknown_topic_is_not_subscribed() {
        let members = [Subscription::new("a").topics(["t", "u"])];
        let partitions_per_topic = BTreeMap::from([("t".to_owned(), 2), ("v".to_owned(), 3)]);

        assert_eq!(
            BTreeSet::from([Topition::new("t", 0), Topition::new("t", 1)]),
            subscribed_topitions(&members, &partitions_per_topic)
        );
    }
}
