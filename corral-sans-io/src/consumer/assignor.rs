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

use crate::consumer::Subscription;

mod cooperative;
mod range;
mod round_robin;
mod sticky;

pub use cooperative::CooperativeStickyAssignor;
pub use range::RangeAssignor;
pub use round_robin::RoundRobinAssignor;
pub use sticky::StickyAssignor;

/// Members keyed (and therefore ordered) by member id.
fn by_member_id(members: &[Subscription]) -> BTreeMap<&str, &Subscription> {
    members
        .iter()
        .map(|member| (member.member_id.as_str(), member))
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::BTreeSet;

    use crate::{Topition, consumer::Assignment};

    pub(crate) fn topitions(topic: &str, partitions: &[i32]) -> BTreeSet<Topition> {
        partitions
            .iter()
            .map(|partition| Topition::new(topic, *partition))
            .collect()
    }

    pub(crate) fn set(topitions: &[(&str, i32)]) -> BTreeSet<Topition> {
        topitions.iter().copied().map(Topition::from).collect()
    }

    pub(crate) fn partitions(assignment: &Assignment, member_id: &str) -> Vec<i32> {
        assignment
            .get(member_id)
            .map(|topitions| topitions.iter().map(Topition::partition).collect())
            .unwrap_or_default()
    }
}
