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
    collections::BTreeSet,
    sync::{Arc, Mutex},
    time::Duration,
};

use common::{
    Cluster, Event, GROUP_ID, Recorder, TOPIC, config, eventually, init_tracing, topitions,
};
use corral_client::{AgentState, Error, MembershipAgent, Result};
use corral_coordinator::{Coordinator, CoordinatorConfig, State};
use corral_sans_io::{
    Assignor, CONSUMER, ErrorCode, JoinGroupRequest, SyncGroupRequest, Topition,
};
use corral_storage::{Engine, OffsetStore};
use pretty_assertions::assert_eq;
use tokio::time::sleep;

pub mod common;

fn position(events: &[Event], event: &Event) -> Result<usize> {
    events
        .iter()
        .position(|candidate| candidate == event)
        .ok_or_else(|| Error::Message(format!("missing: {event:?}")))
}

#[tokio::test(start_paused = true)]
async fn revoke_before_assign() -> Result<()> {
    let _guard = init_tracing()?;

    let engine = Engine::new().topic(TOPIC, 4)?;
    let cluster = Cluster::start(Cluster::coordinator_config()?, engine.clone())?;
    let events = Arc::new(Mutex::new(Vec::new()));

    let a = MembershipAgent::new(
        config("a"),
        cluster.transport()?,
        Recorder::new("a", events.clone(), engine.clone()),
    )?;

    let b = MembershipAgent::new(
        config("b"),
        cluster.transport()?,
        Recorder::new("b", events.clone(), engine.clone()),
    )?;

    assert_eq!(topitions(0..4), a.join([TOPIC]).await?);
    assert_eq!(1, a.generation_id().await);

    assert_eq!(topitions(2..4), b.join([TOPIC]).await?);
    assert_eq!(topitions(0..2), a.poll().await?);
    assert_eq!(2, a.generation_id().await);
    assert_eq!(2, b.generation_id().await);

    let events = events.lock()?.clone();
    assert_eq!(8, events.len());

    assert_eq!(
        vec![
            Event::Assigned("a".into(), topitions(0..4)),
            Event::Committed("a".into(), Topition::new(TOPIC, 0)),
            Event::Committed("a".into(), Topition::new(TOPIC, 1)),
            Event::Committed("a".into(), Topition::new(TOPIC, 2)),
            Event::Committed("a".into(), Topition::new(TOPIC, 3)),
            Event::Revoked("a".into(), topitions(0..4)),
        ],
        events[..6]
    );

    assert_eq!(
        BTreeSet::from([
            Event::Assigned("a".into(), topitions(0..2)),
            Event::Assigned("b".into(), topitions(2..4)),
        ]),
        events[6..].iter().cloned().collect::<BTreeSet<_>>()
    );

    assert_eq!(
        Some(20),
        engine.fetch(GROUP_ID, &Topition::new(TOPIC, 2)).await?
    );

    let description = cluster.describe().await?.ok_or(Error::NotJoined)?;
    assert_eq!(State::Stable, description.state);
    assert_eq!(2, description.members.len());

    cluster.shutdown().await
}

#[tokio::test(start_paused = true)]
async fn cooperative_hand_off() -> Result<()> {
    let _guard = init_tracing()?;

    let engine = Engine::new().topic(TOPIC, 4)?;
    let cluster = Cluster::start(Cluster::coordinator_config()?, engine.clone())?;
    let events = Arc::new(Mutex::new(Vec::new()));

    let a = MembershipAgent::new(
        config("a").assignment_strategy(Assignor::CooperativeSticky),
        cluster.transport()?,
        Recorder::new("a", events.clone(), engine.clone()),
    )?;

    let b = MembershipAgent::new(
        config("b").assignment_strategy(Assignor::CooperativeSticky),
        cluster.transport()?,
        Recorder::new("b", events.clone(), engine.clone()),
    )?;

    assert_eq!(topitions(0..4), a.join([TOPIC]).await?);

    // partitions 2 and 3 are withheld until a has revoked them
    assert!(b.join([TOPIC]).await?.is_empty());

    {
        let b = &b;

        eventually(Duration::from_secs(1), 60, move || async move {
            Ok::<_, Error>(b.poll().await? == topitions(2..4))
        })
        .await?;
    }

    assert_eq!(topitions(0..2), a.poll().await?);
    assert_eq!(AgentState::Stable, b.state().await);

    let events = events.lock()?.clone();

    assert!(
        !events
            .iter()
            .any(|event| matches!(event, Event::Lost(..)))
    );

    assert_eq!(
        Some(&Event::Revoked("a".into(), topitions(2..4))),
        events
            .iter()
            .find(|event| matches!(event, Event::Revoked(..)))
    );

    let assigned = position(&events, &Event::Assigned("b".into(), topitions(2..4)))?;
    assert!(position(&events, &Event::Committed("a".into(), Topition::new(TOPIC, 2)))? < assigned);
    assert!(position(&events, &Event::Committed("a".into(), Topition::new(TOPIC, 3)))? < assigned);

    let description = cluster.describe().await?.ok_or(Error::NotJoined)?;
    assert_eq!(State::Stable, description.state);
    assert_eq!(3, description.generation_id);
    assert_eq!(Some("cooperative-sticky"), description.protocol_name.as_deref());

    cluster.shutdown().await
}

#[tokio::test(start_paused = true)]
async fn lost_on_eviction() -> Result<()> {
    let _guard = init_tracing()?;

    let engine = Engine::new().topic(TOPIC, 4)?;
    let cluster = Cluster::start(Cluster::coordinator_config()?, engine.clone())?;
    let events = Arc::new(Mutex::new(Vec::new()));

    let a = MembershipAgent::new(
        config("a"),
        cluster.transport()?,
        Recorder::new("a", events.clone(), engine.clone()),
    )?;

    assert_eq!(topitions(0..4), a.join([TOPIC]).await?);

    let evicted = a.member_id().await;
    assert!(evicted.starts_with("a-"));
    assert_eq!(ErrorCode::None, cluster.kick(&evicted).await?);

    {
        let a = &a;
        let evicted = evicted.as_str();

        eventually(Duration::from_secs(1), 60, move || async move {
            Ok::<_, Error>(
                a.member_id().await != evicted && a.state().await == AgentState::Stable,
            )
        })
        .await?;
    }

    assert_eq!(topitions(0..4), a.poll().await?);

    assert_eq!(
        vec![
            Event::Assigned("a".into(), topitions(0..4)),
            Event::Lost("a".into(), topitions(0..4)),
            Event::Assigned("a".into(), topitions(0..4)),
        ],
        events.lock()?.clone()
    );

    assert_eq!(None, engine.fetch(GROUP_ID, &Topition::new(TOPIC, 0)).await?);

    cluster.shutdown().await
}

#[tokio::test(start_paused = true)]
async fn callback_timeout() -> Result<()> {
    let _guard = init_tracing()?;

    let engine = Engine::new().topic(TOPIC, 4)?;
    let cluster = Cluster::start(Cluster::coordinator_config()?, engine.clone())?;
    let events = Arc::new(Mutex::new(Vec::new()));

    let a = MembershipAgent::new(
        config("a").callback_timeout_ms(1_000),
        cluster.transport()?,
        Recorder::new("a", events.clone(), engine).assign_delay(Duration::from_secs(2)),
    )?;

    assert!(matches!(
        a.join([TOPIC]).await,
        Err(Error::CallbackTimeout("assigned"))
    ));

    assert_eq!(AgentState::Unjoined, a.state().await);
    assert!(a.assignment().await.is_empty());
    assert!(events.lock()?.is_empty());

    cluster.shutdown().await
}

#[tokio::test(start_paused = true)]
async fn leave() -> Result<()> {
    let _guard = init_tracing()?;

    let engine = Engine::new().topic(TOPIC, 2)?;
    let cluster = Cluster::start(Cluster::coordinator_config()?, engine.clone())?;
    let events = Arc::new(Mutex::new(Vec::new()));

    let a = MembershipAgent::new(
        config("a"),
        cluster.transport()?,
        Recorder::new("a", events.clone(), engine.clone()),
    )?;

    assert_eq!(topitions(0..2), a.join([TOPIC]).await?);
    a.leave().await?;

    assert_eq!(
        vec![
            Event::Assigned("a".into(), topitions(0..2)),
            Event::Committed("a".into(), Topition::new(TOPIC, 0)),
            Event::Committed("a".into(), Topition::new(TOPIC, 1)),
            Event::Revoked("a".into(), topitions(0..2)),
        ],
        events.lock()?.clone()
    );

    assert_eq!(AgentState::Unjoined, a.state().await);
    assert!(a.member_id().await.is_empty());
    assert!(matches!(a.poll().await, Err(Error::NotJoined)));

    let description = cluster.describe().await?.ok_or(Error::NotJoined)?;
    assert_eq!(State::Empty, description.state);
    assert!(description.members.is_empty());

    assert_eq!(
        Some(10),
        engine.fetch(GROUP_ID, &Topition::new(TOPIC, 1)).await?
    );

    cluster.shutdown().await
}

#[tokio::test(start_paused = true)]
async fn max_poll_interval() -> Result<()> {
    let _guard = init_tracing()?;

    let engine = Engine::new().topic(TOPIC, 2)?;
    let cluster = Cluster::start(Cluster::coordinator_config()?, engine.clone())?;
    let events = Arc::new(Mutex::new(Vec::new()));

    let a = MembershipAgent::new(
        config("a").max_poll_interval_ms(25_000),
        cluster.transport()?,
        Recorder::new("a", events.clone(), engine),
    )?;

    assert_eq!(topitions(0..2), a.join([TOPIC]).await?);

    sleep(Duration::from_secs(35)).await;

    let description = cluster.describe().await?.ok_or(Error::NotJoined)?;
    assert_eq!(State::Empty, description.state);

    assert!(matches!(a.poll().await, Err(Error::PollIntervalExceeded)));
    assert_eq!(AgentState::Unjoined, a.state().await);

    assert_eq!(topitions(0..2), a.poll().await?);
    assert_eq!(AgentState::Stable, a.state().await);

    assert_eq!(
        vec![
            Event::Assigned("a".into(), topitions(0..2)),
            Event::Lost("a".into(), topitions(0..2)),
            Event::Assigned("a".into(), topitions(0..2)),
        ],
        events.lock()?.clone()
    );

    cluster.shutdown().await
}

#[tokio::test(start_paused = true)]
async fn deleted_group() -> Result<()> {
    let _guard = init_tracing()?;

    let engine = Engine::new().topic(TOPIC, 2)?;
    let cluster = Cluster::start(Cluster::coordinator_config()?, engine.clone())?;
    let events = Arc::new(Mutex::new(Vec::new()));

    let a = MembershipAgent::new(
        config("a"),
        cluster.transport()?,
        Recorder::new("a", events.clone(), engine),
    )?;

    assert_eq!(topitions(0..2), a.join([TOPIC]).await?);
    assert_eq!(ErrorCode::None, cluster.delete().await?);

    sleep(Duration::from_secs(11)).await;

    assert!(matches!(a.poll().await, Err(Error::GroupDead)));
    assert_eq!(AgentState::Unjoined, a.state().await);
    assert!(a.assignment().await.is_empty());

    assert_eq!(
        vec![
            Event::Assigned("a".into(), topitions(0..2)),
            Event::Lost("a".into(), topitions(0..2)),
        ],
        events.lock()?.clone()
    );

    cluster.shutdown().await
}

#[tokio::test(start_paused = true)]
async fn coordinator_not_available() -> Result<()> {
    let _guard = init_tracing()?;

    let engine = Engine::new().topic(TOPIC, 2)?;
    let cluster = Cluster::start(CoordinatorConfig::default(), engine.clone())?;
    let events = Arc::new(Mutex::new(Vec::new()));

    let a = MembershipAgent::new(
        config("a").rebalance_timeout_ms(5_000),
        cluster.transport()?,
        Recorder::new("a", events.clone(), engine),
    )?;

    assert!(matches!(
        a.join([TOPIC]).await,
        Err(Error::RebalanceTimeout)
    ));

    assert_eq!(AgentState::Unjoined, a.state().await);
    assert!(events.lock()?.is_empty());
    assert_eq!(None, cluster.describe().await?);

    cluster.shutdown().await
}

#[tokio::test(start_paused = true)]
async fn coordinator_lost_while_rejoining() -> Result<()> {
    let _guard = init_tracing()?;

    let engine = Engine::new().topic(TOPIC, 4)?;
    let cluster = Cluster::start(Cluster::coordinator_config()?, engine.clone())?;
    let events = Arc::new(Mutex::new(Vec::new()));

    let a = MembershipAgent::new(
        config("a")
            .assignment_strategy(Assignor::CooperativeSticky)
            .rebalance_timeout_ms(20_000),
        cluster.transport()?,
        Recorder::new("a", events.clone(), engine),
    )?;

    assert_eq!(topitions(0..4), a.join([TOPIC]).await?);

    // a member that joins once, syncs and then never rejoins
    let controller = cluster.controller.clone();
    let other = tokio::spawn(async move {
        controller
            .join(
                JoinGroupRequest::default()
                    .group_id(GROUP_ID.into())
                    .client_instance_id("b".into())
                    .protocol_type(CONSUMER.into())
                    .protocols(vec!["cooperative-sticky".into()])
                    .topics([TOPIC.to_owned()])
                    .session_timeout_ms(120_000)
                    .rebalance_timeout_ms(60_000),
            )
            .await
    })
    .await
    .map_err(|err| Error::Message(format!("{err}")))?
    .map_err(|err| Error::Message(format!("{err}")))?;

    assert_eq!(ErrorCode::None, other.error_code);
    assert_eq!(2, other.generation_id);

    let synced = cluster
        .controller
        .sync(
            SyncGroupRequest::default()
                .group_id(GROUP_ID.into())
                .member_id(other.member_id.clone())
                .generation_id(2),
        )
        .await
        .map_err(|err| Error::Message(format!("{err}")))?;

    assert_eq!(ErrorCode::None, synced.error_code);
    assert!(synced.assignment.is_empty());

    // a keeps 0 and 1 and rejoins the follow up generation, held waiting for b
    sleep(Duration::from_secs(15)).await;
    cluster.shutdown().await?;

    sleep(Duration::from_secs(30)).await;

    assert!(matches!(a.poll().await, Err(Error::RebalanceTimeout)));
    assert_eq!(AgentState::Unjoined, a.state().await);
    assert!(a.assignment().await.is_empty());

    let events = events.lock()?.clone();

    assert_eq!(
        Some(&Event::Revoked("a".into(), topitions(2..4))),
        events
            .iter()
            .find(|event| matches!(event, Event::Revoked(..)))
    );

    assert_eq!(
        Some(&Event::Lost("a".into(), topitions(0..2))),
        events.last()
    );

    Ok(())
}
