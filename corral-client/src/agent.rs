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
    fmt::{self, Debug, Display, Formatter},
    future::Future,
    sync::{Arc, LazyLock},
};

use corral_sans_io::{
    ErrorCode, FindCoordinatorRequest, HeartbeatRequest, JoinGroupRequest, LeaveGroupRequest,
    RebalanceProtocol, SyncGroupRequest, Topition,
};
use corral_service::Transport;
use opentelemetry::{KeyValue, metrics::Counter};
use tokio::{
    sync::Mutex,
    time::{self, Instant, MissedTickBehavior, timeout},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::{AgentConfig, Backoff, Error, METER, RebalanceListener, Result};

static MEMBERSHIP_REQUESTS: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("corral_membership_requests")
        .with_description("membership agent requests to the group coordinator")
        .build()
});

static REBALANCE_CALLBACKS: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("corral_membership_callbacks")
        .with_description("rebalance listener callbacks")
        .build()
});

#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum AgentState {
    #[default]
    Unjoined,
    Joining,
    AwaitingSync,
    Stable,
    Revoking,
}

impl Display for AgentState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unjoined => "Unjoined",
            Self::Joining => "Joining",
            Self::AwaitingSync => "AwaitingSync",
            Self::Stable => "Stable",
            Self::Revoking => "Revoking",
        })
    }
}

#[derive(Debug)]
struct Inner {
    state: AgentState,
    member_id: String,
    generation_id: i32,
    coordinator: Option<Url>,
    topics: BTreeSet<String>,
    assignment: BTreeSet<Topition>,
    last_poll: Instant,
    last_heartbeat: Instant,

    /// Raised by the heartbeat loop, returned by the next poll.
    fault: Option<Error>,

    heartbeat: Option<CancellationToken>,
}

impl Inner {
    fn new() -> Self {
        let now = Instant::now();

        Self {
            state: AgentState::Unjoined,
            member_id: String::new(),
            generation_id: -1,
            coordinator: None,
            topics: BTreeSet::new(),
            assignment: BTreeSet::new(),
            last_poll: now,
            last_heartbeat: now,
            fault: None,
            heartbeat: None,
        }
    }

    fn forget_member(&mut self) {
        self.member_id.clear();
        self.generation_id = -1;
    }
}

/// Membership of one consumer group.
///
/// Clones share the same membership: the application polls and leaves
/// through one clone while another heartbeats in the background.
pub struct MembershipAgent<T, L> {
    config: AgentConfig,
    transport: T,
    listener: Arc<L>,
    inner: Arc<Mutex<Inner>>,
}

impl<T, L> Clone for MembershipAgent<T, L>
where
    T: Clone,
{
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            transport: self.transport.clone(),
            listener: self.listener.clone(),
            inner: self.inner.clone(),
        }
    }
}

impl<T, L> Debug for MembershipAgent<T, L>
where
    T: Debug,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct(stringify!(MembershipAgent))
            .field("config", &self.config)
            .field("transport", &self.transport)
            .finish()
    }
}

impl<T, L> MembershipAgent<T, L>
where
    T: Transport,
    L: RebalanceListener,
{
    pub fn new(config: AgentConfig, transport: T, listener: L) -> Result<Self> {
        config.validate().map(|config| Self {
            config,
            transport,
            listener: Arc::new(listener),
            inner: Arc::new(Mutex::new(Inner::new())),
        })
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub async fn state(&self) -> AgentState {
        self.inner.lock().await.state
    }

    pub async fn member_id(&self) -> String {
        self.inner.lock().await.member_id.clone()
    }

    pub async fn generation_id(&self) -> i32 {
        self.inner.lock().await.generation_id
    }

    /// The partitions currently owned by this member.
    pub async fn assignment(&self) -> BTreeSet<Topition> {
        self.inner.lock().await.assignment.clone()
    }

    /// Join the group subscribed to `topics`, returning once this member
    /// has its share of the partitions. Joining again with a different
    /// subscription rebalances the group.
    #[instrument(skip_all)]
    pub async fn join<I, S>(&self, topics: I) -> Result<BTreeSet<Topition>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let topics = topics.into_iter().map(Into::into).collect::<BTreeSet<_>>();
        debug!(group_id = self.config.group_id, ?topics);

        let mut inner = self.inner.lock().await;
        inner.topics = topics;
        inner.last_poll = Instant::now();
        inner.fault = None;

        self.rebalance(&mut inner).await?;
        self.start_heartbeat(&mut inner);

        Ok(inner.assignment.clone())
    }

    /// Record that the application is making progress, returning the
    /// partitions currently owned.
    ///
    /// A failure raised by the background heartbeat (an eviction for
    /// exceeding the max poll interval, or the group being deleted) is
    /// returned once. The poll that follows it rejoins the group.
    pub async fn poll(&self) -> Result<BTreeSet<Topition>> {
        let mut inner = self.inner.lock().await;
        inner.last_poll = Instant::now();

        if let Some(fault) = inner.fault.take() {
            return Err(fault);
        }

        if inner.state == AgentState::Unjoined {
            if inner.topics.is_empty() {
                return Err(Error::NotJoined);
            }

            info!(group_id = self.config.group_id, "rejoining");

            self.rebalance(&mut inner).await?;
            self.start_heartbeat(&mut inner);
        }

        Ok(inner.assignment.clone())
    }

    /// Leave the group, revoking every owned partition first. The agent
    /// must join again before it can be polled.
    #[instrument(skip(self))]
    pub async fn leave(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;

        self.stop_heartbeat(&mut inner);

        if inner.state == AgentState::Unjoined {
            return Ok(());
        }

        if !inner.assignment.is_empty() {
            inner.state = AgentState::Revoking;
            let revoked = inner.assignment.clone();

            if let Err(err) = self.revoked(&revoked).await {
                warn!(?err);
            }
        }

        if let Some(coordinator) = inner.coordinator.clone() {
            MEMBERSHIP_REQUESTS.add(1, &[KeyValue::new("method", "leave")]);

            let leave = LeaveGroupRequest::default()
                .group_id(self.config.group_id.clone())
                .member_id(inner.member_id.clone())
                .reason(Some(String::from("leaving")));

            match self.transport.call(&coordinator, leave).await {
                Ok(response) if response.error_code == ErrorCode::None => {}
                Ok(response) => warn!(error_code = ?response.error_code),
                Err(err) => warn!(?err),
            }
        }

        info!(
            group_id = self.config.group_id,
            member_id = inner.member_id,
            generation_id = inner.generation_id,
            "left"
        );

        inner.topics.clear();
        inner.assignment.clear();
        inner.forget_member();
        inner.state = AgentState::Unjoined;

        Ok(())
    }

    fn start_heartbeat(&self, inner: &mut Inner) {
        if inner.heartbeat.is_some() {
            return;
        }

        let cancellation = CancellationToken::new();
        inner.heartbeat = Some(cancellation.clone());

        _ = tokio::spawn(self.clone().heartbeat(cancellation));
    }

    fn stop_heartbeat(&self, inner: &mut Inner) {
        if let Some(cancellation) = inner.heartbeat.take() {
            cancellation.cancel();
        }
    }

    async fn heartbeat(self, cancellation: CancellationToken) {
        let period = self.config.heartbeat_interval();

        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {}

                cancelled = cancellation.cancelled() => {
                    debug!(?cancelled);
                    break;
                }
            }

            let mut inner = self.inner.lock().await;

            if cancellation.is_cancelled() {
                break;
            }

            if let Err(err) = self.beat(&mut inner).await {
                error!(group_id = self.config.group_id, ?err);

                self.abandon(&mut inner, &err).await;
                inner.fault = Some(err);
                break;
            }
        }
    }

    async fn beat(&self, inner: &mut Inner) -> Result<()> {
        if inner.state != AgentState::Stable {
            return Ok(());
        }

        let now = Instant::now();

        if now.saturating_duration_since(inner.last_poll) > self.config.max_poll_interval() {
            warn!(
                group_id = self.config.group_id,
                member_id = inner.member_id,
                since_last_poll = ?now.saturating_duration_since(inner.last_poll),
                "max poll interval exceeded"
            );

            if let Some(coordinator) = inner.coordinator.clone() {
                MEMBERSHIP_REQUESTS.add(1, &[KeyValue::new("method", "leave")]);

                let leave = LeaveGroupRequest::default()
                    .group_id(self.config.group_id.clone())
                    .member_id(inner.member_id.clone())
                    .reason(Some(String::from("max poll interval exceeded")));

                if let Err(err) = self.transport.call(&coordinator, leave).await {
                    warn!(?err);
                }
            }

            self.lost(inner).await?;
            return Err(Error::PollIntervalExceeded);
        }

        let coordinator = match self.coordinator(inner).await {
            Ok(coordinator) => coordinator,
            Err(err) => return self.missed(inner, err).await,
        };

        MEMBERSHIP_REQUESTS.add(1, &[KeyValue::new("method", "heartbeat")]);

        let heartbeat = HeartbeatRequest::default()
            .group_id(self.config.group_id.clone())
            .member_id(inner.member_id.clone())
            .generation_id(inner.generation_id);

        let response = match self.transport.call(&coordinator, heartbeat).await {
            Ok(response) => response,
            Err(err) => {
                inner.coordinator = None;
                return self.missed(inner, err.into()).await;
            }
        };

        debug!(?response);

        match response.error_code {
            ErrorCode::None if !response.rebalance_in_progress => {
                inner.last_heartbeat = now;
                Ok(())
            }

            ErrorCode::None | ErrorCode::RebalanceInProgress => {
                inner.last_heartbeat = now;
                self.rebalance(inner).await
            }

            error_code if error_code.requires_rejoin() => {
                self.evicted(inner, error_code).await?;
                self.rebalance(inner).await
            }

            error_code if error_code.is_fatal() => Err(error_code.into()),

            error_code => {
                if error_code.requires_rediscovery() {
                    inner.coordinator = None;
                }

                self.missed(inner, Error::Api(error_code)).await
            }
        }
    }

    /// A heartbeat did not get through, once the session has expired this
    /// member assumes it has been evicted.
    async fn missed(&self, inner: &mut Inner, err: Error) -> Result<()> {
        let since = Instant::now().saturating_duration_since(inner.last_heartbeat);

        if since <= self.config.session_timeout() {
            warn!(?err, ?since);
            return Ok(());
        }

        warn!(?err, ?since, "session expired");

        self.evicted(inner, ErrorCode::UnknownMemberId).await?;
        self.rebalance(inner).await
    }

    /// Rejoin the group, abandoning membership on failure.
    async fn rebalance(&self, inner: &mut Inner) -> Result<()> {
        let result = self.join_and_sync(inner).await;

        if let Err(ref err) = result {
            error!(group_id = self.config.group_id, member_id = inner.member_id, ?err);
            self.abandon(inner, err).await;
        }

        result
    }

    /// Give up membership after `err`, reporting owned partitions as lost
    /// unless a callback overran its budget.
    async fn abandon(&self, inner: &mut Inner, err: &Error) {
        if !matches!(err, Error::CallbackTimeout(_)) {
            if let Err(lost) = self.lost(inner).await {
                warn!(?lost);
            }
        }

        self.teardown(inner);
    }

    /// As if this member had crashed: no callbacks and no leave request.
    fn teardown(&self, inner: &mut Inner) {
        self.stop_heartbeat(inner);

        inner.state = AgentState::Unjoined;
        inner.assignment.clear();
        inner.coordinator = None;
        inner.forget_member();
    }

    async fn join_and_sync(&self, inner: &mut Inner) -> Result<()> {
        let deadline = Instant::now() + self.config.rebalance_timeout();

        let mut backoff = Backoff::new(
            self.config.retry_backoff(),
            self.config.retry_backoff_max(),
        );

        loop {
            if Instant::now() >= deadline {
                return Err(Error::RebalanceTimeout);
            }

            if self.config.assignment_strategy.protocol() == RebalanceProtocol::Eager
                && !inner.assignment.is_empty()
            {
                inner.state = AgentState::Revoking;

                let revoked = inner.assignment.clone();
                self.revoked(&revoked).await?;
                inner.assignment.clear();
            }

            inner.state = AgentState::Joining;

            let coordinator = match self.coordinator(inner).await {
                Ok(coordinator) => coordinator,
                Err(err) => {
                    warn!(?err);
                    backoff.wait().await;
                    continue;
                }
            };

            MEMBERSHIP_REQUESTS.add(1, &[KeyValue::new("method", "join")]);

            let join = JoinGroupRequest::default()
                .group_id(self.config.group_id.clone())
                .member_id(inner.member_id.clone())
                .client_instance_id(self.config.client_instance_id.clone())
                .protocol_type(self.config.protocol_type.clone())
                .protocols(vec![self.config.assignment_strategy.into()])
                .topics(inner.topics.iter().cloned())
                .owned_partitions(inner.assignment.clone())
                .session_timeout_ms(self.config.session_timeout_ms)
                .rebalance_timeout_ms(self.config.rebalance_timeout_ms);

            // held by the coordinator until its own rebalance deadline, the
            // largest rebalance timeout of any member
            let joined = match self.transport.call(&coordinator, join).await {
                Ok(joined) => joined,

                Err(err) => {
                    warn!(?err);
                    inner.coordinator = None;
                    backoff.wait().await;
                    continue;
                }
            };

            debug!(?joined);

            if joined.error_code != ErrorCode::None {
                self.failed(inner, joined.error_code, &mut backoff).await?;
                continue;
            }

            inner.member_id = joined.member_id;
            inner.generation_id = joined.generation_id;
            inner.state = AgentState::AwaitingSync;

            MEMBERSHIP_REQUESTS.add(1, &[KeyValue::new("method", "sync")]);

            let sync = SyncGroupRequest::default()
                .group_id(self.config.group_id.clone())
                .member_id(inner.member_id.clone())
                .generation_id(inner.generation_id);

            let synced = match timeout(
                self.config.rebalance_timeout(),
                self.transport.call(&coordinator, sync),
            )
            .await
            {
                Ok(Ok(synced)) => synced,

                Ok(Err(err)) => {
                    warn!(?err);
                    inner.coordinator = None;
                    backoff.wait().await;
                    continue;
                }

                Err(_elapsed) => return Err(Error::RebalanceTimeout),
            };

            debug!(?synced);

            if synced.error_code != ErrorCode::None {
                self.failed(inner, synced.error_code, &mut backoff).await?;
                continue;
            }

            self.assigned(inner, synced.assignment).await?;

            inner.state = AgentState::Stable;
            inner.last_heartbeat = Instant::now();

            info!(
                group_id = self.config.group_id,
                member_id = inner.member_id,
                generation_id = inner.generation_id,
                assignment = ?inner.assignment,
                "stable"
            );

            return Ok(());
        }
    }

    /// React to an error code from a join or sync, before trying again.
    async fn failed(
        &self,
        inner: &mut Inner,
        error_code: ErrorCode,
        backoff: &mut Backoff,
    ) -> Result<()> {
        debug!(?error_code);

        if error_code.is_fatal() {
            return Err(error_code.into());
        }

        if error_code.resets_member() || error_code == ErrorCode::IllegalGeneration {
            self.evicted(inner, error_code).await?;
        }

        if error_code.requires_rediscovery() {
            inner.coordinator = None;
        }

        if error_code.is_retriable() {
            backoff.wait().await;
        }

        Ok(())
    }

    /// This member is no longer part of the generation it last joined.
    async fn evicted(&self, inner: &mut Inner, error_code: ErrorCode) -> Result<()> {
        info!(
            group_id = self.config.group_id,
            member_id = inner.member_id,
            generation_id = inner.generation_id,
            ?error_code,
            "evicted"
        );

        self.lost(inner).await?;

        if error_code.resets_member() {
            inner.forget_member();
        }

        Ok(())
    }

    async fn lost(&self, inner: &mut Inner) -> Result<()> {
        if inner.assignment.is_empty() {
            return Ok(());
        }

        let lost = std::mem::take(&mut inner.assignment);
        inner.state = AgentState::Unjoined;

        self.callback("lost", self.listener.on_partitions_lost(&lost))
            .await
    }

    async fn revoked(&self, revoked: &BTreeSet<Topition>) -> Result<()> {
        self.callback("revoked", self.listener.on_partitions_revoked(revoked))
            .await
    }

    /// Revoke what is no longer owned, before taking up what is new.
    async fn assigned(&self, inner: &mut Inner, assignment: BTreeSet<Topition>) -> Result<()> {
        let revoked = inner
            .assignment
            .difference(&assignment)
            .cloned()
            .collect::<BTreeSet<_>>();

        let added = assignment
            .difference(&inner.assignment)
            .cloned()
            .collect::<BTreeSet<_>>();

        debug!(?revoked, ?added);

        if !revoked.is_empty() {
            inner.state = AgentState::Revoking;
            self.revoked(&revoked).await?;
        }

        inner.assignment = assignment;

        if added.is_empty() {
            Ok(())
        } else {
            self.callback("assigned", self.listener.on_partitions_assigned(&added))
                .await
        }
    }

    async fn callback<F>(&self, callback: &'static str, future: F) -> Result<()>
    where
        F: Future<Output = Result<()>> + Send,
    {
        REBALANCE_CALLBACKS.add(1, &[KeyValue::new("callback", callback)]);

        match timeout(self.config.callback_timeout(), future).await {
            Ok(Ok(())) => Ok(()),

            Ok(Err(err)) => {
                error!(callback, ?err);
                Ok(())
            }

            Err(_elapsed) => {
                warn!(callback, timeout = ?self.config.callback_timeout(), "timed out");
                Err(Error::CallbackTimeout(callback))
            }
        }
    }

    /// The coordinator of this group, discovering it when unknown.
    async fn coordinator(&self, inner: &mut Inner) -> Result<Url> {
        if let Some(ref coordinator) = inner.coordinator {
            return Ok(coordinator.clone());
        }

        let bootstrap = self
            .config
            .bootstrap
            .clone()
            .unwrap_or_else(|| self.transport.bootstrap());

        MEMBERSHIP_REQUESTS.add(1, &[KeyValue::new("method", "find_coordinator")]);

        let response = self
            .transport
            .call(
                &bootstrap,
                FindCoordinatorRequest::default().key(self.config.group_id.clone()),
            )
            .await?;

        debug!(?response);

        match (response.error_code, response.coordinator) {
            (ErrorCode::None, Some(coordinator)) => {
                inner.coordinator = Some(coordinator.clone());
                Ok(coordinator)
            }

            (ErrorCode::None, None) => Err(Error::Api(ErrorCode::CoordinatorNotAvailable)),

            (error_code, _) => Err(Error::Api(error_code)),
        }
    }
}
