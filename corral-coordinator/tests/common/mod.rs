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

#![allow(dead_code)]

use corral_coordinator::Result;
use corral_sans_io::{CONSUMER, HeartbeatRequest, JoinGroupRequest, SyncGroupRequest};
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::EnvFilter;

pub(crate) const GROUP_ID: &str = "g1";
pub(crate) const TOPIC: &str = "t";

pub(crate) fn init_tracing() -> Result<DefaultGuard> {
    Ok(tracing::subscriber::set_default(
        tracing_subscriber::fmt()
            .with_level(true)
            .with_line_number(true)
            .with_thread_names(false)
            .with_target(true)
            .with_env_filter(EnvFilter::from_default_env().add_directive(
                format!("{}=debug", env!("CARGO_PKG_NAME").replace("-", "_")).parse()?,
            ))
            .with_test_writer()
            .finish(),
    ))
}

pub(crate) fn join(member_id: &str, client_instance_id: &str) -> JoinGroupRequest {
    JoinGroupRequest::default()
        .group_id(GROUP_ID.into())
        .member_id(member_id.into())
        .client_instance_id(client_instance_id.into())
        .protocol_type(CONSUMER.into())
        .protocols(vec!["range".into()])
        .topics([TOPIC.to_owned()])
        .session_timeout_ms(30_000)
        .rebalance_timeout_ms(5_000)
}

pub(crate) fn sync(member_id: &str, generation_id: i32) -> SyncGroupRequest {
    SyncGroupRequest::default()
        .group_id(GROUP_ID.into())
        .member_id(member_id.into())
        .generation_id(generation_id)
}

pub(crate) fn heartbeat(member_id: &str, generation_id: i32) -> HeartbeatRequest {
    HeartbeatRequest::default()
        .group_id(GROUP_ID.into())
        .member_id(member_id.into())
        .generation_id(generation_id)
}
