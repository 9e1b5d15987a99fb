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

//! Consumer group protocol types, without any I/O.
//!
//! The messages exchanged between a membership agent and a group
//! coordinator, the [`ErrorCode`]s carried in their responses, and the
//! [`consumer`] assignment strategies used to split topic partitions
//! between the members of a group.

use std::{
    fmt::{self, Display, Formatter},
    result,
};

use serde::{Deserialize, Serialize};

mod body;
pub mod consumer;
mod group;

pub use body::Body;
pub use consumer::{
    Assignment, Assignor, ConsumerAssignor, CooperativeStickyAssignor, RangeAssignor,
    RebalanceProtocol, RoundRobinAssignor, StickyAssignor, Subscription,
};
pub use group::{
    FindCoordinatorRequest, FindCoordinatorResponse, HeartbeatRequest, HeartbeatResponse,
    JoinGroupRequest, JoinGroupResponse, JoinGroupResponseMember, LeaveGroupRequest,
    LeaveGroupResponse, SyncGroupRequest, SyncGroupResponse,
};

/// The protocol type used by consumers of partitioned topics.
pub const CONSUMER: &str = "consumer";

#[derive(thiserror::Error, Clone, Debug, Eq, PartialEq)]
pub enum Error {
    Message(String),
    UnexpectedBody(Box<Body>),
    UnknownAssignor(String),
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Message(msg) => write!(f, "{msg}"),
            error => write!(f, "{error:?}"),
        }
    }
}

pub type Result<T, E = Error> = result::Result<T, E>;

/// All group protocol requests implement this trait
pub trait Request:
    fmt::Debug + Default + Into<Body> + Send + Sync + TryFrom<Body, Error = Error> + 'static
{
    type Response: Response;
}

/// All group protocol responses implement this trait
pub trait Response:
    fmt::Debug + Default + Into<Body> + Send + Sync + TryFrom<Body, Error = Error> + 'static
{
    type Request: Request;

    /// The error code carried by this response.
    fn error(&self) -> ErrorCode;
}

/// Topic Partition (topition)
///
/// A topic partition pair.
#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Topition {
    topic: String,
    partition: i32,
}

impl Topition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        let topic = topic.into();
        Self { topic, partition }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition(&self) -> i32 {
        self.partition
    }
}

impl Display for Topition {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}

impl<T> From<(T, i32)> for Topition
where
    T: Into<String>,
{
    fn from(value: (T, i32)) -> Self {
        Self::new(value.0, value.1)
    }
}

#[non_exhaustive]
#[derive(
    Clone, Copy, Default, Deserialize, Eq, Hash, Debug, Ord, PartialEq, PartialOrd, Serialize,
)]
/// Group protocol response error codes.
pub enum ErrorCode {
    UnknownServerError,
    #[default]
    None,
    CoordinatorNotAvailable,
    NotCoordinator,
    IllegalGeneration,
    InconsistentGroupProtocol,
    InvalidGroupId,
    UnknownMemberId,
    InvalidSessionTimeout,
    RebalanceInProgress,
    InvalidRequest,
    GroupIdNotFound,
    GroupDead,
}

impl ErrorCode {
    /// A transient condition, the same request may succeed after a backoff,
    /// possibly after rediscovering the coordinator.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::UnknownServerError
                | Self::CoordinatorNotAvailable
                | Self::NotCoordinator
                | Self::GroupIdNotFound
        )
    }

    /// The coordinator must be rediscovered before retrying.
    pub fn requires_rediscovery(&self) -> bool {
        matches!(
            self,
            Self::CoordinatorNotAvailable | Self::NotCoordinator | Self::GroupIdNotFound
        )
    }

    /// The member must send a new join group request.
    pub fn requires_rejoin(&self) -> bool {
        matches!(
            self,
            Self::IllegalGeneration | Self::UnknownMemberId | Self::RebalanceInProgress
        )
    }

    /// The member must forget its member id before rejoining.
    pub fn resets_member(&self) -> bool {
        matches!(self, Self::UnknownMemberId)
    }

    /// No retry will ever succeed.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::GroupDead
                | Self::InconsistentGroupProtocol
                | Self::InvalidGroupId
                | Self::InvalidSessionTimeout
                | Self::InvalidRequest
        )
    }
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::UnknownServerError => f.write_str(
                "The server experienced an unexpected error when processing the request.",
            ),
            ErrorCode::None => f.write_str("No error."),
            ErrorCode::CoordinatorNotAvailable => {
                f.write_str("The coordinator is not available.")
            }
            ErrorCode::NotCoordinator => f.write_str("This is not the correct coordinator."),
            ErrorCode::IllegalGeneration => {
                f.write_str("Specified group generation id is not valid.")
            }
            ErrorCode::InconsistentGroupProtocol => f.write_str(
                "The group member's supported protocols are incompatible with those of existing \
                 members or first group member tried to join with empty protocol type or empty \
                 protocol list.",
            ),
            ErrorCode::InvalidGroupId => f.write_str("The configured groupId is invalid."),
            ErrorCode::UnknownMemberId => {
                f.write_str("The coordinator is not aware of this member.")
            }
            ErrorCode::InvalidSessionTimeout => f.write_str(
                "The session timeout is not within the range allowed by the coordinator.",
            ),
            ErrorCode::RebalanceInProgress => {
                f.write_str("The group is rebalancing, so a rejoin is needed.")
            }
            ErrorCode::InvalidRequest => f.write_str(
                "This most likely occurs because of a request being malformed by the client \
                 library or the message was sent to an incompatible coordinator.",
            ),
            ErrorCode::GroupIdNotFound => f.write_str("The group id does not exist."),
            ErrorCode::GroupDead => {
                f.write_str("The group has been deleted and accepts no further requests.")
            }
        }
    }
}
