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

use serde::{Deserialize, Serialize};

use crate::{
    ErrorCode, FindCoordinatorRequest, FindCoordinatorResponse, HeartbeatRequest, HeartbeatResponse,
    JoinGroupRequest, JoinGroupResponse, LeaveGroupRequest, LeaveGroupResponse, SyncGroupRequest,
    Request, Response, SyncGroupResponse,
};

/// Any request or response exchanged between an agent and a coordinator.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum Body {
    FindCoordinatorRequest(FindCoordinatorRequest),
    FindCoordinatorResponse(FindCoordinatorResponse),
    JoinGroupRequest(JoinGroupRequest),
    JoinGroupResponse(JoinGroupResponse),
    SyncGroupRequest(SyncGroupRequest),
    SyncGroupResponse(SyncGroupResponse),
    HeartbeatRequest(HeartbeatRequest),
    HeartbeatResponse(HeartbeatResponse),
    LeaveGroupRequest(LeaveGroupRequest),
    LeaveGroupResponse(LeaveGroupResponse),
}

impl Body {
    pub fn name(&self) -> &'static str {
        match self {
            Self::FindCoordinatorRequest(_) => "find_coordinator_request",
            Self::FindCoordinatorResponse(_) => "find_coordinator_response",
            Self::JoinGroupRequest(_) => "join_group_request",
            Self::JoinGroupResponse(_) => "join_group_response",
            Self::SyncGroupRequest(_) => "sync_group_request",
            Self::SyncGroupResponse(_) => "sync_group_response",
            Self::HeartbeatRequest(_) => "heartbeat_request",
            Self::HeartbeatResponse(_) => "heartbeat_response",
            Self::LeaveGroupRequest(_) => "leave_group_request",
            Self::LeaveGroupResponse(_) => "leave_group_response",
        }
    }
}

macro_rules! body_conversions {
    ($($variant:ident),+ $(,)?) => {
        $(
            impl From<$variant> for Body {
                fn from(value: $variant) -> Self {
                    Self::$variant(value)
                }
            }

            impl TryFrom<Body> for $variant {
                type Error = crate::Error;

                fn try_from(value: Body) -> Result<Self, Self::Error> {
                    if let Body::$variant(inner) = value {
                        Ok(inner)
                    } else {
                        Err(crate::Error::UnexpectedBody(Box::new(value)))
                    }
                }
            }
        )+
    };
}

body_conversions!(
    FindCoordinatorRequest,
    FindCoordinatorResponse,
    JoinGroupRequest,
    JoinGroupResponse,
    SyncGroupRequest,
    SyncGroupResponse,
    HeartbeatRequest,
    HeartbeatResponse,
    LeaveGroupRequest,
    LeaveGroupResponse,
);

macro_rules! request_response {
    ($($request:ident => $response:ident),+ $(,)?) => {
        $(
            impl Request for $request {
                type Response = $response;
            }

            impl Response for $response {
                type Request = $request;

                fn error(&self) -> ErrorCode {
                    self.error_code
                }
            }
        )+
    };
}

request_response!(
    FindCoordinatorRequest => FindCoordinatorResponse,
    JoinGroupRequest => JoinGroupResponse,
    SyncGroupRequest => SyncGroupResponse,
    HeartbeatRequest => HeartbeatResponse,
    LeaveGroupRequest => LeaveGroupResponse,
);
