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

//! Request/response plumbing between membership agents and coordinators.
//!
//! A [`Transport`] delivers a request [`Body`] to an address and returns
//! the response. The in-process [`ChannelTransport`] routes requests over
//! bounded channels to a [`Handler`] served by [`serve`].

use std::{
    fmt::{self, Debug, Display, Formatter},
    result,
    sync::{LazyLock, PoisonError},
};

use async_trait::async_trait;
use corral_sans_io::{Body, Request};
use opentelemetry::{InstrumentationScope, global, metrics::Meter};
use opentelemetry_semantic_conventions::SCHEMA_URL;
use tokio::sync::oneshot::error::RecvError;
use url::Url;

mod channel;

pub use channel::{
    ChannelTransport, Handler, RequestReceiver, RequestSender, bounded_channel, serve,
};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    Message(String),
    OneshotRecv(#[from] RecvError),
    Poison,
    SansIo(#[from] corral_sans_io::Error),
    UnableToSend(Box<Body>),
    UnknownAddress(Url),
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Message(msg) => write!(f, "{msg}"),
            error => write!(f, "{error:?}"),
        }
    }
}

impl<T> From<PoisonError<T>> for Error {
    fn from(_value: PoisonError<T>) -> Self {
        Self::Poison
    }
}

pub type Result<T, E = Error> = result::Result<T, E>;

pub(crate) static METER: LazyLock<Meter> = LazyLock::new(|| {
    global::meter_with_scope(
        InstrumentationScope::builder(env!("CARGO_PKG_NAME"))
            .with_version(env!("CARGO_PKG_VERSION"))
            .with_schema_url(SCHEMA_URL)
            .build(),
    )
});

/// Reliable request/response delivery to a coordinator address.
#[async_trait]
pub trait Transport: Clone + Debug + Send + Sync + 'static {
    /// The address used to discover a coordinator.
    fn bootstrap(&self) -> Url;

    /// Send a request body to an address, returning the response body.
    async fn send(&self, address: &Url, body: Body) -> Result<Body>;

    /// Send a typed request to an address, returning its typed response.
    async fn call<Q>(&self, address: &Url, req: Q) -> Result<Q::Response>
    where
        Q: Request,
    {
        self.send(address, req.into())
            .await
            .and_then(|body| Q::Response::try_from(body).map_err(Into::into))
    }
}
