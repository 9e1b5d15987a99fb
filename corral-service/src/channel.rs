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
    collections::BTreeMap,
    fmt::Debug,
    sync::{Arc, LazyLock, Mutex},
};

use async_trait::async_trait;
use corral_sans_io::Body;
use opentelemetry::{KeyValue, metrics::Counter};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};
use url::Url;

use crate::{Error, METER, Result, Transport};

/// A channel request sender
pub type RequestSender = mpsc::Sender<(Body, oneshot::Sender<Body>)>;

/// A channel request receiver
pub type RequestReceiver = mpsc::Receiver<(Body, oneshot::Sender<Body>)>;

/// A bounded channel for sending and receiving requests
pub fn bounded_channel(buffer: usize) -> (RequestSender, RequestReceiver) {
    mpsc::channel::<(Body, oneshot::Sender<Body>)>(buffer)
}

static CHANNEL_REQUESTS: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("corral_channel_requests")
        .with_description("corral channel requests")
        .build()
});

static CHANNEL_ERRORS: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("corral_channel_errors")
        .with_description("corral channel errors")
        .build()
});

/// Answers a request body with a response body.
#[async_trait]
pub trait Handler: Clone + Send + Sync + 'static {
    type Error: Debug + Send;

    async fn handle(&self, body: Body) -> Result<Body, Self::Error>;
}

/// Serve requests from a [`RequestReceiver`] until cancelled.
///
/// Each request is handled in its own task, so a response that is held
/// back (a join waiting for a rebalance) does not delay other requests.
/// A request that fails is answered by dropping its response sender.
pub async fn serve<H>(handler: H, mut requests: RequestReceiver, cancellation: CancellationToken)
where
    H: Handler,
{
    let mut tasks = JoinSet::new();

    loop {
        tokio::select! {
            Some((body, tx)) = requests.recv() => {
                let attributes = [KeyValue::new("body", body.name())];
                debug!(?body);

                let handler = handler.clone();

                _ = tasks.spawn(async move {
                    match handler.handle(body).await {
                        Ok(response) => {
                            CHANNEL_REQUESTS.add(1, &attributes);

                            if let Err(unsent) = tx.send(response) {
                                debug!(?unsent);
                            }
                        }

                        Err(err) => {
                            CHANNEL_ERRORS.add(1, &attributes);
                            error!(?err);
                        }
                    }
                });
            }

            Some(joined) = tasks.join_next() => {
                if let Err(err) = joined {
                    error!(?err);
                }
            }

            cancelled = cancellation.cancelled() => {
                debug!(?cancelled);
                break;
            }
        }
    }

    tasks.abort_all();
}

/// An in-process [`Transport`] routing each address to a channel.
#[derive(Clone, Debug)]
pub struct ChannelTransport {
    bootstrap: Url,
    routes: Arc<Mutex<BTreeMap<Url, RequestSender>>>,
}

impl ChannelTransport {
    pub fn new(bootstrap: Url) -> Self {
        Self {
            bootstrap,
            routes: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// Deliver requests for an address to a sender.
    pub fn route(self, address: Url, sender: RequestSender) -> Result<Self> {
        _ = self.routes.lock()?.insert(address, sender);
        Ok(self)
    }

    /// Stop delivering requests for an address, subsequent requests fail
    /// with [`Error::UnknownAddress`].
    pub fn unroute(&self, address: &Url) -> Result<Option<RequestSender>> {
        self.routes
            .lock()
            .map(|mut routes| routes.remove(address))
            .map_err(Into::into)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    fn bootstrap(&self) -> Url {
        self.bootstrap.clone()
    }

    async fn send(&self, address: &Url, body: Body) -> Result<Body> {
        let sender = self
            .routes
            .lock()?
            .get(address)
            .cloned()
            .ok_or_else(|| Error::UnknownAddress(address.clone()))?;

        let (resp_tx, resp_rx) = oneshot::channel();

        sender
            .send((body, resp_tx))
            .await
            .map_err(|send_error| Error::UnableToSend(Box::new(send_error.0.0)))?;

        resp_rx.await.map_err(Error::OneshotRecv)
    }
}
