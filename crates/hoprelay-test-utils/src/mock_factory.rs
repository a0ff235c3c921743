// SPDX-FileCopyrightText: 2026 Hoprelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Hop client factory handing out one [`MockHop`] pair per forwarding pair.
//!
//! Rebinding a pair to another identity returns the same mocks (the
//! channels do not change), so tests can follow a message across rebinds.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use hoprelay_core::{
    CredentialHandle, ForwardingPair, Hop, HopAdapterFactory, HopAdapters, PairId, RelayError,
};

use crate::mock_hop::MockHop;

/// A recorded `build` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Build {
    pub pair: PairId,
    pub relay_identity: String,
    pub destination_identity: String,
}

#[derive(Default)]
pub struct MockFactory {
    hops: Mutex<HashMap<PairId, (Arc<MockHop>, Arc<MockHop>)>>,
    builds: Mutex<Vec<Build>>,
    refused: Mutex<HashSet<String>>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Relay and destination mocks for `pair`, created on first use.
    pub async fn hops(&self, pair: PairId) -> (Arc<MockHop>, Arc<MockHop>) {
        self.hops
            .lock()
            .await
            .entry(pair)
            .or_insert_with(|| {
                (
                    Arc::new(MockHop::named(Hop::Relay, format!("mock-relay-{pair}"))),
                    Arc::new(MockHop::named(
                        Hop::Destination,
                        format!("mock-destination-{pair}"),
                    )),
                )
            })
            .clone()
    }

    pub async fn relay(&self, pair: PairId) -> Arc<MockHop> {
        self.hops(pair).await.0
    }

    pub async fn destination(&self, pair: PairId) -> Arc<MockHop> {
        self.hops(pair).await.1
    }

    pub async fn builds(&self) -> Vec<Build> {
        self.builds.lock().await.clone()
    }

    /// Fail every build that acts as `identity`.
    pub async fn refuse_identity(&self, identity: &str) {
        self.refused.lock().await.insert(identity.to_string());
    }
}

#[async_trait]
impl HopAdapterFactory for MockFactory {
    async fn build(
        &self,
        pair: &ForwardingPair,
        relay_credential: &CredentialHandle,
        destination_credential: &CredentialHandle,
    ) -> Result<HopAdapters, RelayError> {
        {
            let refused = self.refused.lock().await;
            for identity in [relay_credential.identity(), destination_credential.identity()] {
                if refused.contains(identity) {
                    return Err(RelayError::Authorization {
                        identity: identity.to_string(),
                        message: "session rejected by platform".to_string(),
                    });
                }
            }
        }

        let (relay, destination) = self.hops(pair.id).await;
        relay.set_identity(relay_credential.identity()).await;
        destination
            .set_identity(destination_credential.identity())
            .await;
        self.builds.lock().await.push(Build {
            pair: pair.id,
            relay_identity: relay_credential.identity().to_string(),
            destination_identity: destination_credential.identity().to_string(),
        });

        Ok(HopAdapters {
            relay,
            destination,
            relay_identity: relay_credential.identity().to_string(),
            destination_identity: destination_credential.identity().to_string(),
        })
    }
}
