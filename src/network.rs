// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Contract for the message layer that carries protocol envelopes between
//! peers, outside the byte-moving transport. A node's libp2p service
//! implements this against its swarm; tests use a loopback.

use std::sync::Arc;

use async_trait::async_trait;
use libp2p::PeerId;

use crate::errors::Error;
use crate::message::{TransferMessage, TransferRequest, TransferResponse};

#[async_trait]
pub trait DataTransferNetwork: Send + Sync {
    /// Deliver one protocol envelope to a peer.
    async fn send_message(&self, to: PeerId, message: TransferMessage) -> Result<(), Error>;

    /// Mark a connection as protected from pruning, refcounted by tag.
    fn protect(&self, peer: PeerId, tag: String);

    /// Drop a protection tag. Returns whether the tag was present.
    fn unprotect(&self, peer: PeerId, tag: String) -> bool;

    fn set_receiver(&self, receiver: Arc<dyn MessageReceiver>);
}

/// Inbound message callbacks. Implemented by the manager.
#[async_trait]
pub trait MessageReceiver: Send + Sync {
    async fn receive_request(&self, from: PeerId, request: TransferRequest);

    async fn receive_response(&self, from: PeerId, response: TransferResponse);

    /// The network failed to decode or deliver an inbound message.
    async fn receive_error(&self, from: PeerId, reason: String);
}
