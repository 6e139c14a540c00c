// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! In-memory transport and network doubles wiring two managers together,
//! plus scriptable validators, for end to end protocol tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use cid::Cid;
use libp2p::PeerId;
use parking_lot::Mutex;

use forest_data_transfer::channels::{Channels, EventCode};
use forest_data_transfer::db::MemoryDB;
use forest_data_transfer::message::TransferMessage;
use forest_data_transfer::network::{DataTransferNetwork, MessageReceiver};
use forest_data_transfer::registry::Registry;
use forest_data_transfer::transport::{Transport, TransportEvents};
use forest_data_transfer::{
    ChannelId, DataTransfer, Error, RequestValidator, Revalidator, Selector, Validation,
    Voucher,
};

/// Routes transport traffic between the fake transports of a test.
#[derive(Default)]
pub struct TransportHub {
    handlers: Mutex<HashMap<PeerId, Arc<dyn TransportEvents>>>,
    /// Peers on each side of an opened channel.
    channel_ends: Mutex<HashMap<ChannelId, (PeerId, PeerId)>>,
}

impl TransportHub {
    pub fn handler_of(&self, peer: PeerId) -> Arc<dyn TransportEvents> {
        self.handlers
            .lock()
            .get(&peer)
            .cloned()
            .expect("peer has a registered transport handler")
    }

    fn remote_of(&self, owner: PeerId, chid: ChannelId) -> Option<PeerId> {
        let ends = self.channel_ends.lock();
        let (a, b) = ends.get(&chid)?;
        if *a == owner {
            Some(*b)
        } else {
            Some(*a)
        }
    }

    async fn deliver(&self, from: PeerId, to: PeerId, chid: ChannelId, msg: TransferMessage) {
        let Some(handler) = self.handlers.lock().get(&to).cloned() else {
            return;
        };
        if let Some(request) = msg.request {
            match handler.on_request_received(chid, request).await {
                Ok(Some(response)) => {
                    let back = self.handlers.lock().get(&from).cloned();
                    if let Some(back) = back {
                        back.on_response_received(chid, response).await;
                    }
                }
                Ok(None) => {}
                Err(e) => eprintln!("transport request handling failed: {e}"),
            }
        } else if let Some(response) = msg.response {
            handler.on_response_received(chid, response).await;
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum TransportCall {
    Open {
        dial_to: PeerId,
        chid: ChannelId,
        already_have: Vec<Cid>,
    },
    Restart(ChannelId),
    Pause(ChannelId),
    Resume(ChannelId),
    Close(ChannelId),
}

pub struct FakeTransport {
    owner: PeerId,
    hub: Arc<TransportHub>,
    pub calls: Mutex<Vec<TransportCall>>,
}

impl FakeTransport {
    pub fn new(owner: PeerId, hub: Arc<TransportHub>) -> Arc<Self> {
        Arc::new(FakeTransport {
            owner,
            hub,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn open_calls(&self) -> Vec<TransportCall> {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, TransportCall::Open { .. }))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn open_channel(
        &self,
        dial_to: PeerId,
        chid: ChannelId,
        _root: Cid,
        _selector: Selector,
        already_have: Vec<Cid>,
        initial: TransferMessage,
    ) -> Result<(), Error> {
        self.calls.lock().push(TransportCall::Open {
            dial_to,
            chid,
            already_have,
        });
        self.hub
            .channel_ends
            .lock()
            .insert(chid, (self.owner, dial_to));
        self.hub.deliver(self.owner, dial_to, chid, initial).await;
        Ok(())
    }

    async fn restart_channel(
        &self,
        chid: ChannelId,
        initial: TransferMessage,
    ) -> Result<(), Error> {
        self.calls.lock().push(TransportCall::Restart(chid));
        let to = self
            .hub
            .remote_of(self.owner, chid)
            .unwrap_or(chid.initiator);
        self.hub.deliver(self.owner, to, chid, initial).await;
        Ok(())
    }

    async fn pause_channel(&self, chid: ChannelId) -> Result<(), Error> {
        self.calls.lock().push(TransportCall::Pause(chid));
        Ok(())
    }

    async fn resume_channel(
        &self,
        chid: ChannelId,
        trailing: Option<TransferMessage>,
    ) -> Result<(), Error> {
        self.calls.lock().push(TransportCall::Resume(chid));
        if let Some(msg) = trailing {
            if let Some(to) = self.hub.remote_of(self.owner, chid) {
                self.hub.deliver(self.owner, to, chid, msg).await;
            }
        }
        Ok(())
    }

    async fn close_channel(&self, chid: ChannelId) -> Result<(), Error> {
        self.calls.lock().push(TransportCall::Close(chid));
        Ok(())
    }

    fn set_event_handler(&self, handler: Arc<dyn TransportEvents>) {
        self.hub.handlers.lock().insert(self.owner, handler);
    }
}

/// Routes protocol envelopes between the fake networks of a test.
#[derive(Default)]
pub struct NetworkHub {
    receivers: Mutex<HashMap<PeerId, Arc<dyn MessageReceiver>>>,
}

impl NetworkHub {
    pub fn receiver_of(&self, peer: PeerId) -> Arc<dyn MessageReceiver> {
        self.receivers
            .lock()
            .get(&peer)
            .cloned()
            .expect("peer has a registered message receiver")
    }
}

pub struct FakeNetwork {
    owner: PeerId,
    hub: Arc<NetworkHub>,
    pub protected: Mutex<HashSet<(PeerId, String)>>,
    pub fail_sends: AtomicBool,
    pub sent: Mutex<Vec<(PeerId, TransferMessage)>>,
}

impl FakeNetwork {
    pub fn new(owner: PeerId, hub: Arc<NetworkHub>) -> Arc<Self> {
        Arc::new(FakeNetwork {
            owner,
            hub,
            protected: Mutex::new(HashSet::new()),
            fail_sends: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn protect_count(&self) -> usize {
        self.protected.lock().len()
    }
}

#[async_trait]
impl DataTransferNetwork for FakeNetwork {
    async fn send_message(&self, to: PeerId, message: TransferMessage) -> Result<(), Error> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(Error::Network("simulated send failure".into()));
        }
        self.sent.lock().push((to, message.clone()));
        let Some(receiver) = self.hub.receivers.lock().get(&to).cloned() else {
            return Err(Error::Network(format!("no route to peer {to}")));
        };
        if let Some(request) = message.request {
            receiver.receive_request(self.owner, request).await;
        } else if let Some(response) = message.response {
            receiver.receive_response(self.owner, response).await;
        }
        Ok(())
    }

    fn protect(&self, peer: PeerId, tag: String) {
        self.protected.lock().insert((peer, tag));
    }

    fn unprotect(&self, peer: PeerId, tag: String) -> bool {
        self.protected.lock().remove(&(peer, tag))
    }

    fn set_receiver(&self, receiver: Arc<dyn MessageReceiver>) {
        self.hub.receivers.lock().insert(self.owner, receiver);
    }
}

/// Validator scripted per test: accept with a canned result, pause, or
/// reject.
#[derive(Default)]
pub struct StubValidator {
    pub validation: Mutex<Option<Validation>>,
    pub reject: AtomicBool,
    pub seen: Mutex<Vec<Voucher>>,
}

impl StubValidator {
    pub fn accepting() -> Arc<Self> {
        Arc::new(StubValidator::default())
    }

    pub fn with(validation: Validation) -> Arc<Self> {
        Arc::new(StubValidator {
            validation: Mutex::new(Some(validation)),
            ..Default::default()
        })
    }

    fn validate(&self, voucher: &Voucher) -> Result<Validation, Error> {
        self.seen.lock().push(voucher.clone());
        if self.reject.load(Ordering::SeqCst) {
            return Err(Error::ValidationFailure("rejected by test".into()));
        }
        Ok(self
            .validation
            .lock()
            .clone()
            .unwrap_or_else(|| Validation::accept(None)))
    }
}

impl RequestValidator for StubValidator {
    fn validate_push(
        &self,
        _other: PeerId,
        voucher: &Voucher,
        _base_cid: &Cid,
        _selector: &Selector,
    ) -> Result<Validation, Error> {
        self.validate(voucher)
    }

    fn validate_pull(
        &self,
        _other: PeerId,
        voucher: &Voucher,
        _base_cid: &Cid,
        _selector: &Selector,
    ) -> Result<Validation, Error> {
        self.validate(voucher)
    }
}

/// Revalidator scripted with a queue of reactions to data progress and a
/// canned response to fresh vouchers.
#[derive(Default)]
pub struct StubRevalidator {
    pub on_progress: Mutex<VecDeque<Option<Validation>>>,
    pub on_voucher: Mutex<Option<Validation>>,
    pub on_complete_result: Mutex<Option<Validation>>,
}

impl StubRevalidator {
    fn next_progress(&self) -> Result<Option<Validation>, Error> {
        Ok(self.on_progress.lock().pop_front().flatten())
    }
}

impl Revalidator for StubRevalidator {
    fn revalidate(&self, _chid: &ChannelId, _voucher: &Voucher) -> Result<Validation, Error> {
        Ok(self
            .on_voucher
            .lock()
            .clone()
            .unwrap_or_else(|| Validation::accept(None)))
    }

    fn on_pull_data_sent(
        &self,
        _chid: &ChannelId,
        _additional_sent: u64,
    ) -> Result<Option<Validation>, Error> {
        self.next_progress()
    }

    fn on_push_data_received(
        &self,
        _chid: &ChannelId,
        _additional_received: u64,
    ) -> Result<Option<Validation>, Error> {
        self.next_progress()
    }

    fn on_complete(&self, _chid: &ChannelId) -> Result<Option<Validation>, Error> {
        Ok(self.on_complete_result.lock().clone())
    }
}

/// One peer under test: a manager with fake collaborators and an event log.
pub struct Peer {
    pub manager: Arc<DataTransfer>,
    pub transport: Arc<FakeTransport>,
    pub network: Arc<FakeNetwork>,
    pub channels: Arc<Channels>,
    pub events: Arc<Mutex<Vec<EventCode>>>,
    pub db: Arc<MemoryDB>,
}

impl Peer {
    pub fn id(&self) -> PeerId {
        self.manager.peer_id()
    }

    pub fn clear_events(&self) {
        self.events.lock().clear()
    }
}

pub struct Harness {
    pub transport_hub: Arc<TransportHub>,
    pub network_hub: Arc<NetworkHub>,
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

impl Harness {
    pub fn new() -> Self {
        Harness {
            transport_hub: Arc::new(TransportHub::default()),
            network_hub: Arc::new(NetworkHub::default()),
        }
    }

    pub async fn make_peer(&self) -> Peer {
        self.make_peer_with(PeerId::random(), Arc::new(MemoryDB::default()))
            .await
    }

    /// Builds (or rebuilds, simulating a process restart) a peer with a
    /// fixed identity and backing database.
    pub async fn make_peer_with(&self, peer_id: PeerId, db: Arc<MemoryDB>) -> Peer {
        let transport = FakeTransport::new(peer_id, self.transport_hub.clone());
        let network = FakeNetwork::new(peer_id, self.network_hub.clone());
        let channels =
            Arc::new(Channels::with_store(db.clone()).expect("memory store always loads"));
        let registry = Arc::new(Registry::new());
        let manager = DataTransfer::new(
            peer_id,
            transport.clone(),
            network.clone(),
            registry,
            channels.clone(),
        );
        let events: Arc<Mutex<Vec<EventCode>>> = Arc::default();
        let sink = events.clone();
        manager.subscribe(Arc::new(move |event, _| sink.lock().push(event.code)));
        manager.start().await.expect("manager starts");
        Peer {
            manager,
            transport,
            network,
            channels,
            events,
            db,
        }
    }
}

pub fn test_cid(data: &[u8]) -> Cid {
    use multihash::{Code, MultihashDigest};
    Cid::new_v1(0x71, Code::Blake2b256.digest(data))
}
