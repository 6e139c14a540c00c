// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Collection of transfer channels keyed by [`ChannelId`]. The store owns
//! the per-channel state machine, persists committed mutations through an
//! optional key-value [`Store`], and reports every transition to
//! subscribers. Events are delivered after the mutation commits, from a
//! snapshot taken inside the critical section, so subscribers may call back
//! into the store without deadlocking.

mod state;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use ahash::AHashMap;
use cid::Cid;
use libp2p::PeerId;
use log::warn;
use parking_lot::RwLock;

pub use self::state::{ChannelState, Event, EventCode, Status};

use crate::db::Store;
use crate::encoding;
use crate::errors::Error;
use crate::selector::Selector;
use crate::{ChannelId, Voucher, VoucherResult};

/// Callback invoked with every channel event and a state snapshot taken
/// right after the transition committed.
pub type Subscriber = Arc<dyn Fn(&Event, &ChannelState) + Send + Sync>;

/// Handle returned by [`Channels::subscribe`]; passing it back to
/// [`Channels::unsubscribe`] removes the callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub struct Channels {
    channels: RwLock<AHashMap<ChannelId, ChannelState>>,
    subscribers: RwLock<Arc<Vec<(SubscriptionId, Subscriber)>>>,
    next_subscription: AtomicU64,
    store: Option<Arc<dyn Store>>,
}

impl Default for Channels {
    fn default() -> Self {
        Self::new()
    }
}

impl Channels {
    /// In-memory store with no persistence.
    pub fn new() -> Self {
        Channels {
            channels: RwLock::new(AHashMap::new()),
            subscribers: RwLock::new(Arc::new(Vec::new())),
            next_subscription: AtomicU64::new(0),
            store: None,
        }
    }

    /// Store backed by a key-value database; any channels already persisted
    /// under it are reloaded so interrupted transfers can be restarted.
    pub fn with_store(store: Arc<dyn Store>) -> Result<Self, Error> {
        let mut channels = AHashMap::new();
        for key in store.list()? {
            let Some(bz) = store.read(&key)? else {
                continue;
            };
            match encoding::from_slice::<ChannelState>(&bz) {
                Ok(state) => {
                    channels.insert(state.channel_id(), state);
                }
                Err(e) => warn!("skipping undecodable persisted channel: {e}"),
            }
        }
        Ok(Channels {
            channels: RwLock::new(channels),
            subscribers: RwLock::new(Arc::new(Vec::new())),
            next_subscription: AtomicU64::new(0),
            store: Some(store),
        })
    }

    pub fn subscribe(&self, subscriber: Subscriber) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::SeqCst));
        let mut subscribers = self.subscribers.write();
        let mut list = (**subscribers).clone();
        list.push((id, subscriber));
        *subscribers = Arc::new(list);
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        let mut list = (**subscribers).clone();
        let before = list.len();
        list.retain(|(sid, _)| *sid != id);
        let removed = list.len() != before;
        *subscribers = Arc::new(list);
        removed
    }

    /// Creates a channel in `Requested` status and emits `Open`.
    pub fn create_new(
        &self,
        chid: ChannelId,
        base_cid: Cid,
        selector: Selector,
        voucher: Voucher,
        sender: PeerId,
        recipient: PeerId,
    ) -> Result<(), Error> {
        let snapshot = {
            let mut channels = self.channels.write();
            if channels.contains_key(&chid) {
                return Err(Error::ChannelAlreadyExists(chid));
            }
            let state = ChannelState::new(chid, base_cid, selector, voucher, sender, recipient);
            channels.insert(chid, state.clone());
            state
        };
        self.persist(&snapshot);
        self.emit(EventCode::Open, &snapshot);
        Ok(())
    }

    pub fn get_by_id(&self, chid: &ChannelId) -> Result<ChannelState, Error> {
        self.channels
            .read()
            .get(chid)
            .cloned()
            .ok_or(Error::ChannelNotFound(*chid))
    }

    pub fn has_channel(&self, chid: &ChannelId) -> bool {
        self.channels.read().contains_key(chid)
    }

    /// Snapshots of every non-terminal channel.
    pub fn in_progress(&self) -> Vec<ChannelState> {
        self.channels
            .read()
            .values()
            .filter(|state| !state.status().is_terminal())
            .cloned()
            .collect()
    }

    pub fn accept(&self, chid: &ChannelId) -> Result<(), Error> {
        self.mutate(chid, |state| state.accept())
    }

    pub fn error(&self, chid: &ChannelId, reason: String) -> Result<(), Error> {
        self.mutate(chid, move |state| state.error(reason))
    }

    pub fn cancel(&self, chid: &ChannelId) -> Result<(), Error> {
        self.mutate(chid, |state| state.cancel())
    }

    pub fn pause_sender(&self, chid: &ChannelId) -> Result<(), Error> {
        self.mutate(chid, |state| state.pause_sender())
    }

    pub fn resume_sender(&self, chid: &ChannelId) -> Result<(), Error> {
        self.mutate(chid, |state| state.resume_sender())
    }

    pub fn pause_receiver(&self, chid: &ChannelId) -> Result<(), Error> {
        self.mutate(chid, |state| state.pause_receiver())
    }

    pub fn resume_receiver(&self, chid: &ChannelId) -> Result<(), Error> {
        self.mutate(chid, |state| state.resume_receiver())
    }

    pub fn data_sent(&self, chid: &ChannelId, delta: u64) -> Result<(), Error> {
        self.mutate(chid, |state| state.data_sent(delta))
    }

    pub fn data_received(&self, chid: &ChannelId, delta: u64) -> Result<(), Error> {
        self.mutate(chid, |state| state.data_received(delta))
    }

    pub fn set_total_size(&self, chid: &ChannelId, size: u64) -> Result<(), Error> {
        self.mutate(chid, |state| state.set_total_size(size))
    }

    /// Marks the transfer itself finished on the initiating side; yields
    /// `Completed` when the responder already confirmed its end.
    pub fn finish_transfer(&self, chid: &ChannelId) -> Result<(), Error> {
        self.mutate(chid, |state| state.finish_transfer())
    }

    /// Records the responder's confirmation that its side is done.
    pub fn complete_responder(&self, chid: &ChannelId) -> Result<(), Error> {
        self.mutate(chid, |state| state.complete_responder())
    }

    pub fn new_voucher(&self, chid: &ChannelId, voucher: Voucher) -> Result<(), Error> {
        self.mutate(chid, move |state| state.new_voucher(voucher))
    }

    pub fn new_voucher_result(
        &self,
        chid: &ChannelId,
        result: VoucherResult,
    ) -> Result<(), Error> {
        self.mutate(chid, move |state| state.new_voucher_result(result))
    }

    pub fn add_received_cid(&self, chid: &ChannelId, cid: Cid) -> Result<(), Error> {
        self.mutate(chid, move |state| state.add_received_cid(cid))
    }

    pub fn received_cids(&self, chid: &ChannelId) -> Result<Vec<Cid>, Error> {
        Ok(self.get_by_id(chid)?.received_cids().to_vec())
    }

    fn mutate<F>(&self, chid: &ChannelId, transition: F) -> Result<(), Error>
    where
        F: FnOnce(&mut ChannelState) -> Result<Option<EventCode>, Error>,
    {
        let (code, snapshot) = {
            let mut channels = self.channels.write();
            let state = channels
                .get_mut(chid)
                .ok_or(Error::ChannelNotFound(*chid))?;
            let code = transition(state)?;
            (code, state.clone())
        };
        self.persist(&snapshot);
        if let Some(code) = code {
            self.emit(code, &snapshot);
        }
        Ok(())
    }

    fn persist(&self, snapshot: &ChannelState) {
        let Some(store) = &self.store else { return };
        let key = snapshot.channel_id().to_string().into_bytes();
        match encoding::to_vec(snapshot) {
            Ok(bz) => {
                if let Err(e) = store.write(&key, &bz) {
                    warn!("failed to persist channel {}: {e}", snapshot.channel_id());
                }
            }
            Err(e) => warn!("failed to encode channel {}: {e}", snapshot.channel_id()),
        }
    }

    fn emit(&self, code: EventCode, snapshot: &ChannelState) {
        let event = Event {
            code,
            message: snapshot.message().to_owned(),
            timestamp: SystemTime::now(),
        };
        let subscribers = self.subscribers.read().clone();
        for (_, subscriber) in subscribers.iter() {
            subscriber(&event, snapshot);
        }
    }
}
