// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! The data transfer manager. Maps local application calls and inbound
//! protocol messages onto channel state mutations, runs voucher validation
//! and revalidation through the registry, and drives the transport and
//! network layers. All entry points are re-entrant; channel state is the
//! only shared mutable state and lives behind the channel store's lock.

mod restart;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use cid::Cid;
use libp2p::PeerId;
use log::{debug, info, warn};

use crate::channels::{ChannelState, Channels, Status, Subscriber, SubscriptionId};
use crate::errors::Error;
use crate::message::{self, TransferMessage, TransferRequest, TransferResponse};
use crate::network::{DataTransferNetwork, MessageReceiver};
use crate::registry::Registry;
use crate::selector::Selector;
use crate::transport::{Transport, TransportEvents};
use crate::{ChannelId, Validation, ValidationOutcome, Voucher, VoucherResult};

pub struct DataTransfer {
    peer_id: PeerId,
    transport: Arc<dyn Transport>,
    network: Arc<dyn DataTransferNetwork>,
    registry: Arc<Registry>,
    channels: Arc<Channels>,
    next_transfer_id: AtomicU64,
}

impl DataTransfer {
    pub fn new(
        peer_id: PeerId,
        transport: Arc<dyn Transport>,
        network: Arc<dyn DataTransferNetwork>,
        registry: Arc<Registry>,
        channels: Arc<Channels>,
    ) -> Arc<Self> {
        // Seed transfer IDs from the clock so IDs stay unique across
        // process restarts of the same peer.
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(1);
        Arc::new(DataTransfer {
            peer_id,
            transport,
            network,
            registry,
            channels,
            next_transfer_id: AtomicU64::new(seed),
        })
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Registers this manager with its transport and network, then walks
    /// any channels that survived a previous process and initiates their
    /// restart according to this peer's role on each.
    pub async fn start(self: &Arc<Self>) -> Result<(), Error> {
        self.transport
            .set_event_handler(self.clone() as Arc<dyn TransportEvents>);
        self.network
            .set_receiver(self.clone() as Arc<dyn MessageReceiver>);

        for channel in self.channels.in_progress() {
            let chid = channel.channel_id();
            info!("restarting interrupted data transfer channel {chid}");
            if let Err(e) = self.restart_channel_by_role(&channel).await {
                warn!("unable to restart channel {chid}: {e}");
            }
        }
        Ok(())
    }

    /// Closes every non-terminal channel and releases its connection
    /// protection.
    pub async fn stop(&self) -> Result<(), Error> {
        for channel in self.channels.in_progress() {
            let chid = channel.channel_id();
            if let Err(e) = self.transport.close_channel(chid).await {
                debug!("error closing transport channel {chid} on shutdown: {e}");
            }
            if self.channels.cancel(&chid).is_ok() {
                self.release_channel(&channel);
            }
        }
        Ok(())
    }

    pub fn subscribe(&self, subscriber: Subscriber) -> SubscriptionId {
        self.channels.subscribe(subscriber)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.channels.unsubscribe(id)
    }

    /// Opens a channel that pushes data from this peer to `to`, returning
    /// its ID once the opening request is on the wire.
    pub async fn open_push_data_channel(
        &self,
        to: PeerId,
        voucher: Voucher,
        base_cid: Cid,
        selector: Selector,
    ) -> Result<ChannelId, Error> {
        self.registry.validator(&voucher.type_identifier)?;
        let id = self.next_transfer_id();
        let chid = ChannelId::new(self.peer_id, id);
        let request = message::new_request(id, false, false, &voucher, base_cid, &selector)?;

        self.channels
            .create_new(chid, base_cid, selector, voucher.clone(), self.peer_id, to)?;
        self.configure_transport(&chid, &voucher);
        self.network.protect(to, chid.to_string());
        if let Err(e) = self.network.send_message(to, request.into()).await {
            self.fail_channel(&chid, format!("unable to send request: {e}"))
                .await;
            return Err(e);
        }
        Ok(chid)
    }

    /// Opens a channel that pulls data from `to` to this peer. The opening
    /// request rides the transport's first message.
    pub async fn open_pull_data_channel(
        &self,
        to: PeerId,
        voucher: Voucher,
        base_cid: Cid,
        selector: Selector,
    ) -> Result<ChannelId, Error> {
        self.registry.validator(&voucher.type_identifier)?;
        let id = self.next_transfer_id();
        let chid = ChannelId::new(self.peer_id, id);
        let request = message::new_request(id, false, true, &voucher, base_cid, &selector)?;

        self.channels
            .create_new(chid, base_cid, selector.clone(), voucher.clone(), to, self.peer_id)?;
        self.configure_transport(&chid, &voucher);
        self.network.protect(to, chid.to_string());
        if let Err(e) = self
            .transport
            .open_channel(to, chid, base_cid, selector, Vec::new(), request.into())
            .await
        {
            self.fail_channel(&chid, format!("unable to open pull channel: {e}"))
                .await;
            return Err(e);
        }
        Ok(chid)
    }

    /// Sends a fresh voucher for an in-progress transfer, typically in
    /// answer to a revalidation prompt. Only the initiator holds vouchers.
    pub async fn send_voucher(&self, chid: ChannelId, voucher: Voucher) -> Result<(), Error> {
        if chid.initiator != self.peer_id {
            return Err(Error::Other(
                "only the initiating peer can send a voucher".into(),
            ));
        }
        let state = self.channels.get_by_id(&chid)?;
        if state.status().is_terminal() {
            return Err(Error::AlreadyTerminated(chid));
        }
        self.channels.new_voucher(&chid, voucher.clone())?;
        let request = message::update_request(chid.id, false, Some(&voucher));
        self.network
            .send_message(state.other_party(self.peer_id), request.into())
            .await
    }

    /// Sends an additional voucher result on an in-progress transfer. Only
    /// the responder issues results.
    pub async fn send_voucher_result(
        &self,
        chid: ChannelId,
        result: VoucherResult,
    ) -> Result<(), Error> {
        if chid.initiator == self.peer_id {
            return Err(Error::Other(
                "only the responding peer can send a voucher result".into(),
            ));
        }
        let state = self.channels.get_by_id(&chid)?;
        if state.status().is_terminal() {
            return Err(Error::AlreadyTerminated(chid));
        }
        self.channels.new_voucher_result(&chid, result.clone())?;
        let paused = self.local_role_paused(&state);
        let response = message::new_response(chid.id, true, paused, Some(&result));
        self.network
            .send_message(state.other_party(self.peer_id), response.into())
            .await
    }

    /// Pauses this peer's side of a channel and tells the counterparty.
    pub async fn pause_data_transfer_channel(&self, chid: ChannelId) -> Result<(), Error> {
        let state = self.channels.get_by_id(&chid)?;
        self.transport.pause_channel(chid).await?;
        self.pause_local(&state)?;
        let message = self.pause_message(&chid, true);
        self.network
            .send_message(state.other_party(self.peer_id), message)
            .await
    }

    /// Resumes this peer's side of a channel; the resume notice rides the
    /// transport's first frame after resumption.
    pub async fn resume_data_transfer_channel(&self, chid: ChannelId) -> Result<(), Error> {
        let state = self.channels.get_by_id(&chid)?;
        self.resume_local(&state)?;
        let message = self.pause_message(&chid, false);
        self.transport.resume_channel(chid, Some(message)).await
    }

    /// Cancels a channel from either side: closes the transport, marks the
    /// channel `Cancelled` and notifies the counterparty.
    pub async fn close_data_transfer_channel(&self, chid: ChannelId) -> Result<(), Error> {
        let state = self.channels.get_by_id(&chid)?;
        if let Err(e) = self.transport.close_channel(chid).await {
            debug!("error closing transport channel {chid}: {e}");
        }
        self.channels.cancel(&chid)?;
        self.release_channel(&state);
        let message: TransferMessage = if chid.initiator == self.peer_id {
            message::cancel_request(chid.id).into()
        } else {
            message::cancel_response(chid.id).into()
        };
        self.network
            .send_message(state.other_party(self.peer_id), message)
            .await
    }

    /// Initiates the restart handshake for an interrupted channel, in
    /// whichever direction this peer's role requires.
    pub async fn restart_data_transfer_channel(&self, chid: ChannelId) -> Result<(), Error> {
        let channel = self.channels.get_by_id(&chid)?;
        self.restart_channel_by_role(&channel).await
    }

    /// Status of a channel, or `ChannelNotFoundError` when it is unknown.
    pub fn transfer_channel_status(&self, chid: ChannelId) -> Status {
        self.channels
            .get_by_id(&chid)
            .map(|state| state.status())
            .unwrap_or(Status::ChannelNotFoundError)
    }

    pub fn in_progress_channels(&self) -> Vec<ChannelState> {
        self.channels.in_progress()
    }

    pub fn channel_state(&self, chid: ChannelId) -> Result<ChannelState, Error> {
        self.channels.get_by_id(&chid)
    }

    fn next_transfer_id(&self) -> u64 {
        self.next_transfer_id.fetch_add(1, Ordering::SeqCst)
    }

    pub(crate) fn configure_transport(&self, chid: &ChannelId, voucher: &Voucher) {
        if let Some(configurer) = self.registry.configurer(&voucher.type_identifier) {
            configurer(chid, voucher, &*self.transport);
        }
    }

    /// Drops the connection protection taken when the channel became live.
    fn release_channel(&self, state: &ChannelState) {
        let chid = state.channel_id();
        self.network
            .unprotect(state.other_party(self.peer_id), chid.to_string());
    }

    /// Fails a channel and performs terminal cleanup exactly once.
    pub(crate) async fn fail_channel(&self, chid: &ChannelId, reason: String) {
        warn!("data transfer channel {chid} failed: {reason}");
        if self.channels.error(chid, reason).is_ok() {
            if let Err(e) = self.transport.close_channel(*chid).await {
                debug!("error closing transport channel {chid}: {e}");
            }
            if let Ok(state) = self.channels.get_by_id(chid) {
                self.release_channel(&state);
            }
        }
    }

    /// Releases protection if the given mutation just made the channel
    /// `Completed`.
    fn release_if_completed(&self, chid: &ChannelId) {
        if let Ok(state) = self.channels.get_by_id(chid) {
            if state.status() == Status::Completed {
                self.release_channel(&state);
            }
        }
    }

    fn local_role_paused(&self, state: &ChannelState) -> bool {
        if state.sender() == self.peer_id {
            state.status().sender_paused()
        } else {
            state.status().receiver_paused()
        }
    }

    /// Pauses this peer's role on the channel.
    fn pause_local(&self, state: &ChannelState) -> Result<(), Error> {
        let chid = state.channel_id();
        if state.sender() == self.peer_id {
            self.channels.pause_sender(&chid)
        } else {
            self.channels.pause_receiver(&chid)
        }
    }

    fn resume_local(&self, state: &ChannelState) -> Result<(), Error> {
        let chid = state.channel_id();
        if state.sender() == self.peer_id {
            self.channels.resume_sender(&chid)
        } else {
            self.channels.resume_receiver(&chid)
        }
    }

    /// Pauses the counterparty's role on the channel, on notice from them.
    fn pause_other(&self, state: &ChannelState) -> Result<(), Error> {
        let chid = state.channel_id();
        if state.sender() == self.peer_id {
            self.channels.pause_receiver(&chid)
        } else {
            self.channels.pause_sender(&chid)
        }
    }

    fn resume_other(&self, state: &ChannelState) -> Result<(), Error> {
        let chid = state.channel_id();
        if state.sender() == self.peer_id {
            self.channels.resume_receiver(&chid)
        } else {
            self.channels.resume_sender(&chid)
        }
    }

    fn pause_message(&self, chid: &ChannelId, paused: bool) -> TransferMessage {
        if chid.initiator == self.peer_id {
            message::update_request(chid.id, paused, None).into()
        } else {
            message::new_response(chid.id, true, paused, None).into()
        }
    }

    /// Decodes and validates the voucher on a new request.
    pub(crate) fn validate_voucher(
        &self,
        other: PeerId,
        is_pull: bool,
        voucher: &Voucher,
        base_cid: &Cid,
        selector: &Selector,
    ) -> Result<Validation, Error> {
        self.registry.decode_voucher(voucher)?;
        let validator = self.registry.validator(&voucher.type_identifier)?;
        if is_pull {
            validator.validate_pull(other, voucher, base_cid, selector)
        } else {
            validator.validate_push(other, voucher, base_cid, selector)
        }
    }

    /// Routes one inbound request to its handler, returning the response
    /// to deliver back, if any.
    async fn process_request(
        &self,
        from: PeerId,
        request: TransferRequest,
    ) -> Result<Option<TransferResponse>, Error> {
        if let Some(restart_chid) = request.restart_channel {
            self.receive_restart_trigger(from, restart_chid).await?;
            return Ok(None);
        }
        // All other requests originate from the channel's initiator.
        let chid = ChannelId::new(from, request.transfer_id);
        if request.is_restart {
            return self.receive_restart_request(from, chid, request).await;
        }
        if request.canceled {
            self.receive_cancel(chid).await;
            return Ok(None);
        }
        if request.complete {
            self.channels.finish_transfer(&chid)?;
            self.release_if_completed(&chid);
            return Ok(None);
        }
        if request.update {
            return self.receive_update_request(chid, request).await;
        }
        self.receive_new_request(from, chid, request).await
    }

    /// Handles a request to open a new channel: validates the voucher,
    /// creates the channel and answers with acceptance or rejection. For a
    /// push the acceptance rides the transport channel this peer opens to
    /// start the bytes moving; for a pull it returns to ride the transport
    /// that delivered the request.
    async fn receive_new_request(
        &self,
        from: PeerId,
        chid: ChannelId,
        request: TransferRequest,
    ) -> Result<Option<TransferResponse>, Error> {
        let validation = match self.accept_request(from, chid, &request) {
            Ok(validation) => validation,
            Err(e) => {
                info!("rejecting data transfer request {chid}: {e}");
                return Ok(Some(message::new_response(chid.id, false, false, None)));
            }
        };
        let paused = validation.outcome == ValidationOutcome::Pause;
        let response = message::new_response(
            chid.id,
            true,
            paused,
            validation.voucher_result.as_ref(),
        );
        if request.pull {
            return Ok(Some(response));
        }
        // We are the receiving end of a push; open the transport toward the
        // initiator with our acceptance riding the opening message.
        let base_cid = request.base_cid.unwrap_or_default();
        let selector = request.selector()?;
        if let Err(e) = self
            .transport
            .open_channel(from, chid, base_cid, selector, Vec::new(), response.into())
            .await
        {
            self.fail_channel(&chid, format!("unable to open push channel: {e}"))
                .await;
            return Err(e);
        }
        Ok(None)
    }

    fn accept_request(
        &self,
        from: PeerId,
        chid: ChannelId,
        request: &TransferRequest,
    ) -> Result<Validation, Error> {
        let base_cid = request.base_cid.ok_or(Error::EmptyBaseCid)?;
        let selector = request.selector()?;
        let voucher = request
            .voucher()
            .ok_or_else(|| Error::ValidationFailure("request carries no voucher".into()))?;

        let validation = self.validate_voucher(from, request.pull, &voucher, &base_cid, &selector)?;
        if validation.outcome == ValidationOutcome::RetryValidation {
            return Err(Error::ValidationFailure(
                "retry is only valid during revalidation".into(),
            ));
        }

        let (sender, recipient) = if request.pull {
            (self.peer_id, from)
        } else {
            (from, self.peer_id)
        };
        self.channels
            .create_new(chid, base_cid, selector, voucher.clone(), sender, recipient)?;
        self.channels.accept(&chid)?;
        self.network.protect(from, chid.to_string());
        self.configure_transport(&chid, &voucher);

        if let Some(result) = &validation.voucher_result {
            self.channels.new_voucher_result(&chid, result.clone())?;
        }
        if validation.outcome == ValidationOutcome::Pause {
            if let Ok(state) = self.channels.get_by_id(&chid) {
                self.pause_local(&state)?;
            }
        }
        Ok(validation)
    }

    /// Handles pause/resume notices and fresh vouchers for an existing
    /// channel.
    async fn receive_update_request(
        &self,
        chid: ChannelId,
        request: TransferRequest,
    ) -> Result<Option<TransferResponse>, Error> {
        let state = self.channels.get_by_id(&chid)?;
        if request.paused {
            self.pause_other(&state)?;
        }

        let Some(voucher) = request.voucher() else {
            if !request.paused {
                self.resume_other(&state)?;
            }
            return Ok(None);
        };

        self.channels.new_voucher(&chid, voucher.clone())?;
        match self.revalidate_voucher(&chid, &voucher) {
            Ok(validation) => Ok(self.apply_revalidation(&chid, validation).await?),
            Err(e) => {
                self.fail_channel(&chid, format!("revalidation failed: {e}"))
                    .await;
                Ok(Some(message::new_response(chid.id, false, false, None)))
            }
        }
    }

    fn revalidate_voucher(&self, chid: &ChannelId, voucher: &Voucher) -> Result<Validation, Error> {
        self.registry.decode_voucher(voucher)?;
        let revalidator = self
            .registry
            .revalidator(&voucher.type_identifier)
            .ok_or_else(|| Error::UnknownVoucherType(voucher.type_identifier.clone()))?;
        revalidator.revalidate(chid, voucher)
    }

    /// Applies a (re)validation outcome on the responding side: records the
    /// result, adjusts pause state and the transport, and produces the
    /// response to relay.
    async fn apply_revalidation(
        &self,
        chid: &ChannelId,
        validation: Validation,
    ) -> Result<Option<TransferResponse>, Error> {
        let state = self.channels.get_by_id(chid)?;
        if let Some(result) = &validation.voucher_result {
            self.channels.new_voucher_result(chid, result.clone())?;
        }
        let result = validation.voucher_result.as_ref();
        match validation.outcome {
            ValidationOutcome::Accept => {
                self.resume_local(&state)?;
                let response = message::new_response(chid.id, true, false, result);
                self.transport.resume_channel(*chid, None).await?;
                Ok(Some(response))
            }
            ValidationOutcome::Pause => {
                self.pause_local(&state)?;
                self.transport.pause_channel(*chid).await?;
                Ok(Some(message::new_response(chid.id, true, true, result)))
            }
            ValidationOutcome::RetryValidation => {
                self.pause_local(&state)?;
                self.transport.pause_channel(*chid).await?;
                Ok(Some(message::voucher_request_response(
                    chid.id, true, result,
                )))
            }
        }
    }

    async fn receive_cancel(&self, chid: ChannelId) {
        let state = self.channels.get_by_id(&chid).ok();
        match self.channels.cancel(&chid) {
            Ok(()) => {
                if let Err(e) = self.transport.close_channel(chid).await {
                    debug!("error closing transport channel {chid}: {e}");
                }
                if let Some(state) = state {
                    self.release_channel(&state);
                }
            }
            Err(e) => debug!("ignoring cancel for channel {chid}: {e}"),
        }
    }

    /// Routes one inbound response to its effect on the initiator-side
    /// channel.
    async fn process_response(
        &self,
        chid: ChannelId,
        response: TransferResponse,
    ) -> Result<(), Error> {
        if response.canceled {
            self.receive_cancel(chid).await;
            return Ok(());
        }
        if !response.accepted {
            self.fail_channel(&chid, "request rejected by counterparty".into())
                .await;
            return Ok(());
        }

        let state = self.channels.get_by_id(&chid)?;
        if state.status() == Status::Requested {
            self.channels.accept(&chid)?;
        }
        if let Some(result) = response.voucher_result() {
            self.channels.new_voucher_result(&chid, result)?;
        }

        if response.complete {
            self.channels.complete_responder(&chid)?;
            if response.paused {
                self.channels.pause_receiver(&chid)?;
            }
            self.release_if_completed(&chid);
            return Ok(());
        }

        if response.voucher_request {
            // The responder wants a fresh voucher; the application will
            // answer through send_voucher. Honor any pause riding along.
            if response.paused {
                self.pause_other(&state)?;
            }
            return Ok(());
        }

        if response.paused {
            self.pause_other(&state)?;
        } else {
            self.resume_other(&state)?;
        }
        Ok(())
    }
}

#[async_trait]
impl MessageReceiver for DataTransfer {
    async fn receive_request(&self, from: PeerId, request: TransferRequest) {
        match self.process_request(from, request).await {
            Ok(Some(response)) => {
                if let Err(e) = self.network.send_message(from, response.into()).await {
                    warn!("unable to respond to data transfer request from {from}: {e}");
                }
            }
            Ok(None) => {}
            Err(e) => debug!("error processing data transfer request from {from}: {e}"),
        }
    }

    async fn receive_response(&self, from: PeerId, response: TransferResponse) {
        // Responses address channels this peer initiated.
        let chid = ChannelId::new(self.peer_id, response.transfer_id);
        if let Err(e) = self.process_response(chid, response).await {
            debug!("error processing data transfer response from {from}: {e}");
        }
    }

    async fn receive_error(&self, from: PeerId, reason: String) {
        warn!("received data transfer network error from {from}: {reason}");
    }
}

#[async_trait]
impl TransportEvents for DataTransfer {
    async fn on_request_received(
        &self,
        chid: ChannelId,
        request: TransferRequest,
    ) -> Result<Option<TransferResponse>, Error> {
        self.process_request(chid.initiator, request).await
    }

    async fn on_response_received(&self, chid: ChannelId, response: TransferResponse) {
        if let Err(e) = self.process_response(chid, response).await {
            debug!("error processing transport response on {chid}: {e}");
        }
    }

    async fn on_data_sent(&self, chid: ChannelId, additional_sent: u64) {
        if let Err(e) = self.channels.data_sent(&chid, additional_sent) {
            debug!("dropping progress for channel {chid}: {e}");
            return;
        }
        // Mid-flight revalidation hook for the responder of a pull.
        let Ok(state) = self.channels.get_by_id(&chid) else {
            return;
        };
        if chid.initiator == self.peer_id || !state.is_pull() {
            return;
        }
        let Some(revalidator) = self.registry.revalidator(&state.voucher().type_identifier)
        else {
            return;
        };
        match revalidator.on_pull_data_sent(&chid, additional_sent) {
            Ok(Some(validation)) => self.relay_revalidation(&chid, validation).await,
            Ok(None) => {}
            Err(e) => {
                self.fail_channel(&chid, format!("revalidation failed: {e}"))
                    .await
            }
        }
    }

    async fn on_data_received(&self, chid: ChannelId, block: Cid, additional_received: u64) {
        if let Err(e) = self.channels.data_received(&chid, additional_received) {
            debug!("dropping progress for channel {chid}: {e}");
            return;
        }
        if let Err(e) = self.channels.add_received_cid(&chid, block) {
            debug!("dropping received cid for channel {chid}: {e}");
        }
        // Mid-flight revalidation hook for the responder of a push.
        let Ok(state) = self.channels.get_by_id(&chid) else {
            return;
        };
        if chid.initiator == self.peer_id || state.is_pull() {
            return;
        }
        let Some(revalidator) = self.registry.revalidator(&state.voucher().type_identifier)
        else {
            return;
        };
        match revalidator.on_push_data_received(&chid, additional_received) {
            Ok(Some(validation)) => self.relay_revalidation(&chid, validation).await,
            Ok(None) => {}
            Err(e) => {
                self.fail_channel(&chid, format!("revalidation failed: {e}"))
                    .await
            }
        }
    }

    async fn on_total_size(&self, chid: ChannelId, size: u64) {
        if let Err(e) = self.channels.set_total_size(&chid, size) {
            debug!("dropping total size for channel {chid}: {e}");
        }
    }

    async fn on_channel_completed(&self, chid: ChannelId, success: bool) {
        if !success {
            self.fail_channel(&chid, "transport reported failed transfer".into())
                .await;
            return;
        }
        let Ok(state) = self.channels.get_by_id(&chid) else {
            warn!("transport completed unknown channel {chid}");
            return;
        };
        let other = state.other_party(self.peer_id);

        if chid.initiator == self.peer_id {
            // Our side of the transfer is done; tell the responder.
            if let Err(e) = self
                .network
                .send_message(other, message::complete_request(chid.id).into())
                .await
            {
                self.fail_channel(&chid, format!("unable to send completion: {e}"))
                    .await;
                return;
            }
            if let Err(e) = self.channels.finish_transfer(&chid) {
                debug!("unable to finish channel {chid}: {e}");
            }
        } else {
            // Responder side: surface a final voucher result if the
            // revalidator supplies one, then confirm completion.
            let mut result = None;
            if let Some(revalidator) = self.registry.revalidator(&state.voucher().type_identifier)
            {
                match revalidator.on_complete(&chid) {
                    Ok(validation) => result = validation.and_then(|v| v.voucher_result),
                    Err(e) => {
                        self.fail_channel(&chid, format!("completion rejected: {e}"))
                            .await;
                        return;
                    }
                }
            }
            if let Some(result) = &result {
                if let Err(e) = self.channels.new_voucher_result(&chid, result.clone()) {
                    debug!("unable to record voucher result on {chid}: {e}");
                }
            }
            if let Err(e) = self
                .network
                .send_message(
                    other,
                    message::complete_response(chid.id, false, result.as_ref()).into(),
                )
                .await
            {
                self.fail_channel(&chid, format!("unable to send completion: {e}"))
                    .await;
                return;
            }
            if let Err(e) = self.channels.complete_responder(&chid) {
                debug!("unable to complete channel {chid}: {e}");
            }
        }
        self.release_if_completed(&chid);
    }

    async fn on_transfer_error(&self, chid: ChannelId, reason: String) {
        self.fail_channel(&chid, format!("transport error: {reason}"))
            .await;
    }
}

impl DataTransfer {
    /// Sends a revalidation outcome that originated from a transport
    /// progress hook to the counterparty.
    async fn relay_revalidation(&self, chid: &ChannelId, validation: Validation) {
        let Ok(state) = self.channels.get_by_id(chid) else {
            return;
        };
        let other = state.other_party(self.peer_id);
        match self.apply_revalidation(chid, validation).await {
            Ok(Some(response)) => {
                if let Err(e) = self.network.send_message(other, response.into()).await {
                    self.fail_channel(chid, format!("unable to send revalidation: {e}"))
                        .await;
                }
            }
            Ok(None) => {}
            Err(e) => {
                self.fail_channel(chid, format!("revalidation failed: {e}"))
                    .await
            }
        }
    }
}
