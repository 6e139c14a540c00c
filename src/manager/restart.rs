// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Restart handshake for interrupted channels. The initiator re-issues its
//! original request flagged as a restart; the responder, when it notices
//! the interruption first, asks the initiator to do so with a restart
//! trigger carrying the full channel ID. Either way the responder verifies
//! the restart request against the channel it already holds, down to
//! byte-equal canonical voucher encoding, before the transport re-engages.

use libp2p::PeerId;
use log::info;

use crate::channels::ChannelState;
use crate::errors::Error;
use crate::message::{self, TransferRequest, TransferResponse};
use crate::ChannelId;

use super::DataTransfer;

impl DataTransfer {
    fn restart_err(chid: ChannelId, reason: impl Into<String>) -> Error {
        Error::RestartFailure {
            chid,
            reason: reason.into(),
        }
    }

    /// Restarts a channel the way this peer's role on it requires.
    pub(super) async fn restart_channel_by_role(
        &self,
        channel: &ChannelState,
    ) -> Result<(), Error> {
        let chid = channel.channel_id();
        if channel.status().is_terminal() {
            return Err(Self::restart_err(chid, "channel is already terminated"));
        }
        if chid.initiator == self.peer_id() {
            if channel.is_pull() {
                self.open_pull_restart_channel(channel).await
            } else {
                self.open_push_restart_channel(channel).await
            }
        } else if channel.is_pull() {
            self.restart_manager_peer_receive_pull(channel).await
        } else {
            self.restart_manager_peer_receive_push(channel).await
        }
    }

    /// As responder of a push: re-validate the original voucher locally,
    /// then ask the initiator to re-issue its push request.
    async fn restart_manager_peer_receive_push(
        &self,
        channel: &ChannelState,
    ) -> Result<(), Error> {
        self.validate_restart_voucher(channel, false)?;
        self.send_restart_trigger(channel).await
    }

    /// As responder of a pull: re-validate the original voucher locally,
    /// then ask the initiator to re-issue its pull request.
    async fn restart_manager_peer_receive_pull(
        &self,
        channel: &ChannelState,
    ) -> Result<(), Error> {
        self.validate_restart_voucher(channel, true)?;
        self.send_restart_trigger(channel).await
    }

    async fn send_restart_trigger(&self, channel: &ChannelState) -> Result<(), Error> {
        let chid = channel.channel_id();
        let other = channel.other_party(self.peer_id());
        self.network.protect(other, chid.to_string());
        let request = message::restart_existing_channel_request(chid);
        self.network.send_message(other, request.into()).await
    }

    /// Reconstructs the request that created the channel and feeds it back
    /// through validation, so a restart never outlives the authorization
    /// that admitted the transfer in the first place.
    fn validate_restart_voucher(
        &self,
        channel: &ChannelState,
        is_pull: bool,
    ) -> Result<(), Error> {
        let chid = channel.channel_id();
        let request = message::new_request(
            chid.id,
            false,
            is_pull,
            channel.voucher(),
            *channel.base_cid(),
            channel.selector(),
        )?;
        let voucher = request
            .voucher()
            .ok_or_else(|| Self::restart_err(chid, "channel has no voucher"))?;
        let base_cid = request.base_cid.ok_or(Error::EmptyBaseCid)?;
        self.validate_voucher(
            channel.other_party(self.peer_id()),
            is_pull,
            &voucher,
            &base_cid,
            channel.selector(),
        )
        .map_err(|e| Self::restart_err(chid, format!("validation error: {e}")))?;
        Ok(())
    }

    /// As initiator of a push: re-issue the original request over the
    /// network, flagged as a restart.
    async fn open_push_restart_channel(&self, channel: &ChannelState) -> Result<(), Error> {
        let chid = channel.channel_id();
        let voucher = channel.voucher().clone();
        let other = channel.other_party(self.peer_id());
        let request = message::restart_request(
            chid,
            false,
            &voucher,
            *channel.base_cid(),
            channel.selector(),
        )?;
        self.configure_transport(&chid, &voucher);
        self.network.protect(other, chid.to_string());
        if let Err(e) = self.network.send_message(other, request.into()).await {
            self.fail_channel(&chid, format!("unable to send restart request: {e}"))
                .await;
            return Err(e);
        }
        Ok(())
    }

    /// As initiator of a pull: re-open the transport channel, telling the
    /// responder which CIDs this peer already holds so nothing is refetched.
    async fn open_pull_restart_channel(&self, channel: &ChannelState) -> Result<(), Error> {
        let chid = channel.channel_id();
        let voucher = channel.voucher().clone();
        let other = channel.other_party(self.peer_id());
        let request = message::restart_request(
            chid,
            true,
            &voucher,
            *channel.base_cid(),
            channel.selector(),
        )?;
        self.configure_transport(&chid, &voucher);
        self.network.protect(other, chid.to_string());
        if let Err(e) = self
            .transport
            .open_channel(
                other,
                chid,
                *channel.base_cid(),
                channel.selector().clone(),
                channel.received_cids().to_vec(),
                request.into(),
            )
            .await
        {
            self.fail_channel(&chid, format!("unable to reopen pull channel: {e}"))
                .await;
            return Err(e);
        }
        Ok(())
    }

    /// Handles a restart trigger: the responder of `chid` is asking this
    /// peer, the initiator, to re-issue its request.
    pub(super) async fn receive_restart_trigger(
        &self,
        from: PeerId,
        chid: ChannelId,
    ) -> Result<(), Error> {
        if chid.initiator != self.peer_id() {
            return Err(Self::restart_err(
                chid,
                "restart trigger for a channel this peer did not initiate",
            ));
        }
        let channel = self.channels.get_by_id(&chid)?;
        if channel.other_party(self.peer_id()) != from {
            return Err(Self::restart_err(
                chid,
                "restart trigger from a peer not party to the channel",
            ));
        }
        info!("restarting channel {chid} on request of {from}");
        self.restart_channel_by_role(&channel).await
    }

    /// Handles a full restart request as responder: verify it matches the
    /// channel this peer holds, then re-engage the transport.
    pub(super) async fn receive_restart_request(
        &self,
        from: PeerId,
        chid: ChannelId,
        request: TransferRequest,
    ) -> Result<Option<TransferResponse>, Error> {
        match self.validate_restart_request(from, chid, &request) {
            Ok(channel) => {
                let voucher = channel.voucher().clone();
                self.configure_transport(&chid, &voucher);
                let response = message::new_response(chid.id, true, false, None);
                if request.pull {
                    // The initiator's transport already re-engaged when it
                    // delivered this request; re-arm our side and let the
                    // acceptance ride the first frame.
                    self.transport.restart_channel(chid, response.into()).await?;
                } else {
                    // Re-open toward the initiator, skipping everything
                    // already received before the interruption.
                    self.transport
                        .open_channel(
                            from,
                            chid,
                            *channel.base_cid(),
                            channel.selector().clone(),
                            channel.received_cids().to_vec(),
                            response.into(),
                        )
                        .await?;
                }
                Ok(None)
            }
            Err(e) => {
                self.fail_channel(&chid, e.to_string()).await;
                Ok(Some(message::new_response(chid.id, false, false, None)))
            }
        }
    }

    fn validate_restart_request(
        &self,
        from: PeerId,
        chid: ChannelId,
        request: &TransferRequest,
    ) -> Result<ChannelState, Error> {
        let channel = self.channels.get_by_id(&chid)?;
        if channel.status().is_terminal() {
            return Err(Self::restart_err(chid, "channel is already terminated"));
        }
        // The sender declares the channel initiator on the wire; it must be
        // the peer the message actually came from.
        if request.initiator != Some(from) {
            return Err(Self::restart_err(
                chid,
                "restart request initiator does not match the sending peer",
            ));
        }
        if request.base_cid != Some(*channel.base_cid()) {
            return Err(Self::restart_err(chid, "base cid does not match"));
        }
        let request_voucher = request
            .voucher()
            .ok_or_else(|| Self::restart_err(chid, "restart request carries no voucher"))?;
        if request_voucher.type_identifier != channel.voucher().type_identifier {
            return Err(Self::restart_err(
                chid,
                "channel and request voucher types do not match",
            ));
        }
        let request_bz = self.registry.canonical_voucher_bytes(&request_voucher)?;
        let channel_bz = self.registry.canonical_voucher_bytes(channel.voucher())?;
        if request_bz != channel_bz {
            return Err(Self::restart_err(
                chid,
                "channel and request vouchers do not match",
            ));
        }
        Ok(channel)
    }
}
