// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Contract for the engine that moves the actual bytes of a transfer, e.g.
//! a graph-sync style block exchange. The manager drives channels through
//! this trait and learns about progress through [`TransportEvents`]. Tests
//! and alternative engines substitute in-memory implementations.

use std::sync::Arc;

use async_trait::async_trait;
use cid::Cid;
use libp2p::PeerId;

use crate::errors::Error;
use crate::message::{TransferMessage, TransferRequest, TransferResponse};
use crate::selector::Selector;
use crate::ChannelId;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Begin moving bytes for a channel. `already_have` lets the data
    /// sender skip content the other side holds from an earlier attempt;
    /// `initial` rides the transport's opening message, carrying either
    /// the initiator's request or the responder's acceptance.
    async fn open_channel(
        &self,
        dial_to: PeerId,
        chid: ChannelId,
        root: Cid,
        selector: Selector,
        already_have: Vec<Cid>,
        initial: TransferMessage,
    ) -> Result<(), Error>;

    /// Re-arm an interrupted channel on an already-known counterparty,
    /// delivering `initial` on its first frame.
    async fn restart_channel(
        &self,
        chid: ChannelId,
        initial: TransferMessage,
    ) -> Result<(), Error>;

    async fn pause_channel(&self, chid: ChannelId) -> Result<(), Error>;

    /// Resume a paused channel, optionally attaching a message to the first
    /// frame sent after resumption.
    async fn resume_channel(
        &self,
        chid: ChannelId,
        trailing: Option<TransferMessage>,
    ) -> Result<(), Error>;

    async fn close_channel(&self, chid: ChannelId) -> Result<(), Error>;

    fn set_event_handler(&self, handler: Arc<dyn TransportEvents>);
}

/// Progress callbacks reported by a transport. Implemented by the manager;
/// invoked from whatever tasks the transport runs internally.
#[async_trait]
pub trait TransportEvents: Send + Sync {
    /// A protocol request arrived riding the transport. The returned
    /// response, if any, rides the transport back.
    async fn on_request_received(
        &self,
        chid: ChannelId,
        request: TransferRequest,
    ) -> Result<Option<TransferResponse>, Error>;

    /// A protocol response arrived riding the transport.
    async fn on_response_received(&self, chid: ChannelId, response: TransferResponse);

    async fn on_data_sent(&self, chid: ChannelId, additional_sent: u64);

    async fn on_data_received(&self, chid: ChannelId, block: Cid, additional_received: u64);

    /// The transport learned the total number of bytes the channel will
    /// move.
    async fn on_total_size(&self, chid: ChannelId, size: u64);

    /// The transport finished its side of the channel, successfully or not.
    async fn on_channel_completed(&self, chid: ChannelId, success: bool);

    async fn on_transfer_error(&self, chid: ChannelId, reason: String);
}
