// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Wire messages for the data transfer protocol. A single DagCBOR envelope
//! carries either a request or a response, so endpoints can route a message
//! before they know how to decode the voucher riding inside it.

use cid::Cid;
use libp2p::PeerId;
use serde_tuple::{Deserialize_tuple, Serialize_tuple};

use crate::encoding::{self, peer_id_ser};
use crate::errors::Error;
use crate::selector::Selector;
use crate::{ChannelId, TransferId, TypeIdentifier, Voucher, VoucherResult};

/// Envelope for every message exchanged over the network or riding the
/// transport. Exactly one of `request`/`response` is present, flagged by
/// `is_request`.
#[derive(Clone, Debug, PartialEq, Serialize_tuple, Deserialize_tuple)]
pub struct TransferMessage {
    pub is_request: bool,
    pub request: Option<TransferRequest>,
    pub response: Option<TransferResponse>,
}

impl TransferMessage {
    pub fn transfer_id(&self) -> TransferId {
        match (&self.request, &self.response) {
            (Some(req), _) => req.transfer_id,
            (_, Some(res)) => res.transfer_id,
            _ => 0,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        encoding::to_vec(self)
    }

    pub fn from_bytes(bz: &[u8]) -> Result<Self, Error> {
        let msg: TransferMessage = encoding::from_slice(bz)?;
        if msg.is_request != msg.request.is_some() || msg.is_request == msg.response.is_some() {
            return Err(Error::MalformedPayload(
                "envelope flag disagrees with payload".into(),
            ));
        }
        Ok(msg)
    }
}

impl From<TransferRequest> for TransferMessage {
    fn from(request: TransferRequest) -> Self {
        TransferMessage {
            is_request: true,
            request: Some(request),
            response: None,
        }
    }
}

impl From<TransferResponse> for TransferMessage {
    fn from(response: TransferResponse) -> Self {
        TransferMessage {
            is_request: false,
            request: None,
            response: Some(response),
        }
    }
}

/// A request message, sent by a channel's initiator, except for the
/// restart trigger (`restart_channel`), which the responder sends to ask
/// the initiator to re-issue its request for an existing channel.
#[derive(Clone, Debug, Default, PartialEq, Serialize_tuple, Deserialize_tuple)]
pub struct TransferRequest {
    pub base_cid: Option<Cid>,
    /// Re-issue of the original request for an interrupted channel.
    pub is_restart: bool,
    /// The channel initiator the sender claims to be, present only when
    /// `is_restart` is set. The responder verifies it against the
    /// authenticated sender of the message.
    #[serde(with = "peer_id_ser::opt")]
    pub initiator: Option<PeerId>,
    /// Both halves of the channel ID, present only on a restart trigger.
    pub restart_channel: Option<ChannelId>,
    pub pull: bool,
    pub canceled: bool,
    /// The sending peer has finished its side of the transfer.
    pub complete: bool,
    pub update: bool,
    pub paused: bool,
    pub voucher_type: TypeIdentifier,
    #[serde(with = "serde_bytes")]
    pub voucher: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub selector: Vec<u8>,
    pub transfer_id: TransferId,
}

impl TransferRequest {
    /// The voucher riding this request, if any.
    pub fn voucher(&self) -> Option<Voucher> {
        if self.voucher_type.is_empty() {
            None
        } else {
            Some(Voucher::from_bytes(
                self.voucher_type.clone(),
                self.voucher.clone(),
            ))
        }
    }

    pub fn selector(&self) -> Result<Selector, Error> {
        encoding::from_slice(&self.selector)
    }

    pub fn is_new(&self) -> bool {
        !self.is_restart
            && self.restart_channel.is_none()
            && !self.canceled
            && !self.update
            && !self.complete
    }
}

/// A response message, sent by a channel's responder.
#[derive(Clone, Debug, Default, PartialEq, Serialize_tuple, Deserialize_tuple)]
pub struct TransferResponse {
    pub accepted: bool,
    pub canceled: bool,
    /// The responder has finished its side of the transfer.
    pub complete: bool,
    pub paused: bool,
    /// The responder demands a fresh voucher before continuing.
    pub voucher_request: bool,
    pub voucher_result_type: TypeIdentifier,
    #[serde(with = "serde_bytes")]
    pub voucher_result: Vec<u8>,
    pub transfer_id: TransferId,
}

impl TransferResponse {
    /// The voucher result riding this response, if any.
    pub fn voucher_result(&self) -> Option<VoucherResult> {
        if self.voucher_result_type.is_empty() {
            None
        } else {
            Some(VoucherResult::from_bytes(
                self.voucher_result_type.clone(),
                self.voucher_result.clone(),
            ))
        }
    }
}

/// Generates a new request to open a data transfer channel, or to re-issue
/// the opening request when `is_restart` is set.
pub fn new_request(
    id: TransferId,
    is_restart: bool,
    is_pull: bool,
    voucher: &Voucher,
    base_cid: Cid,
    selector: &Selector,
) -> Result<TransferRequest, Error> {
    if base_cid == Cid::default() {
        return Err(Error::EmptyBaseCid);
    }
    Ok(TransferRequest {
        base_cid: Some(base_cid),
        is_restart,
        pull: is_pull,
        voucher_type: voucher.type_identifier.clone(),
        voucher: voucher.data.clone(),
        selector: encoding::to_vec(selector)?,
        transfer_id: id,
        ..Default::default()
    })
}

/// Re-issues the opening request for an interrupted channel, declaring the
/// channel's initiator so the responder can verify the sender.
pub fn restart_request(
    chid: ChannelId,
    is_pull: bool,
    voucher: &Voucher,
    base_cid: Cid,
    selector: &Selector,
) -> Result<TransferRequest, Error> {
    let mut request = new_request(chid.id, true, is_pull, voucher, base_cid, selector)?;
    request.initiator = Some(chid.initiator);
    Ok(request)
}

/// Asks the counterparty to restart an existing interrupted channel.
pub fn restart_existing_channel_request(chid: ChannelId) -> TransferRequest {
    TransferRequest {
        is_restart: true,
        restart_channel: Some(chid),
        transfer_id: chid.id,
        ..Default::default()
    }
}

/// Generates a request to cancel an in progress transfer.
pub fn cancel_request(id: TransferId) -> TransferRequest {
    TransferRequest {
        canceled: true,
        transfer_id: id,
        ..Default::default()
    }
}

/// Generates a request update, pausing or resuming the sending peer and
/// optionally carrying a fresh voucher.
pub fn update_request(
    id: TransferId,
    is_paused: bool,
    voucher: Option<&Voucher>,
) -> TransferRequest {
    let (voucher_type, voucher) = match voucher {
        Some(v) => (v.type_identifier.clone(), v.data.clone()),
        None => (TypeIdentifier::new(), Vec::new()),
    };
    TransferRequest {
        update: true,
        paused: is_paused,
        voucher_type,
        voucher,
        transfer_id: id,
        ..Default::default()
    }
}

/// Tells the responder that the initiator's side of the transfer finished.
pub fn complete_request(id: TransferId) -> TransferRequest {
    TransferRequest {
        complete: true,
        transfer_id: id,
        ..Default::default()
    }
}

/// Builds a response to a new or updated request.
pub fn new_response(
    id: TransferId,
    accepted: bool,
    is_paused: bool,
    voucher_result: Option<&VoucherResult>,
) -> TransferResponse {
    let (voucher_result_type, voucher_result) = match voucher_result {
        Some(r) => (r.type_identifier.clone(), r.data.clone()),
        None => (TypeIdentifier::new(), Vec::new()),
    };
    TransferResponse {
        accepted,
        paused: is_paused,
        voucher_result_type,
        voucher_result,
        transfer_id: id,
        ..Default::default()
    }
}

/// Announces that the responder's side of the transfer finished.
pub fn complete_response(
    id: TransferId,
    is_paused: bool,
    voucher_result: Option<&VoucherResult>,
) -> TransferResponse {
    TransferResponse {
        complete: true,
        ..new_response(id, true, is_paused, voucher_result)
    }
}

/// Prompts the counterparty for a fresh voucher before the transfer
/// continues.
pub fn voucher_request_response(
    id: TransferId,
    is_paused: bool,
    voucher_result: Option<&VoucherResult>,
) -> TransferResponse {
    TransferResponse {
        voucher_request: true,
        ..new_response(id, true, is_paused, voucher_result)
    }
}

/// Makes a new cancel response message.
pub fn cancel_response(id: TransferId) -> TransferResponse {
    TransferResponse {
        canceled: true,
        transfer_id: id,
        ..Default::default()
    }
}
