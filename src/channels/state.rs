// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::fmt;
use std::time::SystemTime;

use cid::Cid;
use libp2p::PeerId;
use serde::{Deserialize, Serialize};
use serde_tuple::{Deserialize_tuple, Serialize_tuple};

use crate::encoding::peer_id_ser;
use crate::errors::Error;
use crate::selector::Selector;
use crate::{ChannelId, Voucher, VoucherResult};

/// Current status of a transfer channel. Pause bits are tracked per side;
/// the enumeration covers every reachable combination of sender pause,
/// receiver pause, responder completion and initiator completion.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    /// Created locally or received from a peer, not yet accepted.
    Requested,
    /// Accepted and moving data.
    Ongoing,
    /// The initiator finished its side and is waiting on the responder.
    TransferFinished,
    /// The responder finished its side and is waiting on the initiator.
    ResponderCompleted,
    /// Both sides finished. Terminal.
    Completed,
    /// The transfer failed. Terminal.
    Failed,
    /// The transfer was cancelled by either party. Terminal.
    Cancelled,
    SenderPaused,
    ReceiverPaused,
    BothPaused,
    ResponderCompletedReceiverPaused,
    /// Sentinel status answered for status queries on unknown channels.
    ChannelNotFoundError,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Completed | Status::Failed | Status::Cancelled)
    }

    pub fn sender_paused(self) -> bool {
        matches!(self, Status::SenderPaused | Status::BothPaused)
    }

    pub fn receiver_paused(self) -> bool {
        matches!(
            self,
            Status::ReceiverPaused
                | Status::BothPaused
                | Status::ResponderCompletedReceiverPaused
        )
    }

    pub fn responder_completed(self) -> bool {
        matches!(
            self,
            Status::ResponderCompleted
                | Status::ResponderCompletedReceiverPaused
                | Status::Completed
        )
    }

    pub fn transfer_finished(self) -> bool {
        matches!(self, Status::TransferFinished | Status::Completed)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Kind of channel event delivered to subscribers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventCode {
    Open,
    Accept,
    Progress,
    NewVoucher,
    NewVoucherResult,
    PauseSender,
    ResumeSender,
    PauseReceiver,
    ResumeReceiver,
    FinishTransfer,
    CompleteResponder,
    Complete,
    Cancel,
    Error,
}

impl fmt::Display for EventCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A single channel event, delivered with a snapshot of the channel state
/// taken after the transition that produced it.
#[derive(Clone, Debug)]
pub struct Event {
    pub code: EventCode,
    pub message: String,
    pub timestamp: SystemTime,
}

/// All state tracked for one transfer channel. The identifying parameters
/// are fixed at creation; everything else evolves through the transition
/// methods, which enforce the status matrix and report the event to emit.
#[derive(Clone, Debug, PartialEq, Serialize_tuple, Deserialize_tuple)]
pub struct ChannelState {
    channel_id: ChannelId,
    base_cid: Cid,
    selector: Selector,
    #[serde(with = "peer_id_ser")]
    sender: PeerId,
    #[serde(with = "peer_id_ser")]
    recipient: PeerId,
    status: Status,
    sent: u64,
    received: u64,
    total_size: u64,
    message: String,
    vouchers: Vec<Voucher>,
    voucher_results: Vec<VoucherResult>,
    received_cids: Vec<Cid>,
}

impl ChannelState {
    pub(super) fn new(
        channel_id: ChannelId,
        base_cid: Cid,
        selector: Selector,
        voucher: Voucher,
        sender: PeerId,
        recipient: PeerId,
    ) -> Self {
        ChannelState {
            channel_id,
            base_cid,
            selector,
            sender,
            recipient,
            status: Status::Requested,
            sent: 0,
            received: 0,
            total_size: 0,
            message: String::new(),
            vouchers: vec![voucher],
            voucher_results: Vec::new(),
            received_cids: Vec::new(),
        }
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    pub fn base_cid(&self) -> &Cid {
        &self.base_cid
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    /// The peer sending the channel's data.
    pub fn sender(&self) -> PeerId {
        self.sender
    }

    /// The peer receiving the channel's data.
    pub fn recipient(&self) -> PeerId {
        self.recipient
    }

    pub fn initiator(&self) -> PeerId {
        self.channel_id.initiator
    }

    /// Pull channels are initiated by the recipient of the data.
    pub fn is_pull(&self) -> bool {
        self.recipient == self.channel_id.initiator
    }

    /// The counterparty of `this_peer` on the channel.
    pub fn other_party(&self, this_peer: PeerId) -> PeerId {
        if this_peer == self.sender {
            self.recipient
        } else {
            self.sender
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// The voucher the channel was opened with.
    pub fn voucher(&self) -> &Voucher {
        &self.vouchers[0]
    }

    pub fn last_voucher(&self) -> &Voucher {
        self.vouchers.last().expect("channel has an initial voucher")
    }

    pub fn vouchers(&self) -> &[Voucher] {
        &self.vouchers
    }

    pub fn voucher_results(&self) -> &[VoucherResult] {
        &self.voucher_results
    }

    pub fn last_voucher_result(&self) -> Option<&VoucherResult> {
        self.voucher_results.last()
    }

    /// CIDs already received on this channel, used on restart to avoid
    /// refetching content.
    pub fn received_cids(&self) -> &[Cid] {
        &self.received_cids
    }

    fn check_open(&self, event: EventCode) -> Result<(), Error> {
        if self.status.is_terminal() {
            return Err(Error::AlreadyTerminated(self.channel_id));
        }
        // Requested channels only accept Accept, Cancel and Error.
        if self.status == Status::Requested
            && !matches!(event, EventCode::Accept | EventCode::Cancel | EventCode::Error)
        {
            return Err(Error::InvalidTransition {
                from: self.status,
                event,
            });
        }
        Ok(())
    }

    fn invalid(&self, event: EventCode) -> Error {
        Error::InvalidTransition {
            from: self.status,
            event,
        }
    }

    pub(super) fn accept(&mut self) -> Result<Option<EventCode>, Error> {
        self.check_open(EventCode::Accept)?;
        if self.status != Status::Requested {
            return Err(self.invalid(EventCode::Accept));
        }
        self.status = Status::Ongoing;
        Ok(Some(EventCode::Accept))
    }

    pub(super) fn pause_sender(&mut self) -> Result<Option<EventCode>, Error> {
        self.check_open(EventCode::PauseSender)?;
        self.status = match self.status {
            s if s.sender_paused() => return Ok(None),
            Status::Ongoing => Status::SenderPaused,
            Status::ReceiverPaused => Status::BothPaused,
            _ => return Err(self.invalid(EventCode::PauseSender)),
        };
        Ok(Some(EventCode::PauseSender))
    }

    pub(super) fn resume_sender(&mut self) -> Result<Option<EventCode>, Error> {
        self.check_open(EventCode::ResumeSender)?;
        self.status = match self.status {
            Status::SenderPaused => Status::Ongoing,
            Status::BothPaused => Status::ReceiverPaused,
            _ => return Ok(None),
        };
        Ok(Some(EventCode::ResumeSender))
    }

    pub(super) fn pause_receiver(&mut self) -> Result<Option<EventCode>, Error> {
        self.check_open(EventCode::PauseReceiver)?;
        self.status = match self.status {
            s if s.receiver_paused() => return Ok(None),
            Status::Ongoing => Status::ReceiverPaused,
            Status::SenderPaused => Status::BothPaused,
            Status::ResponderCompleted => Status::ResponderCompletedReceiverPaused,
            _ => return Err(self.invalid(EventCode::PauseReceiver)),
        };
        Ok(Some(EventCode::PauseReceiver))
    }

    pub(super) fn resume_receiver(&mut self) -> Result<Option<EventCode>, Error> {
        self.check_open(EventCode::ResumeReceiver)?;
        self.status = match self.status {
            Status::ReceiverPaused => Status::Ongoing,
            Status::BothPaused => Status::SenderPaused,
            Status::ResponderCompletedReceiverPaused => Status::ResponderCompleted,
            _ => return Ok(None),
        };
        Ok(Some(EventCode::ResumeReceiver))
    }

    pub(super) fn finish_transfer(&mut self) -> Result<Option<EventCode>, Error> {
        self.check_open(EventCode::FinishTransfer)?;
        let (status, code) = match self.status {
            Status::TransferFinished => return Ok(None),
            Status::Ongoing => (Status::TransferFinished, EventCode::FinishTransfer),
            Status::ResponderCompleted => (Status::Completed, EventCode::Complete),
            _ => return Err(self.invalid(EventCode::FinishTransfer)),
        };
        self.status = status;
        Ok(Some(code))
    }

    pub(super) fn complete_responder(&mut self) -> Result<Option<EventCode>, Error> {
        self.check_open(EventCode::CompleteResponder)?;
        let (status, code) = match self.status {
            s if s.responder_completed() => return Ok(None),
            Status::Ongoing => (Status::ResponderCompleted, EventCode::CompleteResponder),
            Status::ReceiverPaused => (
                Status::ResponderCompletedReceiverPaused,
                EventCode::CompleteResponder,
            ),
            Status::TransferFinished => (Status::Completed, EventCode::Complete),
            _ => return Err(self.invalid(EventCode::CompleteResponder)),
        };
        self.status = status;
        Ok(Some(code))
    }

    pub(super) fn error(&mut self, reason: String) -> Result<Option<EventCode>, Error> {
        if self.status.is_terminal() {
            return Err(Error::AlreadyTerminated(self.channel_id));
        }
        self.status = Status::Failed;
        self.message = reason;
        Ok(Some(EventCode::Error))
    }

    pub(super) fn cancel(&mut self) -> Result<Option<EventCode>, Error> {
        if self.status.is_terminal() {
            return Err(Error::AlreadyTerminated(self.channel_id));
        }
        self.status = Status::Cancelled;
        Ok(Some(EventCode::Cancel))
    }

    pub(super) fn data_sent(&mut self, delta: u64) -> Result<Option<EventCode>, Error> {
        self.check_open(EventCode::Progress)?;
        self.sent += delta;
        Ok(Some(EventCode::Progress))
    }

    pub(super) fn data_received(&mut self, delta: u64) -> Result<Option<EventCode>, Error> {
        self.check_open(EventCode::Progress)?;
        self.received += delta;
        Ok(Some(EventCode::Progress))
    }

    pub(super) fn set_total_size(&mut self, size: u64) -> Result<Option<EventCode>, Error> {
        self.check_open(EventCode::Progress)?;
        self.total_size = size;
        Ok(None)
    }

    pub(super) fn new_voucher(&mut self, voucher: Voucher) -> Result<Option<EventCode>, Error> {
        self.check_open(EventCode::NewVoucher)?;
        self.vouchers.push(voucher);
        Ok(Some(EventCode::NewVoucher))
    }

    pub(super) fn new_voucher_result(
        &mut self,
        result: VoucherResult,
    ) -> Result<Option<EventCode>, Error> {
        self.check_open(EventCode::NewVoucherResult)?;
        self.voucher_results.push(result);
        Ok(Some(EventCode::NewVoucherResult))
    }

    pub(super) fn add_received_cid(&mut self, cid: Cid) -> Result<Option<EventCode>, Error> {
        self.check_open(EventCode::Progress)?;
        if !self.received_cids.contains(&cid) {
            self.received_cids.push(cid);
        }
        Ok(None)
    }
}
