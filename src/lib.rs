// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Protocol core for coordinating bulk transfers of content addressed data
//! between two peers. A transfer is negotiated with an application supplied
//! authorization payload (a voucher), multiplexed over any number of
//! concurrent channels, and driven against pluggable transport and network
//! layers. The crate owns the per-channel state machine, the wire messages,
//! and the manager that maps messages and local calls onto both.

use std::fmt;
use std::sync::Arc;

use cid::Cid;
use libp2p::PeerId;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_tuple::{Deserialize_tuple, Serialize_tuple};

pub mod channels;
pub mod db;
pub mod encoding;
mod errors;
pub mod manager;
pub mod message;
pub mod network;
pub mod registry;
pub mod selector;
pub mod transport;

pub use self::errors::Error;
pub use self::manager::DataTransfer;
pub use self::selector::Selector;

use self::encoding::peer_id_ser;
use self::transport::Transport;

/// Identifier chosen by a transfer's initiator, unique among that
/// initiator's outgoing transfers.
pub type TransferId = u64;

/// Identifier for an application payload type carried in a voucher or
/// voucher result. The empty string means no payload is present.
pub type TypeIdentifier = String;

/// Globally unique identifier of a single transfer channel. The initiator
/// is the sole allocating authority for the transfer IDs of channels it
/// opens, so the pair identifies a channel across both peers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize_tuple, Deserialize_tuple)]
pub struct ChannelId {
    #[serde(with = "peer_id_ser")]
    pub initiator: PeerId,
    pub id: TransferId,
}

impl ChannelId {
    pub fn new(initiator: PeerId, id: TransferId) -> Self {
        ChannelId { initiator, id }
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.initiator, self.id)
    }
}

/// Opaque application payload authorizing a transfer, carried as a type
/// identifier plus the payload's DagCBOR bytes. Decoding is deferred to
/// whichever endpoint has a registration for the identifier.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize_tuple, Deserialize_tuple)]
pub struct Voucher {
    pub type_identifier: TypeIdentifier,
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}

/// Opaque application response to a voucher; may be empty.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize_tuple, Deserialize_tuple)]
pub struct VoucherResult {
    pub type_identifier: TypeIdentifier,
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}

macro_rules! impl_payload {
    ($name:ident) => {
        impl $name {
            pub fn new<T: Serialize>(
                type_identifier: impl Into<TypeIdentifier>,
                payload: &T,
            ) -> Result<Self, Error> {
                Ok($name {
                    type_identifier: type_identifier.into(),
                    data: encoding::to_vec(payload)?,
                })
            }

            /// Payload with a type identifier and raw, pre-encoded bytes.
            pub fn from_bytes(type_identifier: impl Into<TypeIdentifier>, data: Vec<u8>) -> Self {
                $name {
                    type_identifier: type_identifier.into(),
                    data,
                }
            }

            /// Decode the payload as a concrete registered type.
            pub fn decode_as<T: DeserializeOwned>(&self) -> Result<T, Error> {
                encoding::from_slice(&self.data)
            }

            /// An empty type identifier means no payload is present.
            pub fn is_empty(&self) -> bool {
                self.type_identifier.is_empty()
            }
        }
    };
}

impl_payload!(Voucher);
impl_payload!(VoucherResult);

/// How a validator or revalidator disposed of a voucher it accepted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// Proceed with the transfer.
    Accept,
    /// Accept the request but hold the validating side paused.
    Pause,
    /// Mid-flight only: relay the voucher result and wait for the
    /// counterparty to supply a fresh voucher before moving more bytes.
    RetryValidation,
}

/// Result of a successful (non-rejecting) validation. A rejection is an
/// `Err` from the validator instead.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Validation {
    pub voucher_result: Option<VoucherResult>,
    pub outcome: ValidationOutcome,
}

impl Validation {
    pub fn accept(voucher_result: Option<VoucherResult>) -> Self {
        Validation {
            voucher_result,
            outcome: ValidationOutcome::Accept,
        }
    }
}

/// Application hook that authorizes new transfer requests.
pub trait RequestValidator: Send + Sync {
    /// Validate a push request, where `other` proposes to send data to this
    /// peer.
    fn validate_push(
        &self,
        other: PeerId,
        voucher: &Voucher,
        base_cid: &Cid,
        selector: &Selector,
    ) -> Result<Validation, Error>;

    /// Validate a pull request, where `other` asks to receive data from
    /// this peer.
    fn validate_pull(
        &self,
        other: PeerId,
        voucher: &Voucher,
        base_cid: &Cid,
        selector: &Selector,
    ) -> Result<Validation, Error>;
}

/// Application hook that re-authorizes a transfer mid-flight. Progress
/// hooks return `Ok(None)` when the revalidator has nothing to say about
/// the channel.
pub trait Revalidator: Send + Sync {
    /// Check a fresh voucher supplied for an in-progress transfer.
    fn revalidate(&self, chid: &ChannelId, voucher: &Voucher) -> Result<Validation, Error>;

    /// Called as data is sent on a pull channel this peer responds to.
    fn on_pull_data_sent(
        &self,
        chid: &ChannelId,
        additional_sent: u64,
    ) -> Result<Option<Validation>, Error>;

    /// Called as data arrives on a push channel this peer responds to.
    fn on_push_data_received(
        &self,
        chid: &ChannelId,
        additional_received: u64,
    ) -> Result<Option<Validation>, Error>;

    /// Called when the responder finishes its side of the transfer; the
    /// returned voucher result rides the completion response.
    fn on_complete(&self, chid: &ChannelId) -> Result<Option<Validation>, Error>;
}

/// Hook to prime a transport with per-voucher-type configuration before a
/// channel opens.
pub type TransportConfigurer = Arc<dyn Fn(&ChannelId, &Voucher, &dyn Transport) + Send + Sync>;
