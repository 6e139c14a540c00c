// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use thiserror::Error;

use crate::channels::{EventCode, Status};
use crate::ChannelId;

/// Data transfer error
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("channel not found: {0}")]
    ChannelNotFound(ChannelId),
    #[error("channel already exists: {0}")]
    ChannelAlreadyExists(ChannelId),
    #[error("channel {0} cannot be modified: already terminated")]
    AlreadyTerminated(ChannelId),
    #[error("cannot transition from {from} on {event}")]
    InvalidTransition { from: Status, event: EventCode },
    #[error("voucher rejected: {0}")]
    ValidationFailure(String),
    #[error("no decoder or validator registered for voucher type {0:?}")]
    UnknownVoucherType(String),
    #[error("identifier already registered: {0:?}")]
    DuplicateType(String),
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error("could not encode: {0}")]
    Encoding(String),
    #[error("network failure: {0}")]
    Network(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("unable to restart channel {chid}: {reason}")]
    RestartFailure { chid: ChannelId, reason: String },
    #[error("base CID must be defined")]
    EmptyBaseCid,
    #[error("{0}")]
    Other(String),
}

impl From<Error> for String {
    fn from(e: Error) -> Self {
        e.to_string()
    }
}
