// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! DagCBOR helpers for the opaque payloads that travel with transfer
//! messages. Vouchers and selectors cross the wire as tagged byte strings;
//! the registered [`Coder`] for a type identifier turns those bytes back
//! into values on the receiving side.

use std::any::Any;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::errors::Error;

/// Serialize a value to canonical DagCBOR bytes.
pub fn to_vec<T: Serialize>(value: &T) -> Result<Vec<u8>, Error> {
    serde_ipld_dagcbor::to_vec(value).map_err(|e| Error::Encoding(e.to_string()))
}

/// Deserialize a value from DagCBOR bytes.
pub fn from_slice<T: DeserializeOwned>(bz: &[u8]) -> Result<T, Error> {
    serde_ipld_dagcbor::from_slice(bz).map_err(|e| Error::MalformedPayload(e.to_string()))
}

/// A decoded opaque payload. The concrete type is whatever was registered
/// for the payload's type identifier; callers downcast when they need the
/// value itself.
pub type Decoded = Box<dyn Any + Send + Sync>;

/// Decode and re-encode functions for one registered payload type.
///
/// `reencode` always produces canonical bytes, so two payloads compare equal
/// after a decode/re-encode round trip whenever they carry the same value,
/// regardless of how the sender serialized them.
#[derive(Copy, Clone)]
pub struct Coder {
    decode: fn(&[u8]) -> Result<Decoded, Error>,
    reencode: fn(&Decoded) -> Result<Vec<u8>, Error>,
}

impl Coder {
    pub fn new<T>() -> Self
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        Coder {
            decode: |bz| Ok(Box::new(from_slice::<T>(bz)?) as Decoded),
            reencode: |value| {
                let typed = value
                    .downcast_ref::<T>()
                    .ok_or_else(|| Error::Encoding("decoded value has wrong type".into()))?;
                to_vec(typed)
            },
        }
    }

    pub fn decode(&self, bz: &[u8]) -> Result<Decoded, Error> {
        (self.decode)(bz)
    }

    /// Canonical re-encoding of a previously decoded value.
    pub fn reencode(&self, value: &Decoded) -> Result<Vec<u8>, Error> {
        (self.reencode)(value)
    }

    /// Decode then re-encode, yielding the canonical byte form of `bz`.
    pub fn canonical(&self, bz: &[u8]) -> Result<Vec<u8>, Error> {
        self.reencode(&self.decode(bz)?)
    }
}

impl std::fmt::Debug for Coder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Coder")
    }
}

/// Serde `with` module for [`libp2p::PeerId`], stored as its raw multihash
/// bytes.
pub mod peer_id_ser {
    use libp2p::PeerId;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(peer: &PeerId, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_bytes(&peer.to_bytes())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<PeerId, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bz = serde_bytes::ByteBuf::deserialize(deserializer)?;
        PeerId::from_bytes(&bz).map_err(de::Error::custom)
    }

    /// Same representation for `Option<PeerId>`.
    pub mod opt {
        use libp2p::PeerId;
        use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

        pub fn serialize<S>(peer: &Option<PeerId>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            peer.as_ref()
                .map(|p| serde_bytes::ByteBuf::from(p.to_bytes()))
                .serialize(serializer)
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<PeerId>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Option::<serde_bytes::ByteBuf>::deserialize(deserializer)?
                .map(|bz| PeerId::from_bytes(&bz).map_err(de::Error::custom))
                .transpose()
        }
    }
}
