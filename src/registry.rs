// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Registrations keyed by voucher type identifier. Each identifier maps to
//! a decoder plus the application hooks that authorize transfers carrying
//! that voucher type: a validator, optionally a revalidator, and optionally
//! a transport configurer. Lookups are hot and never mutate; registration
//! happens once at startup.

use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::encoding::{Coder, Decoded};
use crate::errors::Error;
use crate::{RequestValidator, Revalidator, TransportConfigurer, TypeIdentifier, Voucher};

struct Entry {
    coder: Coder,
    validator: Arc<dyn RequestValidator>,
    revalidator: Option<Arc<dyn Revalidator>>,
    configurer: Option<TransportConfigurer>,
}

#[derive(Default)]
pub struct Registry {
    entries: RwLock<AHashMap<TypeIdentifier, Entry>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a voucher type with its decoder and validator. Fails with
    /// `DuplicateType` when the identifier already has a validator.
    pub fn register_voucher_type<T>(
        &self,
        type_identifier: impl Into<TypeIdentifier>,
        validator: Arc<dyn RequestValidator>,
    ) -> Result<(), Error>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        let type_identifier = type_identifier.into();
        if type_identifier.is_empty() {
            return Err(Error::Other("voucher type identifier must be non-empty".into()));
        }
        let mut entries = self.entries.write();
        if entries.contains_key(&type_identifier) {
            return Err(Error::DuplicateType(type_identifier));
        }
        entries.insert(
            type_identifier,
            Entry {
                coder: Coder::new::<T>(),
                validator,
                revalidator: None,
                configurer: None,
            },
        );
        Ok(())
    }

    /// Attaches a revalidator to an already-registered voucher type.
    pub fn register_revalidator(
        &self,
        type_identifier: &str,
        revalidator: Arc<dyn Revalidator>,
    ) -> Result<(), Error> {
        let mut entries = self.entries.write();
        let entry = entries
            .get_mut(type_identifier)
            .ok_or_else(|| Error::UnknownVoucherType(type_identifier.to_owned()))?;
        if entry.revalidator.is_some() {
            return Err(Error::DuplicateType(type_identifier.to_owned()));
        }
        entry.revalidator = Some(revalidator);
        Ok(())
    }

    /// Attaches a transport configurer to an already-registered voucher
    /// type.
    pub fn register_transport_configurer(
        &self,
        type_identifier: &str,
        configurer: TransportConfigurer,
    ) -> Result<(), Error> {
        let mut entries = self.entries.write();
        let entry = entries
            .get_mut(type_identifier)
            .ok_or_else(|| Error::UnknownVoucherType(type_identifier.to_owned()))?;
        if entry.configurer.is_some() {
            return Err(Error::DuplicateType(type_identifier.to_owned()));
        }
        entry.configurer = Some(configurer);
        Ok(())
    }

    pub fn is_registered(&self, type_identifier: &str) -> bool {
        self.entries.read().contains_key(type_identifier)
    }

    pub fn validator(&self, type_identifier: &str) -> Result<Arc<dyn RequestValidator>, Error> {
        self.entries
            .read()
            .get(type_identifier)
            .map(|entry| entry.validator.clone())
            .ok_or_else(|| Error::UnknownVoucherType(type_identifier.to_owned()))
    }

    pub fn revalidator(&self, type_identifier: &str) -> Option<Arc<dyn Revalidator>> {
        self.entries
            .read()
            .get(type_identifier)
            .and_then(|entry| entry.revalidator.clone())
    }

    pub fn configurer(&self, type_identifier: &str) -> Option<TransportConfigurer> {
        self.entries
            .read()
            .get(type_identifier)
            .and_then(|entry| entry.configurer.clone())
    }

    /// Decodes a voucher with the decoder registered for its type.
    pub fn decode_voucher(&self, voucher: &Voucher) -> Result<Decoded, Error> {
        let coder = self.coder(&voucher.type_identifier)?;
        coder.decode(&voucher.data)
    }

    /// The canonical byte form of a voucher's payload, independent of how
    /// the sender serialized it.
    pub fn canonical_voucher_bytes(&self, voucher: &Voucher) -> Result<Vec<u8>, Error> {
        let coder = self.coder(&voucher.type_identifier)?;
        coder.canonical(&voucher.data)
    }

    fn coder(&self, type_identifier: &str) -> Result<Coder, Error> {
        self.entries
            .read()
            .get(type_identifier)
            .map(|entry| entry.coder)
            .ok_or_else(|| Error::UnknownVoucherType(type_identifier.to_owned()))
    }
}
