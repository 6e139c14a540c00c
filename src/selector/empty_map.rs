// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Serializes a unit selector variant as an empty map, matching the IPLD
/// selector schema representation.
pub(super) fn serialize<S>(serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    BTreeMap::<u8, u8>::new().serialize(serializer)
}

pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<(), D::Error>
where
    D: Deserializer<'de>,
{
    BTreeMap::<u8, u8>::deserialize(deserializer)?;
    Ok(())
}
