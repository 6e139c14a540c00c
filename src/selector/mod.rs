// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

mod empty_map;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Selectors are expressions that identify and select a subset of data from
/// an IPLD DAG. Selectors are themselves IPLD and travel on the wire in
/// their DagCBOR representation; this module models the tree for transport
/// and storage. Evaluation against a DAG is the concern of whichever block
/// engine moves the bytes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// Matcher marks a node to be included in the "result" set.
    #[serde(rename = ".", with = "empty_map")]
    Matcher,

    /// ExploreAll is similar to a `*` -- it traverses all elements of an
    /// array, or all entries in a map, and applies a next selector to the
    /// reached nodes.
    #[serde(rename = "a")]
    ExploreAll {
        #[serde(rename = ">")]
        next: Box<Selector>,
    },

    /// ExploreFields traverses named fields in a map and applies a next
    /// selector to the reached nodes.
    ///
    /// Fields insertion order is maintained and traversed using that order.
    #[serde(rename = "f")]
    ExploreFields {
        #[serde(rename = "f>")]
        fields: IndexMap<String, Selector>,
    },

    /// ExploreIndex traverses a specific index in a list, and applies a next
    /// selector to the reached node.
    #[serde(rename = "i")]
    ExploreIndex {
        #[serde(rename = "i")]
        index: usize,
        #[serde(rename = ">")]
        next: Box<Selector>,
    },

    /// ExploreRange traverses a list, and for each element in the range
    /// specified, will apply a next selector to those reached nodes.
    #[serde(rename = "r")]
    ExploreRange {
        #[serde(rename = "^")]
        start: usize,
        #[serde(rename = "$")]
        end: usize,
        #[serde(rename = ">")]
        next: Box<Selector>,
    },

    /// ExploreRecursive traverses some structure recursively. To guide this
    /// exploration, it uses a "sequence", which is another Selector tree;
    /// some leaf node in this sequence should contain an
    /// ExploreRecursiveEdge selector, which denotes the place recursion
    /// should occur.
    #[serde(rename = "R")]
    ExploreRecursive {
        #[serde(rename = ":>")]
        sequence: Box<Selector>,
        #[serde(rename = "l")]
        limit: RecursionLimit,
    },

    /// ExploreUnion allows selection to continue with two or more distinct
    /// selectors while exploring the same tree of data.
    #[serde(rename = "|")]
    ExploreUnion(Vec<Selector>),

    /// ExploreRecursiveEdge is a special sentinel value which is used to
    /// mark the end of a sequence started by an ExploreRecursive selector:
    /// the recursion goes back to the initial state of the earlier
    /// ExploreRecursive selector, and proceeds again (with a decremented
    /// maxDepth value).
    #[serde(rename = "@", with = "empty_map")]
    ExploreRecursiveEdge,
}

impl Selector {
    /// The selector most transfers use: follow every link from the root,
    /// without a depth bound.
    pub fn explore_all_recursively() -> Selector {
        Selector::ExploreRecursive {
            sequence: Box::new(Selector::ExploreAll {
                next: Box::new(Selector::ExploreRecursiveEdge),
            }),
            limit: RecursionLimit::None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Copy)]
pub enum RecursionLimit {
    #[serde(rename = "none", with = "empty_map")]
    None,
    #[serde(rename = "depth")]
    Depth(u64),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{from_slice, to_vec};

    #[test]
    fn full_selector_round_trip() {
        let selector = Selector::explore_all_recursively();
        let bz = to_vec(&selector).unwrap();
        assert_eq!(from_slice::<Selector>(&bz).unwrap(), selector);
    }

    #[test]
    fn fields_order_preserved() {
        let mut fields = IndexMap::new();
        fields.insert("z".to_owned(), Selector::Matcher);
        fields.insert("a".to_owned(), Selector::ExploreRecursiveEdge);
        let selector = Selector::ExploreFields { fields };
        let bz = to_vec(&selector).unwrap();
        assert_eq!(from_slice::<Selector>(&bz).unwrap(), selector);
    }

    #[test]
    fn depth_limited_round_trip() {
        let selector = Selector::ExploreRecursive {
            sequence: Box::new(Selector::ExploreUnion(vec![
                Selector::Matcher,
                Selector::ExploreAll {
                    next: Box::new(Selector::ExploreRecursiveEdge),
                },
            ])),
            limit: RecursionLimit::Depth(8),
        };
        let bz = to_vec(&selector).unwrap();
        assert_eq!(from_slice::<Selector>(&bz).unwrap(), selector);
    }

    #[test]
    fn encoding_is_deterministic() {
        let selector = Selector::explore_all_recursively();
        assert_eq!(to_vec(&selector).unwrap(), to_vec(&selector).unwrap());
    }
}
