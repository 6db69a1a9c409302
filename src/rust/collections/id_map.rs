// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::fail::Fail;
use ::rand::{
    rngs::SmallRng,
    RngCore,
    SeedableRng,
};
use ::std::{
    collections::HashMap,
    hash::Hash,
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Debug builds hand out random ids so that code relying on id order or on id reuse shows up early. Release builds
/// count up.
#[cfg(debug_assertions)]
const RANDOMIZE: bool = true;
#[cfg(not(debug_assertions))]
const RANDOMIZE: bool = false;

/// Seed for the random number generator used to generate ids.
/// This value was chosen arbitrarily.
const SCHEDULER_SEED: u64 = 42;
const MAX_RETRIES_ID_ALLOC: usize = 500;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Maps stable external ids onto internal ids, such as slab offsets, that get reused. An external id is never handed
/// out twice while mapped, so a stale external id misses instead of aliasing a newer entry.
pub struct IdMap<E: Eq + Hash + From<u64> + Into<u64> + Copy, I: Copy> {
    ids: HashMap<E, I>,
    /// Small random number generator for external ids.
    rng: SmallRng,
    /// Next candidate when ids are not randomized.
    next_id: u64,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl<E: Eq + Hash + From<u64> + Into<u64> + Copy, I: Copy> IdMap<E, I> {
    /// Retrieve the internal id mapped to `external_id`, if any.
    pub fn get(&self, external_id: &E) -> Option<I> {
        self.ids.get(external_id).copied()
    }

    /// Remove a mapping, returning the internal id it pointed to.
    pub fn remove(&mut self, external_id: &E) -> Option<I> {
        self.ids.remove(external_id)
    }

    /// Generate a new external id and map it to `internal_id`. If a candidate is in use, keep generating until an
    /// unused one is found, up to a maximum number of tries.
    pub fn insert_with_new_id(&mut self, internal_id: I) -> Result<E, Fail> {
        for _ in 0..MAX_RETRIES_ID_ALLOC {
            let candidate: u64 = if RANDOMIZE {
                self.rng.next_u64()
            } else {
                let id: u64 = self.next_id;
                self.next_id = self.next_id.wrapping_add(1);
                id
            };
            let external_id: E = E::from(candidate);
            if !self.ids.contains_key(&external_id) {
                self.ids.insert(external_id, internal_id);
                return Ok(external_id);
            }
        }
        let cause: String = format!("could not find a free id after {} attempts", MAX_RETRIES_ID_ALLOC);
        error!("insert_with_new_id(): {}", cause);
        Err(Fail::new(libc::EAGAIN, &cause))
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl<E: Eq + Hash + From<u64> + Into<u64> + Copy, I: Copy> Default for IdMap<E, I> {
    fn default() -> Self {
        Self {
            ids: HashMap::<E, I>::new(),
            rng: SmallRng::seed_from_u64(SCHEDULER_SEED),
            next_id: 1,
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
