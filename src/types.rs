/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Inert types shared across the protocol layers.
//!
//! These follow the newtype pattern: each wraps the integer the wire format
//! prescribes for it and exposes only the operations the protocol actually
//! performs on it. Sequence numbers and proposal numbers start at 1 and only
//! ever grow; [`Round`] 0 means "no round started yet".

use std::fmt::{self, Display, Formatter};
use std::ops::{Add, AddAssign};

use borsh::{BorshDeserialize, BorshSerialize};

/// Identity of a participating process. Unique per process and known to every
/// other process through static configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize)]
pub struct ProcessId(u64);

impl ProcessId {
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }

    pub fn to_le_bytes(&self) -> [u8; 8] {
        self.0.to_le_bytes()
    }
}

impl Display for ProcessId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Identity of a message on a single reliable link. Assigned from a per-link
/// monotonic counter starting at 1; scoped to the sending side of the link.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize)]
pub struct MessageId(u64);

impl MessageId {
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }

    pub fn to_le_bytes(&self) -> [u8; 8] {
        self.0.to_le_bytes()
    }
}

impl Display for MessageId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Sequence number of a broadcast message, assigned by its author from a
/// per-process monotonic counter starting at 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize)]
pub struct Sequence(u32);

impl Sequence {
    pub const fn new(int: u32) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u32 {
        self.0
    }

    pub fn to_le_bytes(&self) -> [u8; 4] {
        self.0.to_le_bytes()
    }
}

impl Display for Sequence {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Add<u32> for Sequence {
    type Output = Sequence;
    fn add(self, rhs: u32) -> Self::Output {
        Sequence::new(self.0 + rhs)
    }
}

impl AddAssign<u32> for Sequence {
    fn add_assign(&mut self, rhs: u32) {
        self.0 += rhs
    }
}

/// Number of an agreement round. Rounds are numbered from 1; each round runs
/// an independent lattice agreement instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize)]
pub struct Round(u32);

impl Round {
    pub const fn new(int: u32) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u32 {
        self.0
    }
}

impl Display for Round {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Add<u32> for Round {
    type Output = Round;
    fn add(self, rhs: u32) -> Self::Output {
        Round::new(self.0 + rhs)
    }
}

/// Number of a proposal attempt within a round. Starts at 1 and is bumped on
/// every nack-driven revision; never decreases.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize)]
pub struct ProposalNumber(u32);

impl ProposalNumber {
    pub const fn new(int: u32) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u32 {
        self.0
    }
}

impl Display for ProposalNumber {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl AddAssign<u32> for ProposalNumber {
    fn add_assign(&mut self, rhs: u32) {
        self.0 += rhs
    }
}
