/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Wire format of the agreement layer, carried as a broadcast payload:
//! `[kind: u8][round: u32 LE][number: u32 LE][count-prefixed u32 LE list]`.
//! Acks carry an empty list. Borsh produces exactly this layout.

use std::collections::HashSet;

use borsh::{BorshDeserialize, BorshSerialize};

use crate::messages::DeserializeError;
use crate::types::{ProposalNumber, Round};

#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub(crate) enum AgreementKind {
    Proposal,
    Ack,
    Nack,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub(crate) struct AgreementFrame {
    pub(crate) kind: AgreementKind,
    pub(crate) round: Round,
    pub(crate) number: ProposalNumber,
    pub(crate) values: Vec<u32>,
}

impl AgreementFrame {
    pub(crate) fn proposal(round: Round, number: ProposalNumber, values: &HashSet<u32>) -> AgreementFrame {
        AgreementFrame {
            kind: AgreementKind::Proposal,
            round,
            number,
            values: sorted(values),
        }
    }

    pub(crate) fn ack(round: Round, number: ProposalNumber) -> AgreementFrame {
        AgreementFrame {
            kind: AgreementKind::Ack,
            round,
            number,
            values: Vec::new(),
        }
    }

    pub(crate) fn nack(round: Round, number: ProposalNumber, values: &HashSet<u32>) -> AgreementFrame {
        AgreementFrame {
            kind: AgreementKind::Nack,
            round,
            number,
            values: sorted(values),
        }
    }

    pub(crate) fn serialize(&self) -> Vec<u8> {
        self.try_to_vec().unwrap()
    }

    pub(crate) fn parse(bytes: &[u8]) -> Result<AgreementFrame, DeserializeError> {
        AgreementFrame::try_from_slice(bytes).map_err(|_| DeserializeError)
    }
}

/// Value sets travel sorted so that equal sets have equal encodings.
pub(crate) fn sorted(values: &HashSet<u32>) -> Vec<u32> {
    let mut values: Vec<u32> = values.iter().copied().collect();
    values.sort_unstable();
    values
}
