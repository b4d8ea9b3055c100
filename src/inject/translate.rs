//! Address translation from the original file to the stitched file
//!
//! Every repair step after stitching asks the same question: where did the
//! byte at original address `a` end up? Inserted bytes go immediately before
//! the byte at each insertion point, so
//!
//! `translate(a) = a + sum(len for each insertion with point <= a)`
//!
//! The map is immutable and shared by all repair steps.

use crate::error::{Error, Result};

/// `len` bytes inserted before original address `at`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Insertion {
    pub at: u64,
    pub bytes: Vec<u8>,
}

impl Insertion {
    pub fn new(at: u64, bytes: Vec<u8>) -> Self {
        Self { at, bytes }
    }

    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Ordered set of insertions with the translation rule over them
#[derive(Debug, Clone)]
pub struct AddressMap {
    insertions: Vec<Insertion>,
}

impl AddressMap {
    /// Sort insertions by address; two insertions at the same point are
    /// ambiguous and rejected
    pub fn new(mut insertions: Vec<Insertion>) -> Result<Self> {
        insertions.sort_by_key(|i| i.at);
        for pair in insertions.windows(2) {
            if pair[0].at == pair[1].at {
                return Err(Error::InvalidInput(format!(
                    "two insertions at offset {}",
                    pair[0].at
                )));
            }
        }
        Ok(Self { insertions })
    }

    pub fn insertions(&self) -> &[Insertion] {
        &self.insertions
    }

    /// Total number of inserted bytes
    pub fn total(&self) -> u64 {
        self.insertions.iter().map(Insertion::len).sum()
    }

    /// How far the byte at original address `addr` moves
    pub fn shift(&self, addr: u64) -> u64 {
        self.insertions
            .iter()
            .take_while(|i| i.at <= addr)
            .map(Insertion::len)
            .sum()
    }

    pub fn translate(&self, addr: u64) -> u64 {
        addr + self.shift(addr)
    }

    /// Bytes inserted strictly inside `(start, end]`, i.e. the growth of a
    /// span that encloses its insertion points
    pub fn growth(&self, start: u64, end: u64) -> u64 {
        self.insertions
            .iter()
            .filter(|i| i.at > start && i.at <= end)
            .map(Insertion::len)
            .sum()
    }

    /// First insertion point strictly inside `(start, end)`
    pub fn splits(&self, start: u64, end: u64) -> Option<u64> {
        self.insertions
            .iter()
            .map(|i| i.at)
            .find(|at| *at > start && *at < end)
    }

    /// Copy `source` with every insertion applied, lowest address first
    pub fn stitch(&self, source: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(source.len() + self.total() as usize);
        let mut copied = 0usize;
        for insertion in &self.insertions {
            let at = usize::try_from(insertion.at)
                .ok()
                .filter(|at| *at <= source.len())
                .ok_or(Error::AddressOutOfBounds {
                    offset: insertion.at,
                    len: insertion.len(),
                    file_len: source.len() as u64,
                })?;
            out.extend_from_slice(&source[copied..at]);
            out.extend_from_slice(&insertion.bytes);
            copied = at;
        }
        out.extend_from_slice(&source[copied..]);
        Ok(out)
    }
}
