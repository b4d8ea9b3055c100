//! Post-injection verification
//!
//! The stitched file is parsed again from scratch and compared with what the
//! injection intended. Any disagreement means a repair step missed a field,
//! and the output is rejected.

use crate::{
    bmff::{Association, BoxType, HeifFile},
    error::{Error, Result},
    segment::PayloadMap,
    stream::ByteStream,
};
use std::io::{Read, Seek};

const COMPARE_CHUNK: u64 = 64 * 1024;

/// What the output must look like
pub(super) struct Expected<'a> {
    pub original: &'a HeifFile,
    pub original_bytes: &'a [u8],
    pub target: u32,
    pub added: &'a [Association],
    pub added_types: &'a [BoxType],
    pub total_inserted: u64,
}

fn fail(message: String) -> Error {
    log::debug!("verification failed: {}", message);
    Error::VerificationFailed(message)
}

pub(super) fn verify(output: &[u8], expected: &Expected<'_>) -> Result<HeifFile> {
    let original = expected.original;
    let heif = HeifFile::from_bytes(output).map_err(|e| fail(format!("re-parse: {}", e)))?;

    if output.len() as u64 != original.file_len() + expected.total_inserted {
        return Err(fail(format!(
            "output is {} bytes, expected {}",
            output.len(),
            original.file_len() + expected.total_inserted
        )));
    }

    // ipco: original properties in place, new ones appended in order
    let mut types = original.property_types();
    types.extend_from_slice(expected.added_types);
    if heif.property_types() != types {
        return Err(fail(format!(
            "ipco holds {:?}, expected {:?}",
            heif.property_types(),
            types
        )));
    }

    // ipma: target gains exactly the new associations, nobody else changes
    let before = &original.property_association().entries;
    let after = &heif.property_association().entries;
    if before.len() != after.len() {
        return Err(fail(format!(
            "ipma has {} entries, expected {}",
            after.len(),
            before.len()
        )));
    }
    for (old, new) in before.iter().zip(after) {
        let mut wanted = old.associations.clone();
        if old.item_id == expected.target {
            wanted.extend_from_slice(expected.added);
        }
        if new.item_id != old.item_id || new.associations != wanted {
            return Err(fail(format!(
                "item {} associations {:?}, expected item {} with {:?}",
                new.item_id, new.associations, old.item_id, wanted
            )));
        }
    }

    // iloc: every resolvable item still references identical bytes
    let mut old_stream = ByteStream::from_slice(expected.original_bytes);
    let mut new_stream = ByteStream::from_slice(output);
    for item in original.item_locations() {
        if !item.is_resolved() {
            continue;
        }
        let moved = heif
            .item_location(item.item_id)
            .map_err(|e| fail(format!("item {}: {}", item.item_id, e)))?;
        if !moved.is_resolved() {
            return Err(fail(format!("item {} no longer resolves", item.item_id)));
        }
        if !payloads_match(&mut old_stream, item, &mut new_stream, moved, COMPARE_CHUNK)? {
            return Err(fail(format!(
                "item {} data changed after injection",
                item.item_id
            )));
        }
    }

    Ok(heif)
}

/// Compare two payloads `chunk` bytes at a time, without assembling either
fn payloads_match<A, B, M, N>(
    a: &mut ByteStream<A>,
    a_map: &M,
    b: &mut ByteStream<B>,
    b_map: &N,
    chunk: u64,
) -> Result<bool>
where
    A: Read + Seek,
    B: Read + Seek,
    M: PayloadMap + ?Sized,
    N: PayloadMap + ?Sized,
{
    let total = a_map.payload_len();
    if b_map.payload_len() != total {
        return Ok(false);
    }
    let mut pos = 0u64;
    while pos < total {
        let len = (total - pos).min(chunk);
        if read_span(a, a_map, pos, len)? != read_span(b, b_map, pos, len)? {
            return Ok(false);
        }
        pos += len;
    }
    Ok(true)
}

fn read_span<S: Read + Seek, M: PayloadMap + ?Sized>(
    stream: &mut ByteStream<S>,
    map: &M,
    logical: u64,
    len: u64,
) -> Result<Vec<u8>> {
    let mut data = Vec::with_capacity(len as usize);
    for range in map.map_range(logical, len)? {
        data.extend(stream.peek_at(range.offset, range.size as usize)?);
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::ByteRange;

    struct Split(Vec<ByteRange>);

    impl PayloadMap for Split {
        fn extents(&self) -> Vec<ByteRange> {
            self.0.clone()
        }
    }

    #[test]
    fn test_chunked_compare_across_extents() {
        let old = b"....abcdefgh....".to_vec();
        let new = b"efgh......abcd".to_vec();
        let old_map = ByteRange::new(4, 8);
        let new_map = Split(vec![ByteRange::new(10, 4), ByteRange::new(0, 4)]);

        let mut a = ByteStream::from_slice(&old);
        let mut b = ByteStream::from_slice(&new);
        for chunk in [1, 3, 5, 8, 64] {
            assert!(payloads_match(&mut a, &old_map, &mut b, &new_map, chunk).unwrap());
        }
    }

    #[test]
    fn test_chunked_compare_detects_changes() {
        let old = b"abcdefgh".to_vec();
        let mut new = old.clone();
        new[6] = b'X';
        let mut a = ByteStream::from_slice(&old);
        let mut b = ByteStream::from_slice(&new);
        let map = ByteRange::new(0, 8);
        assert!(!payloads_match(&mut a, &map, &mut b, &map, 3).unwrap());
        assert!(!payloads_match(&mut a, &map, &mut b, &ByteRange::new(0, 7), 3).unwrap());
    }
}
