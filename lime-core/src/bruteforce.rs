//! Parallel account-id recovery.
//!
//! The stored segment-0 checksum is a decryption-correctness oracle: a
//! candidate id that decrypts segment 0 to a payload with a matching
//! checksum is the id the file was signed with. The candidate space is
//! split into fixed batches handed out to a bounded worker pool; the first
//! match wins and stops the remaining workers.

use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;

use crate::aes::{self, KeySchedule};
use crate::codec::{PAYLOAD_SIZE, Segment};
use crate::error::LimeError;
use crate::kdf::derive_segment_key;
use crate::sponge;

/// Number of batches the candidate space is partitioned into.
pub const BATCH_COUNT: u64 = 100;

/// Tests one candidate against the stored segment-0 checksum. The segment
/// itself is never mutated; `scratch` is the worker's private page buffer.
fn candidate_matches(
    segment: &Segment,
    candidate: u32,
    scratch: &mut [u8; PAYLOAD_SIZE],
) -> Result<bool, LimeError> {
    let key = derive_segment_key(candidate, &segment.banks)?;
    let schedule = KeySchedule::expand(&key);
    scratch.copy_from_slice(&segment.payload[..]);
    aes::apply_keystream(&schedule, &mut scratch[..]);
    Ok(sponge::checksum(&scratch[..]) == segment.checksum)
}

fn worker(
    segment: &Segment,
    start: u64,
    end: u64,
    batch_len: u64,
    batch_count: u64,
    next_batch: &AtomicU64,
    stop: &AtomicBool,
    cancel: &AtomicBool,
    attempts: &AtomicU64,
) -> Result<Option<u32>, LimeError> {
    let mut scratch = Box::new([0u8; PAYLOAD_SIZE]);
    loop {
        // Cancellation is cooperative and checked between batches only;
        // an in-flight batch always runs to completion.
        if stop.load(Ordering::Relaxed) || cancel.load(Ordering::Relaxed) {
            return Ok(None);
        }
        let batch = next_batch.fetch_add(1, Ordering::Relaxed);
        if batch >= batch_count {
            return Ok(None);
        }
        let lo = start + batch * batch_len;
        if lo > end {
            return Ok(None);
        }
        let hi = (lo + batch_len - 1).min(end);
        for candidate in lo..=hi {
            if stop.load(Ordering::Relaxed) {
                return Ok(None);
            }
            match candidate_matches(segment, candidate as u32, &mut scratch) {
                Ok(true) => {
                    stop.store(true, Ordering::SeqCst);
                    return Ok(Some(candidate as u32));
                }
                Ok(false) => {}
                Err(err) => {
                    stop.store(true, Ordering::SeqCst);
                    return Err(err);
                }
            }
            attempts.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Searches `range` for the account id that validates `segment`'s checksum.
///
/// Returns `Ok(Some(id))` on a match, `Ok(None)` when the range is
/// exhausted, and `Err(LimeError::Canceled)` when `cancel` was raised before
/// a match turned up. `attempts` is advanced once per tested candidate.
pub fn find_account_id(
    segment: &Segment,
    range: RangeInclusive<u32>,
    cancel: &AtomicBool,
    attempts: &AtomicU64,
) -> Result<Option<u32>, LimeError> {
    let start = *range.start() as u64;
    let end = *range.end() as u64;
    if start > end {
        return Ok(None);
    }
    let span = end - start + 1;
    let batch_count = BATCH_COUNT.min(span);
    let batch_len = span.div_ceil(batch_count);
    let workers = thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
        .saturating_sub(1)
        .max(1)
        .min(batch_count as usize);

    let next_batch = AtomicU64::new(0);
    let stop = AtomicBool::new(false);

    let results: Vec<Result<Option<u32>, LimeError>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                scope.spawn(|| {
                    worker(
                        segment,
                        start,
                        end,
                        batch_len,
                        batch_count,
                        &next_batch,
                        &stop,
                        cancel,
                        attempts,
                    )
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("search worker panicked"))
            .collect()
    });

    let mut failure = None;
    for result in results {
        match result {
            Ok(Some(id)) => return Ok(Some(id)),
            Ok(None) => {}
            Err(err) => failure = Some(err),
        }
    }
    if let Some(err) = failure {
        return Err(err);
    }
    if cancel.load(Ordering::SeqCst) {
        return Err(LimeError::Canceled);
    }
    Ok(None)
}
