//! High-level operations over raw file bytes, plus the batch engine.
//!
//! Callers hand in whole file images and get transformed images back; file
//! system access, progress display and prompting stay with the caller. The
//! engine runs at most one batch at a time: a request issued while another
//! is in flight is a no-op, not queued.

use std::ops::RangeInclusive;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread;

use crate::bruteforce;
use crate::codec::{SaveFile, Segment};
use crate::error::LimeError;

/// Offset between a Steam64 id and the 32-bit account id it embeds.
pub const STEAM64_BASE: u64 = 76561197960265728;

/// Extracts the 32-bit account id from a Steam64 identifier.
pub fn account_id_from_steam64(steam_id: u64) -> u32 {
    steam_id.wrapping_sub(STEAM64_BASE) as u32
}

/// Decrypts a file image to its raw payload. An already-decrypted image
/// passes through unchanged.
pub fn unpack(bytes: &[u8], account_id: u32) -> Result<Vec<u8>, LimeError> {
    let mut file = SaveFile::parse(bytes)?;
    if file.is_encrypted() {
        file.decrypt(account_id)?;
    }
    Ok(file.serialize())
}

/// Encrypts a raw payload image into a Lime container.
pub fn pack(bytes: &[u8], account_id: u32) -> Result<Vec<u8>, LimeError> {
    let mut file = SaveFile::parse(bytes)?;
    if file.is_encrypted() {
        return Err(LimeError::BadState("file is already encrypted"));
    }
    file.encrypt(account_id)?;
    Ok(file.serialize())
}

/// Re-signs a file image for a different account: decrypt under
/// `from_account` when the image is encrypted, then encrypt under
/// `to_account`. On a plain image this is exactly `pack`.
pub fn resign(bytes: &[u8], from_account: u32, to_account: u32) -> Result<Vec<u8>, LimeError> {
    let mut file = SaveFile::parse(bytes)?;
    if file.is_encrypted() {
        file.decrypt(from_account)?;
    }
    file.encrypt(to_account)?;
    Ok(file.serialize())
}

/// Outcome for one item of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Transformed image, ready to be written out.
    Done(Vec<u8>),
    /// The item failed and was skipped; the batch carried on.
    Skipped(LimeError),
    /// The batch was canceled before this item started.
    Canceled,
}

/// Per-batch tally of item outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub processed: usize,
    pub skipped: usize,
    pub canceled: usize,
}

/// Drives unpack/pack/resign/search requests, one batch at a time.
#[derive(Debug, Default)]
pub struct Engine {
    busy: AtomicBool,
    cancel: AtomicBool,
    progress: AtomicU64,
}

impl Engine {
    pub fn new() -> Engine {
        Engine::default()
    }

    /// Raises the cooperative cancellation signal for the running batch.
    /// Workers stop picking up new items; in-flight items finish.
    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Items completed so far (batch) or candidates tested (search).
    pub fn progress(&self) -> u64 {
        self.progress.load(Ordering::Relaxed)
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    fn begin(&self) -> bool {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        self.cancel.store(false, Ordering::SeqCst);
        self.progress.store(0, Ordering::SeqCst);
        true
    }

    fn finish(&self) {
        self.busy.store(false, Ordering::SeqCst);
    }

    /// Runs `op` over every item with a bounded worker pool. Returns `None`
    /// when another batch is already in flight. Per-item failures are
    /// recorded and skipped; they never abort the batch.
    pub fn run_batch<F>(&self, items: &[Vec<u8>], op: F) -> Option<(Vec<ItemOutcome>, BatchReport)>
    where
        F: Fn(&[u8]) -> Result<Vec<u8>, LimeError> + Sync,
    {
        if !self.begin() {
            return None;
        }
        let workers = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2)
            .saturating_sub(1)
            .max(1)
            .min(items.len().max(1));
        let outcomes = self.run_batch_on(items, &op, workers);
        self.finish();

        let mut report = BatchReport::default();
        for outcome in outcomes.iter() {
            match outcome {
                ItemOutcome::Done(_) => report.processed += 1,
                ItemOutcome::Skipped(_) => report.skipped += 1,
                ItemOutcome::Canceled => report.canceled += 1,
            }
        }
        Some((outcomes, report))
    }

    fn run_batch_on<F>(&self, items: &[Vec<u8>], op: &F, workers: usize) -> Vec<ItemOutcome>
    where
        F: Fn(&[u8]) -> Result<Vec<u8>, LimeError> + Sync,
    {
        let next_item = AtomicUsize::new(0);
        let slots: Vec<Mutex<Option<ItemOutcome>>> =
            items.iter().map(|_| Mutex::new(None)).collect();

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| {
                    loop {
                        let index = next_item.fetch_add(1, Ordering::Relaxed);
                        if index >= items.len() {
                            break;
                        }
                        // Cancellation stops new items only; a started item
                        // always runs to completion.
                        let outcome = if self.cancel.load(Ordering::SeqCst) {
                            ItemOutcome::Canceled
                        } else {
                            match op(&items[index]) {
                                Ok(bytes) => ItemOutcome::Done(bytes),
                                Err(err) => ItemOutcome::Skipped(err),
                            }
                        };
                        if let Ok(mut slot) = slots[index].lock() {
                            *slot = Some(outcome);
                        }
                        self.progress.fetch_add(1, Ordering::Relaxed);
                    }
                });
            }
        });

        slots
            .into_iter()
            .map(|slot| {
                slot.into_inner()
                    .ok()
                    .flatten()
                    .unwrap_or(ItemOutcome::Canceled)
            })
            .collect()
    }

    /// Brute-force search over `range` for segment 0's account id. Returns
    /// `None` when another batch is already in flight.
    pub fn search(
        &self,
        segment: &Segment,
        range: RangeInclusive<u32>,
    ) -> Option<Result<Option<u32>, LimeError>> {
        if !self.begin() {
            return None;
        }
        let result = bruteforce::find_account_id(segment, range, &self.cancel, &self.progress);
        self.finish();
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn sample_payload(len: usize, seed: u64) -> Vec<u8> {
        let mut payload = vec![0u8; len];
        StdRng::seed_from_u64(seed).fill_bytes(&mut payload);
        payload
    }

    #[test]
    fn test_steam64_extraction() {
        assert_eq!(account_id_from_steam64(STEAM64_BASE + 12345), 12345);
        assert_eq!(account_id_from_steam64(76561197960265729), 1);
    }

    #[test]
    fn test_pack_unpack_round_trip() {
        let payload = sample_payload(6000, 1);
        let packed = pack(&payload, 777).unwrap();
        assert_ne!(packed, payload);
        assert_eq!(unpack(&packed, 777).unwrap(), payload);
    }

    #[test]
    fn test_unpack_passes_plain_files_through() {
        let payload = sample_payload(1000, 2);
        assert_eq!(unpack(&payload, 42).unwrap(), payload);
    }

    #[test]
    fn test_pack_rejects_encrypted_input() {
        let packed = pack(&sample_payload(100, 3), 1).unwrap();
        assert!(matches!(pack(&packed, 1), Err(LimeError::BadState(_))));
    }

    #[test]
    fn test_resign_moves_file_between_accounts() {
        let payload = sample_payload(9000, 4);
        let packed = pack(&payload, 111).unwrap();
        let resigned = resign(&packed, 111, 222).unwrap();
        assert_eq!(unpack(&resigned, 222).unwrap(), payload);
        assert!(matches!(
            unpack(&resigned, 111),
            Err(LimeError::WrongKey)
        ));
    }

    #[test]
    fn test_resign_on_plain_file_equals_pack() {
        let payload = sample_payload(500, 5);
        let resigned = resign(&payload, 0, 333).unwrap();
        assert_eq!(unpack(&resigned, 333).unwrap(), payload);
    }

    #[test]
    fn test_resign_with_wrong_source_account_fails() {
        let packed = pack(&sample_payload(100, 6), 1).unwrap();
        assert!(matches!(resign(&packed, 2, 3), Err(LimeError::WrongKey)));
    }

    #[test]
    fn test_batch_skips_failures_and_continues() {
        let engine = Engine::new();
        let good = sample_payload(100, 7);
        let packed = pack(&good, 9).unwrap();
        let items = vec![packed.clone(), packed.clone(), packed];
        let (outcomes, report) = engine
            .run_batch(&items, |bytes| {
                let payload = unpack(bytes, 9)?;
                if payload.is_empty() {
                    return Err(LimeError::WrongKey);
                }
                Ok(payload)
            })
            .unwrap();
        assert_eq!(report.processed, 3);
        assert_eq!(report.skipped, 0);
        assert!(outcomes.iter().all(|o| matches!(o, ItemOutcome::Done(_))));

        // A wrong account id is a skip, not an abort.
        let items = vec![items[0].clone()];
        let (outcomes, report) = engine
            .run_batch(&items, |bytes| unpack(bytes, 10))
            .unwrap();
        assert_eq!(report.skipped, 1);
        assert!(matches!(
            outcomes[0],
            ItemOutcome::Skipped(LimeError::WrongKey)
        ));
    }

    #[test]
    fn test_cancel_stops_issuing_items() {
        let engine = Engine::new();
        let items: Vec<Vec<u8>> = (0..4).map(|i| sample_payload(64, i)).collect();
        let outcomes = {
            // One worker makes the schedule deterministic: the first item
            // cancels the batch and the rest must come back as canceled.
            engine.begin();
            let result = engine.run_batch_on(
                &items,
                &|bytes: &[u8]| {
                    engine.request_cancel();
                    Ok(bytes.to_vec())
                },
                1,
            );
            engine.finish();
            result
        };
        assert!(matches!(outcomes[0], ItemOutcome::Done(_)));
        assert!(
            outcomes[1..]
                .iter()
                .all(|o| matches!(o, ItemOutcome::Canceled))
        );
    }

    #[test]
    fn test_engine_is_single_flight() {
        let engine = Engine::new();
        let items = vec![sample_payload(32, 11)];
        let (_, _) = engine
            .run_batch(&items, |bytes| {
                // A nested request while this batch runs must be refused.
                assert!(engine.run_batch(&[], |b| Ok(b.to_vec())).is_none());
                Ok(bytes.to_vec())
            })
            .unwrap();
        assert!(!engine.is_busy());
    }

    #[test]
    fn test_search_through_engine() {
        let engine = Engine::new();
        let payload = sample_payload(4096, 12);
        let packed = pack(&payload, 4321).unwrap();
        let file = SaveFile::parse(&packed).unwrap();
        let found = engine
            .search(&file.segments[0], 4320..=4325)
            .unwrap()
            .unwrap();
        assert_eq!(found, Some(4321));
        assert!(engine.progress() <= 6);
    }
}
