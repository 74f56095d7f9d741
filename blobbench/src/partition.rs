use std::ops::Range;

use crate::Error;

/// The contiguous slice of record indices one worker is responsible for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkAssignment {
    pub worker_id: u64,
    pub start_index: u64,
    pub count: u64,
}

impl WorkAssignment {
    pub fn range(&self) -> Range<u64> {
        self.start_index..self.start_index + self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Split `[0, total_records)` into one contiguous range per worker.
///
/// Every worker gets `ceil(total_records / worker_count)` indices except at
/// the tail, where the last non-empty range holds the remainder. Trailing
/// workers whose range starts at or beyond `total_records` get `count == 0`;
/// they are still returned so every phase runs exactly `worker_count` workers.
pub fn partition(total_records: u64, worker_count: u64) -> Result<Vec<WorkAssignment>, Error> {
    if worker_count == 0 {
        return Err(Error::InvalidConfig(
            "cannot partition work across zero workers".to_owned(),
        ));
    }
    let per_worker = total_records.div_ceil(worker_count);
    Ok((0..worker_count)
        .map(|worker_id| {
            let start_index = worker_id * per_worker;
            let count = total_records.saturating_sub(start_index).min(per_worker);
            WorkAssignment {
                worker_id,
                start_index,
                count,
            }
        })
        .collect())
}
