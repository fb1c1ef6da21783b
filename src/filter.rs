use crate::cli::ArgInterval;
use crate::fasta::SequenceRecord;

pub struct FilterOpts {
    pub len: ArgInterval,
}

pub fn filter(record: &SequenceRecord, opts: &FilterOpts) -> bool {
    opts.len.contains(record.len() as f64)
}

/// Keeps the records whose length lies within `opts.len`, preserving their order.
pub fn retain_by_length(records: Vec<SequenceRecord>, opts: &FilterOpts) -> Vec<SequenceRecord> {
    let before = records.len();
    let retained: Vec<SequenceRecord> = records.into_iter().filter(|r| filter(r, opts)).collect();

    info!(
        "Retained {} of {} sequences with length in {}",
        retained.len(),
        before,
        opts.len
    );
    retained
}
