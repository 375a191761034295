//! Splitting a sample total across workers.
//!
//! Every worker gets `total / workers` samples; the remainder goes to the
//! coordinator alone, so the shares always add back up to `total`.

use crate::error::{Error, Result};

/// Rank that absorbs the remainder of an uneven split.
pub const REMAINDER_HOLDER: i32 = 0;

fn check_workers(workers: i32) -> Result<u64> {
    if workers <= 0 {
        return Err(Error::InvalidCount(i64::from(workers)));
    }
    Ok(workers as u64)
}

/// The share every worker receives before the remainder is assigned.
pub fn base_share(total: u64, workers: i32) -> Result<u64> {
    Ok(total / check_workers(workers)?)
}

/// Samples assigned to `rank` out of `workers`.
///
/// # Errors
///
/// Returns [`Error::InvalidCount`] for a non-positive worker count and
/// [`Error::InvalidRank`] for a rank outside `[0, workers)`.
pub fn share(total: u64, workers: i32, rank: i32) -> Result<u64> {
    let count = check_workers(workers)?;
    if !(0..workers).contains(&rank) {
        return Err(Error::InvalidRank(rank));
    }
    let base = total / count;
    if rank == REMAINDER_HOLDER {
        Ok(base + (total - base * count))
    } else {
        Ok(base)
    }
}

/// Every worker's share, indexed by rank.
pub fn partition(total: u64, workers: i32) -> Result<Vec<u64>> {
    check_workers(workers)?;
    (0..workers).map(|rank| share(total, workers, rank)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn three_workers_ten_samples() {
        assert_eq!(partition(10, 3).unwrap(), vec![4, 3, 3]);
    }

    #[test]
    fn zero_total_gives_zero_shares() {
        assert_eq!(partition(0, 4).unwrap(), vec![0; 4]);
    }

    #[test]
    fn more_workers_than_samples() {
        assert_eq!(partition(2, 5).unwrap(), vec![2, 0, 0, 0, 0]);
    }

    #[test]
    fn zero_workers_is_rejected() {
        assert!(matches!(partition(10, 0), Err(Error::InvalidCount(0))));
        assert!(matches!(base_share(10, -1), Err(Error::InvalidCount(-1))));
    }

    #[test]
    fn out_of_range_rank_is_rejected() {
        assert!(matches!(share(10, 3, 3), Err(Error::InvalidRank(3))));
        assert!(matches!(share(10, 3, -1), Err(Error::InvalidRank(-1))));
    }

    proptest! {
        #[test]
        fn shares_cover_total_exactly(total in 0u64..10_000_000, workers in 1i32..256) {
            let shares = partition(total, workers).unwrap();
            prop_assert_eq!(shares.len(), workers as usize);
            prop_assert_eq!(shares.iter().sum::<u64>(), total);
        }

        #[test]
        fn only_the_remainder_holder_differs(total in 0u64..10_000_000, workers in 1i32..256) {
            let base = base_share(total, workers).unwrap();
            let shares = partition(total, workers).unwrap();
            for (rank, share) in shares.iter().enumerate().skip(1) {
                prop_assert_eq!(*share, base, "rank {} got {}", rank, share);
            }
            prop_assert_eq!(shares[0] - base, total % workers as u64);
        }
    }
}
