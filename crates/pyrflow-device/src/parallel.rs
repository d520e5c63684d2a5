use rayon::prelude::*;

use crate::device::ExecutionStrategy;
use crate::graph::NdRange;

/// Apply `f(row_index, row)` to every row of `dst`.
///
/// `row_len` is the number of samples in a row (width * channels). With
/// [`ExecutionStrategy::ParallelRows`] the rows are split into batches of
/// `range.rows_per_task()` rows that run on the current thread pool.
pub fn for_each_row<T>(
    strategy: ExecutionStrategy,
    range: &NdRange,
    dst: &mut [T],
    row_len: usize,
    f: impl Fn(usize, &mut [T]) + Send + Sync,
) where
    T: Send,
{
    if row_len == 0 {
        return;
    }

    match strategy {
        ExecutionStrategy::Serial => {
            dst.chunks_exact_mut(row_len)
                .enumerate()
                .for_each(|(r, row)| f(r, row));
        }
        ExecutionStrategy::ParallelRows => {
            let rows_per_task = range.rows_per_task();
            dst.par_chunks_mut(row_len * rows_per_task)
                .enumerate()
                .for_each(|(task, rows)| {
                    rows.chunks_exact_mut(row_len)
                        .enumerate()
                        .for_each(|(i, row)| f(task * rows_per_task + i, row));
                });
        }
    }
}

/// Index of `i + offset` clamped to `[0, len)`.
///
/// This is the replicate border used by the filtering kernels.
#[inline]
pub fn clamp_index(i: usize, offset: isize, len: usize) -> usize {
    let j = i as isize + offset;
    j.clamp(0, len as isize - 1) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill_rows(strategy: ExecutionStrategy, local: Option<[usize; 2]>) -> Vec<usize> {
        let range = NdRange::new([3, 5].into()).with_local(local);
        let mut dst = vec![0usize; 3 * 5];
        for_each_row(strategy, &range, &mut dst, 3, |r, row| {
            row.iter_mut().enumerate().for_each(|(c, v)| *v = r * 10 + c);
        });
        dst
    }

    #[test]
    fn test_strategies_agree() {
        let serial = fill_rows(ExecutionStrategy::Serial, None);
        assert_eq!(serial[..6], [0, 1, 2, 10, 11, 12]);
        assert_eq!(serial[12..], [40, 41, 42]);
        assert_eq!(fill_rows(ExecutionStrategy::ParallelRows, None), serial);
        assert_eq!(
            fill_rows(ExecutionStrategy::ParallelRows, Some([3, 2])),
            serial
        );
    }

    #[test]
    fn test_clamp_index() {
        assert_eq!(clamp_index(0, -2, 5), 0);
        assert_eq!(clamp_index(1, -1, 5), 0);
        assert_eq!(clamp_index(4, 1, 5), 4);
        assert_eq!(clamp_index(2, 1, 5), 3);
        assert_eq!(clamp_index(0, 3, 1), 0);
    }
}
