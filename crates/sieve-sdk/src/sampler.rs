//! Adaptive sampler for decision events.
//!
//! Under the `sampled` capture level only a subset of a step's items are
//! upgraded to full decision events. The selection is fully deterministic:
//! for identical `(i, n, k)` the answer is identical across processes, so a
//! retried step produces the same sample and replays converge. The first and
//! last indices are always retained so first/last-item regressions are never
//! lost, and the retention target grows logarithmically so storage stays
//! bounded for very large steps.

/// Number of events to retain for a step with `n` items.
///
/// Small steps are kept whole, mid-sized steps keep five, and very large
/// steps scale as `ceil(10·log10 n)` capped at 100.
pub fn target_size(n: usize) -> usize {
    if n <= 5 {
        n
    } else if n <= 1000 {
        5
    } else {
        let scaled = (10.0 * (n as f64).log10()).ceil() as usize;
        scaled.min(100)
    }
}

/// Whether index `i` of an `n`-item step should become a decision event,
/// given a retention target of `k`.
///
/// Boundary indices are always sampled. When the step fits in the target
/// every index is sampled. Otherwise the interior `(0, n-1)` is divided into
/// `k - 2` equal buckets and the first index of each bucket is retained,
/// giving ≈ `k - 2` uniformly spaced interior picks without any RNG.
pub fn should_sample(i: usize, n: usize, k: usize) -> bool {
    if n == 0 || i >= n {
        return false;
    }
    if i == 0 || i == n - 1 {
        return true;
    }
    if n <= k {
        return true;
    }

    let interior = k.saturating_sub(2);
    if interior == 0 {
        return false;
    }

    // Retain i exactly when it crosses into a new bucket.
    let bucket = |index: usize| index * interior / (n - 1);
    bucket(i) != bucket(i - 1)
}
