/// The core's failure taxonomy is deliberately narrow — see the crate-level
/// docs. Every query-shaped operation degrades to an empty result rather
/// than an `Err`; this type exists solely for the one genuinely observable
/// fallback: a parallel build that couldn't actually run in parallel.
#[derive(Debug, thiserror::Error)]
pub enum AccelError {
    #[error("worker pool unusable ({reason}), falling back to sequential build")]
    ParallelBuildUnavailable { reason: &'static str },
}
