//! Chunked data parallelism shared by every per-binary stage.
//!
//! Stages are run one after another; within a stage the work list is split
//! into contiguous chunks, each chunk is handed to its own worker thread, and
//! the chunk results are concatenated once every worker has returned.

/// Split `items` into `workers` contiguous chunks and run `stage` on each.
///
/// Chunk sizes differ by at most one (the first `len % workers` chunks take
/// the extra item). Results are concatenated in chunk order. `stage` must not
/// depend on any other chunk's output.
pub fn parallel_map<T, R, F>(items: Vec<T>, workers: usize, stage: F) -> Vec<R>
where
    T: Send,
    R: Send,
    F: Fn(Vec<T>) -> Vec<R> + Sync,
{
    let chunks = split_chunks(items, workers.max(1));
    if chunks.len() <= 1 {
        return chunks.into_iter().flat_map(&stage).collect();
    }

    let stage = &stage;
    std::thread::scope(|scope| {
        let handles: Vec<_> =
            chunks.into_iter().map(|chunk| scope.spawn(move || stage(chunk))).collect();

        let mut out = Vec::new();
        for handle in handles {
            match handle.join() {
                Ok(results) => out.extend(results),
                Err(panic) => std::panic::resume_unwind(panic),
            }
        }
        out
    })
}

/// Contiguous, near-equal split; empty chunks are dropped.
pub fn split_chunks<T>(items: Vec<T>, parts: usize) -> Vec<Vec<T>> {
    let parts = parts.max(1);
    let len = items.len();
    let base = len / parts;
    let extra = len % parts;

    let mut chunks = Vec::with_capacity(parts.min(len));
    let mut iter = items.into_iter();
    for idx in 0..parts {
        let size = base + usize::from(idx < extra);
        if size == 0 {
            break;
        }
        chunks.push(iter.by_ref().take(size).collect());
    }
    chunks
}
