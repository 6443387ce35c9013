use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc;

use anyhow::Context;

/// Runs `prepare` for every path on a bounded rayon pool and hands each
/// result to `apply` on the calling thread, in input order.
///
/// Workers may finish out of order; results wait in a reorder buffer until
/// every earlier sequence number has been applied, so whatever `apply`
/// assigns (catalog ids) depends only on the input order.
pub(crate) fn run_batch<T, E, P, A>(
    workers: usize,
    paths: &[PathBuf],
    prepare: P,
    mut apply: A,
) -> anyhow::Result<()>
where
    T: Send,
    E: Send,
    P: Fn(&Path) -> Result<T, E> + Sync,
    A: FnMut(&Path, Result<T, E>),
{
    if paths.is_empty() {
        return Ok(());
    }
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .thread_name(|i| format!("imagedb-ingest-{i}"))
        .build()
        .context("build ingest worker pool")?;

    std::thread::scope(|scope| {
        let (tx, rx) = mpsc::channel::<(usize, Result<T, E>)>();
        let pool = &pool;
        let prepare = &prepare;
        scope.spawn(move || {
            pool.scope(|s| {
                for (seq, path) in paths.iter().enumerate() {
                    let tx = tx.clone();
                    s.spawn(move |_| {
                        // The receiver only goes away if the writer panicked.
                        let _ = tx.send((seq, prepare(path)));
                    });
                }
            });
        });

        let mut pending: BTreeMap<usize, Result<T, E>> = BTreeMap::new();
        let mut next = 0usize;
        for (seq, out) in rx {
            pending.insert(seq, out);
            while let Some(out) = pending.remove(&next) {
                apply(&paths[next], out);
                next += 1;
            }
        }
    });
    Ok(())
}
