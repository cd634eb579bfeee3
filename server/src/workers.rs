//! Worker thread management.

use crate::affinity::set_cpu_affinity;
use std::io;
use std::thread::{self, JoinHandle};

/// Handle to a spawned worker thread.
pub struct WorkerHandle<R> {
    pub handle: JoinHandle<R>,
    /// The worker ID (0-indexed)
    pub worker_id: usize,
    /// The CPU ID the worker is pinned to, if any
    pub cpu_id: Option<usize>,
}

/// Spawn `num_workers` threads named `{name_prefix}-{id}`, each running
/// `worker_fn(id)`.
///
/// With a CPU list, worker `i` is pinned to `cpus[i % cpus.len()]`. If any
/// spawn fails the error is returned; workers already started keep running
/// and must be stopped by whatever feeds them.
pub fn spawn_workers<F, R>(
    num_workers: usize,
    cpu_affinity: Option<&[usize]>,
    name_prefix: &str,
    worker_fn: F,
) -> io::Result<Vec<WorkerHandle<R>>>
where
    F: Fn(usize) -> R + Send + Clone + 'static,
    R: Send + 'static,
{
    let mut handles = Vec::with_capacity(num_workers);

    for worker_id in 0..num_workers {
        let cpu_id = cpu_affinity
            .filter(|cpus| !cpus.is_empty())
            .map(|cpus| cpus[worker_id % cpus.len()]);
        let worker_fn = worker_fn.clone();

        let handle = thread::Builder::new()
            .name(format!("{}-{}", name_prefix, worker_id))
            .spawn(move || {
                if let Some(cpu) = cpu_id
                    && let Err(e) = set_cpu_affinity(cpu)
                {
                    tracing::warn!(worker_id, cpu, error = %e, "failed to pin worker");
                }
                worker_fn(worker_id)
            })?;

        handles.push(WorkerHandle {
            handle,
            worker_id,
            cpu_id,
        });
    }

    Ok(handles)
}

/// Wait for all worker threads to complete.
///
/// Returns the results of the workers that exited normally; panicked workers
/// are logged and skipped.
pub fn join_workers<R>(handles: Vec<WorkerHandle<R>>) -> Vec<R> {
    handles
        .into_iter()
        .filter_map(|h| match h.handle.join() {
            Ok(result) => Some(result),
            Err(_) => {
                tracing::error!(worker_id = h.worker_id, "worker thread panicked");
                None
            }
        })
        .collect()
}
