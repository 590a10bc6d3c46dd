//! Fork-join execution over hosts and workers.
//!
//! Every physical host is a partition inside one process, so "running on a
//! host" means running on a scoped thread that is handed that host's id. The
//! primitives here are the only place construction and synchronisation fan
//! work out; callers never spawn threads themselves.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, Scope, ScopedJoinHandle};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::types::{GraphError, HostId, Result};

/// Shape of the simulated machine: `num_hosts` partitions, each driven by
/// `workers_per_host` ingest workers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Runtime {
    num_hosts: usize,
    workers_per_host: usize,
}

impl Runtime {
    /// Creates a runtime, rejecting zero hosts or zero workers.
    pub fn new(num_hosts: usize, workers_per_host: usize) -> Result<Self> {
        if num_hosts == 0 {
            return Err(GraphError::Invalid("num_hosts must be at least 1"));
        }
        if workers_per_host == 0 {
            return Err(GraphError::Invalid("workers_per_host must be at least 1"));
        }
        if num_hosts > u32::MAX as usize {
            return Err(GraphError::Invalid("num_hosts does not fit a host id"));
        }
        Ok(Self {
            num_hosts,
            workers_per_host,
        })
    }

    /// Number of hosts.
    pub fn num_hosts(&self) -> usize {
        self.num_hosts
    }

    /// Ingest workers per host.
    pub fn workers_per_host(&self) -> usize {
        self.workers_per_host
    }

    /// Total ingest workers across all hosts.
    pub fn num_workers(&self) -> usize {
        self.num_hosts * self.workers_per_host
    }

    /// Every host id in order.
    pub fn hosts(&self) -> impl Iterator<Item = HostId> + Clone {
        HostId::all(self.num_hosts)
    }

    /// Host that runs global worker `worker`.
    pub fn host_of_worker(&self, worker: usize) -> HostId {
        HostId((worker / self.workers_per_host) as u32)
    }

    /// Runs `f` once per host and returns the results in host order.
    pub fn on_each_host<T, F>(&self, label: &str, f: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(HostId) -> Result<T> + Sync,
    {
        do_all(label, self.hosts(), f)
    }

    /// Runs `f` once per global worker index and returns the results in worker order.
    pub fn on_each_worker<T, F>(&self, label: &str, f: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(usize) -> Result<T> + Sync,
    {
        do_all(label, 0..self.num_workers(), f)
    }

    /// Opens a task scope for explicit remote spawns.
    ///
    /// Every task spawned inside the scope, detached or not, has finished by
    /// the time this returns.
    pub fn scope<'env, F, R>(&self, f: F) -> R
    where
        F: for<'scope> FnOnce(&TaskScope<'scope, 'env>) -> R,
    {
        let num_hosts = self.num_hosts;
        thread::scope(|inner| {
            let scope = TaskScope {
                inner,
                num_hosts,
                detached: Arc::new(Detached::default()),
            };
            let out = f(&scope);
            scope.detached.group.wait();
            out
        })
    }
}

/// Fork-join over `items`: one scoped thread per item, all joined before returning.
///
/// Results come back in item order. When several tasks fail, the error of
/// the earliest item is returned; a panicking task surfaces as
/// [`GraphError::TaskPanicked`] instead of unwinding into the caller.
pub fn do_all<I, T, F>(label: &str, items: I, f: F) -> Result<Vec<T>>
where
    I: IntoIterator,
    I::Item: Send,
    T: Send,
    F: Fn(I::Item) -> Result<T> + Sync,
{
    let f = &f;
    thread::scope(|s| {
        let mut handles = Vec::new();
        for (i, item) in items.into_iter().enumerate() {
            let handle = thread::Builder::new()
                .name(format!("{label}-{i}"))
                .spawn_scoped(s, move || f(item))?;
            handles.push(handle);
        }
        trace!(label, tasks = handles.len(), "runtime.do_all.spawned");
        collect_joined(
            handles
                .into_iter()
                .enumerate()
                .map(|(i, handle)| join_named(handle, || format!("{label}-{i}"))),
        )
    })
}

fn join_named<T>(
    handle: ScopedJoinHandle<'_, Result<T>>,
    name: impl FnOnce() -> String,
) -> Result<T> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(GraphError::TaskPanicked { task: name() }),
    }
}

fn collect_joined<T>(results: impl Iterator<Item = Result<T>>) -> Result<Vec<T>> {
    let mut out = Vec::new();
    let mut first_err = None;
    // Keep draining so every task is joined even after a failure.
    for result in results {
        match result {
            Ok(value) => out.push(value),
            Err(err) => {
                first_err.get_or_insert(err);
            }
        }
    }
    match first_err {
        Some(err) => Err(err),
        None => Ok(out),
    }
}

/// Counter that lets one thread wait until a set of tasks has signalled completion.
#[derive(Debug, Default)]
pub struct WaitGroup {
    pending: Mutex<usize>,
    zero: Condvar,
}

impl WaitGroup {
    /// Creates a group with nothing outstanding.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `count` more outstanding tasks.
    pub fn add(&self, count: usize) {
        *self.pending.lock() += count;
    }

    /// Marks one task finished, waking waiters when none remain.
    pub fn done(&self) {
        let mut pending = self.pending.lock();
        debug_assert!(*pending > 0, "WaitGroup::done without matching add");
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.zero.notify_all();
        }
    }

    /// Blocks until every registered task called [`WaitGroup::done`].
    pub fn wait(&self) {
        let mut pending = self.pending.lock();
        while *pending > 0 {
            self.zero.wait(&mut pending);
        }
    }

    /// Tasks still outstanding.
    pub fn pending(&self) -> usize {
        *self.pending.lock()
    }
}

#[derive(Default)]
struct Detached {
    group: WaitGroup,
    errors: Mutex<Vec<GraphError>>,
}

/// Spawn point for tasks addressed to a particular host.
pub struct TaskScope<'scope, 'env: 'scope> {
    inner: &'scope Scope<'scope, 'env>,
    num_hosts: usize,
    detached: Arc<Detached>,
}

/// Result of [`TaskScope::execute_on`]; join it to collect the task's value.
pub struct TaskHandle<'scope, T> {
    name: String,
    handle: ScopedJoinHandle<'scope, Result<T>>,
}

impl<T> TaskHandle<'_, T> {
    /// Thread name of the task.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Waits for the task and returns what it produced.
    pub fn join(self) -> Result<T> {
        let name = self.name;
        join_named(self.handle, || name)
    }
}

/// Joins every handle, returning values in handle order or the first error.
pub fn join_all<'scope, T>(
    handles: impl IntoIterator<Item = TaskHandle<'scope, T>>,
) -> Result<Vec<T>> {
    collect_joined(handles.into_iter().map(TaskHandle::join))
}

impl<'scope, 'env> TaskScope<'scope, 'env> {
    /// Number of hosts tasks may target.
    pub fn num_hosts(&self) -> usize {
        self.num_hosts
    }

    /// Runs `f` on `host` and returns a handle for its result.
    pub fn execute_on<T, F>(&self, host: HostId, f: F) -> Result<TaskHandle<'scope, T>>
    where
        T: Send + 'scope,
        F: FnOnce(HostId) -> Result<T> + Send + 'scope,
    {
        self.check_host(host)?;
        let name = format!("{host}-task");
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn_scoped(self.inner, move || f(host))?;
        Ok(TaskHandle { name, handle })
    }

    /// Runs `f` on `host` without a handle; failures are reported by [`TaskScope::wait`].
    pub fn execute_detached<F>(&self, host: HostId, f: F) -> Result<()>
    where
        F: FnOnce(HostId) -> Result<()> + Send + 'scope,
    {
        self.check_host(host)?;
        let detached = Arc::clone(&self.detached);
        detached.group.add(1);
        let name = format!("{host}-detached");
        let task = name.clone();
        let spawned = thread::Builder::new()
            .name(name)
            .spawn_scoped(self.inner, move || {
                let failure = match panic::catch_unwind(AssertUnwindSafe(|| f(host))) {
                    Ok(Ok(())) => None,
                    Ok(Err(err)) => Some(err),
                    Err(_) => Some(GraphError::TaskPanicked { task }),
                };
                if let Some(err) = failure {
                    detached.errors.lock().push(err);
                }
                detached.group.done();
            });
        if let Err(err) = spawned {
            self.detached.group.done();
            return Err(err.into());
        }
        Ok(())
    }

    /// Blocks until every detached task spawned so far has finished.
    ///
    /// Returns the first recorded failure and forgets the rest.
    pub fn wait(&self) -> Result<()> {
        self.detached.group.wait();
        let mut errors = std::mem::take(&mut *self.detached.errors.lock());
        if errors.len() > 1 {
            debug!(failures = errors.len(), "runtime.scope.wait.errors");
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.swap_remove(0))
        }
    }

    fn check_host(&self, host: HostId) -> Result<()> {
        if host.index() >= self.num_hosts {
            return Err(GraphError::Invalid("task addressed to unknown host"));
        }
        Ok(())
    }
}
