//! Concurrent pulls of several packages.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use ukpack_core::error::{PackError, Result};

use super::{Package, PullOptions};

/// Outcome of one package in a bulk pull.
#[derive(Debug)]
pub struct PullReport {
    /// `type/name:version` of the package
    pub id: String,
    pub result: Result<PathBuf>,
}

/// Membership in the in-flight set; dropping it, even while unwinding,
/// removes the id.
struct InFlight {
    ids: Arc<Mutex<HashSet<String>>>,
    id: String,
}

impl InFlight {
    fn enter(ids: &Arc<Mutex<HashSet<String>>>, id: &str) -> Self {
        ids.lock().insert(id.to_string());
        Self {
            ids: Arc::clone(ids),
            id: id.to_string(),
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.ids.lock().remove(&self.id);
    }
}

fn running(ids: &Mutex<HashSet<String>>) -> Vec<String> {
    let mut running: Vec<_> = ids.lock().iter().cloned().collect();
    running.sort();
    running
}

/// Pull `packages` with at most `concurrency` pulls running at once.
///
/// Packages with the same id are pulled once. Returns one report per unique
/// package, in input order, after every task has finished.
pub async fn pull_all(
    packages: Vec<Package>,
    opts: &PullOptions,
    concurrency: usize,
) -> Vec<PullReport> {
    let permits = Arc::new(Semaphore::new(concurrency.max(1)));
    let in_flight: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));

    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    let mut tasks = JoinSet::new();

    for package in packages {
        let id = package.id();
        if !seen.insert(id.clone()) {
            tracing::warn!(package = %id, "Skipping duplicate package");
            continue;
        }

        let slot = ids.len();
        ids.push(id.clone());

        let permits = Arc::clone(&permits);
        let in_flight = Arc::clone(&in_flight);
        let opts = opts.clone();
        tasks.spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|e| PackError::Other(format!("Pull scheduler closed: {}", e)))?;

            let _entered = InFlight::enter(&in_flight, &id);
            tracing::debug!(package = %id, "Pull started");
            let result = package.pull(&opts).await;

            Ok::<_, PackError>((slot, result))
        });
    }

    let mut results: Vec<Option<Result<PathBuf>>> = (0..ids.len()).map(|_| None).collect();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok((slot, result))) => {
                if let Err(e) = &result {
                    tracing::warn!(package = %ids[slot], error = %e, "Pull failed");
                }
                results[slot] = Some(result);
            }
            Ok(Err(e)) => tracing::error!(error = %e, "Pull task could not start"),
            Err(e) => tracing::error!(
                error = %e,
                still_running = ?running(&in_flight),
                "Pull task panicked"
            ),
        }
        tracing::debug!(remaining = tasks.len(), running = ?running(&in_flight), "Pull finished");
    }

    ids.into_iter()
        .zip(results)
        .map(|(id, result)| PullReport {
            result: result.unwrap_or_else(|| {
                Err(PackError::Other(format!("pull of {} did not complete", id)))
            }),
            id,
        })
        .collect()
}
