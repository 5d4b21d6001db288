//! Deduplicated base box downloads.
//!
//! At most one `vagrant box add` runs per box name. Callers subscribe a
//! one-shot waiter to the in-flight fetch, keyed both by box name and by the
//! Vagrant directory that asked for it, and all of them receive the same
//! result once the fetch ends.

use crate::error::ProvisioningError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use vm_provider::{Machine, ProviderError};

pub type BoxResult = Result<(), ProvisioningError>;

type Waiter = oneshot::Sender<BoxResult>;

/// Handle to one in-flight fetch.
#[derive(Clone)]
struct Ticket {
    id: u64,
    box_name: String,
    queue: mpsc::UnboundedSender<Waiter>,
}

#[derive(Default)]
struct Queues {
    next_id: u64,
    by_name: HashMap<String, Ticket>,
    by_path: HashMap<PathBuf, Ticket>,
}

#[derive(Clone, Default)]
pub struct BoxCoordinator {
    queues: Arc<Mutex<Queues>>,
}

impl BoxCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts fetching `box_name` unless a fetch is already running, and
    /// associates `path` with that fetch. Does not wait.
    pub fn begin(&self, machine: Arc<dyn Machine>, box_name: &str, path: &Path) {
        let mut queues = self.lock();
        self.begin_locked(&mut queues, machine, box_name, path);
    }

    /// Waits for the fetch associated with `path`. Returns immediately when
    /// no fetch is in flight for it.
    pub async fn wait(&self, path: &Path) -> BoxResult {
        let subscription = {
            let mut queues = self.lock();
            if queues.by_path.get(path).is_some_and(|t| t.queue.is_closed()) {
                // The fetch task died without cleaning up.
                queues.by_path.remove(path);
                queues.by_name.retain(|_, t| !t.queue.is_closed());
            }
            queues.by_path.get(path).map(subscribe)
        };

        match subscription {
            Some((box_name, rx)) => receive(box_name, rx).await,
            None => Ok(()),
        }
    }

    /// Makes sure a box is available for `path`: joins the fetch already
    /// associated with `path`, or else starts (or joins) a fetch of
    /// `box_name`, then waits for its result.
    pub async fn ensure(&self, machine: Arc<dyn Machine>, box_name: &str, path: &Path) -> BoxResult {
        // Subscribing under the same lock as `begin` means the fetch cannot
        // finish between the two steps and leave this caller unnotified.
        let (box_name, rx) = {
            let mut queues = self.lock();
            let ticket = match queues.by_path.get(path) {
                Some(ticket) if !ticket.queue.is_closed() => ticket.clone(),
                _ => self.begin_locked(&mut queues, machine, box_name, path),
            };
            subscribe(&ticket)
        };

        receive(box_name, rx).await
    }

    pub fn in_flight(&self, box_name: &str) -> bool {
        self.lock().by_name.contains_key(box_name)
    }

    pub fn is_pending(&self, path: &Path) -> bool {
        self.lock()
            .by_path
            .get(path)
            .is_some_and(|t| !t.queue.is_closed())
    }

    fn begin_locked(
        &self,
        queues: &mut Queues,
        machine: Arc<dyn Machine>,
        box_name: &str,
        path: &Path,
    ) -> Ticket {
        let ticket = match queues.by_name.get(box_name) {
            // A closed queue means the fetch task died without cleaning up.
            Some(ticket) if !ticket.queue.is_closed() => ticket.clone(),
            _ => {
                queues.next_id += 1;
                let (tx, rx) = mpsc::unbounded_channel();
                let ticket = Ticket {
                    id: queues.next_id,
                    box_name: box_name.to_string(),
                    queue: tx,
                };
                queues.by_name.insert(box_name.to_string(), ticket.clone());

                let coordinator = self.clone();
                tokio::spawn(coordinator.download(machine, ticket.clone(), rx));
                ticket
            }
        };

        queues.by_path.insert(path.to_path_buf(), ticket.clone());
        ticket
    }

    async fn download(
        self,
        machine: Arc<dyn Machine>,
        ticket: Ticket,
        mut queue: mpsc::UnboundedReceiver<Waiter>,
    ) {
        let box_name = ticket.box_name.clone();
        info!("Downloading {:?} box...", box_name);

        let fetch = fetch_box(machine, box_name.clone());
        tokio::pin!(fetch);

        let mut waiters = Vec::new();
        let result = loop {
            tokio::select! {
                Some(waiter) = queue.recv() => waiters.push(waiter),
                result = &mut fetch => break result,
            }
        };

        let result = result.map_err(|err| ProvisioningError {
            box_name: box_name.clone(),
            message: err.to_string(),
        });

        {
            let mut queues = self.lock();
            if queues.by_name.get(&box_name).map(|t| t.id) == Some(ticket.id) {
                queues.by_name.remove(&box_name);
            }
            queues.by_path.retain(|_, t| t.id != ticket.id);
        }

        // Waiters are only ever enqueued under the lock, so anything that
        // subscribed before the entries above were removed is buffered here.
        while let Ok(waiter) = queue.try_recv() {
            waiters.push(waiter);
        }

        match &result {
            Ok(()) => info!(
                "Downloading {:?} box finished, notifying {} waiter(s)",
                box_name,
                waiters.len()
            ),
            Err(err) => warn!(
                "Downloading {:?} box failed, notifying {} waiter(s): {}",
                box_name,
                waiters.len(),
                err
            ),
        }

        for waiter in waiters {
            // The caller may have stopped waiting.
            let _ = waiter.send(result.clone());
        }
    }

    fn lock(&self) -> MutexGuard<'_, Queues> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn subscribe(ticket: &Ticket) -> (String, oneshot::Receiver<BoxResult>) {
    let (tx, rx) = oneshot::channel();
    // Cannot fail while the ticket is registered: the fetch task holds the
    // receiver until it has removed the ticket and drained the queue.
    let _ = ticket.queue.send(tx);
    (ticket.box_name.clone(), rx)
}

async fn receive(box_name: String, rx: oneshot::Receiver<BoxResult>) -> BoxResult {
    rx.await.unwrap_or_else(|_| {
        Err(ProvisioningError {
            box_name,
            message: "box download aborted".to_string(),
        })
    })
}

async fn fetch_box(machine: Arc<dyn Machine>, box_name: String) -> vm_provider::Result<()> {
    let stream = machine.box_add(&box_name)?;
    let result = vm_provider::wait(stream, |line| debug!("box add {}: {}", box_name, line)).await;

    match result {
        Err(ProviderError::BoxAlreadyExists(_)) => {
            debug!("Box {:?} is already installed", box_name);
            Ok(())
        }
        other => other,
    }
}
