use super::DispatchError;
use super::task::{Task, TaskOutput};
use super::worker::{Worker, WorkerError};
use slotmap::{SlotMap, new_key_type};
use std::cmp::Reverse;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use tracing::{debug, info, instrument, warn};

new_key_type! {
    struct TicketId;
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Completed(TaskOutput),
    Failed(TaskFailure),
}

/// A task that could not be completed on any worker within the retry limit.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskFailure {
    pub attempts: usize,
    pub error: WorkerError,
}

#[derive(Debug)]
struct Ticket {
    index: usize,
    attempts: usize,
    failed_on: Vec<usize>,
}

enum Command {
    Run { ticket: TicketId, index: usize },
    Shutdown,
}

struct Completion {
    worker: usize,
    ticket: TicketId,
    result: Result<TaskOutput, WorkerError>,
}

/// Runs batches of independent tasks on a pool of workers.
pub struct Dispatcher {
    workers: Vec<Arc<dyn Worker>>,
    max_retries: usize,
}

impl Dispatcher {
    pub fn new(max_retries: usize) -> Self {
        Self {
            workers: Vec::new(),
            max_retries,
        }
    }

    pub fn with_worker(mut self, worker: Arc<dyn Worker>) -> Self {
        self.add_worker(worker);
        self
    }

    pub fn add_worker(&mut self, worker: Arc<dyn Worker>) {
        self.workers.push(worker);
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    /// Executes every task and returns one outcome per task, in input order.
    ///
    /// Completion order across workers is unspecified. A transient failure requeues
    /// the task, preferring workers that have not failed it, until it has been
    /// attempted `1 + max_retries` times.
    pub fn run_batch(&self, tasks: &[Task]) -> Result<Vec<TaskOutcome>, DispatchError> {
        self.run_batch_with(tasks, |_, _| {})
    }

    /// Like [`Dispatcher::run_batch`], additionally handing each final outcome to
    /// `on_outcome` together with its task index as soon as it is known.
    ///
    /// The callback runs on the calling thread, in completion order, while other
    /// tasks may still be executing.
    #[instrument(skip_all, name = "dispatch_batch", fields(tasks = tasks.len()))]
    pub fn run_batch_with<F>(
        &self,
        tasks: &[Task],
        mut on_outcome: F,
    ) -> Result<Vec<TaskOutcome>, DispatchError>
    where
        F: FnMut(usize, &TaskOutcome),
    {
        if tasks.is_empty() {
            return Ok(Vec::new());
        }
        if self.workers.is_empty() {
            return Err(DispatchError::NoWorkers);
        }

        let mut outcomes: Vec<Option<TaskOutcome>> = vec![None; tasks.len()];
        let mut tickets: SlotMap<TicketId, Ticket> = SlotMap::with_key();
        let mut queue = VecDeque::new();
        for (index, task) in tasks.iter().enumerate() {
            if self.workers.iter().any(|w| w.supports(task)) {
                queue.push_back(tickets.insert(Ticket {
                    index,
                    attempts: 0,
                    failed_on: Vec::new(),
                }));
            } else {
                warn!(%task, "No registered worker supports task");
                let outcome = TaskOutcome::Failed(TaskFailure {
                    attempts: 0,
                    error: WorkerError::Unsupported,
                });
                on_outcome(index, &outcome);
                outcomes[index] = Some(outcome);
            }
        }

        thread::scope(|scope| -> Result<(), DispatchError> {
            let (done_tx, done_rx) = mpsc::channel::<Completion>();
            let mut senders: Vec<Sender<Command>> = Vec::with_capacity(self.workers.len());
            for (slot, worker) in self.workers.iter().enumerate() {
                let (tx, rx) = mpsc::channel::<Command>();
                senders.push(tx);
                let done_tx = done_tx.clone();
                let worker = Arc::clone(worker);
                scope.spawn(move || worker_loop(slot, worker.as_ref(), tasks, rx, done_tx));
            }
            drop(done_tx);

            let mut idle = vec![true; self.workers.len()];
            while !tickets.is_empty() {
                self.assign(tasks, &tickets, &mut queue, &mut idle, &senders)?;

                let completion = done_rx.recv().map_err(|_| DispatchError::WorkersLost)?;
                idle[completion.worker] = true;
                let Some(ticket) = tickets.get_mut(completion.ticket) else {
                    debug!("Ignoring duplicate completion of a resolved task");
                    continue;
                };
                ticket.attempts += 1;

                match completion.result {
                    Ok(output) => {
                        let index = ticket.index;
                        tickets.remove(completion.ticket);
                        let outcome = TaskOutcome::Completed(output);
                        on_outcome(index, &outcome);
                        outcomes[index] = Some(outcome);
                    }
                    Err(error) if error.is_transient() && ticket.attempts <= self.max_retries => {
                        warn!(
                            task = %tasks[ticket.index],
                            worker = self.workers[completion.worker].name(),
                            attempt = ticket.attempts,
                            %error,
                            "Task failed on worker; requeueing"
                        );
                        ticket.failed_on.push(completion.worker);
                        queue.push_back(completion.ticket);
                    }
                    Err(error) => {
                        warn!(
                            task = %tasks[ticket.index],
                            attempts = ticket.attempts,
                            %error,
                            "Task failed permanently"
                        );
                        let index = ticket.index;
                        let outcome = TaskOutcome::Failed(TaskFailure {
                            attempts: ticket.attempts,
                            error,
                        });
                        tickets.remove(completion.ticket);
                        on_outcome(index, &outcome);
                        outcomes[index] = Some(outcome);
                    }
                }
            }

            for tx in &senders {
                let _ = tx.send(Command::Shutdown);
            }
            Ok(())
        })?;

        let failed = outcomes
            .iter()
            .filter(|o| matches!(o, Some(TaskOutcome::Failed(_))))
            .count();
        info!(tasks = tasks.len(), failed, "Batch complete");
        outcomes
            .into_iter()
            .map(|o| o.ok_or(DispatchError::WorkersLost))
            .collect()
    }

    /// Hands queued tickets to idle workers. A ticket is only given to a worker that
    /// already failed it when every supporting worker has failed it.
    fn assign(
        &self,
        tasks: &[Task],
        tickets: &SlotMap<TicketId, Ticket>,
        queue: &mut VecDeque<TicketId>,
        idle: &mut [bool],
        senders: &[Sender<Command>],
    ) -> Result<(), DispatchError> {
        let mut waiting = VecDeque::new();
        while let Some(id) = queue.pop_front() {
            if !idle.iter().any(|&free| free) {
                waiting.push_back(id);
                continue;
            }
            let ticket = &tickets[id];
            let task = &tasks[ticket.index];
            let supporting: Vec<usize> = (0..self.workers.len())
                .filter(|&w| self.workers[w].supports(task))
                .collect();
            let fresh: Vec<usize> = supporting
                .iter()
                .copied()
                .filter(|w| !ticket.failed_on.contains(w))
                .collect();
            let candidates = if fresh.is_empty() { supporting } else { fresh };

            let choice = candidates
                .into_iter()
                .filter(|&w| idle[w])
                .max_by_key(|&w| (self.workers[w].affinity(task), Reverse(w)));
            match choice {
                Some(w) => {
                    idle[w] = false;
                    senders[w]
                        .send(Command::Run {
                            ticket: id,
                            index: ticket.index,
                        })
                        .map_err(|_| DispatchError::WorkersLost)?;
                }
                None => waiting.push_back(id),
            }
        }
        *queue = waiting;
        Ok(())
    }
}

fn worker_loop(
    slot: usize,
    worker: &dyn Worker,
    tasks: &[Task],
    commands: Receiver<Command>,
    completions: Sender<Completion>,
) {
    while let Ok(Command::Run { ticket, index }) = commands.recv() {
        let result = panic::catch_unwind(AssertUnwindSafe(|| worker.execute(&tasks[index])))
            .unwrap_or_else(|payload| Err(WorkerError::Crashed(panic_message(payload.as_ref()))));
        let completion = Completion {
            worker: slot,
            ticket,
            result,
        };
        if completions.send(completion).is_err() {
            break;
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}
