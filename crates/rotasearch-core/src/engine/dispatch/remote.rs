use super::task::{Task, TaskOutput};
use super::worker::{Worker, WorkerError, WorkerKind};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Envelope encoding failed: {0}")]
    Encoding(#[from] bincode::Error),
    #[error("Response sequence {received} does not answer request {expected}")]
    SequenceMismatch { expected: u64, received: u64 },
}

/// A task on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub sequence: u64,
    pub task: Task,
}

/// A result on the wire. Evaluation failures travel as their message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub sequence: u64,
    pub outcome: Result<TaskOutput, String>,
}

/// Request/response channel to a remote evaluation node.
///
/// Implementations only move bytes; the envelope format is owned by
/// [`RemoteWorker`] and [`serve_request`].
pub trait Transport: Send + Sync {
    fn round_trip(&self, request: &[u8]) -> Result<Vec<u8>, TransportError>;
}

/// Worker that forwards tasks to another process through a [`Transport`].
pub struct RemoteWorker<T: Transport> {
    name: String,
    transport: T,
    sequence: AtomicU64,
}

impl<T: Transport> RemoteWorker<T> {
    pub fn new(name: impl Into<String>, transport: T) -> Self {
        Self {
            name: name.into(),
            transport,
            sequence: AtomicU64::new(0),
        }
    }

    fn call(&self, task: &Task) -> Result<Result<TaskOutput, String>, TransportError> {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let request = bincode::serialize(&TaskEnvelope {
            sequence,
            task: task.clone(),
        })?;
        let response = self.transport.round_trip(&request)?;
        let envelope: ResultEnvelope = bincode::deserialize(&response)?;
        if envelope.sequence != sequence {
            return Err(TransportError::SequenceMismatch {
                expected: sequence,
                received: envelope.sequence,
            });
        }
        Ok(envelope.outcome)
    }
}

impl<T: Transport> Worker for RemoteWorker<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> WorkerKind {
        WorkerKind::Remote
    }

    fn execute(&self, task: &Task) -> Result<TaskOutput, WorkerError> {
        match self.call(task) {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(message)) => Err(WorkerError::Remote(message)),
            Err(e) => {
                debug!(worker = %self.name, %task, error = %e, "Remote call failed");
                Err(WorkerError::Unreachable(e.to_string()))
            }
        }
    }
}

/// Server side of the envelope protocol: decodes a request, runs it on `worker`
/// and encodes the response.
pub fn serve_request(worker: &dyn Worker, request: &[u8]) -> Result<Vec<u8>, TransportError> {
    let envelope: TaskEnvelope = bincode::deserialize(request)?;
    let outcome = worker.execute(&envelope.task).map_err(|e| e.to_string());
    Ok(bincode::serialize(&ResultEnvelope {
        sequence: envelope.sequence,
        outcome,
    })?)
}

/// Transport that serves requests in-process, exercising the full envelope path.
pub struct LoopbackTransport<W: Worker> {
    server: W,
}

impl<W: Worker> LoopbackTransport<W> {
    pub fn new(server: W) -> Self {
        Self { server }
    }
}

impl<W: Worker> Transport for LoopbackTransport<W> {
    fn round_trip(&self, request: &[u8]) -> Result<Vec<u8>, TransportError> {
        serve_request(&self.server, request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::assignment::Assignment;
    use crate::core::models::ids::{PositionId, RotamerId};
    use crate::engine::dispatch::worker::LocalWorker;
    use crate::engine::evaluation::{EvaluationStrategy, Evaluator};
    use crate::engine::fixtures::{TableForceField, flexible_space};
    use std::sync::Arc;

    fn local() -> LocalWorker {
        let space = Arc::new(flexible_space());
        let ff = Arc::new(TableForceField::for_space(&space, 11));
        LocalWorker::new("server", Evaluator::new(space, ff, EvaluationStrategy::Rigid))
    }

    struct DownTransport;

    impl Transport for DownTransport {
        fn round_trip(&self, _request: &[u8]) -> Result<Vec<u8>, TransportError> {
            Err(TransportError::Connection("connection refused".to_string()))
        }
    }

    struct StaleTransport<W: Worker>(LoopbackTransport<W>);

    impl<W: Worker> Transport for StaleTransport<W> {
        fn round_trip(&self, request: &[u8]) -> Result<Vec<u8>, TransportError> {
            let mut envelope: TaskEnvelope = bincode::deserialize(request)?;
            envelope.sequence += 100;
            self.0.round_trip(&bincode::serialize(&envelope)?)
        }
    }

    #[test]
    fn loopback_remote_worker_matches_local_results() {
        let remote = RemoteWorker::new("node-1", LoopbackTransport::new(local()));
        let reference = local();
        let tasks = [
            Task::Single {
                position: PositionId(1),
                rotamer: RotamerId(2),
            },
            Task::Conformation {
                assignment: Assignment::from_indices(&[1, 0, 1]),
            },
        ];
        for task in &tasks {
            assert_eq!(remote.execute(task).unwrap(), reference.execute(task).unwrap());
        }
        assert_eq!(remote.kind(), WorkerKind::Remote);
    }

    #[test]
    fn remote_evaluation_errors_are_permanent_and_transport_errors_transient() {
        let remote = RemoteWorker::new("node-1", LoopbackTransport::new(local()));
        let err = remote
            .execute(&Task::Single {
                position: PositionId(5),
                rotamer: RotamerId(0),
            })
            .unwrap_err();
        assert!(matches!(err, WorkerError::Remote(_)));
        assert!(!err.is_transient());

        let down = RemoteWorker::new("node-2", DownTransport);
        let task = Task::Single {
            position: PositionId(0),
            rotamer: RotamerId(0),
        };
        assert!(down.execute(&task).unwrap_err().is_transient());
    }

    #[test]
    fn mismatched_response_sequence_is_rejected() {
        let remote = RemoteWorker::new("node-3", StaleTransport(LoopbackTransport::new(local())));
        let task = Task::Single {
            position: PositionId(0),
            rotamer: RotamerId(1),
        };
        assert!(matches!(remote.execute(&task), Err(WorkerError::Unreachable(_))));
    }
}
