use super::node::{QueuedNode, SearchNode};
use crate::engine::config::SearchConfig;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Debug, Error)]
pub enum FrontierError {
    #[error("Spill storage I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to encode or decode a spilled node: {0}")]
    Encoding(#[from] bincode::Error),
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> FrontierError + '_ {
    move |source| FrontierError::Io {
        path: path.to_path_buf(),
        source,
    }
}

static STORE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Spill runs kept open before the smallest of them are merged into one.
pub const DEFAULT_FAN_IN: usize = 64;

/// A private directory holding the spilled runs of one search.
///
/// The directory is created on open and removed on [`SpillStore::close`], or on drop
/// if the store was never closed explicitly.
#[derive(Debug)]
pub struct SpillStore {
    dir: PathBuf,
    next_run: u64,
    removed: bool,
}

impl SpillStore {
    pub fn open(parent: &Path) -> Result<Self, FrontierError> {
        let id = STORE_COUNTER.fetch_add(1, Ordering::Relaxed);
        let dir = parent.join(format!("rotasearch-frontier-{}-{}", std::process::id(), id));
        fs::create_dir_all(&dir).map_err(io_error(&dir))?;
        debug!(dir = %dir.display(), "Opened frontier spill store");
        Ok(Self {
            dir,
            next_run: 0,
            removed: false,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn next_run_path(&mut self) -> PathBuf {
        let path = self.dir.join(format!("run-{:06}.bin", self.next_run));
        self.next_run += 1;
        path
    }

    pub fn close(mut self) -> Result<(), FrontierError> {
        self.removed = true;
        fs::remove_dir_all(&self.dir).map_err(io_error(&self.dir))
    }
}

impl Drop for SpillStore {
    fn drop(&mut self) {
        if !self.removed {
            let _ = fs::remove_dir_all(&self.dir);
        }
    }
}

/// A sorted run of nodes on disk, read back one node at a time.
struct SpillRun {
    path: PathBuf,
    reader: BufReader<File>,
    remaining: usize,
    head: Option<QueuedNode>,
}

impl SpillRun {
    /// Creates a run from nodes that `fill` writes in ascending order, returning how
    /// many it wrote, and opens it for reading.
    fn create<F>(path: PathBuf, fill: F) -> Result<Self, FrontierError>
    where
        F: FnOnce(&mut BufWriter<File>) -> Result<usize, FrontierError>,
    {
        let file = File::create(&path).map_err(io_error(&path))?;
        let mut writer = BufWriter::new(file);
        let written = fill(&mut writer)?;
        writer.flush().map_err(io_error(&path))?;
        drop(writer);

        let file = File::open(&path).map_err(io_error(&path))?;
        let mut run = Self {
            path,
            reader: BufReader::new(file),
            remaining: written,
            head: None,
        };
        run.advance()?;
        Ok(run)
    }

    fn write(path: PathBuf, nodes: &[QueuedNode]) -> Result<Self, FrontierError> {
        Self::create(path, |writer| {
            for node in nodes {
                bincode::serialize_into(&mut *writer, node)?;
            }
            Ok(nodes.len())
        })
    }

    /// K-way merges `sources` into a single run at `path` and deletes their files.
    fn merge(path: PathBuf, mut sources: Vec<SpillRun>) -> Result<Self, FrontierError> {
        let merged = Self::create(path, |writer| {
            let mut written = 0;
            while let Some(i) = best_head(&sources) {
                let source = &mut sources[i];
                if let Some(node) = source.head.take() {
                    bincode::serialize_into(&mut *writer, &node)?;
                    written += 1;
                }
                source.advance()?;
            }
            Ok(written)
        })?;
        for source in sources {
            source.discard();
        }
        Ok(merged)
    }

    fn advance(&mut self) -> Result<(), FrontierError> {
        self.head = if self.remaining == 0 {
            None
        } else {
            self.remaining -= 1;
            Some(bincode::deserialize_from(&mut self.reader)?)
        };
        Ok(())
    }

    fn len(&self) -> usize {
        self.remaining + usize::from(self.head.is_some())
    }

    /// Closes the run and deletes its file. A file that cannot be deleted is left for
    /// the store's directory removal.
    fn discard(self) {
        let Self { path, reader, .. } = self;
        drop(reader);
        if let Err(error) = fs::remove_file(&path) {
            debug!(path = %path.display(), %error, "Could not remove drained spill run");
        }
    }
}

/// Index of the run whose head sorts first.
fn best_head(runs: &[SpillRun]) -> Option<usize> {
    runs.iter()
        .enumerate()
        .filter_map(|(i, run)| run.head.as_ref().map(|head| (i, head)))
        .min_by(|(_, a), (_, b)| a.cmp(b))
        .map(|(i, _)| i)
}

/// The open list of the search: a min-priority queue over `(bound, sequence)`.
///
/// With a memory limit, whenever the in-memory heap grows past the limit its worse
/// half is written to a sorted run file. Pops merge the heap with the heads of all
/// runs, so the pop order is the same as for an unbounded in-memory queue. Once more
/// than `fan_in` runs exist, the smallest are merged so that the number of open run
/// files stays bounded however many nodes are spilled.
pub struct Frontier {
    heap: BinaryHeap<Reverse<QueuedNode>>,
    memory_limit: Option<usize>,
    store: Option<SpillStore>,
    runs: Vec<SpillRun>,
    fan_in: usize,
    next_sequence: u64,
    spilled: u64,
}

impl Frontier {
    pub fn in_memory() -> Self {
        Self {
            heap: BinaryHeap::new(),
            memory_limit: None,
            store: None,
            runs: Vec::new(),
            fan_in: DEFAULT_FAN_IN,
            next_sequence: 0,
            spilled: 0,
        }
    }

    /// A frontier keeping at most `memory_limit` nodes resident.
    pub fn with_spill(memory_limit: usize, store: SpillStore) -> Self {
        Self {
            memory_limit: Some(memory_limit.max(2)),
            store: Some(store),
            ..Self::in_memory()
        }
    }

    /// Caps the number of spill runs kept open; at least 2.
    pub fn with_fan_in(mut self, fan_in: usize) -> Self {
        self.fan_in = fan_in.max(2);
        self
    }

    /// Builds the frontier described by the search configuration. Spill files go to
    /// the configured directory, or the system temporary directory.
    pub fn from_config(config: &SearchConfig) -> Result<Self, FrontierError> {
        match config.memory_limit {
            None => Ok(Self::in_memory()),
            Some(limit) => {
                let parent = config
                    .spill_directory
                    .clone()
                    .unwrap_or_else(std::env::temp_dir);
                Ok(Self::with_spill(limit, SpillStore::open(&parent)?))
            }
        }
    }

    /// Queues a node behind every node of equal bound queued before it.
    pub fn push(&mut self, node: SearchNode) -> Result<(), FrontierError> {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(Reverse(QueuedNode { sequence, node }));
        if let Some(limit) = self.memory_limit {
            if self.heap.len() > limit {
                self.spill(limit / 2)?;
            }
        }
        Ok(())
    }

    fn spill(&mut self, keep: usize) -> Result<(), FrontierError> {
        let Some(store) = self.store.as_mut() else {
            return Ok(());
        };
        let mut nodes: Vec<QueuedNode> = self.heap.drain().map(|Reverse(n)| n).collect();
        nodes.sort();
        let tail = nodes.split_off(keep.min(nodes.len()));
        self.heap = nodes.into_iter().map(Reverse).collect();

        let path = store.next_run_path();
        trace!(nodes = tail.len(), path = %path.display(), "Spilling frontier tail");
        self.spilled += tail.len() as u64;
        self.runs.push(SpillRun::write(path, &tail)?);
        if self.runs.len() > self.fan_in {
            self.merge_smallest_runs()?;
        }
        Ok(())
    }

    /// Merges the smallest runs into one, leaving half the fan-in open.
    fn merge_smallest_runs(&mut self) -> Result<(), FrontierError> {
        let Some(store) = self.store.as_mut() else {
            return Ok(());
        };
        let target = self.fan_in / 2;
        let count = self.runs.len().saturating_sub(target) + 1;
        if count < 2 {
            return Ok(());
        }
        self.runs.sort_by_key(SpillRun::len);
        let sources: Vec<SpillRun> = self.runs.drain(..count).collect();
        let path = store.next_run_path();
        debug!(
            runs = sources.len(),
            nodes = sources.iter().map(SpillRun::len).sum::<usize>(),
            path = %path.display(),
            "Merging spill runs"
        );
        self.runs.push(SpillRun::merge(path, sources)?);
        Ok(())
    }

    fn best_run(&self) -> Option<usize> {
        best_head(&self.runs)
    }

    /// Removes and returns the node with the lowest `(bound, sequence)`.
    pub fn pop(&mut self) -> Result<Option<SearchNode>, FrontierError> {
        let from_run = match (self.heap.peek(), self.best_run()) {
            (_, None) => None,
            (None, Some(i)) => Some(i),
            (Some(Reverse(top)), Some(i)) => {
                let head = self.runs[i].head.as_ref();
                head.is_some_and(|h| h < top).then_some(i)
            }
        };

        let Some(i) = from_run else {
            return Ok(self.heap.pop().map(|Reverse(q)| q.node));
        };
        let run = &mut self.runs[i];
        let node = run.head.take();
        run.advance()?;
        if run.len() == 0 {
            self.runs.swap_remove(i).discard();
        }
        Ok(node.map(|q| q.node))
    }

    pub fn peek_bound(&self) -> Option<f64> {
        let heap = self.heap.peek().map(|Reverse(q)| q.node.bound);
        let runs = self
            .best_run()
            .and_then(|i| self.runs[i].head.as_ref())
            .map(|q| q.node.bound);
        match (heap, runs) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len() + self.runs.iter().map(SpillRun::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Nodes resident in memory.
    pub fn resident(&self) -> usize {
        self.heap.len()
    }

    /// Total nodes written to disk over the frontier's lifetime.
    pub fn spilled(&self) -> u64 {
        self.spilled
    }

    /// Discards the remaining nodes and removes the spill directory.
    pub fn close(mut self) -> Result<(), FrontierError> {
        self.runs.clear();
        match self.store.take() {
            Some(store) => store.close(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::assignment::Assignment;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use tempfile::tempdir;

    fn node(bound: f64, tag: usize) -> SearchNode {
        SearchNode {
            assignment: Assignment::from_indices(&[tag]),
            gscore: 0.0,
            bound,
        }
    }

    fn drain(frontier: &mut Frontier) -> Vec<(f64, usize)> {
        let mut out = Vec::new();
        while let Some(n) = frontier.pop().unwrap() {
            out.push((n.bound, n.assignment.to_indices().unwrap()[0]));
        }
        out
    }

    #[test]
    fn pops_in_bound_order_with_fifo_ties() {
        let mut frontier = Frontier::in_memory();
        for (i, bound) in [3.0, 1.0, 2.0, 1.0, 3.0].into_iter().enumerate() {
            frontier.push(node(bound, i)).unwrap();
        }
        assert_eq!(frontier.peek_bound(), Some(1.0));
        let order: Vec<usize> = drain(&mut frontier).into_iter().map(|(_, t)| t).collect();
        assert_eq!(order, vec![1, 3, 2, 0, 4]);
        assert!(frontier.is_empty());
    }

    #[test]
    fn spilled_frontier_matches_in_memory_order_under_interleaving() {
        let dir = tempdir().unwrap();
        let mut rng = StdRng::seed_from_u64(17);
        let mut memory = Frontier::in_memory();
        let mut spilling = Frontier::with_spill(8, SpillStore::open(dir.path()).unwrap());

        let mut popped_memory = Vec::new();
        let mut popped_spilling = Vec::new();
        for i in 0..400 {
            // Coarse bounds force plenty of ties.
            let bound = f64::from(rng.gen_range(0..20u32)) * 0.5;
            memory.push(node(bound, i)).unwrap();
            spilling.push(node(bound, i)).unwrap();
            if i % 3 == 0 {
                popped_memory.push(memory.pop().unwrap().map(|n| n.assignment));
                popped_spilling.push(spilling.pop().unwrap().map(|n| n.assignment));
            }
        }
        assert!(spilling.spilled() > 0);
        assert!(spilling.resident() <= 8);
        assert_eq!(memory.len(), spilling.len());
        assert_eq!(popped_memory, popped_spilling);
        assert_eq!(drain(&mut memory), drain(&mut spilling));
    }

    #[test]
    fn open_runs_stay_within_fan_in_under_heavy_spilling() {
        let dir = tempdir().unwrap();
        let mut rng = StdRng::seed_from_u64(5);
        let mut memory = Frontier::in_memory();
        let mut spilling =
            Frontier::with_spill(2, SpillStore::open(dir.path()).unwrap()).with_fan_in(4);
        let spill_dir = spilling.store.as_ref().unwrap().dir().to_path_buf();

        let mut popped_memory = Vec::new();
        let mut popped_spilling = Vec::new();
        for i in 0..2000 {
            let bound = f64::from(rng.gen_range(0..50u32)) * 0.25;
            memory.push(node(bound, i)).unwrap();
            spilling.push(node(bound, i)).unwrap();
            if i % 7 == 0 {
                popped_memory.push(memory.pop().unwrap().map(|n| n.assignment));
                popped_spilling.push(spilling.pop().unwrap().map(|n| n.assignment));
            }
            assert!(spilling.runs.len() <= 4);
            assert!(fs::read_dir(&spill_dir).unwrap().count() <= 4);
        }
        assert!(spilling.spilled() > 1000);
        assert_eq!(memory.len(), spilling.len());
        assert_eq!(popped_memory, popped_spilling);
        assert_eq!(drain(&mut memory), drain(&mut spilling));
        assert_eq!(fs::read_dir(&spill_dir).unwrap().count(), 0);
    }

    #[test]
    fn close_removes_spill_directory() {
        let dir = tempdir().unwrap();
        let mut frontier = Frontier::with_spill(2, SpillStore::open(dir.path()).unwrap());
        for i in 0..10 {
            frontier.push(node(i as f64, i)).unwrap();
        }
        let spill_dir = frontier.store.as_ref().unwrap().dir().to_path_buf();
        assert!(spill_dir.exists());
        frontier.close().unwrap();
        assert!(!spill_dir.exists());
    }

    #[test]
    fn dropped_store_cleans_up() {
        let dir = tempdir().unwrap();
        let store = SpillStore::open(dir.path()).unwrap();
        let path = store.dir().to_path_buf();
        drop(store);
        assert!(!path.exists());
    }
}
