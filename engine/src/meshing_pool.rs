use std::{
    collections::BinaryHeap,
    sync::{
        Arc, Mutex, Weak,
        atomic::{AtomicBool, Ordering},
    },
    thread::JoinHandle,
    time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use ordered_float::OrderedFloat;

use crate::{chunk_source::ChunkPayload, lod::LodManager, voxels::coord::ChunkPos};

pub enum MeshJob {
    /// A chunk payload arrived; populate the grid and build the core mesh.
    Ingest(ChunkPayload),
    /// Rebuild the core mesh of an already-populated chunk.
    Remesh(ChunkPos),
}

impl MeshJob {
    pub fn pos(&self) -> ChunkPos {
        match self {
            MeshJob::Ingest(payload) => payload.pos,
            MeshJob::Remesh(pos) => *pos,
        }
    }
}

struct QueuedJob {
    priority: OrderedFloat<f64>,
    job: MeshJob,
}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority
    }
}

impl Eq for QueuedJob {}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedJob {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority.cmp(&other.priority)
    }
}

/// The worker pool running mesh generation off the render thread.
///
/// Jobs carry a rendering priority and are popped best-first. Before a job
/// runs, the pool re-checks that its chunk is still wanted; work for
/// evicted chunks is dropped along with its payload.
pub struct MeshingPool {
    jobs: Arc<Mutex<BinaryHeap<QueuedJob>>>,
    wake_sender: Sender<()>,
    shutdown: Arc<AtomicBool>,
    worker_handles: Vec<JoinHandle<()>>,
}

impl MeshingPool {
    pub fn start(manager: Weak<LodManager>, num_workers: usize) -> Self {
        let jobs: Arc<Mutex<BinaryHeap<QueuedJob>>> = Arc::new(Mutex::new(BinaryHeap::new()));
        let shutdown = Arc::new(AtomicBool::new(false));
        let (wake_sender, wake_receiver) = crossbeam_channel::unbounded();

        let mut worker_handles = Vec::with_capacity(num_workers);
        for index in 0..num_workers {
            let jobs = jobs.clone();
            let shutdown = shutdown.clone();
            let wake_receiver: Receiver<()> = wake_receiver.clone();
            let manager = manager.clone();

            let handle = std::thread::Builder::new()
                .name(format!("Mesh worker {}", index))
                .spawn(move || {
                    loop {
                        if shutdown.load(Ordering::Acquire) {
                            break;
                        }
                        let job = jobs.lock().unwrap().pop();
                        let Some(job) = job else {
                            match wake_receiver.recv_timeout(Duration::from_millis(100)) {
                                Ok(()) | Err(RecvTimeoutError::Timeout) => continue,
                                Err(RecvTimeoutError::Disconnected) => break,
                            }
                        };
                        let Some(manager) = manager.upgrade() else {
                            break;
                        };
                        if !manager.is_still_needed(job.job.pos()) {
                            continue;
                        }
                        manager.run_mesh_job(job.job);
                    }
                })
                .expect("failed to spawn mesh worker");
            worker_handles.push(handle);
        }

        MeshingPool {
            jobs,
            wake_sender,
            shutdown,
            worker_handles,
        }
    }

    pub fn submit(&self, job: MeshJob, priority: f64) {
        self.jobs.lock().unwrap().push(QueuedJob {
            priority: OrderedFloat(priority),
            job,
        });
        let _ = self.wake_sender.try_send(());
    }

    pub fn queued_jobs(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }
}

impl Drop for MeshingPool {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        for _ in &self.worker_handles {
            let _ = self.wake_sender.try_send(());
        }
        for handle in self.worker_handles.drain(..) {
            let _ = handle.join();
        }
    }
}
