//! Chunked build jobs and the join protocol.
//!
//! A [`BuildJob`] owns everything one build needs. Preparation is cut into
//! chunks of the flat primitive space; joiners claim chunks through an atomic
//! cursor, and whoever completes the last chunk encodes the result and wakes
//! everyone else. Synchronous builds run the same job on rayon.
//!
//! A panic while preparing or encoding (procedural bounds callbacks are user
//! code) is turned into [`Error::Build`] for that chunk, so the chunk still
//! counts as done and every joiner is released with the error.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use rayon::prelude::*;
use tracing::{debug, instrument, warn};

use super::encode::{encode, prepare_prims, PrimSpace};
use crate::api::{BuildOpDesc, BuildOutput, DeviceBuffer};
use crate::geom::PrimRef;
use crate::util::{Error, Result};

pub(super) struct BuildJob {
    op: BuildOpDesc,
    rtas: DeviceBuffer,
    space: PrimSpace,
    chunk_size: usize,
    /// Next unclaimed chunk.
    cursor: AtomicUsize,
    /// Number of chunks prepared so far.
    completed: AtomicUsize,
    /// One slot per chunk, filled by whoever prepared it.
    chunks: Vec<Mutex<Option<Result<Vec<PrimRef>>>>>,
    outcome: Mutex<Option<Result<BuildOutput>>>,
    finished: Condvar,
}

/// Run `f`, reporting a panic as a build error.
fn guarded<T>(what: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|_| {
        warn!("{what} panicked");
        Err(Error::build(format!("{what} panicked")))
    })
}

fn share(outcome: &Result<BuildOutput>) -> Result<BuildOutput> {
    match outcome {
        Ok(out) => Ok(*out),
        Err(e) => Err(e.duplicate()),
    }
}

impl BuildJob {
    pub fn new(op: BuildOpDesc, rtas: DeviceBuffer, chunk_size: usize) -> Self {
        let space = PrimSpace::new(&op);
        let n = space.chunk_count(chunk_size);
        Self {
            op,
            rtas,
            space,
            chunk_size,
            cursor: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            chunks: (0..n).map(|_| Mutex::new(None)).collect(),
            outcome: Mutex::new(None),
            finished: Condvar::new(),
        }
    }

    fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.lock().is_some()
    }

    /// Prepare chunk `index`; returns true if it was the last one outstanding.
    fn run_chunk(&self, index: usize) -> bool {
        let range = self.space.chunk(index, self.chunk_size);
        let prims = guarded("chunk preparation", || prepare_prims(&self.op, &self.space, range));
        *self.chunks[index].lock() = Some(prims);
        self.completed.fetch_add(1, Ordering::AcqRel) + 1 == self.chunk_count()
    }

    /// Gather the chunks, encode, and write the result into the RTAS buffer.
    fn finish(&self) -> Result<BuildOutput> {
        let mut prims = Vec::with_capacity(self.space.len());
        for slot in &self.chunks {
            match slot.lock().take() {
                Some(chunk) => prims.extend(chunk?),
                None => return Err(Error::build("chunk finished without a result")),
            }
        }

        let enc = encode(&self.op, &mut prims)?;
        if enc.bytes.len() > self.rtas.len() {
            return Err(Error::BufferTooSmall {
                required: enc.bytes.len(),
                actual: self.rtas.len(),
            });
        }
        self.rtas.write(0, &enc.bytes)?;
        debug!(prims = prims.len(), bytes = enc.bytes.len(), "encoded acceleration structure");
        Ok(BuildOutput {
            bounds: enc.bounds,
            rtas_bytes: enc.bytes.len(),
        })
    }

    fn publish(&self, outcome: Result<BuildOutput>) -> Result<BuildOutput> {
        let shared = share(&outcome);
        *self.outcome.lock() = Some(outcome);
        self.finished.notify_all();
        shared
    }

    /// Work on unclaimed chunks until none are left, then wait for the result.
    #[instrument(skip_all, fields(chunks = self.chunk_count()))]
    pub fn join(&self) -> Result<BuildOutput> {
        loop {
            let index = self.cursor.fetch_add(1, Ordering::AcqRel);
            if index >= self.chunk_count() {
                break;
            }
            if self.run_chunk(index) {
                return self.publish(guarded("encoding", || self.finish()));
            }
        }

        let mut outcome = self.outcome.lock();
        loop {
            if let Some(result) = outcome.as_ref() {
                return share(result);
            }
            self.finished.wait(&mut outcome);
        }
    }

    /// Run the whole job on the rayon pool and return its result.
    #[instrument(skip_all, fields(chunks = self.chunk_count()))]
    pub fn run(&self) -> Result<BuildOutput> {
        let n = self.chunk_count();
        self.cursor.store(n, Ordering::Release);
        (0..n).into_par_iter().for_each(|index| {
            self.run_chunk(index);
        });
        self.publish(guarded("encoding", || self.finish()))
    }
}

/// Parallel operation object: holds the job most recently started on it.
#[derive(Default)]
pub(super) struct ParallelOperation {
    job: Mutex<Option<Arc<BuildJob>>>,
}

impl ParallelOperation {
    /// Attach `job`. Fails while a previous job is still running.
    pub fn start(&self, job: Arc<BuildJob>) -> Result<()> {
        let mut slot = self.job.lock();
        if slot.as_ref().is_some_and(|j| !j.is_finished()) {
            return Err(Error::invalid("parallel operation already has a build in flight"));
        }
        *slot = Some(job);
        Ok(())
    }

    pub fn join(&self) -> Result<BuildOutput> {
        // clone out so the lock is not held while building
        let job = self
            .job
            .lock()
            .clone()
            .ok_or_else(|| Error::invalid("parallel operation has no build to join"))?;
        job.join()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::api::{GeometryInfo, MemoryKind, ProceduralGeometryInfo, RtasFormat};
    use crate::util::{BBox3f, Vec3};

    fn op(n: usize) -> BuildOpDesc {
        let boxes = (0..n)
            .map(|i| BBox3f::new(Vec3::splat(i as f32), Vec3::splat(i as f32 + 0.5)))
            .collect();
        BuildOpDesc::new(RtasFormat::V1)
            .with_geometry(GeometryInfo::Procedural(ProceduralGeometryInfo::from_boxes(boxes)))
    }

    fn buffer(size: usize) -> DeviceBuffer {
        DeviceBuffer::new(0x1000, MemoryKind::Shared, size)
    }

    #[test]
    fn test_concurrent_joiners_agree() {
        let rtas = buffer(4096);
        let job = Arc::new(BuildJob::new(op(200), rtas.clone(), 7));
        let outputs: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..6)
                .map(|_| {
                    let job = Arc::clone(&job);
                    s.spawn(move || job.join().unwrap())
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert!(outputs.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(outputs[0].bounds.max, Vec3::splat(199.5));
        assert!(job.is_finished());

        // the same bytes as a synchronous build
        let sync = buffer(4096);
        let out = BuildJob::new(op(200), sync.clone(), 64).run().unwrap();
        assert_eq!(out, outputs[0]);
        assert_eq!(sync.to_vec(), rtas.to_vec());
    }

    #[test]
    fn test_join_after_finish_returns_result() {
        let job = BuildJob::new(op(3), buffer(1024), 1);
        let first = job.join().unwrap();
        assert_eq!(job.join().unwrap(), first);
    }

    #[test]
    fn test_error_reaches_every_joiner() {
        let job = Arc::new(BuildJob::new(op(100), buffer(64), 8));
        let errors = std::thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let job = Arc::clone(&job);
                    s.spawn(move || job.join())
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect::<Vec<_>>()
        });
        for e in errors {
            assert!(matches!(e, Err(Error::BufferTooSmall { actual: 64, .. })));
        }
    }

    /// Procedural boxes whose bounds callback panics for primitive `bad`.
    fn panicking_op(n: usize, bad: u32) -> BuildOpDesc {
        let mut geom = ProceduralGeometryInfo::from_boxes(vec![BBox3f::new(Vec3::ZERO, Vec3::ONE); n]);
        geom.bounds = Arc::new(move |i: u32| {
            if i == bad {
                panic!("bounds callback failed for {i}");
            }
            BBox3f::new(Vec3::ZERO, Vec3::ONE)
        });
        BuildOpDesc::new(RtasFormat::V1).with_geometry(GeometryInfo::Procedural(geom))
    }

    #[test]
    fn test_preparation_panic_releases_joiners() {
        let pop = ParallelOperation::default();
        pop.start(Arc::new(BuildJob::new(panicking_op(2, 0), buffer(1024), 1)))
            .unwrap();

        let results = std::thread::scope(|s| {
            let handles: Vec<_> = (0..2).map(|_| s.spawn(|| pop.join())).collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect::<Vec<_>>()
        });
        for r in results {
            assert!(matches!(r, Err(Error::Build(_))), "got {r:?}");
        }
        // late joiners see the same error instead of waiting
        assert!(matches!(pop.join(), Err(Error::Build(_))));

        // the operation is free for the next build
        pop.start(Arc::new(BuildJob::new(op(2), buffer(1024), 1))).unwrap();
        assert_eq!(pop.join().unwrap().rtas_bytes, 128 + 64);
    }

    #[test]
    fn test_preparation_panic_in_sync_build() {
        let job = BuildJob::new(panicking_op(40, 17), buffer(4096), 4);
        assert!(matches!(job.run(), Err(Error::Build(_))));
        assert!(job.is_finished());
    }

    #[test]
    fn test_operation_rejects_overlapping_builds() {
        let pop = ParallelOperation::default();
        assert!(pop.join().is_err());

        let job = Arc::new(BuildJob::new(op(4), buffer(1024), 2));
        pop.start(job.clone()).unwrap();
        assert!(pop.start(Arc::new(BuildJob::new(op(4), buffer(1024), 2))).is_err());

        pop.join().unwrap();
        // finished jobs can be replaced
        pop.start(Arc::new(BuildJob::new(op(1), buffer(1024), 2))).unwrap();
        assert_eq!(pop.join().unwrap().rtas_bytes, 128 + 64);
    }
}
