//! Bounded pool of memory-mapped readers over the EUFF file (spec.md
//! §4.4).
//!
//! The pool hands out at most `reader_pool_size` live [`Mmap`] handles at
//! once (P-BOUNDS: the process never holds more than
//! `reader_pool_size + 1` open handles on the database file — the `+1`
//! being the writer's own handle). Callers that find the pool exhausted
//! block on a condition variable rather than opening an unbounded number
//! of extra mappings.
//!
//! A checkpoint moves the data region and rewrites the header, which
//! invalidates any mapping taken before it. Rather than synchronously
//! remapping every outstanding reader, the pool stamps each handle with
//! the generation it was mapped at and lazily remaps on next checkout
//! once the generation counter has moved (§4.4 lazy invalidation).

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use memmap2::Mmap;
use parking_lot::{Condvar, Mutex};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReaderPoolError {
    #[error("failed to open database file for mapping: {0}")]
    Open(#[source] std::io::Error),
    #[error("failed to mmap database file: {0}")]
    Mmap(#[source] std::io::Error),
}

struct Handle {
    mmap: Arc<Mmap>,
    generation: u64,
}

struct Inner {
    path: PathBuf,
    generation: AtomicU64,
    free: Mutex<Vec<Handle>>,
    not_empty: Condvar,
    capacity: usize,
    outstanding: Mutex<usize>,
}

/// A bounded pool of memory-mapped readers over one EUFF file.
///
/// Cloning is cheap (`Arc` inside); every clone shares the same bound and
/// the same generation counter.
#[derive(Clone)]
pub struct ReaderPool {
    inner: Arc<Inner>,
}

impl ReaderPool {
    /// Create a pool bounded at `capacity` concurrently-outstanding
    /// readers for the file at `path`. No mapping happens until the first
    /// [`ReaderPool::checkout`].
    pub fn new(path: impl AsRef<Path>, capacity: usize) -> Self {
        ReaderPool {
            inner: Arc::new(Inner {
                path: path.as_ref().to_path_buf(),
                generation: AtomicU64::new(0),
                free: Mutex::new(Vec::new()),
                not_empty: Condvar::new(),
                capacity: capacity.max(1),
                outstanding: Mutex::new(0),
            }),
        }
    }

    /// Bump the generation counter, invalidating every mapping handed out
    /// before this call. Called by the writer immediately after a
    /// checkpoint rewrites the file (§4.4, §4.3 checkpoint sequence).
    pub fn invalidate(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.free.lock().clear();
    }

    fn current_generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    fn map_file(&self) -> Result<Handle, ReaderPoolError> {
        let file = File::open(&self.inner.path).map_err(ReaderPoolError::Open)?;
        // SAFETY: the mapped file is only ever mutated by this process's
        // single writer, which is serialized with readers via the
        // writer/reader-pool locking discipline (§5); no other process
        // touches the database file while it is open.
        let mmap = unsafe { Mmap::map(&file).map_err(ReaderPoolError::Mmap)? };
        Ok(Handle {
            mmap: Arc::new(mmap),
            generation: self.current_generation(),
        })
    }

    /// Check out a reader, blocking if `capacity` readers are already
    /// outstanding. Returns a stale-free mapping: handles from a
    /// superseded generation are remapped transparently before being
    /// returned.
    pub fn checkout(&self) -> Result<PooledReader, ReaderPoolError> {
        loop {
            let mut outstanding = self.inner.outstanding.lock();
            if *outstanding >= self.inner.capacity {
                self.inner.not_empty.wait(&mut outstanding);
                continue;
            }
            *outstanding += 1;
            drop(outstanding);

            let handle = match self.inner.free.lock().pop() {
                Some(h) if h.generation == self.current_generation() => h,
                _ => match self.map_file() {
                    Ok(h) => h,
                    Err(e) => {
                        *self.inner.outstanding.lock() -= 1;
                        self.inner.not_empty.notify_one();
                        return Err(e);
                    }
                },
            };

            return Ok(PooledReader {
                pool: self.clone(),
                handle: Some(handle),
            });
        }
    }

    fn checkin(&self, handle: Handle) {
        {
            let mut outstanding = self.inner.outstanding.lock();
            *outstanding -= 1;
        }
        if handle.generation == self.current_generation() {
            self.inner.free.lock().push(handle);
        }
        self.inner.not_empty.notify_one();
    }

    /// Current count of readers checked out (for tests and metrics).
    pub fn outstanding(&self) -> usize {
        *self.inner.outstanding.lock()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }
}

/// A checked-out reader. Dropping it returns the mapping to the pool
/// (unless a checkpoint invalidated it meanwhile, in which case it is
/// simply discarded).
pub struct PooledReader {
    pool: ReaderPool,
    handle: Option<Handle>,
}

impl PooledReader {
    pub fn bytes(&self) -> &[u8] {
        &self.handle.as_ref().expect("handle present until drop")
            .mmap[..]
    }
}

impl Drop for PooledReader {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.pool.checkin(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_euff_file(bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(bytes).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn checkout_and_checkin_respects_capacity() {
        let file = temp_euff_file(b"hello world");
        let pool = ReaderPool::new(file.path(), 2);

        let r1 = pool.checkout().unwrap();
        let r2 = pool.checkout().unwrap();
        assert_eq!(pool.outstanding(), 2);
        drop(r1);
        drop(r2);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn bytes_reflect_file_contents() {
        let file = temp_euff_file(b"abc123");
        let pool = ReaderPool::new(file.path(), 4);
        let r = pool.checkout().unwrap();
        assert_eq!(r.bytes(), b"abc123");
    }

    #[test]
    fn invalidate_bumps_generation_and_clears_free_list() {
        let file = temp_euff_file(b"v1 data");
        let pool = ReaderPool::new(file.path(), 4);
        let r = pool.checkout().unwrap();
        drop(r);
        assert_eq!(pool.inner.free.lock().len(), 1);
        pool.invalidate();
        assert_eq!(pool.inner.free.lock().len(), 0);
    }
}
