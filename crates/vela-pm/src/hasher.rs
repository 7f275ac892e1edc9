//! Package content hashing
//!
//! A package's identity is a SHA-256 digest over its source tree. Each file
//! contributes `normalized_path || 0x00 || executable_bit || contents`; the
//! package digest folds the per-file digests in normalized-path order, so the
//! result does not depend on filesystem enumeration order or on the host
//! path separator. Per-file work fans out across a shared [`WorkerPool`].

use crate::digest::ContentDigest;
use crossbeam::channel::Sender;
use sha2::{Digest as _, Sha256};
use std::borrow::Cow;
use std::fs::{self, File};
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::thread;
use thiserror::Error;
use tracing::error;

/// Read buffer for streaming file contents into the hasher.
pub const FILE_READ_BUF_LEN: usize = 8 * 1024;

/// Errors that can occur while hashing a package tree
#[derive(Debug, Error)]
pub enum HashError {
    /// Entry that is neither a regular file nor a directory
    #[error("illegal file type in package: {path} is not a regular file or directory")]
    IllegalFileTypeInPackage { path: PathBuf },

    /// One or more files could not be hashed; each failure was logged
    #[error("package hash unavailable: {failures} file(s) could not be hashed")]
    PackageHashUnavailable { failures: usize },

    /// IO error while walking the tree
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Replace the host path separator with `/`.
///
/// The result feeds the hasher, so it must be byte-identical across
/// operating systems. Idempotent; on hosts whose separator already is `/`
/// the input is returned as-is.
pub fn normalize_path(path: &str) -> Cow<'_, str> {
    if std::path::MAIN_SEPARATOR == '/' {
        Cow::Borrowed(path)
    } else {
        Cow::Owned(path.replace(std::path::MAIN_SEPARATOR, "/"))
    }
}

#[cfg(unix)]
fn is_executable(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o100 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &fs::Metadata) -> bool {
    // The bit cannot be read here, so it hashes as 0; a tree containing
    // executables therefore hashes differently than it does on unix.
    false
}

/// Hash one file: normalized path, a zero byte, the executable bit, then the
/// contents streamed through an 8 KiB buffer.
pub fn hash_file(fs_path: &Path, normalized_path: &str) -> io::Result<ContentDigest> {
    let mut hasher = Sha256::new();
    hasher.update(normalized_path.as_bytes());
    hasher.update([0u8]);

    let file = File::open(fs_path)?;
    let executable = is_executable(&file.metadata()?);
    hasher.update([executable as u8]);

    let mut reader = io::BufReader::with_capacity(FILE_READ_BUF_LEN, file);
    loop {
        let chunk = reader.fill_buf()?;
        if chunk.is_empty() {
            break;
        }
        hasher.update(chunk);
        let consumed = chunk.len();
        reader.consume(consumed);
    }

    Ok(ContentDigest::from_hasher(hasher))
}

/// Per-file record produced by the workers.
struct HashedFile {
    fs_path: PathBuf,
    normalized_path: String,
    hash: io::Result<ContentDigest>,
}

/// Shared pool of hashing threads.
///
/// One pool serves every directory hash in a resolve run; each call
/// dispatches its files and waits for its own records, so calls do not
/// observe each other.
pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    workers: Vec<thread::JoinHandle<()>>,
}

type Job = Box<dyn FnOnce() + Send + 'static>;

impl WorkerPool {
    /// Spawn `threads` workers (at least one).
    pub fn new(threads: usize) -> Self {
        let threads = threads.max(1);
        let (sender, receiver) = crossbeam::channel::unbounded::<Job>();

        let mut workers = Vec::with_capacity(threads);
        for id in 0..threads {
            let receiver = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("vela-hash-{id}"))
                .spawn(move || {
                    while let Ok(job) = receiver.recv() {
                        job();
                    }
                })
                .expect("failed to spawn hash worker");
            workers.push(handle);
        }

        WorkerPool {
            sender: Some(sender),
            workers,
        }
    }

    /// Spawn one worker per available core.
    pub fn with_default_parallelism() -> Self {
        let threads = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self::new(threads)
    }

    fn execute(&self, job: impl FnOnce() + Send + 'static) {
        self.sender
            .as_ref()
            .expect("worker pool is live")
            .send(Box::new(job))
            .expect("hash workers exited early");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the channel lets the workers drain and exit.
        self.sender.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

/// Hash the package tree rooted at `root`.
///
/// Rejects entries that are neither regular files nor directories. Per-file
/// failures are logged individually and aggregated into a single
/// [`HashError::PackageHashUnavailable`].
pub fn hash_package_dir(pool: &WorkerPool, root: &Path) -> Result<ContentDigest, HashError> {
    let mut rel_paths = Vec::new();
    collect_files(root, Path::new(""), &mut rel_paths)?;

    let (sender, receiver) = crossbeam::channel::unbounded::<HashedFile>();
    for rel in rel_paths {
        let fs_path = root.join(&rel);
        match rel.to_str() {
            Some(rel_str) => {
                let normalized_path = normalize_path(rel_str).into_owned();
                let sender = sender.clone();
                pool.execute(move || {
                    let hash = hash_file(&fs_path, &normalized_path);
                    let _ = sender.send(HashedFile {
                        fs_path,
                        normalized_path,
                        hash,
                    });
                });
            }
            None => {
                // Cannot be represented in the cross-platform hash input.
                let _ = sender.send(HashedFile {
                    normalized_path: rel.to_string_lossy().into_owned(),
                    fs_path,
                    hash: Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "non-UTF-8 file name",
                    )),
                });
            }
        }
    }
    drop(sender);

    // The closed channel is the barrier: iteration ends once every
    // dispatched job has sent its record.
    let mut records: Vec<HashedFile> = receiver.iter().collect();
    records.sort_by(|a, b| a.normalized_path.cmp(&b.normalized_path));

    let mut failures = 0usize;
    let mut hasher = Sha256::new();
    for record in &records {
        match &record.hash {
            Ok(digest) => hasher.update(digest.as_bytes()),
            Err(err) => {
                error!(path = %record.fs_path.display(), %err, "unable to hash file");
                failures += 1;
            }
        }
    }

    if failures > 0 {
        return Err(HashError::PackageHashUnavailable { failures });
    }
    Ok(ContentDigest::from_hasher(hasher))
}

fn collect_files(root: &Path, rel: &Path, out: &mut Vec<PathBuf>) -> Result<(), HashError> {
    for entry in fs::read_dir(root.join(rel))? {
        let entry = entry?;
        // DirEntry::file_type does not follow symlinks, so links show up as
        // links here rather than as their targets.
        let file_type = entry.file_type()?;
        let rel_child = rel.join(entry.file_name());

        if file_type.is_dir() {
            collect_files(root, &rel_child, out)?;
        } else if file_type.is_file() {
            out.push(rel_child);
        } else {
            return Err(HashError::IllegalFileTypeInPackage {
                path: root.join(rel_child),
            });
        }
    }
    Ok(())
}
