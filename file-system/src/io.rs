// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use core::{
    fmt::{self, Debug},
    ops::{BitAnd, BitOr, BitOrAssign},
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crossbeam::channel::{bounded, Receiver, Sender, TryRecvError};

/// Where a file may be looked up from. Reads can be scoped to physical files,
/// files stored inside mounted pak archives, or both.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Media(u8);

impl Media {
    pub const NONE: Media = Media(0);
    /// Files on the physical disk, under the file system's root directory.
    pub const DISK: Media = Media(1);
    /// Files inside the pak archives mounted with [`FileSystem::mount_pak`].
    pub const PAKS: Media = Media(2);
    pub const ALL: Media = Media(1 | 2);

    pub fn contains(self, other: Media) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }
}

impl BitOr for Media {
    type Output = Media;
    fn bitor(self, rhs: Self) -> Self::Output {
        Media(self.0 | rhs.0)
    }
}

impl BitOrAssign for Media {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Media {
    type Output = Media;
    fn bitand(self, rhs: Self) -> Self::Output {
        Media(self.0 & rhs.0)
    }
}

impl Debug for Media {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Media::NONE => write!(f, "Media::NONE"),
            Media::DISK => write!(f, "Media::DISK"),
            Media::PAKS => write!(f, "Media::PAKS"),
            _ => write!(f, "Media::ALL"),
        }
    }
}

/// Errors from [`FileSystem`] operations.
#[derive(Debug, thiserror::Error)]
pub enum FileError {
    #[error("file not found: {0}")]
    NotFound(String),
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("invalid virtual path: {0:?}")]
    InvalidPath(String),
    #[error("read of {0} was cancelled")]
    Cancelled(String),
    #[error("corrupt archive {path}: {reason}")]
    CorruptArchive { path: String, reason: String },
    #[error("i/o error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl FileError {
    /// Wraps a [`std::io::Error`], picking the more specific variants for the
    /// error kinds that have one.
    pub fn from_io(path: &str, source: std::io::Error) -> FileError {
        match source.kind() {
            std::io::ErrorKind::NotFound => FileError::NotFound(path.to_string()),
            std::io::ErrorKind::PermissionDenied => FileError::AccessDenied(path.to_string()),
            _ => FileError::Io {
                path: path.to_string(),
                source,
            },
        }
    }

    /// The small negative status code for this error. File system errors use
    /// the range -1 to -6, so they can be passed through as sink results.
    pub fn code(&self) -> i32 {
        match self {
            FileError::NotFound(_) => -1,
            FileError::AccessDenied(_) => -2,
            FileError::InvalidPath(_) => -3,
            FileError::Cancelled(_) => -4,
            FileError::CorruptArchive { .. } => -5,
            FileError::Io { .. } => -6,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, FileError::NotFound(_))
    }
}

/// Called from the thread that finishes an asynchronous read.
pub type ReadNotify = Box<dyn FnOnce() + Send>;

type ReadResult = Result<Vec<u8>, FileError>;

/// Handle to an asynchronous file reading operation started with
/// [`FileSystem::begin_read`]. Poll it with [`FileReadTask::poll`] until it
/// returns the result, or block on it with [`FileReadTask::wait`].
///
/// Dropping the task cancels the read on a best-effort basis.
pub struct FileReadTask {
    path: String,
    receiver: Receiver<ReadResult>,
    cancelled: Arc<AtomicBool>,
}

/// The other half of a [`FileReadTask`], held by whoever performs the read.
pub struct ReadCompletion {
    sender: Sender<ReadResult>,
    cancelled: Arc<AtomicBool>,
    notify: Option<ReadNotify>,
}

impl FileReadTask {
    /// Creates a task and the completion it waits for.
    pub fn new(path: &str, notify: Option<ReadNotify>) -> (FileReadTask, ReadCompletion) {
        let (sender, receiver) = bounded(1);
        let cancelled = Arc::new(AtomicBool::new(false));
        let task = FileReadTask {
            path: path.to_string(),
            receiver,
            cancelled: cancelled.clone(),
        };
        let completion = ReadCompletion {
            sender,
            cancelled,
            notify,
        };
        (task, completion)
    }

    /// Creates a task that has already finished, for file systems which can
    /// answer reads immediately.
    pub fn finished(path: &str, result: ReadResult, notify: Option<ReadNotify>) -> FileReadTask {
        let (task, completion) = FileReadTask::new(path, notify);
        completion.complete(result);
        task
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the read's result if it has finished, `None` if it's still in
    /// flight. Once this has returned `Some`, the task is consumed and further
    /// polls return a [`FileError::Cancelled`].
    pub fn poll(&mut self) -> Option<ReadResult> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(FileError::Cancelled(self.path.clone()))),
        }
    }

    /// Blocks until the read has finished.
    pub fn wait(self) -> ReadResult {
        self.receiver
            .recv()
            .unwrap_or_else(|_| Err(FileError::Cancelled(self.path.clone())))
    }

    /// Asks the reader to skip this read if it hasn't started it yet.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

impl Drop for FileReadTask {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl ReadCompletion {
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Hands the result to the task and runs the notify callback, if any.
    pub fn complete(mut self, result: ReadResult) {
        // The task may have been dropped already, that's fine.
        let _ = self.sender.try_send(result);
        if let Some(notify) = self.notify.take() {
            notify();
        }
    }
}

/// The file operations the package and cooking code needs.
///
/// Paths are virtual: relative to the file system's root, separated with `/`.
/// Reads are scoped by [`Media`], writes always go to the disk.
///
/// All the functions take `&self` and this trait is object safe, so the file
/// system can be shared as an `Arc<dyn FileSystem>` between threads.
pub trait FileSystem: Send + Sync {
    /// Reads the whole file.
    fn read(&self, path: &str, media: Media) -> Result<Vec<u8>, FileError>;

    /// Starts reading the whole file in the background. `notify` is called on
    /// completion, from whatever thread finished the read.
    fn begin_read(&self, path: &str, media: Media, notify: Option<ReadNotify>) -> FileReadTask;

    /// Writes the file, replacing any previous contents. Missing parent
    /// directories are created.
    fn write(&self, path: &str, data: &[u8]) -> Result<(), FileError>;

    fn exists(&self, path: &str, media: Media) -> bool;

    /// The modification time of the file in milliseconds since the UNIX
    /// epoch.
    fn modified_time(&self, path: &str, media: Media) -> Result<u64, FileError>;

    /// Lists the files under `dir` (recursively) with the given extension
    /// (without the dot), or every file if `extension` is empty. The returned
    /// paths include `dir`.
    fn find_files(&self, dir: &str, extension: &str, media: Media) -> Result<Vec<String>, FileError>;

    fn delete_file(&self, path: &str) -> Result<(), FileError>;

    fn create_dir_all(&self, path: &str) -> Result<(), FileError>;

    /// Deletes the directory and everything in it. Missing directories are
    /// not an error.
    fn delete_dir_all(&self, path: &str) -> Result<(), FileError>;

    /// Mounts the pak archive at `path` (on disk) so its files can be read
    /// with [`Media::PAKS`]. Later mounts shadow earlier ones.
    fn mount_pak(&self, path: &str) -> Result<(), FileError>;
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::{FileError, FileReadTask, Media};

    #[test]
    fn media_contains() {
        assert!(Media::ALL.contains(Media::DISK));
        assert!(Media::ALL.contains(Media::PAKS));
        assert!(!Media::DISK.contains(Media::PAKS));
        assert!(!Media::ALL.contains(Media::NONE));
        assert_eq!(Media::ALL, Media::DISK | Media::PAKS);
    }

    #[test]
    fn read_task_completes_and_notifies() {
        let notified = Arc::new(AtomicUsize::new(0));
        let counter = notified.clone();
        let (mut task, completion) = FileReadTask::new(
            "a.bin",
            Some(Box::new(move || {
                counter.fetch_add(1, Ordering::Relaxed);
            })),
        );
        assert!(task.poll().is_none());
        completion.complete(Ok(vec![1, 2, 3]));
        assert_eq!(1, notified.load(Ordering::Relaxed));
        assert_eq!(vec![1, 2, 3], task.poll().unwrap().unwrap());
    }

    #[test]
    fn dropped_completion_reads_as_cancelled() {
        let (task, completion) = FileReadTask::new("a.bin", None);
        task.cancel();
        assert!(completion.is_cancelled());
        drop(completion);
        assert!(matches!(task.wait(), Err(FileError::Cancelled(_))));
    }
}
