// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    thread::{self, JoinHandle},
    time::UNIX_EPOCH,
};

use crossbeam::channel::{unbounded, Sender};
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::{
    lump::PakArchive, normalize_path, path::has_extension, FileError, FileReadTask, FileSystem, Media, ReadCompletion,
    ReadNotify,
};

struct ReadRequest {
    path: String,
    media: Media,
    completion: ReadCompletion,
}

struct Shared {
    root: PathBuf,
    paks: RwLock<Vec<PakArchive>>,
}

impl Shared {
    fn disk_path(&self, path: &str) -> Result<(String, PathBuf), FileError> {
        let path = normalize_path(path)?;
        let disk_path = self.root.join(&path);
        Ok((path, disk_path))
    }

    fn read(&self, path: &str, media: Media) -> Result<Vec<u8>, FileError> {
        let (path, disk_path) = self.disk_path(path)?;
        if media.contains(Media::DISK) {
            match fs::read(&disk_path) {
                Ok(bytes) => return Ok(bytes),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(FileError::from_io(&path, err)),
            }
        }
        if media.contains(Media::PAKS) {
            if let Some(result) = self.paks.read().iter().rev().find_map(|pak| pak.read(&path)) {
                return result;
            }
        }
        Err(FileError::NotFound(path))
    }
}

/// A [`FileSystem`] backed by a directory on the disk, plus any pak archives
/// mounted into it. Asynchronous reads are done by a dedicated reader thread.
pub struct NativeFileSystem {
    shared: Arc<Shared>,
    reader: Option<(Sender<ReadRequest>, JoinHandle<()>)>,
}

impl NativeFileSystem {
    /// Creates a file system rooted at `root`. Returns an error if the reader
    /// thread could not be spawned.
    pub fn new(root: impl Into<PathBuf>) -> Result<NativeFileSystem, FileError> {
        let shared = Arc::new(Shared {
            root: root.into(),
            paks: RwLock::new(Vec::new()),
        });

        let (tx, rx) = unbounded::<ReadRequest>();
        let thread_shared = shared.clone();
        let handle = thread::Builder::new()
            .name("file reader".to_string())
            .spawn(move || {
                while let Ok(ReadRequest {
                    path,
                    media,
                    completion,
                }) = rx.recv()
                {
                    if completion.is_cancelled() {
                        completion.complete(Err(FileError::Cancelled(path)));
                    } else {
                        completion.complete(thread_shared.read(&path, media));
                    }
                }
            })
            .map_err(|err| FileError::from_io("file reader thread", err))?;

        Ok(NativeFileSystem {
            shared,
            reader: Some((tx, handle)),
        })
    }

    pub fn root(&self) -> &Path {
        &self.shared.root
    }
}

impl Drop for NativeFileSystem {
    fn drop(&mut self) {
        if let Some((tx, handle)) = self.reader.take() {
            drop(tx);
            if handle.join().is_err() {
                warn!("file reader thread panicked");
            }
        }
    }
}

impl FileSystem for NativeFileSystem {
    fn read(&self, path: &str, media: Media) -> Result<Vec<u8>, FileError> {
        self.shared.read(path, media)
    }

    fn begin_read(&self, path: &str, media: Media, notify: Option<ReadNotify>) -> FileReadTask {
        let (task, completion) = FileReadTask::new(path, notify);
        let request = ReadRequest {
            path: path.to_string(),
            media,
            completion,
        };
        match &self.reader {
            Some((tx, _)) => {
                if let Err(err) = tx.send(request) {
                    // The reader thread is gone, do the read here instead.
                    let ReadRequest {
                        path,
                        media,
                        completion,
                    } = err.into_inner();
                    completion.complete(self.shared.read(&path, media));
                }
            }
            None => request
                .completion
                .complete(self.shared.read(&request.path, request.media)),
        }
        task
    }

    fn write(&self, path: &str, data: &[u8]) -> Result<(), FileError> {
        let (path, disk_path) = self.shared.disk_path(path)?;
        if let Some(parent) = disk_path.parent() {
            fs::create_dir_all(parent).map_err(|err| FileError::from_io(&path, err))?;
        }
        fs::write(&disk_path, data).map_err(|err| FileError::from_io(&path, err))
    }

    fn exists(&self, path: &str, media: Media) -> bool {
        let Ok((path, disk_path)) = self.shared.disk_path(path) else {
            return false;
        };
        (media.contains(Media::DISK) && disk_path.is_file())
            || (media.contains(Media::PAKS)
                && self.shared.paks.read().iter().any(|pak| pak.contains(&path)))
    }

    fn modified_time(&self, path: &str, media: Media) -> Result<u64, FileError> {
        let (path, disk_path) = self.shared.disk_path(path)?;
        if !media.contains(Media::DISK) {
            return Err(FileError::NotFound(path));
        }
        let metadata = fs::metadata(&disk_path).map_err(|err| FileError::from_io(&path, err))?;
        let modified = metadata
            .modified()
            .map_err(|err| FileError::from_io(&path, err))?;
        Ok(modified
            .duration_since(UNIX_EPOCH)
            .map(|since| since.as_millis() as u64)
            .unwrap_or(0))
    }

    fn find_files(&self, dir: &str, extension: &str, media: Media) -> Result<Vec<String>, FileError> {
        let (dir, disk_dir) = self.shared.disk_path(dir)?;
        let mut found = Vec::new();

        if media.contains(Media::DISK) {
            let mut pending = vec![(dir.clone(), disk_dir)];
            while let Some((virtual_dir, disk_dir)) = pending.pop() {
                let entries = match fs::read_dir(&disk_dir) {
                    Ok(entries) => entries,
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(err) => return Err(FileError::from_io(&virtual_dir, err)),
                };
                for entry in entries {
                    let entry = entry.map_err(|err| FileError::from_io(&virtual_dir, err))?;
                    let name = entry.file_name().to_string_lossy().into_owned();
                    let virtual_path = if virtual_dir.is_empty() {
                        name
                    } else {
                        format!("{virtual_dir}/{name}")
                    };
                    let file_type = entry
                        .file_type()
                        .map_err(|err| FileError::from_io(&virtual_path, err))?;
                    if file_type.is_dir() {
                        pending.push((virtual_path, entry.path()));
                    } else if has_extension(&virtual_path, extension) {
                        found.push(virtual_path);
                    }
                }
            }
        }

        if media.contains(Media::PAKS) {
            let prefix = if dir.is_empty() { dir } else { format!("{dir}/") };
            for pak in self.shared.paks.read().iter() {
                found.extend(
                    pak.file_names()
                        .filter(|name| name.starts_with(&prefix) && has_extension(name, extension))
                        .map(str::to_string),
                );
            }
        }

        found.sort();
        found.dedup();
        Ok(found)
    }

    fn delete_file(&self, path: &str) -> Result<(), FileError> {
        let (path, disk_path) = self.shared.disk_path(path)?;
        fs::remove_file(disk_path).map_err(|err| FileError::from_io(&path, err))
    }

    fn create_dir_all(&self, path: &str) -> Result<(), FileError> {
        let (path, disk_path) = self.shared.disk_path(path)?;
        fs::create_dir_all(disk_path).map_err(|err| FileError::from_io(&path, err))
    }

    fn delete_dir_all(&self, path: &str) -> Result<(), FileError> {
        let (path, disk_path) = self.shared.disk_path(path)?;
        match fs::remove_dir_all(disk_path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(FileError::from_io(&path, err)),
        }
    }

    fn mount_pak(&self, path: &str) -> Result<(), FileError> {
        let bytes = self.read(path, Media::DISK)?;
        let pak = PakArchive::open(path, bytes)?;
        debug!(pak = path, files = pak.file_names().count(), "mounted pak");
        self.shared.paks.write().push(pak);
        Ok(())
    }
}
