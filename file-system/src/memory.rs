// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
};

use parking_lot::{Mutex, RwLock};

use crate::{
    lump::PakArchive, normalize_path, path::has_extension, FileError, FileReadTask, FileSystem, Media, ReadCompletion,
    ReadNotify,
};

struct MemoryFile {
    data: Vec<u8>,
    modified: u64,
}

/// A [`FileSystem`] that keeps everything in memory, with a fake clock for
/// modification times. Every write advances the clock by one millisecond, so
/// a file written later is always newer.
///
/// Asynchronous reads finish immediately, unless [`MemoryFileSystem::hold_reads`]
/// has been called, in which case they stay in flight until
/// [`MemoryFileSystem::release_reads`].
pub struct MemoryFileSystem {
    files: RwLock<BTreeMap<String, MemoryFile>>,
    paks: RwLock<Vec<PakArchive>>,
    clock: AtomicU64,
    holding_reads: AtomicBool,
    held_reads: Mutex<Vec<(String, Media, ReadCompletion)>>,
}

impl Default for MemoryFileSystem {
    fn default() -> Self {
        MemoryFileSystem::new()
    }
}

impl MemoryFileSystem {
    pub fn new() -> MemoryFileSystem {
        MemoryFileSystem {
            files: RwLock::new(BTreeMap::new()),
            paks: RwLock::new(Vec::new()),
            clock: AtomicU64::new(1_700_000_000_000),
            holding_reads: AtomicBool::new(false),
            held_reads: Mutex::new(Vec::new()),
        }
    }

    /// The current time of the fake clock, in milliseconds.
    pub fn now(&self) -> u64 {
        self.clock.load(Ordering::Acquire)
    }

    pub fn advance_clock(&self, millis: u64) {
        self.clock.fetch_add(millis, Ordering::AcqRel);
    }

    /// Overrides the modification time of an existing file.
    pub fn set_modified_time(&self, path: &str, modified: u64) -> Result<(), FileError> {
        let path = normalize_path(path)?;
        let mut files = self.files.write();
        let file = files.get_mut(&path).ok_or(FileError::NotFound(path.clone()))?;
        file.modified = modified;
        Ok(())
    }

    /// All the file paths currently on the in-memory disk.
    pub fn file_paths(&self) -> Vec<String> {
        self.files.read().keys().cloned().collect()
    }

    /// Makes [`FileSystem::begin_read`] leave reads in flight.
    pub fn hold_reads(&self) {
        self.holding_reads.store(true, Ordering::Release);
    }

    /// Finishes every read held since [`MemoryFileSystem::hold_reads`], and
    /// goes back to finishing reads immediately.
    pub fn release_reads(&self) {
        self.holding_reads.store(false, Ordering::Release);
        let held = core::mem::take(&mut *self.held_reads.lock());
        for (path, media, completion) in held {
            if completion.is_cancelled() {
                completion.complete(Err(FileError::Cancelled(path)));
            } else {
                completion.complete(self.read(&path, media));
            }
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn read_pak(&self, path: &str) -> Option<Result<Vec<u8>, FileError>> {
        self.paks.read().iter().rev().find_map(|pak| pak.read(path))
    }
}

impl FileSystem for MemoryFileSystem {
    fn read(&self, path: &str, media: Media) -> Result<Vec<u8>, FileError> {
        let path = normalize_path(path)?;
        if media.contains(Media::DISK) {
            if let Some(file) = self.files.read().get(&path) {
                return Ok(file.data.clone());
            }
        }
        if media.contains(Media::PAKS) {
            if let Some(result) = self.read_pak(&path) {
                return result;
            }
        }
        Err(FileError::NotFound(path))
    }

    fn begin_read(&self, path: &str, media: Media, notify: Option<ReadNotify>) -> FileReadTask {
        if self.holding_reads.load(Ordering::Acquire) {
            let (task, completion) = FileReadTask::new(path, notify);
            self.held_reads
                .lock()
                .push((path.to_string(), media, completion));
            task
        } else {
            FileReadTask::finished(path, self.read(path, media), notify)
        }
    }

    fn write(&self, path: &str, data: &[u8]) -> Result<(), FileError> {
        let path = normalize_path(path)?;
        let modified = self.tick();
        self.files.write().insert(
            path,
            MemoryFile {
                data: data.to_vec(),
                modified,
            },
        );
        Ok(())
    }

    fn exists(&self, path: &str, media: Media) -> bool {
        let Ok(path) = normalize_path(path) else {
            return false;
        };
        (media.contains(Media::DISK) && self.files.read().contains_key(&path))
            || (media.contains(Media::PAKS) && self.paks.read().iter().any(|p| p.contains(&path)))
    }

    fn modified_time(&self, path: &str, media: Media) -> Result<u64, FileError> {
        let path = normalize_path(path)?;
        if media.contains(Media::DISK) {
            if let Some(file) = self.files.read().get(&path) {
                return Ok(file.modified);
            }
        }
        Err(FileError::NotFound(path))
    }

    fn find_files(&self, dir: &str, extension: &str, media: Media) -> Result<Vec<String>, FileError> {
        let dir = normalize_path(dir)?;
        let prefix = if dir.is_empty() { dir } else { format!("{dir}/") };
        let matches = |path: &str| path.starts_with(&prefix) && has_extension(path, extension);

        let mut found = Vec::new();
        if media.contains(Media::DISK) {
            found.extend(self.files.read().keys().filter(|p| matches(p)).cloned());
        }
        if media.contains(Media::PAKS) {
            for pak in self.paks.read().iter() {
                found.extend(pak.file_names().filter(|p| matches(p)).map(str::to_string));
            }
        }
        found.sort();
        found.dedup();
        Ok(found)
    }

    fn delete_file(&self, path: &str) -> Result<(), FileError> {
        let path = normalize_path(path)?;
        match self.files.write().remove(&path) {
            Some(_) => Ok(()),
            None => Err(FileError::NotFound(path)),
        }
    }

    fn create_dir_all(&self, path: &str) -> Result<(), FileError> {
        normalize_path(path)?;
        Ok(())
    }

    fn delete_dir_all(&self, path: &str) -> Result<(), FileError> {
        let prefix = format!("{}/", normalize_path(path)?);
        self.files.write().retain(|path, _| !path.starts_with(&prefix));
        Ok(())
    }

    fn mount_pak(&self, path: &str) -> Result<(), FileError> {
        let bytes = self.read(path, Media::DISK)?;
        let pak = PakArchive::open(path, bytes)?;
        self.paks.write().push(pak);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        lump::{LumpWriter, PAK_ID, PAK_SIG},
        FileSystem, Media,
    };

    use super::MemoryFileSystem;

    #[test]
    fn later_writes_are_newer() {
        let fs = MemoryFileSystem::new();
        fs.write("a.txt", b"a").unwrap();
        fs.write("b.txt", b"b").unwrap();
        let a = fs.modified_time("a.txt", Media::DISK).unwrap();
        let b = fs.modified_time("b.txt", Media::DISK).unwrap();
        assert!(b > a);
    }

    #[test]
    fn finds_files_by_extension() {
        let fs = MemoryFileSystem::new();
        fs.write("Packages/Base.pkg", b"[]").unwrap();
        fs.write("Packages/Sub/Extra.pkg", b"[]").unwrap();
        fs.write("Packages/Base.pkg.idx", b"").unwrap();
        fs.write("Other/Nope.pkg", b"[]").unwrap();
        assert_eq!(
            vec!["Packages/Base.pkg", "Packages/Sub/Extra.pkg"],
            fs.find_files("Packages", "pkg", Media::ALL).unwrap()
        );
    }

    #[test]
    fn reads_from_mounted_paks() {
        let fs = MemoryFileSystem::new();
        let mut pak = LumpWriter::new(PAK_SIG, PAK_ID);
        pak.write_lump("Cooked/Base/Rock.bin", &[1, 2, 3], &[], 0, 8)
            .unwrap();
        fs.write("Cooked/Packages/Base/pak0.pak", &pak.finish().unwrap())
            .unwrap();
        fs.mount_pak("Cooked/Packages/Base/pak0.pak").unwrap();

        assert!(!fs.exists("Cooked/Base/Rock.bin", Media::DISK));
        assert!(fs.exists("Cooked/Base/Rock.bin", Media::PAKS));
        assert_eq!(vec![1, 2, 3], fs.read("Cooked/Base/Rock.bin", Media::ALL).unwrap());
    }

    #[test]
    fn held_reads_stay_in_flight() {
        let fs = MemoryFileSystem::new();
        fs.write("a.bin", &[42]).unwrap();
        fs.hold_reads();
        let mut task = fs.begin_read("a.bin", Media::DISK, None);
        assert!(task.poll().is_none());
        fs.release_reads();
        assert_eq!(vec![42], task.poll().unwrap().unwrap());
    }

    #[test]
    fn deletes_directories() {
        let fs = MemoryFileSystem::new();
        fs.write("Cooked/Out/a.bin", &[]).unwrap();
        fs.write("Cooked2/b.bin", &[]).unwrap();
        fs.delete_dir_all("Cooked").unwrap();
        assert_eq!(vec!["Cooked2/b.bin".to_string()], fs.file_paths());
    }
}
