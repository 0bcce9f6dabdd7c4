use std::convert::TryInto;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileTypeExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::process::Command;

use anyhow::{bail, Context, Result};
use fs2::FileExt;
use memmap::{MmapMut, MmapOptions};
use nix::ioctl_read;
use tracing::debug;

/// A memory-mapped volume image, either a regular file or a block device.
pub struct Partition {
    mmap: MmapMut,
    read_only: bool,
}

impl Partition {
    /// Maps the image for reading and writing, holding an exclusive lock on it.
    pub fn open<P: AsRef<Path>>(partition_path: P) -> Result<Self> {
        Self::open_with(partition_path.as_ref(), false)
    }

    /// Maps a private copy of the image, holding a shared lock on it. Writes to the mapping never reach the image.
    pub fn open_read_only<P: AsRef<Path>>(partition_path: P) -> Result<Self> {
        Self::open_with(partition_path.as_ref(), true)
    }

    fn open_with(partition_path: &Path, read_only: bool) -> Result<Self> {
        let partition_path = partition_path
            .canonicalize()
            .with_context(|| format!("Cannot resolve {}", partition_path.display()))?;
        if Self::is_mounted(&partition_path)? {
            bail!("{} is mounted", partition_path.display());
        }
        let file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .create(false)
            .open(&partition_path)
            .with_context(|| format!("Cannot open {}", partition_path.display()))?;
        // the lock is only advisory, other processes may still access the file
        // the lock is automatically released after both file and mmap are dropped
        let locked = if read_only { FileExt::try_lock_shared(&file) } else { FileExt::try_lock_exclusive(&file) };
        locked.with_context(|| format!("{} is locked by another process", partition_path.display()))?;

        let size = Self::get_file_size(&file)?;
        // SAFETY: We assume that no other process is modifying the partition
        let mmap = unsafe {
            if read_only {
                MmapOptions::new().len(size).map_copy(&file)?
            } else {
                MmapOptions::new().len(size).map_mut(&file)?
            }
        };
        debug!(path = %partition_path.display(), size, read_only, "Mapped image");
        Ok(Self { mmap, read_only })
    }

    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.mmap
    }

    /// Replaces the image content with `data` and flushes it to disk.
    pub fn write_back(&mut self, data: &[u8]) -> Result<()> {
        if self.read_only {
            bail!("Image was opened read-only");
        }
        if data.len() != self.len() {
            bail!("Expected {} bytes to write back, got {}", self.len(), data.len());
        }
        self.mmap.copy_from_slice(data);
        self.mmap.flush().context("Cannot flush image to disk")
    }

    fn get_file_size(file: &File) -> Result<usize> {
        let metadata = file.metadata()?;
        let filetype = metadata.file_type();
        let len = if filetype.is_file() {
            metadata.len()
        } else if filetype.is_block_device() {
            Self::get_block_device_size(file)?
        } else {
            bail!("Expected path to a file or a block device")
        };

        len.try_into()
            .with_context(|| format!("File size {} does not fit into a usize", len))
    }

    /// Looks for the image among the devices listed by `mount`. Systems without `mount` have nothing mounted.
    fn is_mounted(partition_path: &Path) -> Result<bool> {
        let path_str = partition_path.to_str().context("Partition path is not valid UTF-8")?;
        let output_bytes = match Command::new("mount").output() {
            Ok(output) => output.stdout,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(err).context("Cannot run mount"),
        };
        let output = String::from_utf8_lossy(&output_bytes);
        Ok(output.lines().any(|line| line.split_whitespace().next() == Some(path_str)))
    }

    // declared in linux/fs.h
    // The type is declared as size_t due to a bug that cannot be fixed due to backwards compatibility, passing u64
    // instead of usize works on 32bit systems as well. cfr. https://lists.debian.org/debian-glibc/2005/12/msg00069.html
    #[cfg(target_os = "linux")]
    ioctl_read!(block_device_size, 0x12, 114, u64);

    /// PANICS: Panics if `file` is not a block device.
    #[cfg(target_os = "linux")]
    fn get_block_device_size(file: &File) -> Result<u64> {
        assert!(file.metadata()?.file_type().is_block_device());
        let mut size = 0;
        // SAFETY: the nix crate provides no safety documentation, so we must just assume that this is safe.
        unsafe {
            Self::block_device_size(file.as_raw_fd(), &mut size)?;
        }
        Ok(size)
    }
}
