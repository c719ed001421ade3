/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Shared-region Exchange Channel.
//!
//! A named POSIX shared-memory object holds the message; a named semaphore
//! initialised to 1 serialises access.  The critical section is one
//! whole-buffer copy in either direction.
//!
//! The producer owns both names: [`ShmWriter::create`] creates them and its
//! `Drop` unlinks them.  Consumers attach with [`ShmReader::open`], which
//! fails if the producer has not started yet.

use std::ffi::CString;
use std::io;
use std::mem;
use std::ptr;

use libc::{c_uint, c_void, sem_t};
use tracing::{debug, info, warn};

use super::{check_len, ChannelError, ExchangeReader, ExchangeWriter};

const CREATE_MODE: libc::mode_t = 0o666;

fn c_name(name: &str) -> Result<CString, ChannelError> {
    if !name.starts_with('/') || name[1..].contains('/') || name.len() < 2 {
        return Err(ChannelError::InvalidName(name.to_string()));
    }
    CString::new(name).map_err(|_| ChannelError::InvalidName(name.to_string()))
}

// ── Semaphore ─────────────────────────────────────────────────────────────────

struct NamedSemaphore {
    sem: *mut sem_t,
}

impl NamedSemaphore {
    fn create(name: &CString, channel: &str) -> Result<Self, ChannelError> {
        // A semaphore left behind by a crashed producer may be stuck at 0.
        unsafe { libc::sem_unlink(name.as_ptr()) };
        let sem = unsafe {
            libc::sem_open(
                name.as_ptr(),
                libc::O_CREAT,
                CREATE_MODE as c_uint,
                1 as c_uint,
            )
        };
        if sem == libc::SEM_FAILED {
            return Err(ChannelError::setup(channel, "sem_open", io::Error::last_os_error()));
        }
        Ok(Self { sem })
    }

    fn open(name: &CString, channel: &str) -> Result<Self, ChannelError> {
        let sem = unsafe { libc::sem_open(name.as_ptr(), 0) };
        if sem == libc::SEM_FAILED {
            return Err(ChannelError::setup(channel, "sem_open", io::Error::last_os_error()));
        }
        Ok(Self { sem })
    }

    /// Wait for the semaphore.  No guard is handed out unless the wait
    /// succeeded, so a failed wait never posts.
    fn acquire(&self, channel: &str) -> Result<SemGuard<'_>, ChannelError> {
        retry_interrupted(|| {
            if unsafe { libc::sem_wait(self.sem) } == 0 {
                Ok(())
            } else {
                Err(io::Error::last_os_error())
            }
        })
        .map_err(|source| {
            warn!(channel, "sem_wait failed: {source}");
            ChannelError::Lock {
                channel: channel.to_string(),
                source,
            }
        })?;
        Ok(SemGuard { sem: self })
    }
}

/// Repeat `op` while it fails with EINTR.
fn retry_interrupted(mut op: impl FnMut() -> io::Result<()>) -> io::Result<()> {
    loop {
        match op() {
            Err(e) if e.raw_os_error() == Some(libc::EINTR) => continue,
            other => return other,
        }
    }
}

impl Drop for NamedSemaphore {
    fn drop(&mut self) {
        unsafe { libc::sem_close(self.sem) };
    }
}

struct SemGuard<'a> {
    sem: &'a NamedSemaphore,
}

impl Drop for SemGuard<'_> {
    fn drop(&mut self) {
        unsafe { libc::sem_post(self.sem.sem) };
    }
}

// ── Mapping ───────────────────────────────────────────────────────────────────

struct Mapping {
    ptr: *mut u8,
    len: usize,
}

impl Mapping {
    fn map(fd: libc::c_int, len: usize, prot: libc::c_int, channel: &str) -> Result<Self, ChannelError> {
        let ptr = unsafe { libc::mmap(ptr::null_mut(), len, prot, libc::MAP_SHARED, fd, 0) };
        if ptr == libc::MAP_FAILED {
            return Err(ChannelError::setup(channel, "mmap", io::Error::last_os_error()));
        }
        Ok(Self {
            ptr: ptr as *mut u8,
            len,
        })
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        unsafe { libc::munmap(self.ptr as *mut c_void, self.len) };
    }
}

fn close_fd(fd: libc::c_int) {
    unsafe { libc::close(fd) };
}

// ── Writer ────────────────────────────────────────────────────────────────────

/// Producer end; owns and eventually unlinks both named objects.
pub struct ShmWriter {
    name: String,
    shm_name: CString,
    sem_name: CString,
    map: Mapping,
    sem: NamedSemaphore,
}

// SAFETY: the mapping and semaphore handles are process-wide objects; every
// access to the mapped bytes goes through `&mut self` under the semaphore.
unsafe impl Send for ShmWriter {}

impl ShmWriter {
    /// Create (or re-create) the region and semaphore, size the region to
    /// `size` bytes and zero it.
    pub fn create(shm_name: &str, sem_name: &str, size: usize) -> Result<Self, ChannelError> {
        let shm_c = c_name(shm_name)?;
        let sem_c = c_name(sem_name)?;

        let fd = unsafe { libc::shm_open(shm_c.as_ptr(), libc::O_CREAT | libc::O_RDWR, CREATE_MODE) };
        if fd < 0 {
            return Err(ChannelError::setup(shm_name, "shm_open", io::Error::last_os_error()));
        }
        if unsafe { libc::ftruncate(fd, size as libc::off_t) } != 0 {
            let err = io::Error::last_os_error();
            close_fd(fd);
            return Err(ChannelError::setup(shm_name, "ftruncate", err));
        }
        let map = Mapping::map(fd, size, libc::PROT_READ | libc::PROT_WRITE, shm_name);
        close_fd(fd);
        let map = map?;
        unsafe { ptr::write_bytes(map.ptr, 0, size) };

        let sem = NamedSemaphore::create(&sem_c, shm_name)?;

        info!(channel = shm_name, semaphore = sem_name, size, "shared region created");
        Ok(Self {
            name: shm_name.to_string(),
            shm_name: shm_c,
            sem_name: sem_c,
            map,
            sem,
        })
    }
}

impl ExchangeWriter for ShmWriter {
    fn name(&self) -> &str {
        &self.name
    }

    fn message_size(&self) -> usize {
        self.map.len
    }

    fn publish(&mut self, buf: &[u8]) -> Result<(), ChannelError> {
        check_len(&self.name, self.map.len, buf.len())?;
        let _guard = self.sem.acquire(&self.name)?;
        unsafe { ptr::copy_nonoverlapping(buf.as_ptr(), self.map.ptr, buf.len()) };
        Ok(())
    }
}

impl Drop for ShmWriter {
    fn drop(&mut self) {
        unsafe {
            libc::shm_unlink(self.shm_name.as_ptr());
            libc::sem_unlink(self.sem_name.as_ptr());
        }
        debug!(channel = %self.name, "shared region unlinked");
    }
}

// ── Reader ────────────────────────────────────────────────────────────────────

/// Consumer end; maps the region read-only.
pub struct ShmReader {
    name: String,
    map: Mapping,
    sem: NamedSemaphore,
}

// SAFETY: see `ShmWriter`.
unsafe impl Send for ShmReader {}

impl ShmReader {
    /// Attach to an existing region of at least `size` bytes.
    pub fn open(shm_name: &str, sem_name: &str, size: usize) -> Result<Self, ChannelError> {
        let shm_c = c_name(shm_name)?;
        let sem_c = c_name(sem_name)?;

        let fd = unsafe { libc::shm_open(shm_c.as_ptr(), libc::O_RDONLY, 0) };
        if fd < 0 {
            return Err(ChannelError::setup(shm_name, "shm_open", io::Error::last_os_error()));
        }

        let mut st: libc::stat = unsafe { mem::zeroed() };
        if unsafe { libc::fstat(fd, &mut st) } != 0 {
            let err = io::Error::last_os_error();
            close_fd(fd);
            return Err(ChannelError::setup(shm_name, "fstat", err));
        }
        if (st.st_size as usize) < size {
            close_fd(fd);
            return Err(ChannelError::SizeMismatch {
                channel: shm_name.to_string(),
                expected: size,
                actual: st.st_size as usize,
            });
        }

        let map = Mapping::map(fd, size, libc::PROT_READ, shm_name);
        close_fd(fd);
        let map = map?;
        let sem = NamedSemaphore::open(&sem_c, shm_name)?;

        info!(channel = shm_name, semaphore = sem_name, size, "shared region attached");
        Ok(Self {
            name: shm_name.to_string(),
            map,
            sem,
        })
    }
}

impl ExchangeReader for ShmReader {
    fn name(&self) -> &str {
        &self.name
    }

    fn message_size(&self) -> usize {
        self.map.len
    }

    fn snapshot_into(&mut self, out: &mut [u8]) -> Result<(), ChannelError> {
        check_len(&self.name, self.map.len, out.len())?;
        let _guard = self.sem.acquire(&self.name)?;
        unsafe { ptr::copy_nonoverlapping(self.map.ptr as *const u8, out.as_mut_ptr(), out.len()) };
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn names(tag: &str) -> (String, String) {
        let pid = std::process::id();
        (
            format!("/chainbench_{tag}_{pid}_shm"),
            format!("/chainbench_{tag}_{pid}_sem"),
        )
    }

    #[test]
    fn publish_then_snapshot_round_trips() {
        let (shm, sem) = names("roundtrip");
        let mut w = ShmWriter::create(&shm, &sem, 1280).unwrap();
        let mut r = ShmReader::open(&shm, &sem, 1280).unwrap();

        assert_eq!(r.snapshot().unwrap(), vec![0u8; 1280]);

        let msg: Vec<u8> = (0..1280).map(|i| (i % 256) as u8).collect();
        w.publish(&msg).unwrap();
        assert_eq!(r.snapshot().unwrap(), msg);
    }

    #[test]
    fn reader_fails_without_producer() {
        let (shm, sem) = names("missing");
        let err = ShmReader::open(&shm, &sem, 64).err().unwrap();
        assert!(matches!(err, ChannelError::Setup { op: "shm_open", .. }));
    }

    #[test]
    fn reader_rejects_region_smaller_than_requested() {
        let (shm, sem) = names("small");
        let _w = ShmWriter::create(&shm, &sem, 64).unwrap();
        let err = ShmReader::open(&shm, &sem, 128).err().unwrap();
        assert!(matches!(
            err,
            ChannelError::SizeMismatch { expected: 128, actual: 64, .. }
        ));
    }

    #[test]
    fn dropping_writer_unlinks_names() {
        let (shm, sem) = names("unlink");
        let w = ShmWriter::create(&shm, &sem, 64).unwrap();
        drop(w);
        assert!(ShmReader::open(&shm, &sem, 64).is_err());
    }

    #[test]
    fn concurrent_readers_never_see_torn_snapshots() {
        const SIZE: usize = 64 * 1024;
        const ROUNDS: usize = 3000;

        let (shm, sem) = names("torn");
        let mut w = ShmWriter::create(&shm, &sem, SIZE).unwrap();
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let mut r = ShmReader::open(&shm, &sem, SIZE).unwrap();
                std::thread::spawn(move || {
                    let mut buf = vec![0u8; SIZE];
                    for _ in 0..ROUNDS {
                        r.snapshot_into(&mut buf).unwrap();
                        let first = buf[0];
                        assert!(buf.iter().all(|b| *b == first), "torn snapshot");
                    }
                })
            })
            .collect();

        let mut msg = vec![0u8; SIZE];
        for i in 0..ROUNDS {
            msg.fill((i % 255 + 1) as u8);
            w.publish(&msg).unwrap();
        }
        for r in readers {
            r.join().unwrap();
        }
    }

    #[test]
    fn interrupted_wait_is_retried() {
        let mut calls = 0;
        let res = retry_interrupted(|| {
            calls += 1;
            if calls < 3 {
                Err(io::Error::from_raw_os_error(libc::EINTR))
            } else {
                Ok(())
            }
        });
        assert!(res.is_ok());
        assert_eq!(calls, 3);
    }

    #[test]
    fn failed_wait_is_reported_not_retried() {
        let mut calls = 0;
        let err = retry_interrupted(|| {
            calls += 1;
            Err(io::Error::from_raw_os_error(libc::EINVAL))
        })
        .unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EINVAL));
        assert_eq!(calls, 1);
    }

    #[test]
    fn names_must_be_single_component() {
        assert!(matches!(
            ShmWriter::create("no_slash", "/x_sem", 8).err().unwrap(),
            ChannelError::InvalidName(_)
        ));
        assert!(matches!(
            ShmWriter::create("/a/b", "/x_sem", 8).err().unwrap(),
            ChannelError::InvalidName(_)
        ));
    }
}
