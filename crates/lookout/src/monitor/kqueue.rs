// Copyright (c) 2025 Lookout and contributors

// SPDX-License-Identifier: MIT
// Third-party contributions licensed under DCO

// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to
// deal in the Software without restriction, including without limitation the
// rights to use, copy, modify, merge, publish, distribute, sublicense, and/or
// sell copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:

// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.

// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NON-INFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS
// IN THE SOFTWARE.

// ----------------------------------------------------------------------------

//! Kernel event queue backend.

use ahash::{AHashMap, AHashSet};
use std::ffi::CString;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use std::{fs, io, mem, ptr};
use tracing::{debug, warn};

use super::error::{Error, Result};
use super::event::{Event, EventFlag};
use super::{scan, Session};

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// Minimum wait timeout in seconds.
const MIN_SPIN_LATENCY: f64 = 1.0;

/// Change categories registered for every watched descriptor.
const NOTE_MASK: u32 = libc::NOTE_DELETE
    | libc::NOTE_WRITE
    | libc::NOTE_EXTEND
    | libc::NOTE_ATTRIB
    | libc::NOTE_LINK
    | libc::NOTE_RENAME
    | libc::NOTE_REVOKE;

/// Translation table from kernel note bits to portable flags.
const TRANSLATION: &[(u32, EventFlag)] = &[
    (libc::NOTE_DELETE, EventFlag::Removed),
    (libc::NOTE_WRITE, EventFlag::Updated),
    (libc::NOTE_EXTEND, EventFlag::PlatformSpecific),
    (libc::NOTE_ATTRIB, EventFlag::AttributeModified),
    (libc::NOTE_LINK, EventFlag::Link),
    (libc::NOTE_RENAME, EventFlag::Renamed),
    (libc::NOTE_REVOKE, EventFlag::PlatformSpecific),
];

// ----------------------------------------------------------------------------
// Structs
// ----------------------------------------------------------------------------

/// Kernel event queue driver.
///
/// The driver watches one descriptor per discovered path and maintains the
/// path and descriptor tables as mutual inverses. Removals are funneled
/// through `to_remove`, which is drained at the start of every cycle and is
/// the only place a watched descriptor is closed. Directories that changed
/// are funneled through `to_rescan` and re-scanned at the next cycle
/// boundary; since scanning is idempotent, a rescan picks up exactly the
/// children that appeared since the directory was last seen, reporting each
/// as a creation.
struct Driver {
    /// Kernel event queue.
    kq: OwnedFd,
    /// Watched descriptors by path.
    descriptors_by_path: AHashMap<PathBuf, RawFd>,
    /// Watched paths by descriptor.
    paths_by_descriptor: AHashMap<RawFd, PathBuf>,
    /// File modes by descriptor, captured at watch time.
    modes: AHashMap<RawFd, u32>,
    /// Descriptors pending removal at the next cycle boundary.
    to_remove: AHashSet<RawFd>,
    /// Directory descriptors pending a rescan at the next cycle boundary.
    to_rescan: AHashSet<RawFd>,
    /// Event buffer for the running cycle.
    events: Vec<Event>,
}

// ----------------------------------------------------------------------------
// Implementations
// ----------------------------------------------------------------------------

impl Driver {
    /// Opens the kernel event queue.
    ///
    /// # Errors
    ///
    /// If the queue cannot be created, [`Error::ResourceExhausted`] is
    /// returned.
    fn open() -> Result<Self> {
        let kq = unsafe { libc::kqueue() };
        if kq < 0 {
            return Err(Error::ResourceExhausted(io::Error::last_os_error()));
        }

        let kq = unsafe { OwnedFd::from_raw_fd(kq) };
        unsafe {
            libc::fcntl(kq.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC);
        }

        Ok(Self {
            kq,
            descriptors_by_path: AHashMap::new(),
            paths_by_descriptor: AHashMap::new(),
            modes: AHashMap::new(),
            to_remove: AHashSet::new(),
            to_rescan: AHashSet::new(),
            events: Vec::new(),
        })
    }

    /// Scans the given path, adding a watch per discovered file or folder.
    ///
    /// Scanning is idempotent: an already watched path is left untouched, so
    /// re-scanning a directory adds only the children that appeared since.
    /// With a time stamp, each newly watched path additionally yields a
    /// creation event, which is how rescans surface new children.
    fn scan(
        &mut self,
        path: &Path,
        session: &Session,
        stamp: Option<SystemTime>,
    ) {
        let policy = session.walk();
        scan::walk(path, &policy, &mut |path, meta| {
            if self.descriptors_by_path.contains_key(path) {
                return true;
            }
            if !self.add_watch(path, meta) {
                return false;
            }

            if let Some(time) = stamp {
                self.events.push(Event::new(
                    path,
                    time,
                    vec![EventFlag::Created],
                ));
            }
            true
        });
    }

    /// Adds a watch for the given path.
    ///
    /// The path is opened read-only with close-on-exec, registered with the
    /// queue for all change categories, and inserted into all three tables.
    /// Failures to open or register are logged and the path is skipped; a
    /// single unwatchable path never takes down the monitor.
    fn add_watch(&mut self, path: &Path, meta: &fs::Metadata) -> bool {
        let Ok(cpath) = CString::new(path.as_os_str().as_bytes()) else {
            return false;
        };
        let fd = unsafe {
            libc::open(cpath.as_ptr(), libc::O_RDONLY | libc::O_CLOEXEC)
        };
        if fd < 0 {
            warn!(
                path = %path.display(),
                error = %io::Error::last_os_error(),
                "failed to open path for watching"
            );
            return false;
        }

        // Register interest in all change categories for the descriptor
        let mut change: libc::kevent = unsafe { mem::zeroed() };
        change.ident = fd as libc::uintptr_t;
        change.filter = libc::EVFILT_VNODE;
        change.flags = libc::EV_ADD | libc::EV_ENABLE | libc::EV_CLEAR;
        change.fflags = NOTE_MASK;
        let res = unsafe {
            libc::kevent(
                self.kq.as_raw_fd(),
                &change,
                1,
                ptr::null_mut(),
                0,
                ptr::null(),
            )
        };
        if res < 0 {
            warn!(
                path = %path.display(),
                error = %io::Error::last_os_error(),
                "failed to register watch"
            );
            unsafe { libc::close(fd) };
            return false;
        }

        debug!(path = %path.display(), fd, "added watch");
        self.descriptors_by_path.insert(path.to_path_buf(), fd);
        self.paths_by_descriptor.insert(fd, path.to_path_buf());
        self.modes.insert(fd, meta.mode());
        true
    }

    /// Drains the descriptors pending removal.
    ///
    /// This is the single site where a watched descriptor is closed, so a
    /// descriptor can never be closed twice.
    fn remove_pending(&mut self) {
        for fd in self.to_remove.drain() {
            if let Some(path) = self.paths_by_descriptor.remove(&fd) {
                self.descriptors_by_path.remove(&path);
                debug!(path = %path.display(), fd, "removed watch");
            }
            self.modes.remove(&fd);
            unsafe { libc::close(fd) };
        }
    }

    /// Drains the directories pending a rescan.
    ///
    /// A rescan target whose path vanished in the meantime is turned into a
    /// removal instead, closing its descriptor at the next cycle boundary.
    fn rescan_pending(&mut self, session: &Session, time: SystemTime) {
        let pending: Vec<RawFd> = self.to_rescan.drain().collect();
        for fd in pending {
            let Some(path) = self.paths_by_descriptor.get(&fd).cloned()
            else {
                continue;
            };
            if fs::symlink_metadata(&path).is_err() {
                self.to_remove.insert(fd);
                continue;
            }

            debug!(path = %path.display(), "rescanning directory");
            self.scan(&path, session, Some(time));
        }
    }

    /// Waits for a batch of raw events from the queue.
    ///
    /// # Errors
    ///
    /// An interrupted wait yields an empty batch; any other wait failure is
    /// an unrecoverable loss of the queue, surfaced as
    /// [`Error::BackendFatal`].
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    fn wait(&mut self, interval: Duration) -> Result<Vec<libc::kevent>> {
        let capacity = self.descriptors_by_path.len().max(1);
        let mut events: Vec<libc::kevent> = Vec::with_capacity(capacity);

        let timeout = libc::timespec {
            tv_sec: interval.as_secs() as libc::time_t,
            tv_nsec: interval.subsec_nanos() as libc::c_long,
        };
        let count = unsafe {
            libc::kevent(
                self.kq.as_raw_fd(),
                ptr::null(),
                0,
                events.as_mut_ptr(),
                capacity as libc::c_int,
                &timeout,
            )
        };
        if count < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                return Ok(events);
            }
            return Err(Error::BackendFatal(err));
        }

        // The kernel filled the first `count` entries
        unsafe { events.set_len(count as usize) };
        Ok(events)
    }

    /// Processes a batch of raw events into the event buffer.
    ///
    /// Every raw event is resolved through the descriptor table, translated
    /// into portable flags, and classified with the file mode captured at
    /// watch time. Removals and renames queue the descriptor for removal; a
    /// renamed directory queues its parent for a rescan, so the destination
    /// of the rename is discovered. Content or attribute changes on a
    /// directory queue the directory itself for a rescan, so children that
    /// appeared are discovered.
    #[allow(clippy::cast_possible_truncation)]
    fn process(&mut self, raw: &[libc::kevent], time: SystemTime) {
        for entry in raw {
            let fd = entry.ident as RawFd;
            let Some(path) = self.paths_by_descriptor.get(&fd).cloned()
            else {
                continue;
            };

            let mut flags = translate(entry.fflags);
            if flags.is_empty() {
                continue;
            }
            let mode = self.modes.get(&fd).copied().unwrap_or(0);
            if let Some(kind) = classify(mode) {
                flags.push(kind);
            }

            let removed = flags.contains(&EventFlag::Removed);
            let renamed = flags.contains(&EventFlag::Renamed);
            let is_dir =
                (mode & u32::from(libc::S_IFMT)) == u32::from(libc::S_IFDIR);

            // The descriptor follows a renamed path to its new name, which
            // is unknown to us, so it is dropped either way
            if removed || renamed {
                self.to_remove.insert(fd);
                if is_dir && !removed {
                    let parent = path.parent().and_then(|parent| {
                        self.descriptors_by_path.get(parent).copied()
                    });
                    if let Some(parent) = parent {
                        self.to_rescan.insert(parent);
                    }
                }
            }

            // A changed directory may contain children we don't watch yet
            if is_dir
                && (flags.contains(&EventFlag::Updated)
                    || flags.contains(&EventFlag::AttributeModified)
                    || flags.contains(&EventFlag::OwnerModified))
            {
                self.to_rescan.insert(fd);
            }

            self.events.push(Event::new(path, time, flags));
        }
    }
}

// ----------------------------------------------------------------------------
// Trait implementations
// ----------------------------------------------------------------------------

impl Drop for Driver {
    /// Closes all descriptors still watched.
    fn drop(&mut self) {
        for &fd in self.paths_by_descriptor.keys() {
            unsafe { libc::close(fd) };
        }
    }
}

// ----------------------------------------------------------------------------
// Functions
// ----------------------------------------------------------------------------

/// Runs the kernel event queue loop.
pub(crate) fn run(session: &mut Session) -> Result {
    let mut driver = Driver::open()?;
    for root in &session.config.paths {
        driver.scan(root, session, None);
    }

    loop {
        let time = SystemTime::now();
        driver.remove_pending();
        driver.rescan_pending(session, time);

        // Without live watches there is nothing left to monitor
        if driver.descriptors_by_path.is_empty() {
            return Ok(());
        }

        let raw = driver.wait(session.interval(MIN_SPIN_LATENCY))?;
        if session.interrupted() {
            return Ok(());
        }

        driver.process(&raw, time);
        session.dispatch(&mut driver.events)?;
    }
}

/// Translates kernel note bits into portable flags.
fn translate(fflags: u32) -> Vec<EventFlag> {
    let mut flags = Vec::new();
    for &(bit, flag) in TRANSLATION {
        if fflags & bit != 0 && !flags.contains(&flag) {
            flags.push(flag);
        }
    }

    flags
}

/// Classifies a file mode captured at watch time.
fn classify(mode: u32) -> Option<EventFlag> {
    match mode & u32::from(libc::S_IFMT) {
        mode if mode == u32::from(libc::S_IFDIR) => Some(EventFlag::IsDir),
        mode if mode == u32::from(libc::S_IFLNK) => Some(EventFlag::IsSymLink),
        mode if mode == u32::from(libc::S_IFREG) => Some(EventFlag::IsFile),
        _ => None,
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
