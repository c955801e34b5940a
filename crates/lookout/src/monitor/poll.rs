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

//! Polling backend.

use ahash::AHashMap;
use std::mem;
use std::os::unix::fs::MetadataExt;
use std::path::PathBuf;
use std::time::SystemTime;
use std::fs;
use tracing::debug;

use super::error::Result;
use super::event::{Event, EventFlag};
use super::{scan, Session};

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// Minimum inter-cycle interval in seconds.
const MIN_POLL_LATENCY: f64 = 1.0;

// ----------------------------------------------------------------------------
// Type aliases
// ----------------------------------------------------------------------------

/// Snapshot table, mapping absolute paths to their stat records.
type Snapshot = AHashMap<PathBuf, FileInfo>;

// ----------------------------------------------------------------------------
// Structs
// ----------------------------------------------------------------------------

/// Stat record of a tracked path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct FileInfo {
    /// Modification time in seconds.
    mtime: i64,
    /// Change time in seconds.
    ctime: i64,
}

// ----------------------------------------------------------------------------

/// Polling driver.
///
/// The driver reconstructs the change stream from stat snapshots. Two
/// snapshot tables are alive at steady state: `previous` holds the state of
/// the tree as of the last cycle, and `current` is populated during the
/// cycle's traversal. Diffing a discovered path against `previous` yields
/// update and attribute events; paths left over in `previous` after the
/// traversal are gone from the file system and yield removal events. At the
/// end of the cycle, `current` is promoted to `previous`, and the drained
/// table is reused as the next cycle's empty `current`.
#[derive(Debug, Default)]
struct Driver {
    /// Snapshot as of the last cycle.
    previous: Snapshot,
    /// Snapshot being populated this cycle.
    current: Snapshot,
    /// Event buffer for the running cycle.
    events: Vec<Event>,
}

// ----------------------------------------------------------------------------
// Implementations
// ----------------------------------------------------------------------------

impl Driver {
    /// Populates the snapshot with the initial state of all roots.
    ///
    /// The initial scan establishes the baseline; it never emits events.
    fn populate(&mut self, session: &Session) {
        let policy = session.walk();
        let Self { previous, .. } = self;
        for root in &session.config.paths {
            scan::walk(root, &policy, &mut |path, meta| {
                if previous.contains_key(path) {
                    return false;
                }

                previous.insert(path.to_path_buf(), FileInfo::from(meta));
                true
            });
        }

        debug!(tracked = previous.len(), "initial scan complete");
    }

    /// Collects the changes of one cycle into the event buffer.
    fn collect(&mut self, session: &Session) {
        let time = SystemTime::now();
        let policy = session.walk();
        let Self { previous, current, events } = self;

        // Traverse all roots, diffing every discovered path against the
        // snapshot of the last cycle. Paths consumed from `previous` are
        // accounted for; whatever remains afterwards no longer exists.
        for root in &session.config.paths {
            scan::walk(root, &policy, &mut |path, meta| {
                if current.contains_key(path) {
                    return false;
                }

                let info = FileInfo::from(meta);
                current.insert(path.to_path_buf(), info);
                match previous.remove(path) {
                    Some(prior) => {
                        let mut flags = Vec::new();
                        if info.mtime > prior.mtime {
                            flags.push(EventFlag::Updated);
                        }
                        if info.ctime > prior.ctime {
                            flags.push(EventFlag::AttributeModified);
                        }
                        if !flags.is_empty() {
                            events.push(Event::new(path, time, flags));
                        }
                    }
                    None => {
                        events.push(Event::new(
                            path,
                            time,
                            vec![EventFlag::Created],
                        ));
                    }
                }

                true
            });
        }

        // Paths left over in the old snapshot are gone
        for (path, _) in previous.drain() {
            events.push(Event::new(path, time, vec![EventFlag::Removed]));
        }

        // Promote the fresh snapshot; the drained table becomes the empty
        // `current` of the next cycle
        mem::swap(previous, current);
    }
}

// ----------------------------------------------------------------------------

impl From<&fs::Metadata> for FileInfo {
    /// Creates a stat record from file metadata.
    fn from(meta: &fs::Metadata) -> Self {
        Self { mtime: meta.mtime(), ctime: meta.ctime() }
    }
}

// ----------------------------------------------------------------------------
// Functions
// ----------------------------------------------------------------------------

/// Runs the polling loop.
pub(crate) fn run(session: &mut Session) -> Result {
    let mut driver = Driver::default();
    driver.populate(session);

    loop {
        if session.sleep(session.interval(MIN_POLL_LATENCY)) {
            return Ok(());
        }

        driver.collect(session);
        session.dispatch(&mut driver.events)?;
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::super::filter::{Filter, FilterSet};
    use super::super::{Config, EventHandler};
    use super::*;
    use std::path::Path;
    use tempfile::{tempdir, TempDir};

    /// Test rig bundling a configuration with a tracked root.
    struct Rig {
        dir: TempDir,
        config: Config,
        handler: EventHandler,
    }

    impl Rig {
        fn new() -> Self {
            let dir = tempdir().unwrap();
            let config = Config {
                paths: vec![dir.path().canonicalize().unwrap()],
                latency: 1.0,
                recursive: false,
                follow_symlinks: false,
                filters: Vec::new(),
            };
            Self { dir, config, handler: Box::new(|_| Ok(())) }
        }

        fn root(&self) -> PathBuf {
            self.dir.path().canonicalize().unwrap()
        }

        fn session(&mut self) -> Session<'_> {
            Session {
                config: &self.config,
                filters: FilterSet::compile(&self.config.filters).unwrap(),
                handler: &mut self.handler,
                shutdown: None,
            }
        }
    }

    /// Rewrites a tracked record so the next cycle sees advanced timestamps.
    fn age(driver: &mut Driver, path: &Path) {
        let info = driver.previous.get_mut(path).unwrap();
        info.mtime -= 5;
        info.ctime -= 5;
    }

    /// Re-stamps a tracked record with the current stat of its path.
    ///
    /// Mutating a directory's children also advances the directory's own
    /// timestamps, which would surface as an update event whenever the test
    /// happens to straddle a full second. Re-stamping pins the record to the
    /// present, so assertions only see the events they provoked.
    fn refresh(driver: &mut Driver, path: &Path) {
        let meta = fs::symlink_metadata(path).unwrap();
        driver.previous.insert(path.to_path_buf(), FileInfo::from(&meta));
    }

    fn flags(driver: &Driver, path: &Path) -> Vec<EventFlag> {
        driver
            .events
            .iter()
            .find(|event| event.path() == path)
            .map(|event| event.flags().to_vec())
            .unwrap_or_default()
    }

    #[test]
    fn test_initial_scan_emits_no_events() {
        let mut rig = Rig::new();
        fs::write(rig.root().join("a.txt"), b"a").unwrap();

        let session = rig.session();
        let mut driver = Driver::default();
        driver.populate(&session);
        assert!(driver.events.is_empty());
        assert!(driver.previous.contains_key(&rig.root().join("a.txt")));
    }

    #[test]
    fn test_create() {
        let mut rig = Rig::new();
        let session = rig.session();

        let mut driver = Driver::default();
        driver.populate(&session);

        // Create a file between cycles
        let path = rig.root().join("a.txt");
        fs::write(&path, b"a").unwrap();
        refresh(&mut driver, &rig.root());

        let session = rig.session();
        driver.collect(&session);
        assert_eq!(driver.events.len(), 1);
        assert_eq!(flags(&driver, &path), vec![EventFlag::Created]);
    }

    #[test]
    fn test_modify_and_attributes() {
        let mut rig = Rig::new();
        let path = rig.root().join("a.txt");
        fs::write(&path, b"a").unwrap();

        let session = rig.session();
        let mut driver = Driver::default();
        driver.populate(&session);

        // Re-stat with an aged baseline, as if both the modification and the
        // change time advanced between cycles
        age(&mut driver, &path);

        let session = rig.session();
        driver.collect(&session);
        assert_eq!(
            flags(&driver, &path),
            vec![EventFlag::Updated, EventFlag::AttributeModified]
        );
    }

    #[test]
    fn test_remove() {
        let mut rig = Rig::new();
        let path = rig.root().join("a.txt");
        fs::write(&path, b"a").unwrap();

        let session = rig.session();
        let mut driver = Driver::default();
        driver.populate(&session);

        fs::remove_file(&path).unwrap();
        refresh(&mut driver, &rig.root());

        let session = rig.session();
        driver.collect(&session);
        assert_eq!(driver.events.len(), 1);
        assert_eq!(flags(&driver, &path), vec![EventFlag::Removed]);

        // A further cycle without changes produces no events
        driver.events.clear();
        let session = rig.session();
        driver.collect(&session);
        assert!(driver.events.is_empty());
    }

    #[test]
    fn test_recursive_create() {
        let mut rig = Rig::new();
        rig.config.recursive = true;

        let session = rig.session();
        let mut driver = Driver::default();
        driver.populate(&session);

        // Create a nested file, including its directory, between cycles
        let sub = rig.root().join("sub");
        let path = sub.join("b.txt");
        fs::create_dir(&sub).unwrap();
        fs::write(&path, b"b").unwrap();
        refresh(&mut driver, &rig.root());

        let session = rig.session();
        driver.collect(&session);
        assert_eq!(driver.events.len(), 2);
        assert_eq!(flags(&driver, &sub), vec![EventFlag::Created]);
        assert_eq!(flags(&driver, &path), vec![EventFlag::Created]);
    }

    #[test]
    fn test_filtered_paths_never_surface() {
        let mut rig = Rig::new();
        rig.config.filters = vec![Filter::exclude(r"\.tmp$")];

        let session = rig.session();
        let mut driver = Driver::default();
        driver.populate(&session);

        fs::write(rig.root().join("a.tmp"), b"a").unwrap();
        fs::write(rig.root().join("a.txt"), b"a").unwrap();
        refresh(&mut driver, &rig.root());

        let session = rig.session();
        driver.collect(&session);
        assert_eq!(driver.events.len(), 1);
        assert_eq!(
            flags(&driver, &rig.root().join("a.txt")),
            vec![EventFlag::Created]
        );
    }

    #[test]
    fn test_no_change_no_event() {
        let mut rig = Rig::new();
        fs::write(rig.root().join("a.txt"), b"a").unwrap();

        let session = rig.session();
        let mut driver = Driver::default();
        driver.populate(&session);

        // Two consecutive cycles over an unchanged tree stay silent
        for _ in 0..2 {
            let session = rig.session();
            driver.collect(&session);
            assert!(driver.events.is_empty());
        }
    }

    #[test]
    fn test_snapshot_promotion() {
        let mut rig = Rig::new();
        let path = rig.root().join("a.txt");
        fs::write(&path, b"a").unwrap();

        let session = rig.session();
        let mut driver = Driver::default();
        driver.populate(&session);

        let session = rig.session();
        driver.collect(&session);

        // After a cycle, `previous` holds exactly the paths that exist, and
        // `current` is empty again
        assert!(driver.current.is_empty());
        assert_eq!(driver.previous.len(), 2);
        assert!(driver.previous.contains_key(&rig.root()));
        assert!(driver.previous.contains_key(&path));
    }

    #[test]
    fn test_root_reappearing_after_removal() {
        let mut rig = Rig::new();
        rig.config.paths = vec![rig.root().join("w")];
        fs::create_dir(rig.root().join("w")).unwrap();
        fs::write(rig.root().join("w/a.txt"), b"a").unwrap();

        let session = rig.session();
        let mut driver = Driver::default();
        driver.populate(&session);

        // Dropping the whole root removes everything tracked under it
        fs::remove_dir_all(rig.root().join("w")).unwrap();
        let session = rig.session();
        driver.collect(&session);
        assert_eq!(driver.events.len(), 2);
        assert!(driver
            .events
            .iter()
            .all(|event| event.flags() == [EventFlag::Removed]));

        // Recreating the root generates creation events again
        driver.events.clear();
        fs::create_dir(rig.root().join("w")).unwrap();
        fs::write(rig.root().join("w/a.txt"), b"a").unwrap();
        let session = rig.session();
        driver.collect(&session);
        assert_eq!(driver.events.len(), 2);
        assert!(driver
            .events
            .iter()
            .all(|event| event.flags() == [EventFlag::Created]));
    }

    #[test]
    fn test_events_share_cycle_timestamp() {
        let mut rig = Rig::new();
        let session = rig.session();

        let mut driver = Driver::default();
        driver.populate(&session);

        fs::write(rig.root().join("a.txt"), b"a").unwrap();
        fs::write(rig.root().join("b.txt"), b"b").unwrap();
        refresh(&mut driver, &rig.root());

        let session = rig.session();
        driver.collect(&session);
        assert_eq!(driver.events.len(), 2);
        assert_eq!(driver.events[0].time(), driver.events[1].time());
    }
}
