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

//! File monitor.

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{fmt, fs, thread};

mod error;
pub mod event;
pub mod filter;
#[cfg(any(
    target_os = "macos",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd",
    target_os = "dragonfly"
))]
mod kqueue;
mod poll;
mod scan;

pub use error::{Error, Result};

use event::Event;
use filter::{Filter, FilterSet};
use scan::Walk;

// ----------------------------------------------------------------------------
// Enums
// ----------------------------------------------------------------------------

/// Monitor backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    /// Polling backend, reconstructing changes from stat snapshots.
    Poll,
    /// Kernel event queue backend, watching one descriptor per path.
    Kqueue,
}

// ----------------------------------------------------------------------------
// Implementations
// ----------------------------------------------------------------------------

impl Kind {
    /// Returns the recommended backend for the host.
    ///
    /// On hosts with a kernel event queue, the queue backend is preferred, as
    /// it reports changes without traversing the watched trees on every
    /// cycle. All other hosts fall back to the polling backend, which only
    /// requires a working `stat`.
    ///
    /// # Examples
    ///
    /// ```
    /// use lookout::Kind;
    ///
    /// // Resolve recommended backend
    /// let kind = Kind::recommended();
    /// assert!(kind.is_available());
    /// ```
    #[must_use]
    pub fn recommended() -> Self {
        if Kind::Kqueue.is_available() {
            Kind::Kqueue
        } else {
            Kind::Poll
        }
    }

    /// Resolves the backend from a pair of override flags.
    ///
    /// Front ends commonly expose one flag to force the polling backend and
    /// another to force the kernel event queue backend. Setting neither
    /// resolves to [`Kind::recommended`].
    ///
    /// # Errors
    ///
    /// Setting both flags returns [`Error::InvalidConfiguration`], as the
    /// overrides are mutually exclusive.
    ///
    /// # Examples
    ///
    /// ```
    /// use lookout::Kind;
    ///
    /// // Resolve backend from override flags
    /// let kind = Kind::from_overrides(true, false)?;
    /// assert_eq!(kind, Kind::Poll);
    /// # Ok::<(), lookout::Error>(())
    /// ```
    pub fn from_overrides(poll: bool, kqueue: bool) -> Result<Self> {
        match (poll, kqueue) {
            (true, true) => Err(Error::InvalidConfiguration(
                "backend overrides are mutually exclusive".into(),
            )),
            (true, false) => Ok(Kind::Poll),
            (false, true) => Ok(Kind::Kqueue),
            (false, false) => Ok(Kind::recommended()),
        }
    }

    /// Checks whether the backend is compiled in for the host.
    #[must_use]
    pub fn is_available(self) -> bool {
        match self {
            Kind::Poll => true,
            Kind::Kqueue => cfg!(any(
                target_os = "macos",
                target_os = "freebsd",
                target_os = "openbsd",
                target_os = "netbsd",
                target_os = "dragonfly"
            )),
        }
    }
}

// ----------------------------------------------------------------------------
// Structs
// ----------------------------------------------------------------------------

/// File monitor.
///
/// A monitor owns an ordered set of root paths, a change event callback, and
/// the policy that governs discovery: latency, recursion, symbolic link
/// handling, and path filters. Calling [`Monitor::run`] takes over the
/// calling thread and delivers batches of events to the callback until the
/// monitor is shut down or a fatal backend error occurs.
///
/// Configured paths are canonicalized on construction, resolving symbolic
/// links once. Paths that don't exist yet are admitted as given, since they
/// may appear later. A root path always tracks itself and, if it denotes a
/// directory, its immediate children. Deeper descendants are discovered only
/// when recursion is enabled.
///
/// All configuration must happen before [`Monitor::run`] is invoked; the
/// setters reject a started monitor with [`Error::MonitorAlreadyRunning`].
///
/// # Examples
///
/// ```
/// use lookout::{Event, Kind, Monitor};
///
/// // Create polling monitor and configure policy
/// let mut monitor = Monitor::new(Kind::Poll, ["."], |batch: &[Event]| {
///     for event in batch {
///         println!("{event}");
///     }
///     Ok(())
/// })?;
/// monitor.set_recursive(true)?;
/// # Ok::<(), lookout::Error>(())
/// ```
pub struct Monitor {
    /// Monitor backend.
    kind: Kind,
    /// Monitor configuration.
    config: Config,
    /// Event handler.
    handler: EventHandler,
    /// Shutdown channel.
    shutdown: Option<(Sender<()>, Receiver<()>)>,
    /// Whether the monitor was started.
    started: bool,
}

// ----------------------------------------------------------------------------

/// Shutdown handle.
///
/// The handle is safe to move to another thread, e.g., a signal handler
/// thread, and causes [`Monitor::run`] to return at the next cycle boundary
/// when triggered.
#[derive(Clone, Debug)]
pub struct Shutdown {
    /// Shutdown sender.
    sender: Sender<()>,
}

// ----------------------------------------------------------------------------

/// Monitor configuration.
#[derive(Debug)]
pub(crate) struct Config {
    /// Root paths.
    pub paths: Vec<PathBuf>,
    /// Target inter-cycle interval in seconds.
    pub latency: f64,
    /// Whether to discover descendants beyond the immediate children.
    pub recursive: bool,
    /// Whether to follow symbolic links.
    pub follow_symlinks: bool,
    /// Path filters.
    pub filters: Vec<Filter>,
}

// ----------------------------------------------------------------------------

/// Monitor session.
///
/// A session is assembled by [`Monitor::run`] once the configuration is
/// frozen and the filters are compiled, and handed to the backend loop. It
/// bundles everything a backend needs per cycle: policy, compiled filters,
/// the event handler, and the shutdown receiver.
pub(crate) struct Session<'a> {
    /// Monitor configuration.
    pub config: &'a Config,
    /// Compiled path filters.
    pub filters: FilterSet,
    /// Event handler.
    pub handler: &'a mut EventHandler,
    /// Shutdown receiver.
    pub shutdown: Option<&'a Receiver<()>>,
}

// ----------------------------------------------------------------------------
// Implementations
// ----------------------------------------------------------------------------

impl Monitor {
    /// Creates a file monitor with the given backend.
    ///
    /// The callback is invoked synchronously from within [`Monitor::run`]
    /// with a non-empty batch of events. Any context the consumer needs is
    /// captured by the closure. An error returned from the callback is
    /// propagated out of [`Monitor::run`] unchanged.
    ///
    /// Each path is canonicalized, resolving symbolic links. Paths that
    /// cannot be resolved are admitted verbatim, as they may come into
    /// existence while the monitor is running.
    ///
    /// # Errors
    ///
    /// If the backend is not compiled in for the host,
    /// [`Error::BackendUnavailable`] is returned.
    ///
    /// # Examples
    ///
    /// ```
    /// use lookout::{Event, Kind, Monitor};
    ///
    /// // Create polling monitor
    /// let monitor = Monitor::new(Kind::Poll, ["."], |batch: &[Event]| {
    ///     println!("{} events", batch.len());
    ///     Ok(())
    /// })?;
    /// # Ok::<(), lookout::Error>(())
    /// ```
    pub fn new<I, P, F>(kind: Kind, paths: I, handler: F) -> Result<Self>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
        F: 'static + Send,
        F: FnMut(&[Event]) -> Result,
    {
        if !kind.is_available() {
            return Err(Error::BackendUnavailable(kind));
        }

        // Resolve symbolic links once per configured path, falling back to
        // the path as given when resolution fails
        let paths = paths
            .into_iter()
            .map(|path| {
                let path = path.as_ref();
                fs::canonicalize(path)
                    .unwrap_or_else(|_| path.to_path_buf())
            })
            .collect();

        // Return file monitor
        Ok(Self {
            kind,
            config: Config {
                paths,
                latency: 1.0,
                recursive: false,
                follow_symlinks: false,
                filters: Vec::new(),
            },
            handler: Box::new(handler),
            shutdown: None,
            started: false,
        })
    }

    /// Creates a file monitor with the recommended backend.
    ///
    /// The backend preference on hosts that provide a kernel event queue is
    /// the queue backend, and the polling backend everywhere else. See
    /// [`Kind::recommended`] for details.
    ///
    /// # Errors
    ///
    /// See [`Monitor::new`].
    ///
    /// # Examples
    ///
    /// ```
    /// use lookout::{Event, Monitor};
    ///
    /// // Create monitor with the recommended backend
    /// let monitor = Monitor::recommended(["."], |_: &[Event]| Ok(()))?;
    /// # Ok::<(), lookout::Error>(())
    /// ```
    pub fn recommended<I, P, F>(paths: I, handler: F) -> Result<Self>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
        F: 'static + Send,
        F: FnMut(&[Event]) -> Result,
    {
        Self::new(Kind::recommended(), paths, handler)
    }

    /// Sets the target latency in seconds.
    ///
    /// The latency is the target inter-cycle interval. Backends clamp it to
    /// their own minimum, so the effective interval is never below one
    /// second.
    ///
    /// # Errors
    ///
    /// A non-positive latency returns [`Error::InvalidConfiguration`]. A
    /// started monitor returns [`Error::MonitorAlreadyRunning`].
    ///
    /// # Examples
    ///
    /// ```
    /// use lookout::{Event, Kind, Monitor};
    ///
    /// // Create polling monitor and set latency
    /// let mut monitor = Monitor::new(Kind::Poll, ["."], |_: &[Event]| Ok(()))?;
    /// monitor.set_latency(2.5)?;
    /// # Ok::<(), lookout::Error>(())
    /// ```
    pub fn set_latency(&mut self, latency: f64) -> Result {
        self.guard()?;
        if latency <= 0.0 {
            return Err(Error::InvalidConfiguration(format!(
                "latency must be positive, got {latency}"
            )));
        }

        self.config.latency = latency;
        Ok(())
    }

    /// Sets whether to recurse into subdirectories.
    ///
    /// # Errors
    ///
    /// A started monitor returns [`Error::MonitorAlreadyRunning`].
    pub fn set_recursive(&mut self, recursive: bool) -> Result {
        self.guard()?;
        self.config.recursive = recursive;
        Ok(())
    }

    /// Sets whether to follow symbolic links.
    ///
    /// When enabled, discovery re-enters at the link target, so events are
    /// reported for the resolved path. When disabled, the link itself is
    /// tracked.
    ///
    /// # Errors
    ///
    /// A started monitor returns [`Error::MonitorAlreadyRunning`].
    pub fn set_follow_symlinks(&mut self, follow: bool) -> Result {
        self.guard()?;
        self.config.follow_symlinks = follow;
        Ok(())
    }

    /// Replaces the path filters.
    ///
    /// Filters are compiled when [`Monitor::run`] starts; an invalid pattern
    /// surfaces there as [`Error::FilterCompilationFailed`].
    ///
    /// # Errors
    ///
    /// A started monitor returns [`Error::MonitorAlreadyRunning`].
    ///
    /// # Examples
    ///
    /// ```
    /// use lookout::{Event, Filter, Kind, Monitor};
    ///
    /// // Create polling monitor and exclude temporary files
    /// let mut monitor = Monitor::new(Kind::Poll, ["."], |_: &[Event]| Ok(()))?;
    /// monitor.set_filters(vec![Filter::exclude(r"\.tmp$")])?;
    /// # Ok::<(), lookout::Error>(())
    /// ```
    pub fn set_filters(&mut self, filters: Vec<Filter>) -> Result {
        self.guard()?;
        self.config.filters = filters;
        Ok(())
    }

    /// Appends a path filter.
    ///
    /// # Errors
    ///
    /// A started monitor returns [`Error::MonitorAlreadyRunning`].
    pub fn add_filter(&mut self, filter: Filter) -> Result {
        self.guard()?;
        self.config.filters.push(filter);
        Ok(())
    }

    /// Returns a shutdown handle.
    ///
    /// The handle can be cloned and moved to other threads. Triggering it
    /// makes [`Monitor::run`] return `Ok(())` at the next cycle boundary.
    ///
    /// # Examples
    ///
    /// ```
    /// use lookout::{Event, Kind, Monitor};
    ///
    /// // Create polling monitor and shut it down immediately
    /// let mut monitor = Monitor::new(Kind::Poll, ["."], |_: &[Event]| Ok(()))?;
    /// let handle = monitor.shutdown_handle();
    /// handle.signal();
    /// monitor.run()?;
    /// # Ok::<(), lookout::Error>(())
    /// ```
    pub fn shutdown_handle(&mut self) -> Shutdown {
        let (sender, _) = self.shutdown.get_or_insert_with(unbounded);
        Shutdown { sender: sender.clone() }
    }

    /// Runs the monitor, blocking the calling thread.
    ///
    /// On entry, the configuration is validated and all filter patterns are
    /// compiled, freezing the configuration. The monitor then enters the
    /// backend loop, delivering batches of events to the callback until it
    /// is shut down, it runs out of live watches, or a fatal backend error
    /// occurs.
    ///
    /// # Errors
    ///
    /// - [`Error::MonitorAlreadyRunning`] if the monitor was started before.
    /// - [`Error::InvalidConfiguration`] if no paths are configured.
    /// - [`Error::FilterCompilationFailed`] if a filter pattern is invalid.
    /// - [`Error::ResourceExhausted`] and [`Error::BackendFatal`] for
    ///   backend resource failures.
    /// - Any error returned by the event callback, unchanged.
    pub fn run(&mut self) -> Result {
        if self.started {
            return Err(Error::MonitorAlreadyRunning);
        }
        if self.config.paths.is_empty() {
            return Err(Error::InvalidConfiguration(
                "no paths configured".into(),
            ));
        }

        // Compile filters, freezing the configuration. From here on, the
        // monitor counts as started, even after the loop returns.
        let filters = FilterSet::compile(&self.config.filters)?;
        self.started = true;

        // Assemble session and enter the backend loop
        let mut session = Session {
            config: &self.config,
            filters,
            handler: &mut self.handler,
            shutdown: self.shutdown.as_ref().map(|(_, receiver)| receiver),
        };
        match self.kind {
            Kind::Poll => poll::run(&mut session),
            #[cfg(any(
                target_os = "macos",
                target_os = "freebsd",
                target_os = "openbsd",
                target_os = "netbsd",
                target_os = "dragonfly"
            ))]
            Kind::Kqueue => kqueue::run(&mut session),
            #[cfg(not(any(
                target_os = "macos",
                target_os = "freebsd",
                target_os = "openbsd",
                target_os = "netbsd",
                target_os = "dragonfly"
            )))]
            Kind::Kqueue => Err(Error::BackendUnavailable(Kind::Kqueue)),
        }
    }

    /// Guards configuration against mutation after start.
    fn guard(&self) -> Result {
        if self.started {
            Err(Error::MonitorAlreadyRunning)
        } else {
            Ok(())
        }
    }
}

#[allow(clippy::must_use_candidate)]
impl Monitor {
    /// Returns the monitor backend.
    #[inline]
    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// Returns the configured root paths.
    #[inline]
    pub fn paths(&self) -> &[PathBuf] {
        &self.config.paths
    }
}

// ----------------------------------------------------------------------------

impl Shutdown {
    /// Signals the monitor to shut down.
    ///
    /// Signalling is idempotent, and signalling a monitor that already
    /// returned has no effect.
    pub fn signal(&self) {
        let _ = self.sender.send(());
    }
}

// ----------------------------------------------------------------------------

impl Session<'_> {
    /// Returns the walk policy for path discovery.
    pub fn walk(&self) -> Walk<'_> {
        Walk {
            recursive: self.config.recursive,
            follow_symlinks: self.config.follow_symlinks,
            filters: &self.filters,
        }
    }

    /// Returns the effective inter-cycle interval.
    ///
    /// The configured latency is clamped to the backend minimum, so a very
    /// small latency cannot turn the cycle into a busy loop.
    pub fn interval(&self, floor: f64) -> Duration {
        Duration::from_secs_f64(self.config.latency.max(floor))
    }

    /// Delivers a batch of events to the handler and clears the buffer.
    ///
    /// Empty batches are never delivered. Errors returned by the handler are
    /// forwarded to the caller, terminating the backend loop.
    pub fn dispatch(&mut self, events: &mut Vec<Event>) -> Result {
        if !events.is_empty() {
            (self.handler)(events)?;
            events.clear();
        }

        Ok(())
    }

    /// Sleeps for the given interval, returning whether to shut down.
    ///
    /// When a shutdown handle exists, the sleep doubles as the wait for the
    /// shutdown signal, so a signalled monitor wakes up immediately.
    pub fn sleep(&self, interval: Duration) -> bool {
        match self.shutdown {
            Some(receiver) => match receiver.recv_timeout(interval) {
                Ok(()) => true,
                Err(RecvTimeoutError::Timeout) => false,
                Err(RecvTimeoutError::Disconnected) => {
                    // All handles were dropped without signalling, so the
                    // channel can no longer wake us up
                    thread::sleep(interval);
                    false
                }
            },
            None => {
                thread::sleep(interval);
                false
            }
        }
    }

    /// Checks for a pending shutdown signal without blocking.
    pub fn interrupted(&self) -> bool {
        self.shutdown
            .is_some_and(|receiver| receiver.try_recv().is_ok())
    }
}

// ----------------------------------------------------------------------------
// Trait implementations
// ----------------------------------------------------------------------------

impl fmt::Display for Kind {
    /// Formats the backend for display.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Kind::Poll => "poll",
            Kind::Kqueue => "kqueue",
        })
    }
}

// ----------------------------------------------------------------------------

impl fmt::Debug for Monitor {
    /// Formats the file monitor for debugging.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Monitor")
            .field("kind", &self.kind)
            .field("config", &self.config)
            .field("started", &self.started)
            .finish_non_exhaustive()
    }
}

// ----------------------------------------------------------------------------
// Type aliases
// ----------------------------------------------------------------------------

/// Event handler.
///
/// Handlers receive each batch of events synchronously on the monitor
/// thread. A slow handler stalls the next cycle, which is the intended
/// backpressure mechanism.
pub type EventHandler = Box<dyn FnMut(&[Event]) -> Result + Send>;

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn noop() -> impl FnMut(&[Event]) -> Result + Send {
        |_| Ok(())
    }

    #[test]
    fn test_recommended_is_available() {
        assert!(Kind::recommended().is_available());
    }

    #[test]
    fn test_overrides() {
        assert_eq!(Kind::from_overrides(true, false).unwrap(), Kind::Poll);
        assert_eq!(Kind::from_overrides(false, true).unwrap(), Kind::Kqueue);
        assert_eq!(
            Kind::from_overrides(false, false).unwrap(),
            Kind::recommended()
        );
        assert!(matches!(
            Kind::from_overrides(true, true),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_latency_must_be_positive() {
        let mut monitor = Monitor::new(Kind::Poll, ["."], noop()).unwrap();
        assert!(matches!(
            monitor.set_latency(-1.0),
            Err(Error::InvalidConfiguration(_))
        ));
        assert!(matches!(
            monitor.set_latency(0.0),
            Err(Error::InvalidConfiguration(_))
        ));
        monitor.set_latency(0.25).unwrap();
    }

    #[test]
    fn test_run_requires_paths() {
        let paths: [&str; 0] = [];
        let mut monitor = Monitor::new(Kind::Poll, paths, noop()).unwrap();
        assert!(matches!(
            monitor.run(),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_run_rejects_restart() {
        let dir = tempdir().unwrap();
        let mut monitor =
            Monitor::new(Kind::Poll, [dir.path()], noop()).unwrap();

        // Shut the monitor down before it enters the first cycle
        let handle = monitor.shutdown_handle();
        handle.signal();
        monitor.run().unwrap();

        // Once started, the monitor cannot be reused
        assert!(matches!(monitor.run(), Err(Error::MonitorAlreadyRunning)));
        assert!(matches!(
            monitor.set_recursive(true),
            Err(Error::MonitorAlreadyRunning)
        ));
    }

    #[test]
    fn test_filter_compilation_failure() {
        let dir = tempdir().unwrap();
        let mut monitor =
            Monitor::new(Kind::Poll, [dir.path()], noop()).unwrap();
        monitor.set_filters(vec![Filter::exclude("(")]).unwrap();
        assert!(matches!(
            monitor.run(),
            Err(Error::FilterCompilationFailed(_))
        ));

        // A failed start does not consume the monitor
        monitor.set_filters(Vec::new()).unwrap();
    }

    #[test]
    fn test_dispatch_skips_empty_batches() {
        let config = Config {
            paths: Vec::new(),
            latency: 1.0,
            recursive: false,
            follow_symlinks: false,
            filters: Vec::new(),
        };
        let mut handler: EventHandler = Box::new(|batch| {
            assert!(!batch.is_empty());
            Ok(())
        });
        let mut session = Session {
            config: &config,
            filters: FilterSet::compile(&[]).unwrap(),
            handler: &mut handler,
            shutdown: None,
        };

        // An empty buffer never reaches the handler, which would panic on it
        let mut events = Vec::new();
        session.dispatch(&mut events).unwrap();

        // A non-empty buffer is delivered and cleared
        events.push(Event::new(
            "/w/a.txt",
            std::time::SystemTime::now(),
            vec![event::EventFlag::Created],
        ));
        session.dispatch(&mut events).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_callback_error_propagates() {
        let config = Config {
            paths: Vec::new(),
            latency: 1.0,
            recursive: false,
            follow_symlinks: false,
            filters: Vec::new(),
        };
        let mut handler: EventHandler = Box::new(|_| {
            Err(Error::Io(std::io::Error::other("handler failed")))
        });
        let mut session = Session {
            config: &config,
            filters: FilterSet::compile(&[]).unwrap(),
            handler: &mut handler,
            shutdown: None,
        };

        let mut events = vec![Event::new(
            "/w/a.txt",
            std::time::SystemTime::now(),
            vec![event::EventFlag::Created],
        )];
        assert!(matches!(
            session.dispatch(&mut events),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn test_paths_are_canonicalized() {
        let dir = tempdir().unwrap();
        let monitor = Monitor::new(Kind::Poll, [dir.path()], noop()).unwrap();
        assert_eq!(
            monitor.paths(),
            &[fs::canonicalize(dir.path()).unwrap()]
        );
    }
}
