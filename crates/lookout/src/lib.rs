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

//! File change monitor.
//!
//! Lookout watches a set of file system paths and reports changes as batches
//! of [`Event`] values, each carrying the affected path, a wall-clock time
//! stamp, and a set of [`EventFlag`] values describing what happened. Events
//! are delivered synchronously to a consumer-supplied callback from within
//! [`Monitor::run`], which takes over the calling thread.
//!
//! Several monitor backends produce the same event vocabulary: a kernel event
//! queue backend on hosts that provide one, and a portable polling backend
//! that reconstructs the change stream from periodic stat snapshots. The
//! [`Kind`] type selects a backend, and [`Monitor::recommended`] picks the
//! best one available on the host.
//!
//! # Examples
//!
//! ```no_run
//! use lookout::{Event, Monitor};
//!
//! // Create monitor with the recommended backend and start watching
//! let mut monitor = Monitor::recommended(["."], |batch: &[Event]| {
//!     for event in batch {
//!         println!("{event}");
//!     }
//!     Ok(())
//! })?;
//! monitor.run()?;
//! # Ok::<(), lookout::Error>(())
//! ```

pub mod monitor;

pub use monitor::event::{Event, EventFlag};
pub use monitor::filter::{Filter, FilterKind};
pub use monitor::{Error, EventHandler, Kind, Monitor, Result, Shutdown};
