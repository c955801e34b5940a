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

//! File event.

use std::path::{Path, PathBuf};
use std::time::SystemTime;
use std::fmt;

pub mod stream;

// ----------------------------------------------------------------------------
// Enums
// ----------------------------------------------------------------------------

/// File event flag.
///
/// Flags are combinable, so a single [`Event`] carries a set of them. Each
/// flag has a fixed power-of-two value, which makes the numeric mask of an
/// event the sum of its flags. [`EventFlag::PlatformSpecific`] is the
/// catch-all for backend-native signals without a portable meaning.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum EventFlag {
    /// Backend-native signal without portable meaning.
    PlatformSpecific = 1,
    /// Path was created.
    Created = 2,
    /// Path contents were updated.
    Updated = 4,
    /// Path was removed.
    Removed = 8,
    /// Path was renamed; the event carries the source path.
    Renamed = 16,
    /// Path ownership changed.
    OwnerModified = 32,
    /// Path attributes changed.
    AttributeModified = 64,
    /// Path denotes a regular file.
    IsFile = 128,
    /// Path denotes a directory.
    IsDir = 256,
    /// Path denotes a symbolic link.
    IsSymLink = 512,
    /// Link count of the path changed.
    Link = 1024,
}

// ----------------------------------------------------------------------------
// Structs
// ----------------------------------------------------------------------------

/// File event.
///
/// Events are immutable value objects: an absolute path, the wall-clock time
/// of the cycle that produced the event, and a non-empty set of flags. All
/// events of a cycle share the same time stamp.
///
/// # Examples
///
/// ```
/// use std::time::SystemTime;
/// use lookout::{Event, EventFlag};
///
/// // Create file event
/// let event = Event::new("/tmp/a", SystemTime::now(), vec![EventFlag::Created]);
/// assert_eq!(event.mask(), 2);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    /// File path.
    path: PathBuf,
    /// Event time.
    time: SystemTime,
    /// Event flags.
    flags: Vec<EventFlag>,
}

// ----------------------------------------------------------------------------
// Implementations
// ----------------------------------------------------------------------------

impl EventFlag {
    /// All flags, in mask order.
    pub const ALL: [EventFlag; 11] = [
        EventFlag::PlatformSpecific,
        EventFlag::Created,
        EventFlag::Updated,
        EventFlag::Removed,
        EventFlag::Renamed,
        EventFlag::OwnerModified,
        EventFlag::AttributeModified,
        EventFlag::IsFile,
        EventFlag::IsDir,
        EventFlag::IsSymLink,
        EventFlag::Link,
    ];

    /// Returns the numeric value of the flag.
    #[inline]
    #[must_use]
    pub fn bits(self) -> u32 {
        self as u32
    }

    /// Returns the wire-level name of the flag.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            EventFlag::PlatformSpecific => "PlatformSpecific",
            EventFlag::Created => "Created",
            EventFlag::Updated => "Updated",
            EventFlag::Removed => "Removed",
            EventFlag::Renamed => "Renamed",
            EventFlag::OwnerModified => "OwnerModified",
            EventFlag::AttributeModified => "AttributeModified",
            EventFlag::IsFile => "IsFile",
            EventFlag::IsDir => "IsDir",
            EventFlag::IsSymLink => "IsSymLink",
            EventFlag::Link => "Link",
        }
    }
}

// ----------------------------------------------------------------------------

impl Event {
    /// Creates a file event.
    ///
    /// The flag set must not be empty; monitors never emit an event without
    /// at least one flag.
    #[must_use]
    pub fn new<P>(path: P, time: SystemTime, flags: Vec<EventFlag>) -> Self
    where
        P: Into<PathBuf>,
    {
        debug_assert!(!flags.is_empty(), "event without flags");
        Self { path: path.into(), time, flags }
    }

    /// Returns the file path of the event.
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the time of the event.
    #[inline]
    #[must_use]
    pub fn time(&self) -> SystemTime {
        self.time
    }

    /// Returns the flags of the event.
    #[inline]
    #[must_use]
    pub fn flags(&self) -> &[EventFlag] {
        &self.flags
    }

    /// Returns the numeric mask of the event, the sum of its flag values.
    #[must_use]
    pub fn mask(&self) -> u32 {
        self.flags.iter().map(|flag| flag.bits()).sum()
    }
}

// ----------------------------------------------------------------------------
// Trait implementations
// ----------------------------------------------------------------------------

impl fmt::Display for EventFlag {
    /// Formats the flag with its wire-level name.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ----------------------------------------------------------------------------

impl fmt::Display for Event {
    /// Formats the event as its path followed by its flag names.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.path.display())?;
        for flag in &self.flags {
            write!(f, " {flag}")?;
        }

        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_values_are_distinct_powers_of_two() {
        let mut mask = 0;
        for flag in EventFlag::ALL {
            assert!(flag.bits().is_power_of_two());
            assert_eq!(mask & flag.bits(), 0);
            mask |= flag.bits();
        }
        assert_eq!(mask, 2047);
    }

    #[test]
    fn test_mask_is_sum_of_flags() {
        let event = Event::new(
            "/w/a.txt",
            SystemTime::now(),
            vec![EventFlag::Updated, EventFlag::AttributeModified],
        );
        assert_eq!(event.mask(), 4 + 64);
    }

    #[test]
    fn test_display() {
        let event = Event::new(
            "/w/a.txt",
            SystemTime::now(),
            vec![EventFlag::Created, EventFlag::IsFile],
        );
        assert_eq!(event.to_string(), "/w/a.txt Created IsFile");
    }
}
