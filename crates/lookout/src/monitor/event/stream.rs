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

//! Kernel stream flag translation.
//!
//! Hosts with a kernel-native event stream report changes as a bitmask of
//! native flags. This module holds the stable translation into the portable
//! [`EventFlag`] vocabulary: per-item flags map to their portable
//! counterpart, while stream-level signals, e.g., queue overflows or
//! mount activity, collapse into [`EventFlag::PlatformSpecific`].

use super::EventFlag;

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// Subdirectories must be rescanned.
pub const MUST_SCAN_SUBDIRS: u32 = 0x0000_0001;
/// Events were dropped in user space.
pub const USER_DROPPED: u32 = 0x0000_0002;
/// Events were dropped in the kernel.
pub const KERNEL_DROPPED: u32 = 0x0000_0004;
/// Event identifiers wrapped around.
pub const EVENT_IDS_WRAPPED: u32 = 0x0000_0008;
/// Historical replay is done.
pub const HISTORY_DONE: u32 = 0x0000_0010;
/// A watched root changed.
pub const ROOT_CHANGED: u32 = 0x0000_0020;
/// A volume was mounted below a watched path.
pub const MOUNT: u32 = 0x0000_0040;
/// A volume was unmounted below a watched path.
pub const UNMOUNT: u32 = 0x0000_0080;
/// Item was created.
pub const ITEM_CREATED: u32 = 0x0000_0100;
/// Item was removed.
pub const ITEM_REMOVED: u32 = 0x0000_0200;
/// Item inode metadata changed.
pub const ITEM_INODE_META_MOD: u32 = 0x0000_0400;
/// Item was renamed.
pub const ITEM_RENAMED: u32 = 0x0000_0800;
/// Item contents were modified.
pub const ITEM_MODIFIED: u32 = 0x0000_1000;
/// Item finder info changed.
pub const ITEM_FINDER_INFO_MOD: u32 = 0x0000_2000;
/// Item ownership changed.
pub const ITEM_CHANGE_OWNER: u32 = 0x0000_4000;
/// Item extended attributes changed.
pub const ITEM_XATTR_MOD: u32 = 0x0000_8000;
/// Item is a regular file.
pub const ITEM_IS_FILE: u32 = 0x0001_0000;
/// Item is a directory.
pub const ITEM_IS_DIR: u32 = 0x0002_0000;
/// Item is a symbolic link.
pub const ITEM_IS_SYMLINK: u32 = 0x0004_0000;

/// Translation table from native bits to portable flags.
const TRANSLATION: &[(u32, EventFlag)] = &[
    (MUST_SCAN_SUBDIRS, EventFlag::PlatformSpecific),
    (USER_DROPPED, EventFlag::PlatformSpecific),
    (KERNEL_DROPPED, EventFlag::PlatformSpecific),
    (EVENT_IDS_WRAPPED, EventFlag::PlatformSpecific),
    (HISTORY_DONE, EventFlag::PlatformSpecific),
    (ROOT_CHANGED, EventFlag::PlatformSpecific),
    (MOUNT, EventFlag::PlatformSpecific),
    (UNMOUNT, EventFlag::PlatformSpecific),
    (ITEM_CREATED, EventFlag::Created),
    (ITEM_REMOVED, EventFlag::Removed),
    (ITEM_INODE_META_MOD, EventFlag::PlatformSpecific),
    (ITEM_RENAMED, EventFlag::Renamed),
    (ITEM_MODIFIED, EventFlag::Updated),
    (ITEM_FINDER_INFO_MOD, EventFlag::PlatformSpecific),
    (ITEM_CHANGE_OWNER, EventFlag::OwnerModified),
    (ITEM_XATTR_MOD, EventFlag::AttributeModified),
    (ITEM_IS_FILE, EventFlag::IsFile),
    (ITEM_IS_DIR, EventFlag::IsDir),
    (ITEM_IS_SYMLINK, EventFlag::IsSymLink),
];

// ----------------------------------------------------------------------------
// Functions
// ----------------------------------------------------------------------------

/// Translates a native stream bitmask into portable flags.
///
/// Each known native bit maps to exactly one portable flag. Bits outside the
/// translation table, as well as the empty mask, yield
/// [`EventFlag::PlatformSpecific`], so the returned set is never empty.
///
/// # Examples
///
/// ```
/// use lookout::EventFlag;
/// use lookout::monitor::event::stream;
///
/// // Translate native bitmask
/// let flags = stream::decode(stream::ITEM_CREATED | stream::ITEM_IS_FILE);
/// assert_eq!(flags, vec![EventFlag::Created, EventFlag::IsFile]);
/// ```
#[must_use]
pub fn decode(mask: u32) -> Vec<EventFlag> {
    let mut flags = Vec::new();
    let mut known = 0;
    for &(bit, flag) in TRANSLATION {
        known |= bit;
        if mask & bit != 0 && !flags.contains(&flag) {
            flags.push(flag);
        }
    }

    // Unknown bits and the empty mask carry no portable meaning
    if (mask & !known != 0 || flags.is_empty())
        && !flags.contains(&EventFlag::PlatformSpecific)
    {
        flags.push(EventFlag::PlatformSpecific);
    }

    flags
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
