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

//! Path filter.

use regex::{Regex, RegexBuilder};
use std::path::Path;

use super::error::Result;

// ----------------------------------------------------------------------------
// Enums
// ----------------------------------------------------------------------------

/// Path filter polarity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterKind {
    /// Accept paths matching the pattern.
    Include,
    /// Reject paths matching the pattern.
    Exclude,
}

// ----------------------------------------------------------------------------
// Structs
// ----------------------------------------------------------------------------

/// Path filter.
///
/// A filter is a regular expression with a polarity, applied to the full
/// path of every candidate before an event can be synthesized for it. A path
/// is accepted iff no include filters exist or at least one include filter
/// matches, and no exclude filter matches.
///
/// Patterns are compiled when the monitor starts, not when the filter is
/// created, so an invalid pattern surfaces as
/// [`Error::FilterCompilationFailed`][] from [`Monitor::run`][].
///
/// [`Error::FilterCompilationFailed`]: super::Error::FilterCompilationFailed
/// [`Monitor::run`]: super::Monitor::run
///
/// # Examples
///
/// ```
/// use lookout::Filter;
///
/// // Create filter excluding temporary files
/// let filter = Filter::exclude(r"\.tmp$");
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Filter {
    /// Pattern text.
    pub text: String,
    /// Filter polarity.
    pub kind: FilterKind,
    /// Whether matching is case-sensitive.
    pub case_sensitive: bool,
    /// Whether the pattern uses the extended syntax. The regular expression
    /// engine exposes a single flavor, so the bit is retained for wire
    /// compatibility only.
    pub extended: bool,
}

// ----------------------------------------------------------------------------

/// Compiled path filters.
///
/// The compiled form splits filters by polarity, so acceptance is one pass
/// over the include patterns and one over the exclude patterns.
#[derive(Debug, Default)]
pub(crate) struct FilterSet {
    /// Include patterns.
    includes: Vec<Regex>,
    /// Exclude patterns.
    excludes: Vec<Regex>,
}

// ----------------------------------------------------------------------------
// Implementations
// ----------------------------------------------------------------------------

impl Filter {
    /// Creates a path filter.
    ///
    /// Filters default to case-sensitive matching without the extended
    /// syntax bit.
    #[must_use]
    pub fn new<S>(text: S, kind: FilterKind) -> Self
    where
        S: Into<String>,
    {
        Self {
            text: text.into(),
            kind,
            case_sensitive: true,
            extended: false,
        }
    }

    /// Creates an include filter.
    ///
    /// # Examples
    ///
    /// ```
    /// use lookout::Filter;
    ///
    /// // Create filter including Markdown files
    /// let filter = Filter::include(r"\.md$");
    /// ```
    #[must_use]
    pub fn include<S>(text: S) -> Self
    where
        S: Into<String>,
    {
        Self::new(text, FilterKind::Include)
    }

    /// Creates an exclude filter.
    ///
    /// # Examples
    ///
    /// ```
    /// use lookout::Filter;
    ///
    /// // Create filter excluding hidden files
    /// let filter = Filter::exclude(r"/\.");
    /// ```
    #[must_use]
    pub fn exclude<S>(text: S) -> Self
    where
        S: Into<String>,
    {
        Self::new(text, FilterKind::Exclude)
    }

    /// Makes the filter match case-insensitively.
    #[must_use]
    pub fn case_insensitive(mut self) -> Self {
        self.case_sensitive = false;
        self
    }

    /// Marks the pattern as using the extended syntax.
    #[must_use]
    pub fn extended(mut self) -> Self {
        self.extended = true;
        self
    }
}

// ----------------------------------------------------------------------------

impl FilterSet {
    /// Compiles the given filters.
    ///
    /// # Errors
    ///
    /// The first pattern that fails to compile aborts compilation with
    /// [`Error::FilterCompilationFailed`][].
    ///
    /// [`Error::FilterCompilationFailed`]: super::Error::FilterCompilationFailed
    pub fn compile(filters: &[Filter]) -> Result<Self> {
        let mut set = Self::default();
        for filter in filters {
            let regex = RegexBuilder::new(&filter.text)
                .case_insensitive(!filter.case_sensitive)
                .build()?;

            match filter.kind {
                FilterKind::Include => set.includes.push(regex),
                FilterKind::Exclude => set.excludes.push(regex),
            }
        }

        Ok(set)
    }

    /// Checks whether the given path is accepted.
    pub fn accept<P>(&self, path: P) -> bool
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref().to_string_lossy();

        // Without include filters, every path is a candidate. Otherwise, at
        // least one include filter must match.
        if !self.includes.is_empty()
            && !self.includes.iter().any(|regex| regex.is_match(&path))
        {
            return false;
        }

        // A matching exclude filter rejects the path unconditionally
        !self.excludes.iter().any(|regex| regex.is_match(&path))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
