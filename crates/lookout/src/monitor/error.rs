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

//! File monitor error.

use std::{io, result};
use thiserror::Error;

use super::Kind;

// ----------------------------------------------------------------------------
// Enums
// ----------------------------------------------------------------------------

/// File monitor error.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Filter pattern failed to compile.
    #[error("filter pattern failed to compile: {0}")]
    FilterCompilationFailed(#[from] regex::Error),

    /// Monitor is already running.
    #[error("monitor is already running")]
    MonitorAlreadyRunning,

    /// Backend is not compiled in for the host.
    #[error("backend not available on this host: {0}")]
    BackendUnavailable(Kind),

    /// Descriptor, queue, or memory allocation failed.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(#[source] io::Error),

    /// Unrecoverable loss of the kernel queue.
    #[error("backend failure: {0}")]
    BackendFatal(#[source] io::Error),

    /// I/O error.
    #[error(transparent)]
    Io(#[from] io::Error),
}

// ----------------------------------------------------------------------------
// Type aliases
// ----------------------------------------------------------------------------

/// File monitor result.
pub type Result<T = ()> = result::Result<T, Error>;
