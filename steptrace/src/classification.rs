//! Frame origin classification for distinguishing user code from libraries.
//!
//! A native executable spends most of its life outside the code its author
//! wrote: the C runtime start-up, the dynamic loader, libc, the C++ standard
//! library. Only frames that resolve to the user's own sources are recorded.
//!
//! # Classification Strategy
//!
//! A frame without a resolvable line entry is never user code. Otherwise the
//! first matching rule wins:
//!
//! 1. **Exact path** - the file's absolute path equals the target source
//! 2. **File name** - the file's basename equals the target source's basename
//! 3. **Native source heuristic** - the extension is a C/C++ source or header
//!    extension, the file name carries no runtime marker, and the directory
//!    is not a known toolchain or system location
//!
//! The denial tables below are plain data; `--deny-path` extends the
//! directory table per run.

use log::warn;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::backend::{FrameLocation, SourceFile};

/// Origin of a stack frame, used to distinguish user code from libraries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameOrigin {
    /// The source file named by semantic info (path or basename match)
    TargetSource,
    /// Another C/C++ source outside toolchain and system locations
    UserSource,
    /// C runtime, loader, or standard-library implementation file
    RuntimeLib,
    /// A file under a system include, library, or SDK directory
    SystemLocation,
    /// A file whose extension is not a C/C++ source extension
    ForeignSource,
    /// No line entry: cannot be attributed to any source
    #[default]
    Unknown,
}

impl FrameOrigin {
    /// Returns true if this frame represents user application code.
    #[must_use]
    pub fn is_user_code(self) -> bool {
        matches!(self, FrameOrigin::TargetSource | FrameOrigin::UserSource)
    }
}

// =============================================================================
// CLASSIFICATION TABLES
// =============================================================================

/// Extensions of C and C++ sources and headers (compared case-insensitively)
pub const NATIVE_SOURCE_EXTENSIONS: &[&str] = &["c", "cc", "cpp", "cxx", "c++", "h", "hh", "hpp", "hxx"];

/// File name fragments of runtime and standard-library implementation files
pub const RUNTIME_FILE_MARKERS: &[&str] = &[
    // C runtime start-up
    "crt",
    "libc-start",
    "libc_start",
    // dynamic loader
    "dl-",
    "rtld",
    // C++ stream and locale machinery
    "ios_base",
    "ios_init",
    "basic_ios",
    "stream",
    "locale",
    // reserved / mangled helper names
    "__",
    "_Z",
];

/// Directory fragments of toolchain, system, and SDK locations
pub const SYSTEM_DIR_MARKERS: &[&str] = &[
    "/usr/include",
    "/usr/lib",
    "/usr/local/include",
    "/usr/src/debug",
    "/lib/gcc",
    "/include/c++",
    "/glibc",
    "/sysdeps",
    "/rustc/",
    "\\Microsoft Visual Studio",
    "\\Windows Kits",
    "/Library/Developer/",
    "/Applications/Xcode",
];

/// Owned copy of the classification tables, extensible per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterTables {
    pub source_extensions: Vec<String>,
    pub runtime_file_markers: Vec<String>,
    pub system_dir_markers: Vec<String>,
}

impl Default for FilterTables {
    fn default() -> Self {
        let owned = |table: &[&str]| table.iter().map(|s| (*s).to_string()).collect();
        Self {
            source_extensions: owned(NATIVE_SOURCE_EXTENSIONS),
            runtime_file_markers: owned(RUNTIME_FILE_MARKERS),
            system_dir_markers: owned(SYSTEM_DIR_MARKERS),
        }
    }
}

impl FilterTables {
    /// Add directory fragments to deny on top of the built-in table.
    #[must_use]
    pub fn with_denied_dirs(mut self, extra: impl IntoIterator<Item = String>) -> Self {
        self.system_dir_markers.extend(extra.into_iter().filter(|d| !d.is_empty()));
        self
    }
}

/// Classify a source file against the target source and the tables.
///
/// # Examples
///
/// ```ignore
/// // Target source by basename
/// classify_source(&SourceFile::new("/home/u/p/main.cpp"), None, Some("main.cpp"), &tables);
/// // → FrameOrigin::TargetSource
///
/// // libstdc++ header
/// classify_source(&SourceFile::new("/usr/include/c++/13/bits/stl_vector.h"), None, None, &tables);
/// // → FrameOrigin::SystemLocation
/// ```
#[must_use]
pub fn classify_source(
    file: &SourceFile,
    target_path: Option<&Path>,
    target_name: Option<&str>,
    tables: &FilterTables,
) -> FrameOrigin {
    if target_path.is_some_and(|target| file.path == target) {
        return FrameOrigin::TargetSource;
    }
    if target_name.is_some_and(|name| file.name == name) {
        return FrameOrigin::TargetSource;
    }

    let extension = Path::new(&file.name)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if !tables.source_extensions.iter().any(|e| *e == extension) {
        return FrameOrigin::ForeignSource;
    }

    if tables.runtime_file_markers.iter().any(|m| file.name.contains(m.as_str())) {
        return FrameOrigin::RuntimeLib;
    }

    let directory = file.path.parent().map(|d| d.to_string_lossy().into_owned()).unwrap_or_default();
    if tables.system_dir_markers.iter().any(|m| directory.contains(m.as_str())) {
        return FrameOrigin::SystemLocation;
    }

    FrameOrigin::UserSource
}

/// Per-session user-code filter.
#[derive(Debug)]
pub struct UserCodeFilter {
    target_path: Option<PathBuf>,
    target_name: Option<String>,
    tables: FilterTables,
    diagnostics: ClassificationDiagnostics,
}

impl UserCodeFilter {
    /// Create a filter for an optional target source file.
    ///
    /// An existing target path is canonicalized so it compares equal to the
    /// absolute paths reported by the debugger.
    #[must_use]
    pub fn new(target_source: Option<&Path>, tables: FilterTables) -> Self {
        let target_path = target_source.map(|p| std::fs::canonicalize(p).unwrap_or_else(|_| p.to_path_buf()));
        let target_name = target_source
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().into_owned());
        Self { target_path, target_name, tables, diagnostics: ClassificationDiagnostics::new() }
    }

    /// Classify a stopped frame and record whether it had a line entry.
    pub fn classify(&mut self, frame: &FrameLocation) -> FrameOrigin {
        let Some((file, _)) = frame.line_entry() else {
            self.diagnostics.record_classification(&frame.function, false);
            return FrameOrigin::Unknown;
        };
        self.diagnostics.record_classification(&frame.function, true);
        classify_source(file, self.target_path.as_deref(), self.target_name.as_deref(), &self.tables)
    }

    pub fn is_user_code(&mut self, frame: &FrameLocation) -> bool {
        self.classify(frame).is_user_code()
    }

    #[must_use]
    pub fn diagnostics(&self) -> &ClassificationDiagnostics {
        &self.diagnostics
    }
}

// =============================================================================
// CLASSIFICATION DIAGNOSTICS
// =============================================================================

/// Tracks how many stops had line information, so a run over a binary built
/// without `-g` can be explained instead of silently producing no steps.
#[derive(Debug, Default)]
pub struct ClassificationDiagnostics {
    /// Functions that have already been reported (to avoid log spam)
    reported_functions: HashSet<String>,
    frames_with_line_info: u64,
    frames_without_line_info: u64,
}

impl ClassificationDiagnostics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one classified frame, logging once per function without line info.
    pub fn record_classification(&mut self, function: &str, had_line_info: bool) {
        if had_line_info {
            self.frames_with_line_info += 1;
        } else {
            self.frames_without_line_info += 1;
            if self.reported_functions.insert(function.to_owned()) {
                warn!("No line info for '{function}' - treating as non-user code");
            }
        }
    }

    /// Percentage of frames that had a line entry.
    ///
    /// Returns 100.0 if no frames have been classified yet.
    #[allow(clippy::cast_precision_loss)] // Precision loss acceptable for percentages
    #[must_use]
    pub fn debug_info_coverage(&self) -> f64 {
        let total = self.frames_with_line_info + self.frames_without_line_info;
        if total > 0 {
            (self.frames_with_line_info as f64 / total as f64) * 100.0
        } else {
            100.0
        }
    }

    /// Returns true if no classified frame had a line entry.
    #[must_use]
    pub fn saw_no_line_info(&self) -> bool {
        self.frames_with_line_info == 0 && self.frames_without_line_info > 0
    }

    #[must_use]
    pub fn frames_classified(&self) -> u64 {
        self.frames_with_line_info + self.frames_without_line_info
    }
}
