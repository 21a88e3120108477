//! Step deduplication
//!
//! A stop is recorded only when it is in user code and its signature
//! differs from the last recorded one:
//!
//! ```text
//! signature = (function, file path, line, stack depth)
//! ```
//!
//! Stack depth is part of the signature, so a recursive call landing on the
//! same line at a deeper level is a new step.

use std::path::PathBuf;

use crate::backend::FrameLocation;
use crate::classification::UserCodeFilter;

/// Identity of a recorded stop.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FrameSignature {
    pub function: String,
    pub file: Option<PathBuf>,
    pub line: Option<u32>,
    pub stack_depth: usize,
}

impl FrameSignature {
    #[must_use]
    pub fn of(frame: &FrameLocation, stack_depth: usize) -> Self {
        Self {
            function: frame.function.clone(),
            file: frame.file.as_ref().map(|f| f.path.clone()),
            line: frame.line,
            stack_depth,
        }
    }
}

/// Decides which stop events become steps.
#[derive(Debug)]
pub struct Deduplicator {
    filter: UserCodeFilter,
    last_signature: Option<FrameSignature>,
    found_user_code: bool,
}

impl Deduplicator {
    #[must_use]
    pub fn new(filter: UserCodeFilter) -> Self {
        Self { filter, last_signature: None, found_user_code: false }
    }

    /// Whether `frame` should be recorded.
    ///
    /// `stack_depth` is only consulted for user-code frames. On `true` the
    /// frame's signature becomes the last recorded one.
    ///
    /// # Errors
    /// Propagates the error from `stack_depth`
    pub fn should_record<E>(
        &mut self,
        frame: &FrameLocation,
        stack_depth: impl FnOnce() -> Result<usize, E>,
    ) -> Result<bool, E> {
        if !self.filter.is_user_code(frame) {
            return Ok(false);
        }
        self.found_user_code = true;

        let signature = FrameSignature::of(frame, stack_depth()?);
        if self.last_signature.as_ref() == Some(&signature) {
            return Ok(false);
        }
        self.last_signature = Some(signature);
        Ok(true)
    }

    /// Whether any user-code frame has been seen this session.
    #[must_use]
    pub fn found_user_code(&self) -> bool {
        self.found_user_code
    }

    #[must_use]
    pub fn last_signature(&self) -> Option<&FrameSignature> {
        self.last_signature.as_ref()
    }

    #[must_use]
    pub fn filter(&self) -> &UserCodeFilter {
        &self.filter
    }
}
