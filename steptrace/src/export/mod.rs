//! Trace export functionality
//!
//! Writes the finished `{ "steps": [...], "totalSteps": N }` document as a
//! single JSON value followed by a newline. Standard output carries nothing
//! else, so consumers can parse it directly.

use std::io::Write;

use steptrace_common::TraceDocument;

use crate::domain::ExportError;

/// Serializes a [`TraceDocument`] to a writer.
#[derive(Debug)]
pub struct TraceExporter {
    document: TraceDocument,
    pretty: bool,
}

impl TraceExporter {
    #[must_use]
    pub fn new(document: TraceDocument) -> Self {
        Self { document, pretty: false }
    }

    /// Indent the output for human readers.
    #[must_use]
    pub fn pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    #[must_use]
    pub fn document(&self) -> &TraceDocument {
        &self.document
    }

    /// Write the document and flush.
    ///
    /// # Errors
    /// Returns an error if serialization or writing fails
    pub fn export<W: Write>(&self, mut writer: W) -> Result<(), ExportError> {
        if self.document.total_steps != self.document.steps.len() {
            return Err(ExportError::WriteFailed(format!(
                "totalSteps {} does not match {} steps",
                self.document.total_steps,
                self.document.steps.len()
            )));
        }
        self.document.to_writer(&mut writer, self.pretty)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }
}
