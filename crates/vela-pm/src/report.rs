//! Error bundle for fetch diagnostics
//!
//! Collects user-attributable failures (bad URLs, hash mismatches, manifest
//! problems) with source spans into a single bundle that can be rendered at
//! the end of a run. Infrastructure failures bypass this and propagate as
//! plain errors.

use codespan_reporting::diagnostic::{Diagnostic, Label};
use codespan_reporting::files::SimpleFiles;
use codespan_reporting::term;
use codespan_reporting::term::termcolor::{ColorChoice, StandardStream};
use std::fmt::Write as _;
use std::ops::Range;
use std::path::Path;

/// Structured diagnostic sink for a resolve run.
pub struct Report {
    files: SimpleFiles<String, String>,
    diagnostics: Vec<Diagnostic<usize>>,
}

impl Report {
    pub fn new() -> Self {
        Report {
            files: SimpleFiles::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Register a source file (typically a manifest) and get its id back.
    pub fn add_file(&mut self, path: &Path, source: String) -> usize {
        self.files.add(path.display().to_string(), source)
    }

    /// Push an error anchored at `span` in `file_id`.
    pub fn error(&mut self, file_id: usize, span: Range<usize>, message: impl Into<String>) {
        self.error_with_notes(file_id, span, message, Vec::new());
    }

    /// Push an error with trailing notes (remediation suggestions).
    pub fn error_with_notes(
        &mut self,
        file_id: usize,
        span: Range<usize>,
        message: impl Into<String>,
        notes: Vec<String>,
    ) {
        self.diagnostics.push(
            Diagnostic::error()
                .with_message(message)
                .with_labels(vec![Label::primary(file_id, span)])
                .with_notes(notes),
        );
    }

    /// Push an error with no source anchor (e.g. the whole file is missing).
    pub fn error_unanchored(&mut self, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic::error().with_message(message));
    }

    pub fn has_errors(&self) -> bool {
        !self.diagnostics.is_empty()
    }

    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    /// Render every diagnostic to stderr with source context.
    pub fn emit_stderr(&self) -> Result<(), codespan_reporting::files::Error> {
        let writer = StandardStream::stderr(ColorChoice::Auto);
        let config = term::Config::default();
        for diagnostic in &self.diagnostics {
            term::emit(&mut writer.lock(), &config, &self.files, diagnostic)?;
        }
        Ok(())
    }

    /// Render messages and notes as plain text, one per line.
    ///
    /// Loses the source-context framing; meant for logs and tests.
    pub fn render_plain(&self) -> String {
        let mut out = String::new();
        for diagnostic in &self.diagnostics {
            writeln!(out, "error: {}", diagnostic.message).unwrap();
            for note in &diagnostic.notes {
                writeln!(out, "note: {note}").unwrap();
            }
        }
        out
    }
}

impl Default for Report {
    fn default() -> Self {
        Self::new()
    }
}
