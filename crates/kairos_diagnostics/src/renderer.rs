//! Diagnostic rendering backends.

use crate::diagnostic::Diagnostic;

/// Trait for rendering diagnostics into formatted output strings.
pub trait DiagnosticRenderer {
    /// Renders a single diagnostic into a formatted string.
    fn render(&self, diag: &Diagnostic) -> String;
}

/// Renders diagnostics in a rustc-style terminal format.
///
/// Produces output like:
/// ```text
/// fatal[T001]: time attempted to flow backwards
///   --> at time 40, task #3
///    = note: ...
///    = help: ...
/// ```
///
/// The output is plain text; it is usually handed to a log line.
#[derive(Clone, Copy, Debug, Default)]
pub struct TerminalRenderer;

impl TerminalRenderer {
    /// Creates a new terminal renderer.
    pub fn new() -> Self {
        Self
    }
}

impl DiagnosticRenderer for TerminalRenderer {
    fn render(&self, diag: &Diagnostic) -> String {
        let mut out = format!("{}[{}]: {}\n", diag.severity, diag.code, diag.message);

        let location = match (diag.time, &diag.subject) {
            (Some(t), Some(s)) => Some(format!("at time {t}, {s}")),
            (Some(t), None) => Some(format!("at time {t}")),
            (None, Some(s)) => Some(s.clone()),
            (None, None) => None,
        };
        if let Some(location) = location {
            out.push_str(&format!("  --> {location}\n"));
        }

        for note in &diag.notes {
            out.push_str(&format!("   = note: {note}\n"));
        }
        for help in &diag.help {
            out.push_str(&format!("   = help: {help}\n"));
        }

        out
    }
}
