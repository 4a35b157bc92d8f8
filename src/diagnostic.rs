use crate::span::Span;

/// An analyzer diagnostic (error or warning).
#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub span: Span,
    pub notes: Vec<String>,
    pub help: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl Diagnostic {
    pub fn error(message: String, span: Span) -> Self {
        Self {
            severity: Severity::Error,
            message,
            span,
            notes: Vec::new(),
            help: None,
        }
    }

    pub fn warning(message: String, span: Span) -> Self {
        Self {
            severity: Severity::Warning,
            message,
            span,
            notes: Vec::new(),
            help: None,
        }
    }

    pub fn with_note(mut self, note: String) -> Self {
        self.notes.push(note);
        self
    }

    pub fn with_help(mut self, help: String) -> Self {
        self.help = Some(help);
        self
    }

    /// Render the diagnostic to stderr using ariadne.
    pub fn render(&self, filename: &str, source: &str) {
        use ariadne::{Color, Label, Report, ReportKind, Source};

        let kind = match self.severity {
            Severity::Error => ReportKind::Error,
            Severity::Warning => ReportKind::Warning,
        };

        let color = match self.severity {
            Severity::Error => Color::Red,
            Severity::Warning => Color::Yellow,
        };

        let mut report = Report::build(kind, filename, self.span.start as usize)
            .with_message(&self.message)
            .with_label(
                Label::new((filename, self.span.start as usize..self.span.end as usize))
                    .with_message(&self.message)
                    .with_color(color),
            );

        for note in &self.notes {
            report = report.with_note(note);
        }

        if let Some(help) = &self.help {
            report = report.with_help(help);
        }

        report
            .finish()
            .eprint((filename, Source::from(source)))
            .unwrap();
    }
}

/// Render a list of diagnostics.
pub fn render_diagnostics(diagnostics: &[Diagnostic], filename: &str, source: &str) {
    for diag in diagnostics {
        diag.render(filename, source);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_construction() {
        let span = Span::new(4, 12);
        let d = Diagnostic::error("invalid opcode".to_string(), span);
        assert_eq!(d.severity, Severity::Error);
        assert_eq!(d.message, "invalid opcode");
        assert_eq!(d.span.start, 4);
        assert_eq!(d.span.end, 12);
        assert!(d.notes.is_empty());
        assert!(d.help.is_none());
    }

    #[test]
    fn test_warning_construction() {
        let d = Diagnostic::warning("line skipped".to_string(), Span::dummy());
        assert_eq!(d.severity, Severity::Warning);
        assert_eq!(d.message, "line skipped");
    }

    #[test]
    fn test_with_note_and_help() {
        let d = Diagnostic::warning("unroll table ignored".to_string(), Span::dummy())
            .with_note("expected 3 factors".to_string())
            .with_note("found 1".to_string())
            .with_help("check ./.uconf".to_string());
        assert_eq!(d.notes.len(), 2);
        assert_eq!(d.help.as_deref(), Some("check ./.uconf"));
    }

    #[test]
    fn test_render_does_not_panic() {
        let source = "mov $r1, $r2\nfoo $r1\n";
        let d = Diagnostic::warning("unknown opcode 'foo'".to_string(), Span::new(13, 20));
        d.render("kernel.ptx", source);
    }
}
