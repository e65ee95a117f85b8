//! Error rendering using ariadne
//!
//! Compilation diagnostics are drawn against the source they refer to, with
//! related locations as secondary labels. Runtime failures have no source
//! location and are printed as a single line.

use crate::{Diagnostic, Error, Severity};
use ariadne::{ColorGenerator, Label, Report, ReportKind, Source};
use std::io::Write;

/// Render an error to stderr.
///
/// # Example
/// ```no_run
/// use sable::{Engine, EngineOptions, render_error};
///
/// let engine = Engine::new(EngineOptions::default(), |_| {});
/// if let Err(e) = engine.compile("return 1 + true") {
///     render_error(&e);
/// }
/// ```
pub fn render_error(error: &Error) {
    render_error_to_writer(error, &mut std::io::stderr(), true).ok();
}

/// Render an error to a specific writer.
pub fn render_error_to(error: &Error, writer: &mut dyn Write) -> std::io::Result<()> {
    render_error_to_writer(error, writer, true)
}

/// Render an error to a String (useful for logs or UIs).
pub fn render_error_to_string(error: &Error) -> String {
    let mut buf = Vec::new();
    render_error_to_writer(error, &mut buf, true).ok();
    String::from_utf8_lossy(&buf).to_string()
}

/// Same as `render_error_to_string` but without ANSI color codes.
pub fn render_error_to_string_no_color(error: &Error) -> String {
    let mut buf = Vec::new();
    render_error_to_writer(error, &mut buf, false).ok();
    String::from_utf8_lossy(&buf).to_string()
}

/// Render the warnings of a successful compilation.
pub fn render_warnings_to(
    source: &str,
    warnings: &[Diagnostic],
    writer: &mut dyn Write,
    use_color: bool,
) -> std::io::Result<()> {
    render_diagnostics(source, warnings, writer, use_color)
}

fn render_error_to_writer(
    error: &Error,
    writer: &mut dyn Write,
    use_color: bool,
) -> std::io::Result<()> {
    match error {
        Error::Compilation {
            diagnostics,
            source,
        } => render_diagnostics(source, diagnostics, writer, use_color),
        Error::Runtime(_) | Error::ResourceExceeded(_) | Error::Api(_) => {
            writeln!(writer, "{}", error)
        }
    }
}

fn render_diagnostics(
    source: &str,
    diagnostics: &[Diagnostic],
    writer: &mut dyn Write,
    use_color: bool,
) -> std::io::Result<()> {
    for diag in diagnostics {
        let mut colors = ColorGenerator::new();
        colors.next(); // Skip the first color.

        let kind = match diag.severity {
            Severity::Error => ReportKind::Error,
            Severity::Warning => ReportKind::Warning,
            Severity::Info => ReportKind::Advice,
        };

        let mut report = Report::build(kind, ("<input>", diag.span.0.clone()))
            .with_message(&diag.message)
            .with_config(ariadne::Config::default().with_color(use_color));

        if let Some(code) = &diag.code {
            report = report.with_code(code);
        }

        let color = colors.next();
        report = report.with_label(
            Label::new(("<input>", diag.span.0.clone()))
                .with_message(&diag.message)
                .with_color(color),
        );

        for related in &diag.related {
            let color = colors.next();
            report = report.with_label(
                Label::new(("<input>", related.span.0.clone()))
                    .with_message(&related.message)
                    .with_color(color),
            );
        }

        if let Some(help) = &diag.help {
            report = report.with_help(help);
        }

        report
            .finish()
            .write(("<input>", Source::from(source)), &mut *writer)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Engine, EngineOptions};

    fn engine() -> Engine {
        Engine::new(EngineOptions::default(), |_| {})
    }

    #[test]
    fn test_render_parse_error() {
        let source = "let x = + 2";
        let Err(e) = engine().compile(source) else {
            panic!("expected a parse error");
        };
        let output = render_error_to_string_no_color(&e);
        assert!(output.contains("Error"));
        assert!(output.contains("E002"));
        assert!(output.contains("let x = + 2"));
    }

    #[test]
    fn test_render_type_error() {
        let Err(e) = engine().compile("return 1 + 2.0") else {
            panic!("expected a type error");
        };
        let output = render_error_to_string_no_color(&e);
        assert!(output.contains("Type mismatch"));
    }

    #[test]
    fn test_render_runtime_error_is_one_line() {
        let program = engine().compile("let z = 0\nreturn 1 / z").unwrap();
        let e = program.run().unwrap_err();
        let output = render_error_to_string_no_color(&e);
        assert_eq!(output.lines().count(), 1);
        assert!(output.starts_with("Runtime error:"));
    }

    #[test]
    fn test_render_warning_with_related_label() {
        let source = "let a = 1\nlet a = 2";
        let program = engine().compile(source).unwrap();
        let mut buf = Vec::new();
        render_warnings_to(source, program.warnings(), &mut buf, false).unwrap();
        let output = String::from_utf8(buf).unwrap();
        assert!(output.contains("Warning"));
        assert!(output.contains("previously declared here"));
    }
}
