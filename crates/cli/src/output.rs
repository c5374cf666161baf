//! Operator-facing output. Progress lines hang off a `│ ` gutter; colors only on a terminal.

use std::io::stdout;

use crossterm::style::{Color, StyledContent, Stylize};
use crossterm::tty::IsTty;

use fluxr_core::{EventNotice, Reporter, ResourceKind, Severity};

const GUTTER: &str = "│ ";
const SUBLOG: Color = Color::AnsiValue(244);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Terminal {
    color: bool,
}

impl Terminal {
    pub fn new(color: bool) -> Self {
        Self { color }
    }

    /// Colors unless `--no-color`, a non-empty `NO_COLOR`, or stdout is not a tty.
    pub fn detect(no_color: bool) -> Self {
        let env_off = std::env::var("NO_COLOR").map(|v| !v.is_empty()).unwrap_or(false);
        Self::new(!no_color && !env_off && stdout().is_tty())
    }

    fn paint<'a>(&self, s: &'a str, color: Color) -> StyledContent<&'a str> {
        if self.color {
            s.with(color)
        } else {
            s.stylize()
        }
    }

    fn sublog(&self, body: &str) -> String {
        format!("{}", self.paint(&format!("{}{}", GUTTER, body), SUBLOG))
    }

    fn alert(&self, body: &str, color: Color) -> String {
        format!("{}{}", self.paint(GUTTER, SUBLOG), self.paint(body, color))
    }

    pub fn render_command(&self, command_line: &str) -> String {
        self.sublog(command_line)
    }

    pub fn render_waiting(&self, kind: ResourceKind) -> String {
        let body = format!("⏳ Waiting for {} reconciliation...", kind);
        if self.color {
            self.sublog(&body)
        } else {
            body
        }
    }

    pub fn render_success(&self, kind: ResourceKind) -> String {
        let body = format!("✅ {} reconciliation completed successfully", kind);
        if self.color {
            self.sublog(&body)
        } else {
            body
        }
    }

    pub fn render_error(&self, message: &str) -> String {
        let body = format!("❌ {}", message);
        if self.color {
            self.alert(&body, Color::Red)
        } else {
            body
        }
    }

    pub fn render_event(&self, notice: &EventNotice) -> String {
        match notice.severity {
            Severity::Warning => self.alert(&format!("⚠️  [{}] {}", notice.reason, notice.message), Color::Yellow),
            Severity::Info => self.sublog(&format!("ℹ️  [{}] {}", notice.reason, notice.message)),
        }
    }

    pub fn render_warning(&self, message: &str) -> String {
        self.alert(&format!("⚠️  {}", message), Color::Yellow)
    }

    pub fn command(&self, command_line: &str) {
        println!("{}", self.render_command(command_line));
    }

    pub fn waiting(&self, kind: ResourceKind) {
        println!("{}", self.render_waiting(kind));
    }

    pub fn success(&self, kind: ResourceKind) {
        println!("{}", self.render_success(kind));
    }

    pub fn error(&self, message: &str) {
        println!("{}", self.render_error(message));
    }
}

impl Reporter for Terminal {
    fn status(&self, message: &str) {
        println!("{}", self.sublog(message));
    }

    fn event(&self, notice: &EventNotice) {
        println!("{}", self.render_event(notice));
    }

    fn warning(&self, message: &str) {
        println!("{}", self.render_warning(message));
    }

    fn stdout_line(&self, line: &str) {
        println!("{}", line);
    }

    fn stderr_line(&self, line: &str) {
        eprintln!("{}", line);
    }
}
