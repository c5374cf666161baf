//! Test helpers shared across fluxr crates.

use std::sync::Mutex;

use crate::{EventNotice, Reporter};

/// A line captured by [`RecordingReporter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Status(String),
    Event(EventNotice),
    Warning(String),
    Stdout(String),
    Stderr(String),
}

/// Reporter that keeps everything in memory.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    lines: Mutex<Vec<Line>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<Line> {
        self.lines.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter_map(|l| match l {
                Line::Status(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    pub fn events(&self) -> Vec<EventNotice> {
        self.lines()
            .into_iter()
            .filter_map(|l| match l {
                Line::Event(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter_map(|l| match l {
                Line::Warning(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    fn push(&self, line: Line) {
        self.lines.lock().unwrap().push(line);
    }
}

impl Reporter for RecordingReporter {
    fn status(&self, message: &str) {
        self.push(Line::Status(message.to_string()));
    }

    fn event(&self, notice: &EventNotice) {
        self.push(Line::Event(notice.clone()));
    }

    fn warning(&self, message: &str) {
        self.push(Line::Warning(message.to_string()));
    }

    fn stdout_line(&self, line: &str) {
        self.push(Line::Stdout(line.to_string()));
    }

    fn stderr_line(&self, line: &str) {
        self.push(Line::Stderr(line.to_string()));
    }
}
