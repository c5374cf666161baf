//! fluxr core types: watch targets, resource coordinates, status snapshots and errors.

#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod conditions;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use conditions::{is_ready, summarize};

/// Flux resource kinds fluxr knows how to reconcile and watch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Kustomization,
    HelmRelease,
    GitSource,
    OciSource,
}

/// Sub-type selector for the `source` kind on the command line.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SourceType {
    Git,
    Oci,
}

impl SourceType {
    pub fn parse(s: &str) -> Result<Self, FluxrError> {
        match s.to_ascii_lowercase().as_str() {
            "git" => Ok(Self::Git),
            "oci" => Ok(Self::Oci),
            _ => Err(FluxrError::InvalidSourceType(s.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Git => "git",
            Self::Oci => "oci",
        }
    }
}

impl ResourceKind {
    /// Map a CLI kind (plus the `--source-type` for `source`) to a kind.
    ///
    /// `git`/`gitrepository` and `oci`/`ocirepository` are accepted directly.
    pub fn parse(kind: &str, source_type: &str) -> Result<Self, FluxrError> {
        match kind.to_ascii_lowercase().as_str() {
            "kustomization" => Ok(Self::Kustomization),
            "helmrelease" => Ok(Self::HelmRelease),
            "source" => Ok(match SourceType::parse(source_type)? {
                SourceType::Git => Self::GitSource,
                SourceType::Oci => Self::OciSource,
            }),
            "git" | "gitrepository" => Ok(Self::GitSource),
            "oci" | "ocirepository" => Ok(Self::OciSource),
            _ => Err(FluxrError::UnsupportedKind(kind.to_string())),
        }
    }

    /// Kind name as served by the Flux controllers.
    pub fn api_kind(&self) -> &'static str {
        match self {
            Self::Kustomization => "Kustomization",
            Self::HelmRelease => "HelmRelease",
            Self::GitSource => "GitRepository",
            Self::OciSource => "OCIRepository",
        }
    }

    /// Source sub-type, only for source kinds.
    pub fn source_type(&self) -> Option<SourceType> {
        match self {
            Self::GitSource => Some(SourceType::Git),
            Self::OciSource => Some(SourceType::Oci),
            _ => None,
        }
    }

    /// Lowercase label used in operator-facing messages.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Kustomization => "kustomization",
            Self::HelmRelease => "helmrelease",
            Self::GitSource | Self::OciSource => "source",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Identity of the object being reconciled. Never mutated after startup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WatchTarget {
    pub kind: ResourceKind,
    pub name: String,
    pub namespace: String,
}

impl WatchTarget {
    pub fn new(kind: ResourceKind, name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self { kind, name: name.into(), namespace: namespace.into() }
    }
}

impl fmt::Display for WatchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind.api_kind(), self.namespace, self.name)
    }
}

/// Resolved API address of a kind (group, version, plural), plus the served kind name.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
pub struct ResourceCoordinates {
    pub group: &'static str,
    pub version: &'static str,
    pub plural: &'static str,
    pub kind: &'static str,
}

impl ResourceCoordinates {
    pub const fn new(group: &'static str, version: &'static str, plural: &'static str, kind: &'static str) -> Self {
        Self { group, version, plural, kind }
    }

    pub fn api_version(&self) -> String {
        format!("{}/{}", self.group, self.version)
    }
}

impl fmt::Display for ResourceCoordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.group, self.version, self.plural)
    }
}

/// Coarse readiness verdict derived from a condition list.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StatusVerdict {
    Ready,
    NotReady,
    Unknown,
    Error,
}

/// Point-in-time read of a resource's conditions. Produced fresh by every probe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub verdict: StatusVerdict,
    pub summary: String,
}

impl StatusSnapshot {
    pub fn new(verdict: StatusVerdict, summary: impl Into<String>) -> Self {
        Self { verdict, summary: summary.into() }
    }
}

/// The subset of a core/v1 Event fluxr looks at.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventRecord {
    pub reason: String,
    pub event_type: String,
    pub message: String,
}

impl EventRecord {
    pub fn new(reason: impl Into<String>, event_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self { reason: reason.into(), event_type: event_type.into(), message: message.into() }
    }
}

/// Event type used by the API server for warnings.
pub const EVENT_TYPE_WARNING: &str = "Warning";

/// Reasons rendered as warnings even when reported as Normal events.
pub const ESCALATED_REASONS: &[&str] = &["HealthCheckFailed", "DependencyNotReady"];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
}

/// A formatted event ready for display.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventNotice {
    pub reason: String,
    pub message: String,
    pub severity: Severity,
}

impl From<&EventRecord> for EventNotice {
    fn from(ev: &EventRecord) -> Self {
        let warning = ev.event_type == EVENT_TYPE_WARNING || ESCALATED_REASONS.contains(&ev.reason.as_str());
        Self {
            reason: ev.reason.clone(),
            message: ev.message.clone(),
            severity: if warning { Severity::Warning } else { Severity::Info },
        }
    }
}

/// Why a run context was cancelled.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CancelCause {
    /// First operator interrupt.
    Interrupted,
    /// The overall timeout elapsed.
    DeadlineExceeded,
    /// Cancelled by the program itself (e.g. shutdown after completion).
    Stopped,
}

impl fmt::Display for CancelCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupted => f.write_str("interrupted by operator"),
            Self::DeadlineExceeded => f.write_str("context deadline exceeded"),
            Self::Stopped => f.write_str("context canceled"),
        }
    }
}

/// Error taxonomy shared by every fluxr crate.
#[derive(Debug, thiserror::Error)]
pub enum FluxrError {
    #[error("unsupported resource kind: {0}")]
    UnsupportedKind(String),
    #[error("invalid source-type '{0}'. Valid types: git, oci")]
    InvalidSourceType(String),
    #[error("flux reconcile exited with status {code}")]
    TriggerFailed { code: i32 },
    #[error("{0}")]
    ProbeTransient(String),
    #[error("timeout waiting for {0} reconciliation")]
    Timeout(ResourceKind),
    #[error("{0}")]
    Cancelled(CancelCause),
    #[error("cannot resolve resource: {0}")]
    Resolution(String),
}

impl FluxrError {
    /// Process exit status for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::TriggerFailed { code } => *code,
            _ => 1,
        }
    }
}

pub type FluxrResult<T> = Result<T, FluxrError>;

/// Output seam for everything the operator sees while a reconciliation runs.
pub trait Reporter: Send + Sync {
    /// A progress line from the wait engine.
    fn status(&self, message: &str);
    /// A lifecycle event notice.
    fn event(&self, notice: &EventNotice);
    /// A reformatted client warning.
    fn warning(&self, message: &str);
    /// A verbatim line from the trigger's stdout.
    fn stdout_line(&self, line: &str);
    /// A verbatim line from the trigger's stderr.
    fn stderr_line(&self, line: &str);
}

pub mod prelude {
    pub use super::{
        CancelCause, EventNotice, EventRecord, FluxrError, FluxrResult, Reporter, ResourceCoordinates, ResourceKind,
        Severity, SourceType, StatusSnapshot, StatusVerdict, WatchTarget,
    };
}
