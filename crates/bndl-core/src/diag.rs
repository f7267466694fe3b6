//! Build diagnostics collection.
//!
//! Every validation and binding call takes an explicit [`Diagnostics`]
//! collector instead of writing to a process-wide sink. Collection
//! never short-circuits: a single build reports every failure found,
//! and the process exit code is the numeric class of the most severe
//! error recorded. The numeric codes are stable across versions so
//! scripts can match on them.

/// Stable numeric error classes.
///
/// Grouped by origin: single-digit and low codes are attribute-level
/// validation classes, the 400 range covers chain-structure classes.
pub mod codes {
    /// An attribute is not legal on this element at all.
    pub const UNEXPECTED_ATTRIBUTE: u32 = 4;
    /// An attribute value does not parse as its expected form.
    pub const ILLEGAL_ATTRIBUTE_VALUE: u32 = 8;
    /// An attribute requires a companion attribute that is absent.
    pub const EXPECTED_ATTRIBUTE_WITH_OTHER: u32 = 10;
    /// An attribute cannot be specified while another is present.
    pub const ILLEGAL_ATTRIBUTE_WITH_OTHER: u32 = 35;
    /// A one-of-required attribute set is entirely absent.
    pub const EXPECTED_ATTRIBUTES: u32 = 44;
    /// Two declarations share one identity.
    pub const DUPLICATE_SYMBOL: u32 = 92;
    /// A declared source file could not be located or read.
    pub const FILE_NOT_FOUND: u32 = 103;
    /// A package has no payload after aggregation (chain-level).
    pub const MISSING_PACKAGE_PAYLOAD: u32 = 406;
    /// A typed payload descriptor decorates the wrong package kind.
    pub const WRONG_PACKAGE_PAYLOAD_TYPE: u32 = 407;
    /// A hash-verified payload lacks its required download URL.
    pub const EXPECTED_DOWNLOAD_URL: u32 = 408;
    /// Two rollback boundaries share a name.
    pub const DUPLICATE_BOUNDARY: u32 = 409;
    /// Package-group references form a cycle.
    pub const GROUP_CYCLE: u32 = 410;
    /// A chain or group references an undeclared id.
    pub const UNKNOWN_REFERENCE: u32 = 411;
}

/// Severity of a collected message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Non-fatal; the build continues and may still produce an artifact.
    Warning,
    /// Fatal to the build; no artifact is written.
    Error,
}

/// One collected diagnostic, with optional related-location follow-ups.
#[derive(Debug, Clone)]
pub struct Message {
    /// Severity of the message.
    pub severity: Severity,
    /// Stable numeric class (one of [`codes`]).
    pub code: u32,
    /// Human-readable text naming the offending element/attribute.
    pub text: String,
    /// Secondary context lines pointing at related locations.
    pub related: Vec<String>,
}

/// An append-only collector of build diagnostics.
#[derive(Debug, Default)]
pub struct Diagnostics {
    messages: Vec<Message>,
}

impl Diagnostics {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a fatal error with its stable numeric class.
    pub fn error(&mut self, code: u32, text: impl Into<String>) {
        self.messages.push(Message {
            severity: Severity::Error,
            code,
            text: text.into(),
            related: Vec::new(),
        });
    }

    /// Record a non-fatal warning.
    pub fn warning(&mut self, code: u32, text: impl Into<String>) {
        self.messages.push(Message {
            severity: Severity::Warning,
            code,
            text: text.into(),
            related: Vec::new(),
        });
    }

    /// Attach a related-location line to the most recent message.
    ///
    /// No-op when nothing has been recorded yet.
    pub fn related(&mut self, text: impl Into<String>) {
        if let Some(last) = self.messages.last_mut() {
            last.related.push(text.into());
        }
    }

    /// Whether any error-severity message was recorded.
    pub fn has_errors(&self) -> bool {
        self.messages
            .iter()
            .any(|m| m.severity == Severity::Error)
    }

    /// The numeric class of the most severe error, 0 when none.
    ///
    /// "Most severe" is realized as the numeric maximum, which keeps
    /// the exit code stable regardless of report order.
    pub fn max_error_code(&self) -> u32 {
        self.messages
            .iter()
            .filter(|m| m.severity == Severity::Error)
            .map(|m| m.code)
            .max()
            .unwrap_or(0)
    }

    /// All collected messages, in report order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Flatten messages and their related lines, in report order.
    pub fn lines(&self) -> Vec<String> {
        let mut out = Vec::new();
        for message in &self.messages {
            out.push(message.text.clone());
            out.extend(message.related.iter().cloned());
        }
        out
    }
}
