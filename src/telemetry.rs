//! Structured reporting of simulation violations.
//!
//! Desyncs and buffer problems are reported as structured [`SimViolation`]
//! values instead of bare log lines. They are logged through tracing by
//! default ([`TracingObserver`]) or handed to any [`ViolationObserver`] the
//! host installs. Tests use [`CollectingObserver`].
//!
//! # Example
//!
//! ```
//! use netsim_model::telemetry::{CollectingObserver, ViolationKind};
//! use std::sync::Arc;
//!
//! let observer = Arc::new(CollectingObserver::new());
//! // ... drive a simulation built with `.with_violation_observer(observer.clone())` ...
//! assert!(!observer.has_violation(ViolationKind::BufferIntegrity));
//! ```

use crate::Keyframe;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Serializes `Option<Keyframe>` as an integer, or `null` for `None`/[`Keyframe::NULL`].
mod keyframe_serializer {
    use crate::Keyframe;
    use serde::Serializer;

    #[allow(clippy::ref_option)]
    pub fn serialize<S>(keyframe: &Option<Keyframe>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match keyframe {
            Some(k) if !k.is_null() => serializer.serialize_i32(k.as_i32()),
            _ => serializer.serialize_none(),
        }
    }
}

/// Severity of a violation, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationSeverity {
    /// Unexpected but recoverable; the simulation repaired itself.
    ///
    /// Example: a sync/input discontinuity that was rebased.
    Warning,
    /// The simulation kept running but may have degraded behavior.
    Error,
    /// Buffers are corrupted or a caller contract was broken. The host should
    /// stop driving the affected simulation.
    Critical,
}

impl ViolationSeverity {
    /// Returns a string representation suitable for logging/metrics labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Categories of violations, one per subsystem.
///
/// Marked `#[non_exhaustive]`; always include a wildcard arm when matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ViolationKind {
    /// The sync head did not match the last processed input keyframe.
    Continuity,
    /// A buffer entry that must exist was missing.
    BufferIntegrity,
    /// Replication data was malformed, out of order or for an unavailable target.
    Replication,
    /// A locally predicted state diverged from the authoritative one.
    Reconciliation,
    /// A dependent rollback was requested in an inconsistent state.
    Rollback,
    /// Parent/dependent links were misused.
    DependencyGraph,
    /// A configuration value was rejected.
    Configuration,
    /// A type's runtime invariant check failed (debug builds or `paranoid`).
    Invariant,
}

impl ViolationKind {
    /// Returns a string representation suitable for logging/metrics labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Continuity => "continuity",
            Self::BufferIntegrity => "buffer_integrity",
            Self::Replication => "replication",
            Self::Reconciliation => "reconciliation",
            Self::Rollback => "rollback",
            Self::DependencyGraph => "dependency_graph",
            Self::Configuration => "configuration",
            Self::Invariant => "invariant",
        }
    }
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded violation with its diagnostic context.
///
/// Context usually carries the simulation debug name and the expected and
/// actual keyframes, which is what it takes to diagnose a desync.
///
/// # Example
///
/// ```
/// use netsim_model::telemetry::{SimViolation, ViolationKind, ViolationSeverity};
/// use netsim_model::Keyframe;
///
/// let violation = SimViolation::new(
///     ViolationSeverity::Warning,
///     ViolationKind::Continuity,
///     "sync head does not match last processed input",
///     "simulation/mod.rs:1",
/// )
/// .with_keyframe(Keyframe::new(12))
/// .with_context("expected", "12")
/// .with_context("actual", "9");
///
/// assert_eq!(violation.keyframe, Some(Keyframe::new(12)));
/// assert!(violation.to_string().contains("continuity"));
/// ```
#[derive(Debug, Clone, serde::Serialize)]
pub struct SimViolation {
    /// The severity level of this violation.
    pub severity: ViolationSeverity,
    /// The subsystem where the violation occurred.
    pub kind: ViolationKind,
    /// Human-readable description of what went wrong.
    pub message: String,
    /// Source location where the violation was detected (file:line).
    pub location: &'static str,
    /// The keyframe at which the violation occurred, if applicable.
    #[serde(serialize_with = "keyframe_serializer::serialize")]
    pub keyframe: Option<Keyframe>,
    /// Additional structured context.
    pub context: BTreeMap<String, String>,
}

impl SimViolation {
    /// Creates a new violation.
    #[must_use]
    pub fn new(
        severity: ViolationSeverity,
        kind: ViolationKind,
        message: impl Into<String>,
        location: &'static str,
    ) -> Self {
        Self {
            severity,
            kind,
            message: message.into(),
            location,
            keyframe: None,
            context: BTreeMap::new(),
        }
    }

    /// Sets the keyframe at which this violation occurred.
    #[must_use]
    pub fn with_keyframe(mut self, keyframe: Keyframe) -> Self {
        self.keyframe = Some(keyframe);
        self
    }

    /// Adds a context key-value pair.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Serializes this violation to a JSON string.
    ///
    /// ```
    /// use netsim_model::telemetry::{SimViolation, ViolationKind, ViolationSeverity};
    /// use netsim_model::Keyframe;
    ///
    /// let violation = SimViolation::new(
    ///     ViolationSeverity::Critical,
    ///     ViolationKind::BufferIntegrity,
    ///     "missing sync entry",
    ///     "test.rs:1",
    /// )
    /// .with_keyframe(Keyframe::new(42));
    ///
    /// let json = violation.to_json().unwrap();
    /// assert!(json.contains(r#""keyframe":42"#));
    /// assert!(json.contains(r#""kind":"buffer_integrity""#));
    /// ```
    #[cfg(feature = "json")]
    #[must_use]
    pub fn to_json(&self) -> Option<String> {
        serde_json::to_string(self).ok()
    }
}

impl std::fmt::Display for SimViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}/{}] {} (at {}",
            self.severity, self.kind, self.message, self.location
        )?;
        if let Some(keyframe) = self.keyframe {
            write!(f, ", keyframe={keyframe}")?;
        }
        if !self.context.is_empty() {
            write!(f, ", context={:?}", self.context)?;
        }
        write!(f, ")")
    }
}

/// Receives violations reported by simulations.
///
/// With the `sync-send` feature enabled, observers must be `Send + Sync`.
///
/// ```
/// use netsim_model::telemetry::{SimViolation, ViolationObserver};
///
/// struct DesyncCounter;
///
/// impl ViolationObserver for DesyncCounter {
///     fn on_violation(&self, violation: &SimViolation) {
///         println!("desync: {}", violation);
///     }
/// }
/// ```
#[cfg(feature = "sync-send")]
pub trait ViolationObserver: Send + Sync {
    /// Called when a violation is detected. Runs on the tick path; keep it quick.
    fn on_violation(&self, violation: &SimViolation);
}

#[cfg(not(feature = "sync-send"))]
/// Receives violations reported by simulations.
pub trait ViolationObserver {
    /// Called when a violation is detected. Runs on the tick path; keep it quick.
    fn on_violation(&self, violation: &SimViolation);
}

/// Default observer: logs violations through `tracing`.
///
/// Warnings go to `warn!`, everything else to `error!`. The simulation's debug
/// name (the `debug_name` context entry) is lifted into its own `simulation`
/// field so log filters can select a single actor.
#[derive(Debug, Default, Clone)]
pub struct TracingObserver;

impl TracingObserver {
    /// Creates a new tracing observer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl ViolationObserver for TracingObserver {
    fn on_violation(&self, violation: &SimViolation) {
        let simulation = violation
            .context
            .get("debug_name")
            .map_or("-", String::as_str);
        let keyframe = violation
            .keyframe
            .filter(|k| !k.is_null())
            .map_or(-1, Keyframe::as_i32);
        let mut context = String::new();
        for (key, value) in violation.context.iter().filter(|(k, _)| k.as_str() != "debug_name") {
            if !context.is_empty() {
                context.push(' ');
            }
            context.push_str(key);
            context.push('=');
            context.push_str(value);
        }

        if violation.severity == ViolationSeverity::Warning {
            tracing::warn!(
                kind = violation.kind.as_str(),
                simulation,
                keyframe,
                context = %context,
                location = violation.location,
                "{}",
                violation.message
            );
        } else {
            tracing::error!(
                severity = violation.severity.as_str(),
                kind = violation.kind.as_str(),
                simulation,
                keyframe,
                context = %context,
                location = violation.location,
                "{}",
                violation.message
            );
        }
    }
}

/// Observer that stores every violation, for tests.
///
/// ```
/// use netsim_model::telemetry::{
///     CollectingObserver, SimViolation, ViolationKind, ViolationObserver, ViolationSeverity,
/// };
///
/// let observer = CollectingObserver::new();
/// observer.on_violation(&SimViolation::new(
///     ViolationSeverity::Warning,
///     ViolationKind::Continuity,
///     "rebased",
///     "test.rs:1",
/// ));
/// assert_eq!(observer.len(), 1);
/// assert!(observer.has_violation(ViolationKind::Continuity));
/// ```
#[derive(Debug, Default)]
pub struct CollectingObserver {
    violations: Mutex<Vec<SimViolation>>,
}

impl CollectingObserver {
    /// Creates an observer with an empty violation list.
    #[must_use]
    pub fn new() -> Self {
        Self {
            violations: Mutex::new(Vec::new()),
        }
    }

    /// Returns a copy of all collected violations.
    #[must_use]
    pub fn violations(&self) -> Vec<SimViolation> {
        self.violations.lock().clone()
    }

    /// Returns the number of collected violations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.violations.lock().len()
    }

    /// Returns true if no violations have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.violations.lock().is_empty()
    }

    /// Checks if any violation of `kind` has been collected.
    #[must_use]
    pub fn has_violation(&self, kind: ViolationKind) -> bool {
        self.violations.lock().iter().any(|v| v.kind == kind)
    }

    /// Checks if any violation with exactly `severity` has been collected.
    #[must_use]
    pub fn has_severity(&self, severity: ViolationSeverity) -> bool {
        self.violations
            .lock()
            .iter()
            .any(|v| v.severity == severity)
    }

    /// Returns all violations of `kind`.
    #[must_use]
    pub fn violations_of_kind(&self, kind: ViolationKind) -> Vec<SimViolation> {
        self.violations
            .lock()
            .iter()
            .filter(|v| v.kind == kind)
            .cloned()
            .collect()
    }

    /// Clears all collected violations.
    pub fn clear(&self) {
        self.violations.lock().clear();
    }
}

impl ViolationObserver for CollectingObserver {
    fn on_violation(&self, violation: &SimViolation) {
        self.violations.lock().push(violation.clone());
    }
}

/// Reports `violation` to `observer`, or to [`TracingObserver`] when there is none.
pub fn report_to_observer<O: ViolationObserver + ?Sized>(
    observer: Option<&Arc<O>>,
    violation: &SimViolation,
) {
    match observer {
        Some(obs) => obs.on_violation(violation),
        None => TracingObserver.on_violation(violation),
    }
}

/// Builds a violation at the call site and reports it to an optional observer.
///
/// The observer expression must be an `Option<Arc<_>>` (it is accessed with
/// `.as_ref()`).
///
/// ```
/// use netsim_model::{report_violation_to, telemetry::{CollectingObserver, ViolationKind, ViolationObserver, ViolationSeverity}};
/// use std::sync::Arc;
///
/// let observer: Option<Arc<dyn ViolationObserver>> = Some(Arc::new(CollectingObserver::new()));
/// report_violation_to!(&observer, ViolationSeverity::Warning, ViolationKind::Continuity,
///     "expected={}, actual={}", 10, 7);
/// ```
#[macro_export]
macro_rules! report_violation_to {
    ($observer:expr, $violation:expr) => {{
        $crate::telemetry::report_to_observer($observer.as_ref(), &$violation);
    }};

    ($observer:expr, $severity:expr, $kind:expr, $msg:literal) => {{
        let violation = $crate::telemetry::SimViolation::new(
            $severity,
            $kind,
            $msg,
            concat!(file!(), ":", line!()),
        );
        $crate::telemetry::report_to_observer($observer.as_ref(), &violation);
    }};

    ($observer:expr, $severity:expr, $kind:expr, $fmt:literal, $($arg:tt)+) => {{
        let violation = $crate::telemetry::SimViolation::new(
            $severity,
            $kind,
            format!($fmt, $($arg)+),
            concat!(file!(), ":", line!()),
        );
        $crate::telemetry::report_to_observer($observer.as_ref(), &violation);
    }};
}

// ==========================================
// Runtime Invariant Checking
// ==========================================

/// A broken type invariant.
#[derive(Debug, Clone, serde::Serialize)]
pub struct InvariantViolation {
    /// Name of the type whose invariant was violated.
    pub type_name: &'static str,
    /// Description of the violated invariant.
    pub invariant: String,
    /// Additional diagnostic context.
    pub details: Option<String>,
}

impl InvariantViolation {
    /// Creates a new invariant violation.
    #[must_use]
    pub fn new(type_name: &'static str, invariant: impl Into<String>) -> Self {
        Self {
            type_name,
            invariant: invariant.into(),
            details: None,
        }
    }

    /// Adds additional details to the violation.
    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl std::fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.type_name, self.invariant)?;
        if let Some(details) = &self.details {
            write!(f, " ({})", details)?;
        }
        Ok(())
    }
}

/// Types that can verify their own internal invariants.
///
/// Checked at runtime by [`debug_check_invariants!`](crate::debug_check_invariants)
/// in debug builds or with the `paranoid` feature.
pub trait InvariantChecker {
    /// Returns the first broken invariant, if any.
    fn check_invariants(&self) -> Result<(), InvariantViolation>;
}

/// Checks `$expr`'s invariants in debug builds (or with `paranoid`).
///
/// A failure is logged through [`TracingObserver`] as a critical
/// [`ViolationKind::Invariant`], tagged with `$owner` (usually the simulation's
/// debug name).
#[macro_export]
#[cfg(any(debug_assertions, feature = "paranoid"))]
macro_rules! debug_check_invariants {
    ($expr:expr, $owner:expr) => {{
        use $crate::telemetry::{InvariantChecker as _, ViolationObserver as _};
        if let Err(broken) = $expr.check_invariants() {
            let violation = $crate::telemetry::SimViolation::new(
                $crate::telemetry::ViolationSeverity::Critical,
                $crate::telemetry::ViolationKind::Invariant,
                broken.to_string(),
                concat!(file!(), ":", line!()),
            )
            .with_context("debug_name", $owner.to_string());
            $crate::telemetry::TracingObserver.on_violation(&violation);
        }
    }};
}

/// No-op in release builds without `paranoid`.
#[macro_export]
#[cfg(not(any(debug_assertions, feature = "paranoid")))]
macro_rules! debug_check_invariants {
    ($expr:expr, $owner:expr) => {{}};
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    fn warning(kind: ViolationKind) -> SimViolation {
        SimViolation::new(ViolationSeverity::Warning, kind, "test", "test.rs:1")
    }

    #[test]
    fn severity_ordering() {
        assert!(ViolationSeverity::Warning < ViolationSeverity::Error);
        assert!(ViolationSeverity::Error < ViolationSeverity::Critical);
    }

    #[test]
    fn kind_labels() {
        assert_eq!(ViolationKind::Continuity.as_str(), "continuity");
        assert_eq!(ViolationKind::BufferIntegrity.as_str(), "buffer_integrity");
        assert_eq!(ViolationKind::DependencyGraph.to_string(), "dependency_graph");
    }

    #[test]
    fn display_includes_keyframe_and_context() {
        let violation = warning(ViolationKind::Continuity)
            .with_keyframe(Keyframe::new(7))
            .with_context("debug_name", "pawn");
        let text = violation.to_string();
        assert!(text.starts_with("[warning/continuity] test"));
        assert!(text.contains("keyframe=7"));
        assert!(text.contains("pawn"));
    }

    #[test]
    fn collecting_observer_filters() {
        let observer = CollectingObserver::new();
        observer.on_violation(&warning(ViolationKind::Continuity));
        observer.on_violation(&SimViolation::new(
            ViolationSeverity::Critical,
            ViolationKind::BufferIntegrity,
            "missing",
            "test.rs:2",
        ));
        assert_eq!(observer.len(), 2);
        assert_eq!(observer.violations_of_kind(ViolationKind::Continuity).len(), 1);
        assert!(observer.has_severity(ViolationSeverity::Critical));
        observer.clear();
        assert!(observer.is_empty());
    }

    #[test]
    fn report_violation_to_uses_observer() {
        let collector = Arc::new(CollectingObserver::new());
        let observer: Option<Arc<dyn ViolationObserver>> = Some(collector.clone());
        report_violation_to!(
            &observer,
            ViolationSeverity::Error,
            ViolationKind::Rollback,
            "step {} outside rollback",
            2
        );
        let collected = collector.violations();
        assert_eq!(collected.len(), 1);
        assert_eq!(collected[0].message, "step 2 outside rollback");
        assert!(collector.has_violation(ViolationKind::Rollback));
    }

    #[test]
    fn report_violation_to_none_falls_back_to_tracing() {
        let observer: Option<Arc<dyn ViolationObserver>> = None;
        report_violation_to!(
            &observer,
            ViolationSeverity::Warning,
            ViolationKind::Continuity,
            "no observer"
        );
    }

    #[test]
    fn prebuilt_violation_can_be_reported() {
        let collector = Arc::new(CollectingObserver::new());
        let observer: Option<Arc<dyn ViolationObserver>> = Some(collector.clone());
        report_violation_to!(&observer, warning(ViolationKind::Configuration));
        assert!(collector.has_violation(ViolationKind::Configuration));
    }

    #[test]
    fn invariant_violation_display() {
        let violation = InvariantViolation::new("TickState", "negative budget")
            .with_details("remaining=-1ms");
        assert_eq!(
            violation.to_string(),
            "TickState: negative budget (remaining=-1ms)"
        );
    }

    #[cfg(feature = "json")]
    #[test]
    fn null_keyframe_serializes_as_null() {
        let violation = warning(ViolationKind::Continuity).with_keyframe(Keyframe::NULL);
        let json = violation.to_json().unwrap();
        assert!(json.contains(r#""keyframe":null"#));
    }
}
