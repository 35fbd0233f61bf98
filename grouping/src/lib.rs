//! Grouping hash computation for normalized error events.
//!
//! An event is reduced to one or more "basis slots" (ordered token lists taken
//! from its exceptions, stacktrace, template or message), optionally rearranged
//! by a client-supplied fingerprint override, and each slot is MD5-hashed. The
//! resulting ordered list of digests decides which issue(s) the event joins.

pub mod event;
pub mod fingerprint;
pub mod rules;

pub use event::{
    ExceptionData, Frame, NormalizedEvent, SingleException, StacktraceData, TemplateData,
};
pub use fingerprint::{compute_fingerprint, compute_grouping, Grouping, GroupingReason};
pub use rules::{ruleset_for, NormalizationRuleset};
