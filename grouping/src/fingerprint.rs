use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::event::{Frame, NormalizedEvent, SingleException, StacktraceData, TemplateData};
use crate::rules::{ruleset_for, NormalizationRuleset, UNHASHABLE_FUNCTION, UNHASHABLE_MODULE};

pub const NATIVE_CODE_FILENAME: &str = "[native code]";
pub const MAX_CONTEXT_LINE_CHARS: usize = 120;

/// Which part of the event decided its grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupingReason {
    Checksum,
    Fingerprint,
    Exception,
    Stacktrace,
    Template,
    Message,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grouping {
    pub hashes: Vec<String>,
    pub reason: GroupingReason,
}

/// One candidate set of hashable tokens; becomes one grouping hash.
pub type BasisSlot = Vec<String>;

// Anything that can contribute tokens to a basis slot should implement this
pub trait BasisComponent {
    fn tokens(&self, rules: &dyn NormalizationRuleset) -> Vec<String>;
}

pub struct FingerprintBuilder {
    hasher: md5::Context,
}

impl Default for FingerprintBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FingerprintBuilder {
    pub fn new() -> Self {
        Self {
            hasher: md5::Context::new(),
        }
    }

    pub fn update(&mut self, data: impl AsRef<[u8]>) {
        self.hasher.consume(data);
    }

    pub fn finalize(self) -> String {
        format!("{:x}", self.hasher.compute())
    }
}

fn hash_slot<'a>(tokens: impl IntoIterator<Item = &'a String>) -> String {
    let mut builder = FingerprintBuilder::new();
    for token in tokens {
        builder.update(token);
    }
    builder.finalize()
}

/// Matches `{{default}}` with any amount of whitespace inside the braces.
pub fn is_default_sentinel(bit: &str) -> bool {
    bit.trim()
        .strip_prefix("{{")
        .and_then(|rest| rest.strip_suffix("}}"))
        .is_some_and(|inner| inner.trim() == "default")
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

impl Frame {
    fn usable_context_line(&self) -> Option<&str> {
        let line = non_empty(&self.context_line)?;
        if line.chars().count() > MAX_CONTEXT_LINE_CHARS {
            return None;
        }
        // Minified or inline sources have no trustworthy context without a function name
        if self.is_url() && !self.has_function() {
            return None;
        }
        Some(line)
    }
}

impl BasisComponent for Frame {
    fn tokens(&self, rules: &dyn NormalizationRuleset) -> Vec<String> {
        let mut out = Vec::new();

        if let Some(module) = non_empty(&self.module) {
            if rules.is_unhashable_module(self, module) {
                out.push(UNHASHABLE_MODULE.to_string());
            } else {
                out.push(rules.normalize_module(module));
            }
        } else if let Some(filename) = non_empty(&self.filename) {
            if !self.is_url() && !self.is_caused_by() {
                out.push(rules.normalize_filename(filename));
            }
        }

        if let Some(line) = self.usable_context_line() {
            out.push(line.to_string());
            return out;
        }

        if out.is_empty() {
            return out;
        }

        if let Some(symbol) = non_empty(&self.symbol) {
            out.push(symbol.to_string());
        } else if let Some(function) = non_empty(&self.function) {
            if rules.is_unhashable_function(function) {
                out.push(UNHASHABLE_FUNCTION.to_string());
            } else {
                out.push(rules.normalize_function(function));
            }
        } else if let (Some(lineno), Some(colno)) = (self.lineno, self.colno) {
            out.push(lineno.to_string());
            out.push(colno.to_string());
        }

        out
    }
}

impl StacktraceData {
    // A lone anonymous frame pointing at a script URL says nothing about the error
    fn is_useless_single_frame(&self) -> bool {
        match self.frames.as_slice() {
            [frame] => !frame.has_function() && frame.is_url(),
            _ => false,
        }
    }
}

impl BasisComponent for StacktraceData {
    fn tokens(&self, rules: &dyn NormalizationRuleset) -> Vec<String> {
        if self.is_useless_single_frame() {
            return Vec::new();
        }
        self.frames
            .iter()
            .filter(|frame| frame.filename.as_deref() != Some(NATIVE_CODE_FILENAME))
            .flat_map(|frame| frame.tokens(rules))
            .collect()
    }
}

impl BasisComponent for SingleException {
    fn tokens(&self, rules: &dyn NormalizationRuleset) -> Vec<String> {
        let Some(stacktrace) = &self.stacktrace else {
            return Vec::new();
        };
        let mut out = stacktrace.tokens(rules);
        if out.is_empty() {
            return out;
        }
        if let Some(exception_type) = non_empty(&self.exception_type) {
            out.push(exception_type.to_string());
        }
        out
    }
}

impl SingleException {
    fn type_and_value(&self) -> Vec<String> {
        [non_empty(&self.exception_type), non_empty(&self.value)]
            .into_iter()
            .flatten()
            .map(str::to_string)
            .collect()
    }
}

impl BasisComponent for TemplateData {
    fn tokens(&self, _rules: &dyn NormalizationRuleset) -> Vec<String> {
        [non_empty(&self.filename), non_empty(&self.context_line)]
            .into_iter()
            .flatten()
            .map(str::to_string)
            .collect()
    }
}

/// The slots an event would be grouped by with no override, and where they came from.
pub fn default_basis(event: &NormalizedEvent) -> (GroupingReason, Vec<BasisSlot>) {
    let rules = ruleset_for(&event.platform);

    if let Some(exception) = &event.exception {
        let slots: Vec<BasisSlot> = exception
            .values
            .iter()
            .map(|exc| exc.tokens(rules))
            .filter(|slot| !slot.is_empty())
            .collect();
        if !slots.is_empty() {
            return (GroupingReason::Exception, slots);
        }

        let slots: Vec<BasisSlot> = exception
            .values
            .iter()
            .map(SingleException::type_and_value)
            .filter(|slot| !slot.is_empty())
            .collect();
        if !slots.is_empty() {
            return (GroupingReason::Exception, slots);
        }
    }

    if let Some(stacktrace) = &event.stacktrace {
        let slot = stacktrace.tokens(rules);
        if !slot.is_empty() {
            return (GroupingReason::Stacktrace, vec![slot]);
        }
    }

    if let Some(template) = &event.template {
        let slot = template.tokens(rules);
        if !slot.is_empty() {
            return (GroupingReason::Template, vec![slot]);
        }
    }

    (
        GroupingReason::Message,
        vec![vec![event.message.clone().unwrap_or_default()]],
    )
}

pub fn compute_grouping(event: &NormalizedEvent) -> Grouping {
    if let Some(checksum) = &event.checksum {
        return Grouping {
            hashes: vec![checksum.clone()],
            reason: GroupingReason::Checksum,
        };
    }

    let (reason, slots) = default_basis(event);

    let Some(fingerprint) = &event.fingerprint else {
        debug!(?reason, slots = slots.len(), "grouping by default basis");
        return Grouping {
            hashes: slots.iter().map(|slot| hash_slot(slot)).collect(),
            reason,
        };
    };

    let hashes = if fingerprint.iter().any(|bit| is_default_sentinel(bit)) {
        slots
            .iter()
            .map(|slot| {
                hash_slot(fingerprint.iter().flat_map(|bit| {
                    if is_default_sentinel(bit) {
                        slot.iter().collect::<Vec<_>>()
                    } else {
                        vec![bit]
                    }
                }))
            })
            .collect()
    } else {
        vec![hash_slot(fingerprint)]
    };

    debug!(hashes = hashes.len(), "grouping by fingerprint override");
    Grouping {
        hashes,
        reason: GroupingReason::Fingerprint,
    }
}

pub fn compute_fingerprint(event: &NormalizedEvent) -> Vec<String> {
    compute_grouping(event).hashes
}
