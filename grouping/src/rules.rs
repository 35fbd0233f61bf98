//! Per-platform normalization of the identifiers that go into a grouping hash.
//!
//! Build tools, bytecode enhancers and bundlers inject generated names into
//! modules, filenames and functions. Left alone, every deploy would start a new
//! issue, so these rules strip or replace the generated parts before hashing.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::event::Frame;

pub const UNHASHABLE_MODULE: &str = "<module>";
pub const UNHASHABLE_FUNCTION: &str = "<function>";

static GENERATED_SUFFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([_\-$])([A-Za-z0-9]{8,})$").expect("invalid regex"));

static FILENAME_VERSION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?ix)(?:
            v?(?:\d+\.)*\d+|   # version numbers, v1, 1.0.0
            [a-f0-9]{7,8}|     # short sha
            [a-f0-9]{32}|      # md5
            [a-f0-9]{40}       # sha1
        )/",
    )
    .expect("invalid regex")
});

static RUBY_ANON_FUNC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"_\d{2,}").expect("invalid regex"));

// com.example.Service$$EnhancerBySpringCGLIB$$4f2e5b1a_2
static JAVA_CGLIB_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\$\$[\w_]+?CGLIB\$\$)[a-fA-F0-9]+(_[0-9]+)?").expect("invalid regex")
});

// com.example.EntriesResource_$$_javassist_seam_74
static JAVA_ASSIST_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\$\$_javassist)(?:_seam)?(?:_[0-9]+)?").expect("invalid regex")
});

// myapp.mymodule$fn__12345
static CLOJURE_FN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\$fn__)([0-9]+)").expect("invalid regex"));

const JAVA_REFLECTION_ACCESSORS: [&str; 2] = [
    "sun.reflect.GeneratedMethodAccessor",
    "jdk.internal.reflect.GeneratedMethodAccessor",
];

/// Strategy for cleaning up frame identifiers before they are hashed.
pub trait NormalizationRuleset: Send + Sync {
    /// Modules that carry no stable identity at all are hashed as `<module>`.
    fn is_unhashable_module(&self, _frame: &Frame, _module: &str) -> bool {
        false
    }

    fn normalize_module(&self, module: &str) -> String {
        strip_generated_suffix(module)
    }

    fn normalize_filename(&self, filename: &str) -> String {
        let filename = FILENAME_VERSION_RE.replace_all(filename, "<version>/");
        JAVA_ASSIST_RE.replace_all(&filename, "${1}<auto>").into_owned()
    }

    /// Functions that carry no stable identity at all are hashed as `<function>`.
    fn is_unhashable_function(&self, function: &str) -> bool {
        function.starts_with("lambda$") || function.starts_with("[Anonymous")
    }

    fn normalize_function(&self, function: &str) -> String {
        if function.starts_with("block ") {
            return "block".to_string();
        }
        RUBY_ANON_FUNC_RE
            .replace_all(function, "_<anon>")
            .into_owned()
    }
}

/// Replace a trailing generated identifier with `<auto>`: a run of eight or
/// more alphanumerics after `_`, `-` or `$` holding letters and at least two
/// digits. Shorter tails such as `sha256` or `base64` are real names.
pub fn strip_generated_suffix(name: &str) -> String {
    if let Some(caps) = GENERATED_SUFFIX_RE.captures(name) {
        let suffix = &caps[2];
        let digits = suffix.chars().filter(char::is_ascii_digit).count();
        let has_alpha = suffix.chars().any(|c| c.is_ascii_alphabetic());
        if digits >= 2 && has_alpha {
            if let Some(whole) = caps.get(0) {
                return format!("{}{}<auto>", &name[..whole.start()], &caps[1]);
            }
        }
    }
    name.to_string()
}

pub struct DefaultRuleset;

impl NormalizationRuleset for DefaultRuleset {}

pub struct JavaScriptRuleset;

impl NormalizationRuleset for JavaScriptRuleset {
    // Some SDKs derive the module from the URL, making it a partial copy of the path
    fn is_unhashable_module(&self, frame: &Frame, module: &str) -> bool {
        module.contains('/')
            && frame
                .abs_path
                .as_deref()
                .is_some_and(|path| path.ends_with(module))
    }
}

pub struct JavaRuleset;

impl NormalizationRuleset for JavaRuleset {
    fn is_unhashable_module(&self, _frame: &Frame, module: &str) -> bool {
        module.contains("$$Lambda$")
    }

    fn normalize_module(&self, module: &str) -> String {
        for accessor in JAVA_REFLECTION_ACCESSORS {
            if module.starts_with(accessor) {
                return accessor.to_string();
            }
        }
        let module = JAVA_CGLIB_RE.replace_all(module, "${1}<auto>");
        let module = JAVA_ASSIST_RE.replace_all(&module, "${1}<auto>");
        let module = CLOJURE_FN_RE.replace_all(&module, "${1}<auto>");
        strip_generated_suffix(&module)
    }
}

pub struct CocoaRuleset;

impl NormalizationRuleset for CocoaRuleset {
    // Full paths from debug info carry build machine prefixes, keep the basename only
    fn normalize_filename(&self, filename: &str) -> String {
        filename
            .rsplit('/')
            .next()
            .unwrap_or(filename)
            .to_string()
    }
}

static DEFAULT_RULESET: DefaultRuleset = DefaultRuleset;
static JAVASCRIPT_RULESET: JavaScriptRuleset = JavaScriptRuleset;
static JAVA_RULESET: JavaRuleset = JavaRuleset;
static COCOA_RULESET: CocoaRuleset = CocoaRuleset;

pub fn ruleset_for(platform: &str) -> &'static dyn NormalizationRuleset {
    match platform {
        "javascript" | "node" => &JAVASCRIPT_RULESET,
        "java" | "clojure" | "scala" | "groovy" => &JAVA_RULESET,
        "cocoa" | "objc" | "swift" => &COCOA_RULESET,
        _ => &DEFAULT_RULESET,
    }
}
