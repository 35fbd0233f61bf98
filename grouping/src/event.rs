use serde::{Deserialize, Serialize};
use serde_json::Value;

const URL_PREFIXES: [&str; 5] = ["blob:", "file:", "http:", "https:", "applewebdata:"];

/// The parts of an event that grouping looks at, after normalization.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NormalizedEvent {
    pub platform: String,
    pub exception: Option<ExceptionData>,
    pub stacktrace: Option<StacktraceData>,
    pub template: Option<TemplateData>,
    pub message: Option<String>,
    pub fingerprint: Option<Vec<String>>,
    pub checksum: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExceptionData {
    pub values: Vec<SingleException>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SingleException {
    #[serde(rename = "type", default)]
    pub exception_type: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub module: Option<String>,
    #[serde(default)]
    pub stacktrace: Option<StacktraceData>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StacktraceData {
    #[serde(default)]
    pub frames: Vec<Frame>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub abs_path: Option<String>,
    #[serde(default)]
    pub module: Option<String>,
    #[serde(default)]
    pub function: Option<String>,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub context_line: Option<String>,
    #[serde(default)]
    pub lineno: Option<i64>,
    #[serde(default)]
    pub colno: Option<i64>,
    #[serde(default)]
    pub in_app: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateData {
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub abs_path: Option<String>,
    #[serde(default)]
    pub context_line: Option<String>,
    #[serde(default)]
    pub lineno: Option<i64>,
}

impl Frame {
    /// The path used for URL detection: `abs_path`, or `filename` when the
    /// client only sent the latter.
    fn source_path(&self) -> Option<&str> {
        self.abs_path
            .as_deref()
            .filter(|p| !p.is_empty())
            .or(self.filename.as_deref())
    }

    pub fn is_url(&self) -> bool {
        self.source_path()
            .map(|p| URL_PREFIXES.iter().any(|prefix| p.starts_with(prefix)))
            .unwrap_or(false)
    }

    /// Frames whose filename carries a "Caused by: ..." banner embed an exception
    /// message, which is not stable enough to hash.
    pub fn is_caused_by(&self) -> bool {
        self.filename
            .as_deref()
            .map(|f| f.starts_with("Caused by: "))
            .unwrap_or(false)
    }

    pub fn has_function(&self) -> bool {
        self.function.as_deref().is_some_and(|f| !f.is_empty())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ExceptionRepr {
    Values { values: Vec<SingleException> },
    List(Vec<SingleException>),
    Single(SingleException),
}

impl From<ExceptionRepr> for ExceptionData {
    fn from(repr: ExceptionRepr) -> Self {
        let values = match repr {
            ExceptionRepr::Values { values } => values,
            ExceptionRepr::List(values) => values,
            ExceptionRepr::Single(value) => vec![value],
        };
        ExceptionData { values }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MessageRepr {
    Text(String),
    Entry {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        formatted: Option<String>,
    },
}

impl MessageRepr {
    // The unformatted template groups better than the formatted string
    fn into_text(self) -> Option<String> {
        match self {
            MessageRepr::Text(text) => Some(text),
            MessageRepr::Entry { message, formatted } => message.or(formatted),
        }
    }
}

/// Wire shape accepted from clients. Interfaces may be sent under their short
/// name or their legacy dotted name.
#[derive(Deserialize)]
struct RawEventData {
    #[serde(default)]
    platform: Option<String>,
    #[serde(default, alias = "sentry.interfaces.Exception")]
    exception: Option<ExceptionRepr>,
    #[serde(default, alias = "sentry.interfaces.Stacktrace")]
    stacktrace: Option<StacktraceData>,
    #[serde(default, alias = "sentry.interfaces.Template")]
    template: Option<TemplateData>,
    #[serde(default, alias = "sentry.interfaces.Message")]
    logentry: Option<MessageRepr>,
    #[serde(default)]
    message: Option<MessageRepr>,
    #[serde(default)]
    fingerprint: Option<Vec<Value>>,
    #[serde(default)]
    checksum: Option<String>,
}

impl NormalizedEvent {
    /// Normalize a decoded payload into the grouping view of the event.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        let raw: RawEventData = serde_json::from_value(value)?;

        let fingerprint = raw
            .fingerprint
            .map(|bits| {
                bits.into_iter()
                    .filter(|bit| !bit.is_null())
                    .map(|bit| match bit {
                        Value::String(s) => s,
                        other => other.to_string(),
                    })
                    .collect::<Vec<String>>()
            })
            .filter(|bits| !bits.is_empty());

        let message = raw
            .logentry
            .and_then(MessageRepr::into_text)
            .or_else(|| raw.message.and_then(MessageRepr::into_text));

        Ok(NormalizedEvent {
            platform: raw
                .platform
                .filter(|p| !p.is_empty())
                .unwrap_or_else(|| "other".to_string()),
            exception: raw.exception.map(ExceptionData::from),
            stacktrace: raw.stacktrace,
            template: raw.template,
            message,
            fingerprint,
            checksum: raw.checksum.filter(|c| !c.is_empty()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_all_exception_shapes() {
        let wrapped = NormalizedEvent::from_value(json!({
            "exception": {"values": [{"type": "ValueError", "value": "bad"}]}
        }))
        .unwrap();
        let listed = NormalizedEvent::from_value(json!({
            "exception": [{"type": "ValueError", "value": "bad"}]
        }))
        .unwrap();
        let single = NormalizedEvent::from_value(json!({
            "sentry.interfaces.Exception": {"type": "ValueError", "value": "bad"}
        }))
        .unwrap();

        assert_eq!(wrapped.exception, listed.exception);
        assert_eq!(wrapped.exception, single.exception);
        assert_eq!(
            wrapped.exception.unwrap().values[0].exception_type.as_deref(),
            Some("ValueError")
        );
    }

    #[test]
    fn prefers_message_template_over_plain_message() {
        let event = NormalizedEvent::from_value(json!({
            "message": "user 42 not found",
            "logentry": {"message": "user %s not found", "formatted": "user 42 not found"}
        }))
        .unwrap();
        assert_eq!(event.message.as_deref(), Some("user %s not found"));

        let plain = NormalizedEvent::from_value(json!({"message": "boom"})).unwrap();
        assert_eq!(plain.message.as_deref(), Some("boom"));
        assert_eq!(plain.platform, "other");
    }

    #[test]
    fn stringifies_fingerprint_entries_and_drops_empty_overrides() {
        let event = NormalizedEvent::from_value(json!({
            "fingerprint": ["{{ default }}", 42, null, "db"]
        }))
        .unwrap();
        assert_eq!(
            event.fingerprint,
            Some(vec![
                "{{ default }}".to_string(),
                "42".to_string(),
                "db".to_string()
            ])
        );

        let empty = NormalizedEvent::from_value(json!({"fingerprint": []})).unwrap();
        assert_eq!(empty.fingerprint, None);
    }

    #[test]
    fn url_detection_falls_back_to_filename() {
        let frame = Frame {
            filename: Some("https://example.com/app.js".to_string()),
            ..Default::default()
        };
        assert!(frame.is_url());

        let blob = Frame {
            filename: Some("app.js".to_string()),
            abs_path: Some("blob:https://example.com/7f7aaadf".to_string()),
            ..Default::default()
        };
        assert!(blob.is_url());

        let local = Frame {
            filename: Some("app/models.py".to_string()),
            ..Default::default()
        };
        assert!(!local.is_url());
    }
}
