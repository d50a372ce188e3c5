//! Field-extraction rules for push messages
//!
//! A rule is a template mixing literal text with `${topic}` and
//! `${payload.a.b.0}` placeholders. The payload path walks JSON objects by
//! key and arrays by index; a missing value renders as an empty string.

use crate::error::{ConfigError, PushError, PushResult};
use crate::push::PushMessage;
use crate::source::{EntryKind, LinkHint, RawEntry, SourceKind};
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

/// Placeholder syntax
static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("Invalid placeholder regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Literal(String),
    Topic,
    Payload(Vec<String>),
}

/// A compiled extraction template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    parts: Vec<Part>,
}

impl Template {
    /// Parse a template
    pub fn parse(source: &str) -> Result<Self, ConfigError> {
        let mut parts = Vec::new();
        let mut last = 0;

        for caps in PLACEHOLDER.captures_iter(source) {
            let (Some(whole), Some(key)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            if whole.start() > last {
                parts.push(Part::Literal(source[last..whole.start()].to_string()));
            }
            parts.push(parse_key(source, key.as_str().trim())?);
            last = whole.end();
        }
        if last < source.len() {
            parts.push(Part::Literal(source[last..].to_string()));
        }

        Ok(Self {
            source: source.to_string(),
            parts,
        })
    }

    /// Check if rendering needs the JSON payload
    pub fn uses_payload(&self) -> bool {
        self.parts.iter().any(|p| matches!(p, Part::Payload(_)))
    }

    /// Original template text
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Render against a message topic and its parsed payload
    pub fn render(&self, topic: &str, payload: Option<&Value>) -> PushResult<String> {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                Part::Literal(text) => out.push_str(text),
                Part::Topic => out.push_str(topic),
                Part::Payload(path) => {
                    let root = payload.ok_or_else(|| PushError::Malformed {
                        reason: "payload is not JSON".into(),
                    })?;
                    if let Some(value) = lookup(root, path) {
                        push_value(&mut out, value);
                    }
                }
            }
        }
        Ok(out)
    }
}

fn parse_key(source: &str, key: &str) -> Result<Part, ConfigError> {
    if key == "topic" {
        return Ok(Part::Topic);
    }
    if key == "payload" {
        return Ok(Part::Payload(Vec::new()));
    }
    match key.strip_prefix("payload.") {
        Some(path) if !path.is_empty() && path.split('.').all(|s| !s.is_empty()) => {
            Ok(Part::Payload(path.split('.').map(str::to_string).collect()))
        }
        _ => Err(ConfigError::InvalidFieldRule {
            rule: source.to_string(),
            reason: format!("unknown placeholder '{}', expected topic or payload.<path>", key),
        }),
    }
}

fn lookup<'a>(root: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(root, |value, segment| match value {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn push_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => {}
        Value::String(s) => out.push_str(s),
        other => out.push_str(&other.to_string()),
    }
}

/// Rules mapping one push message onto a [`RawEntry`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRules {
    href: Template,
    size: Option<Template>,
    time: Option<Template>,
    name: Option<Template>,
}

impl Default for FieldRules {
    fn default() -> Self {
        Self {
            href: Template {
                source: "${payload.href}".into(),
                parts: vec![Part::Payload(vec!["href".into()])],
            },
            size: Some(Template {
                source: "${payload.size}".into(),
                parts: vec![Part::Payload(vec!["size".into()])],
            }),
            time: Some(Template {
                source: "${payload.time}".into(),
                parts: vec![Part::Payload(vec!["time".into()])],
            }),
            name: None,
        }
    }
}

impl FieldRules {
    /// Rules with only an href template
    pub fn new(href: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            href: Template::parse(href)?,
            size: None,
            time: None,
            name: None,
        })
    }

    /// Template for the size in bytes
    pub fn size(mut self, rule: &str) -> Result<Self, ConfigError> {
        self.size = Some(Template::parse(rule)?);
        Ok(self)
    }

    /// Template for the modification time in epoch milliseconds
    pub fn time(mut self, rule: &str) -> Result<Self, ConfigError> {
        self.time = Some(Template::parse(rule)?);
        Ok(self)
    }

    /// Template for an alternative name; a non-empty value makes the entry a link
    pub fn alternative_name(mut self, rule: &str) -> Result<Self, ConfigError> {
        self.name = Some(Template::parse(rule)?);
        Ok(self)
    }

    fn uses_payload(&self) -> bool {
        self.href.uses_payload()
            || [&self.size, &self.time, &self.name]
                .into_iter()
                .flatten()
                .any(Template::uses_payload)
    }

    /// Map one message to an entry
    ///
    /// `Ok(None)` when the href renders empty (message ignored); `Err` for a
    /// payload that cannot be read.
    pub fn extract(&self, message: &PushMessage, received_at: i64) -> PushResult<Option<RawEntry>> {
        let payload = if self.uses_payload() {
            Some(
                serde_json::from_slice::<Value>(&message.payload).map_err(|e| PushError::Malformed {
                    reason: e.to_string(),
                })?,
            )
        } else {
            None
        };
        let payload = payload.as_ref();

        let href = self.href.render(&message.topic, payload)?;
        let href = href.trim();
        if href.is_empty() {
            return Ok(None);
        }

        let size = match &self.size {
            Some(rule) => parse_number::<u64>(rule.render(&message.topic, payload)?, "size")?,
            None => None,
        };
        let time = match &self.time {
            Some(rule) => parse_number::<i64>(rule.render(&message.topic, payload)?, "time")?,
            None => None,
        };
        let alternative = match &self.name {
            Some(rule) => Some(rule.render(&message.topic, payload)?)
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty()),
            None => None,
        };

        let kind = if alternative.is_some() {
            EntryKind::Symlink
        } else {
            EntryKind::File
        };

        let mut entry = RawEntry::new("", href, kind)
            .with_source(SourceKind::Pushed)
            .with_mtime(time.unwrap_or(received_at));
        entry.size = size;
        if let Some(alt) = alternative {
            entry = entry.with_link(LinkHint::Target(alt));
        }

        Ok(Some(entry))
    }
}

fn parse_number<T: std::str::FromStr>(value: String, field: &str) -> PushResult<Option<T>> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    value.parse::<T>().map(Some).map_err(|_| PushError::Malformed {
        reason: format!("{} '{}' is not a number", field, value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(topic: &str, payload: &str) -> PushMessage {
        PushMessage {
            topic: topic.into(),
            payload: payload.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_template_render() {
        let t = Template::parse("/data/${topic}/${payload.files.1.name}.grib").unwrap();
        let payload: Value =
            serde_json::from_str(r#"{"files":[{"name":"a"},{"name":"b"}]}"#).unwrap();
        assert_eq!(
            t.render("ops", Some(&payload)).unwrap(),
            "/data/ops/b.grib"
        );
        assert!(t.uses_payload());
    }

    #[test]
    fn test_template_rejects_unknown_placeholder() {
        assert!(matches!(
            Template::parse("${header.x}"),
            Err(ConfigError::InvalidFieldRule { .. })
        ));
    }

    #[test]
    fn test_default_rules_extract() {
        let rules = FieldRules::default();
        let entry = rules
            .extract(&msg("x", r#"{"href":"/x/y1","size":5,"time":1000}"#), 42)
            .unwrap()
            .unwrap();

        assert_eq!(entry.name, "/x/y1");
        assert_eq!(entry.size, Some(5));
        assert_eq!(entry.mtime, Some(1000));
        assert_eq!(entry.source, SourceKind::Pushed);
        assert!(entry.has_metadata());
    }

    #[test]
    fn test_missing_time_uses_receipt() {
        let entry = FieldRules::default()
            .extract(&msg("x", r#"{"href":"/x/y2","size":"7"}"#), 42)
            .unwrap()
            .unwrap();
        assert_eq!(entry.size, Some(7));
        assert_eq!(entry.mtime, Some(42));
    }

    #[test]
    fn test_empty_href_is_ignored() {
        let rules = FieldRules::default();
        assert_eq!(rules.extract(&msg("x", r#"{"size":5}"#), 0).unwrap(), None);
    }

    #[test]
    fn test_malformed_payloads() {
        let rules = FieldRules::default();
        assert!(rules.extract(&msg("x", "not json"), 0).unwrap_err().is_per_message());
        assert!(rules
            .extract(&msg("x", r#"{"href":"/a","size":"big"}"#), 0)
            .is_err());
    }

    #[test]
    fn test_alternative_name_makes_link() {
        let rules = FieldRules::new("${topic}")
            .unwrap()
            .alternative_name("${payload.target}")
            .unwrap();
        let entry = rules
            .extract(&msg("/x/latest", r#"{"target":"y1"}"#), 1)
            .unwrap()
            .unwrap();
        assert_eq!(entry.kind, EntryKind::Symlink);
        assert_eq!(entry.link, Some(LinkHint::Target("y1".into())));
        assert_eq!(entry.name, "/x/latest");
    }

    #[test]
    fn test_topic_only_rules_ignore_payload() {
        let rules = FieldRules::new("${topic}").unwrap();
        let entry = rules.extract(&msg("/x/raw", "\u{0}binary"), 5).unwrap().unwrap();
        assert_eq!(entry.name, "/x/raw");
        assert_eq!(entry.size, None);
    }
}
