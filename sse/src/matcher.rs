use serde_json::Value;

/// Field names recognized as carrying a session identifier when none are configured.
pub const DEFAULT_SESSION_ID_FIELDS: [&str; 2] = ["sessionID", "sessionId"];

/// Decides whether a payload belongs to a session.
///
/// A payload matches when any object anywhere inside it, at any depth and
/// inside arrays or objects alike, has one of the session-id fields set to the
/// exact session identifier string. The walk is depth-first and stops at the
/// first match. `serde_json` bounds nesting depth while parsing, so no extra
/// recursion guard is needed here.
#[derive(Debug, Clone)]
pub struct SessionMatcher {
    fields: Vec<String>,
}

impl SessionMatcher {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn matches(&self, payload: &Value, session_id: &str) -> bool {
        match payload {
            Value::Object(map) => map.iter().any(|(key, child)| {
                (self.is_session_field(key) && child.as_str() == Some(session_id))
                    || self.matches(child, session_id)
            }),
            Value::Array(items) => items.iter().any(|item| self.matches(item, session_id)),
            _ => false,
        }
    }

    fn is_session_field(&self, key: &str) -> bool {
        self.fields.iter().any(|field| field == key)
    }
}

impl Default for SessionMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_ID_FIELDS)
    }
}
