//! `call_id → name` correlation for providers whose tool results are keyed by
//! function name.
//!
//! Built while walking a turn sequence: every `function_call` is recorded, and
//! results resolve against it. When an id was never seen (the caller trimmed the
//! history), the most recently recorded name is used.

use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct CallNames {
    names: HashMap<String, String>,
    last: Option<String>,
}

impl CallNames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, call_id: &str, name: &str) {
        self.names.insert(call_id.to_string(), name.to_string());
        self.last = Some(name.to_string());
    }

    pub fn resolve(&self, call_id: &str) -> Option<&str> {
        self.names
            .get(call_id)
            .or(self.last.as_ref())
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolves_by_id_then_last() {
        let mut names = CallNames::new();
        assert_eq!(names.resolve("call_1"), None);

        names.record("call_1", "search");
        names.record("call_2", "fetch");

        assert_eq!(names.resolve("call_1"), Some("search"));
        assert_eq!(names.resolve("call_2"), Some("fetch"));
        assert_eq!(names.resolve("call_unknown"), Some("fetch"));
    }
}
