//! Path parameters captured during route matching.

use std::collections::HashMap;

/// Parameters extracted from `{name}` segments, stored in request extensions.
#[derive(Clone, Debug, Default)]
pub struct PathParams(pub HashMap<String, String>);

impl PathParams {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }
}
