//! Named stages provided by the platform.

use std::fmt;

/// A platform-provided stage referenced by name, with `--key=value` options.
///
/// Options render in the order they were first set; setting an existing
/// key replaces its value in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    name: String,
    options: Vec<(String, String)>,
}

impl Stage {
    /// Creates a stage with no options.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: Vec::new(),
        }
    }

    /// Sets an option.
    #[must_use]
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_option(key, value);
        self
    }

    /// Sets an option in place.
    pub fn set_option(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.options.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.options.push((key, value)),
        }
    }

    /// The stage name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Options in render order.
    #[must_use]
    pub fn options(&self) -> &[(String, String)] {
        &self.options
    }

    /// Looks up one option.
    #[must_use]
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Emits a timestamp periodically.
    #[must_use]
    pub fn time() -> Self {
        Self::new("time")
    }

    /// [`time`](Self::time) with a date format.
    #[must_use]
    pub fn time_with_format(format: impl Into<String>) -> Self {
        Self::time().with_option("format", format)
    }

    /// Reads entries from a syndication feed.
    #[must_use]
    pub fn feed(url: impl Into<String>) -> Self {
        Self::new("feed").with_option("url", url)
    }

    /// Logs each message.
    #[must_use]
    pub fn log() -> Self {
        Self::new("log")
    }

    /// Writes messages to a file.
    #[must_use]
    pub fn file() -> Self {
        Self::new("file")
    }

    /// Applies an expression to each message.
    #[must_use]
    pub fn transform(expression: impl Into<String>) -> Self {
        Self::new("transform").with_option("expression", expression)
    }

    /// Drops messages for which the expression is false.
    #[must_use]
    pub fn filter(expression: impl Into<String>) -> Self {
        Self::new("filter").with_option("expression", expression)
    }

    /// Parses JSON text into a tuple.
    #[must_use]
    pub fn json_to_tuple() -> Self {
        Self::new("json-to-tuple")
    }

    /// Records numeric messages as a rich gauge.
    #[must_use]
    pub fn rich_gauge() -> Self {
        Self::new("rich-gauge")
    }

    /// Any other stage known to the platform.
    #[must_use]
    pub fn custom(name: impl Into<String>) -> Self {
        Self::new(name)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        for (key, value) in &self.options {
            write!(f, " --{key}={value}")?;
        }
        Ok(())
    }
}
