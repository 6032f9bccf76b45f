//! Neutral in-memory form of a declarative definition.
//!
//! Loaders (XML, tests, generators) produce an `Element` tree; node
//! constructors read their configuration from it. Attribute accessors turn
//! missing or malformed values into [`ConfigError`]s naming the element and
//! attribute, so every constructor reports errors the same way.

use std::{collections::BTreeMap, str::FromStr, time::Duration};

use crate::{error::ConfigError, name::QualifiedName};

/// One element of a definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    name: QualifiedName,
    attributes: BTreeMap<String, String>,
    children: Vec<Element>,
}

impl Element {
    /// Create an element without attributes or children.
    pub fn new(name: QualifiedName) -> Self {
        Self { name, attributes: BTreeMap::new(), children: Vec::new() }
    }

    /// Create an element in the core namespace.
    pub fn core(local: &str) -> Self {
        Self::new(QualifiedName::core(local))
    }

    /// Builder: add an attribute.
    #[must_use]
    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Builder: add a child.
    #[must_use]
    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    /// Builder: add several children.
    #[must_use]
    pub fn with_children(mut self, children: impl IntoIterator<Item = Element>) -> Self {
        self.children.extend(children);
        self
    }

    /// Add an attribute in place.
    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(name.into(), value.into());
    }

    /// Add a child in place.
    pub fn push_child(&mut self, child: Element) {
        self.children.push(child);
    }

    /// Qualified name.
    pub fn name(&self) -> &QualifiedName {
        &self.name
    }

    /// Local name, used in error messages.
    pub fn local_name(&self) -> &str {
        self.name.local()
    }

    /// Child elements in document order.
    pub fn children(&self) -> &[Element] {
        &self.children
    }

    /// All attributes.
    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Optional attribute.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Required attribute.
    pub fn required_attr(&self, name: &str) -> Result<&str, ConfigError> {
        self.attr(name).ok_or_else(|| ConfigError::MissingAttribute {
            element: self.local_name().to_string(),
            attribute: name.to_string(),
        })
    }

    /// Optional attribute parsed with `FromStr`.
    pub fn attr_parse<T>(&self, name: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.attr(name)
            .map(|raw| raw.trim().parse::<T>().map_err(|e| self.invalid(name, raw, e.to_string())))
            .transpose()
    }

    /// Required attribute parsed with `FromStr`.
    pub fn required_parse<T>(&self, name: &str) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let raw = self.required_attr(name)?;
        raw.trim().parse::<T>().map_err(|e| self.invalid(name, raw, e.to_string()))
    }

    /// Optional attribute parsed with `FromStr`, with a default.
    pub fn attr_or<T>(&self, name: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        Ok(self.attr_parse(name)?.unwrap_or(default))
    }

    /// Boolean attribute (`true`/`false`), with a default.
    pub fn attr_bool(&self, name: &str, default: bool) -> Result<bool, ConfigError> {
        self.attr_or(name, default)
    }

    /// Duration attribute given in milliseconds.
    pub fn attr_duration_ms(&self, name: &str) -> Result<Option<Duration>, ConfigError> {
        Ok(self.attr_parse::<u64>(name)?.map(Duration::from_millis))
    }

    /// Build an `InvalidAttribute` error for this element.
    pub fn invalid(&self, attribute: &str, value: &str, reason: impl Into<String>) -> ConfigError {
        ConfigError::InvalidAttribute {
            element: self.local_name().to_string(),
            attribute: attribute.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    /// Build a `Structure` error for this element.
    pub fn structure(&self, reason: impl Into<String>) -> ConfigError {
        ConfigError::Structure { element: self.local_name().to_string(), reason: reason.into() }
    }
}
