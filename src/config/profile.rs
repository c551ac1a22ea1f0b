//! Selection profiles
//!
//! Named bundles of selection and execution settings, chosen with
//! `--profile`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::SelectorError;
use crate::selector::Selector;

/// Named selection with optional execution overrides
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SelectionProfile {
    /// Profile name
    pub name: String,
    /// Description
    #[serde(default)]
    pub description: String,
    /// Predicate expression, e.g. `not slow and priority <= 2`
    #[serde(default)]
    pub select: Option<String>,
    /// Compact attribute specs, ORed together
    #[serde(default)]
    pub attrs: Vec<String>,
    /// Substring of the full unit id
    #[serde(default)]
    pub filter: Option<String>,
    /// Worker count override
    #[serde(default)]
    pub parallel: Option<usize>,
    /// Fail-fast override
    #[serde(default)]
    pub fail_fast: Option<bool>,
}

impl SelectionProfile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            select: None,
            attrs: Vec::new(),
            filter: None,
            parallel: None,
            fail_fast: None,
        }
    }

    /// Everything
    pub fn all() -> Self {
        Self::new("all").with_description("Run every discovered test")
    }

    /// Quick feedback: smoke-tagged units, stop at the first failure
    pub fn smoke() -> Self {
        Self {
            fail_fast: Some(true),
            ..Self::new("smoke")
                .with_description("Smoke tests, stop at first failure")
                .with_select("tag == \"smoke\"")
        }
    }

    /// Everything not tagged slow, on several workers
    pub fn fast() -> Self {
        Self {
            parallel: Some(4),
            ..Self::new("fast")
                .with_description("Skip slow-tagged tests and run modules in parallel")
                .with_select("not tag == \"slow\"")
        }
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    pub fn with_select(mut self, select: impl Into<String>) -> Self {
        self.select = Some(select.into());
        self
    }

    pub fn with_attr(mut self, spec: impl Into<String>) -> Self {
        self.attrs.push(spec.into());
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Selector for this profile's expression, attribute specs and filter
    pub fn selector(&self) -> Result<Selector, SelectorError> {
        let mut selector = match &self.select {
            Some(expr) => Selector::parse(expr)?,
            None => Selector::all(),
        };
        selector = selector.and(Selector::from_attr_specs(&self.attrs)?);
        if let Some(filter) = &self.filter {
            selector = selector.with_name_filter(filter);
        }
        Ok(selector)
    }

    /// Built-in profiles
    pub fn predefined() -> Vec<SelectionProfile> {
        vec![Self::all(), Self::smoke(), Self::fast()]
    }

    /// Find a built-in profile by name
    pub fn find(name: &str) -> Option<SelectionProfile> {
        Self::predefined().into_iter().find(|p| p.name == name)
    }
}

/// Built-in profiles overlaid with those from the config file
pub struct ProfileManager {
    profiles: BTreeMap<String, SelectionProfile>,
}

impl ProfileManager {
    pub fn new() -> Self {
        let profiles = SelectionProfile::predefined()
            .into_iter()
            .map(|p| (p.name.clone(), p))
            .collect();
        Self { profiles }
    }

    /// Add or replace a profile
    pub fn add(&mut self, profile: SelectionProfile) {
        self.profiles.insert(profile.name.clone(), profile);
    }

    pub fn get(&self, name: &str) -> Option<&SelectionProfile> {
        self.profiles.get(name)
    }

    /// Profiles sorted by name
    pub fn list(&self) -> Vec<&SelectionProfile> {
        self.profiles.values().collect()
    }
}

impl Default for ProfileManager {
    fn default() -> Self {
        Self::new()
    }
}
