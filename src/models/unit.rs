//! Test tree models
//!
//! Defines test units, containers, modules and the metadata attached to them
//! at registration time.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{SourceLocation, TestError};
use crate::executor::Context;

/// Body of a unit, or a fixture function
pub type TestFn = Arc<dyn Fn(&mut Context<'_>) -> Result<(), TestError> + Send + Sync>;

/// Fixture scope levels, outermost first
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeLevel {
    Module,
    Class,
    Instance,
}

impl fmt::Display for ScopeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeLevel::Module => write!(f, "module"),
            ScopeLevel::Class => write!(f, "class"),
            ScopeLevel::Instance => write!(f, "instance"),
        }
    }
}

/// Attribute value used for selection
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<String>),
}

impl AttrValue {
    pub fn is_truthy(&self) -> bool {
        match self {
            AttrValue::Bool(b) => *b,
            AttrValue::Int(i) => *i != 0,
            AttrValue::Str(s) => !(s.is_empty() || s == "0" || s.eq_ignore_ascii_case("false")),
            AttrValue::List(items) => !items.is_empty(),
        }
    }

    /// Case-insensitive equality; lists match when they contain the value
    pub fn matches(&self, value: &str) -> bool {
        match self {
            AttrValue::Bool(b) => value.eq_ignore_ascii_case(if *b { "true" } else { "false" }),
            AttrValue::Int(i) => value.trim().parse::<i64>() == Ok(*i),
            AttrValue::Str(s) => s.eq_ignore_ascii_case(value),
            AttrValue::List(items) => items.iter().any(|item| item.eq_ignore_ascii_case(value)),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            AttrValue::Int(i) => Some(*i as f64),
            AttrValue::Str(s) => s.trim().parse().ok(),
            AttrValue::Bool(_) | AttrValue::List(_) => None,
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Bool(b) => write!(f, "{b}"),
            AttrValue::Int(i) => write!(f, "{i}"),
            AttrValue::Str(s) => write!(f, "{s}"),
            AttrValue::List(items) => write!(f, "[{}]", items.join(", ")),
        }
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        AttrValue::Bool(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::Int(value)
    }
}

impl From<i32> for AttrValue {
    fn from(value: i32) -> Self {
        AttrValue::Int(value.into())
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Str(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::Str(value)
    }
}

impl From<Vec<String>> for AttrValue {
    fn from(value: Vec<String>) -> Self {
        AttrValue::List(value)
    }
}

impl From<Vec<&str>> for AttrValue {
    fn from(value: Vec<&str>) -> Self {
        AttrValue::List(value.into_iter().map(String::from).collect())
    }
}

/// Predicate evaluated when a conditional skip is inspected
#[derive(Clone)]
pub struct Condition {
    label: String,
    check: Arc<dyn Fn() -> bool + Send + Sync>,
}

impl Condition {
    pub fn new(label: impl Into<String>, check: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        Self {
            label: label.into(),
            check: Arc::new(check),
        }
    }

    pub fn env_set(var: impl Into<String>) -> Self {
        let var = var.into();
        let label = format!("${var} is set");
        Self::new(label, move || std::env::var_os(&var).is_some())
    }

    pub fn env_unset(var: impl Into<String>) -> Self {
        let var = var.into();
        let label = format!("${var} is unset");
        Self::new(label, move || std::env::var_os(&var).is_none())
    }

    pub fn holds(&self) -> bool {
        (self.check)()
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Condition").field(&self.label).finish()
    }
}

/// Decorator-style marks, fixed at registration
#[derive(Clone, Debug, Default)]
pub enum Decoration {
    #[default]
    None,
    Skip {
        reason: String,
    },
    ConditionalSkip {
        condition: Condition,
        reason: String,
    },
    ExpectedFailure,
}

impl Decoration {
    /// Reason to skip, evaluating the condition of a conditional skip
    pub fn skip_reason(&self) -> Option<String> {
        match self {
            Decoration::Skip { reason } => Some(reason.clone()),
            Decoration::ConditionalSkip { condition, reason } if condition.holds() => {
                Some(reason.clone())
            }
            _ => None,
        }
    }

    pub fn is_expected_failure(&self) -> bool {
        matches!(self, Decoration::ExpectedFailure)
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Decoration::None)
    }
}

/// Tags, attributes and decoration of a tree node
#[derive(Clone, Debug, Default)]
pub struct Metadata {
    pub tags: BTreeSet<String>,
    pub attrs: BTreeMap<String, AttrValue>,
    pub decoration: Decoration,
}

impl Metadata {
    pub fn lookup(&self, attr: &str) -> Option<&AttrValue> {
        self.attrs.get(attr)
    }
}

/// Builder methods shared by units, containers and modules
pub trait Annotated: Sized {
    fn metadata(&self) -> &Metadata;
    fn metadata_mut(&mut self) -> &mut Metadata;

    fn tag(mut self, tag: impl Into<String>) -> Self {
        self.metadata_mut().tags.insert(tag.into());
        self
    }

    fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.metadata_mut()
            .tags
            .extend(tags.into_iter().map(Into::into));
        self
    }

    fn attr(mut self, name: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.metadata_mut().attrs.insert(name.into(), value.into());
        self
    }

    fn skip(mut self, reason: impl Into<String>) -> Self {
        self.metadata_mut().decoration = Decoration::Skip {
            reason: reason.into(),
        };
        self
    }

    fn skip_if(mut self, condition: Condition, reason: impl Into<String>) -> Self {
        self.metadata_mut().decoration = Decoration::ConditionalSkip {
            condition,
            reason: reason.into(),
        };
        self
    }

    fn expected_failure(mut self) -> Self {
        self.metadata_mut().decoration = Decoration::ExpectedFailure;
        self
    }
}

/// Pre/post hooks of one scope
#[derive(Clone, Default)]
pub struct Fixtures {
    pub setup: Option<TestFn>,
    pub teardown: Option<TestFn>,
}

impl fmt::Debug for Fixtures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fixtures")
            .field("setup", &self.setup.is_some())
            .field("teardown", &self.teardown.is_some())
            .finish()
    }
}

fn boxed<F>(f: F) -> TestFn
where
    F: Fn(&mut Context<'_>) -> Result<(), TestError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Smallest executable test action
#[derive(Clone)]
pub struct TestUnit {
    pub name: String,
    pub body: TestFn,
    pub meta: Metadata,
    pub defined_at: Option<SourceLocation>,
}

impl TestUnit {
    /// Register a unit; the caller's position is kept as its definition site
    #[track_caller]
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&mut Context<'_>) -> Result<(), TestError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            body: boxed(body),
            meta: Metadata::default(),
            defined_at: Some(SourceLocation::caller()),
        }
    }

    pub fn from_fn(name: impl Into<String>, body: TestFn, defined_at: Option<SourceLocation>) -> Self {
        Self {
            name: name.into(),
            body,
            meta: Metadata::default(),
            defined_at,
        }
    }
}

impl Annotated for TestUnit {
    fn metadata(&self) -> &Metadata {
        &self.meta
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.meta
    }
}

impl fmt::Debug for TestUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestUnit")
            .field("name", &self.name)
            .field("meta", &self.meta)
            .field("defined_at", &self.defined_at)
            .finish()
    }
}

/// Group of units sharing class-scoped fixtures
#[derive(Clone, Debug)]
pub struct TestContainer {
    pub name: String,
    pub units: Vec<TestUnit>,
    /// Run once around all units of the container
    pub class_fixtures: Fixtures,
    /// Run around every unit
    pub instance_fixtures: Fixtures,
    pub meta: Metadata,
}

impl TestContainer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            units: Vec::new(),
            class_fixtures: Fixtures::default(),
            instance_fixtures: Fixtures::default(),
            meta: Metadata::default(),
        }
    }

    pub fn unit(mut self, unit: TestUnit) -> Self {
        self.units.push(unit);
        self
    }

    pub fn setup_class<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Context<'_>) -> Result<(), TestError> + Send + Sync + 'static,
    {
        self.class_fixtures.setup = Some(boxed(f));
        self
    }

    pub fn teardown_class<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Context<'_>) -> Result<(), TestError> + Send + Sync + 'static,
    {
        self.class_fixtures.teardown = Some(boxed(f));
        self
    }

    pub fn setup<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Context<'_>) -> Result<(), TestError> + Send + Sync + 'static,
    {
        self.instance_fixtures.setup = Some(boxed(f));
        self
    }

    pub fn teardown<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Context<'_>) -> Result<(), TestError> + Send + Sync + 'static,
    {
        self.instance_fixtures.teardown = Some(boxed(f));
        self
    }
}

impl Annotated for TestContainer {
    fn metadata(&self) -> &Metadata {
        &self.meta
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.meta
    }
}

/// Top-level grouping sharing module-scoped fixtures
#[derive(Clone, Debug)]
pub struct TestModule {
    pub name: String,
    pub containers: Vec<TestContainer>,
    pub fixtures: Fixtures,
    pub meta: Metadata,
    pub path: Option<PathBuf>,
}

impl TestModule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            containers: Vec::new(),
            fixtures: Fixtures::default(),
            meta: Metadata::default(),
            path: None,
        }
    }

    pub fn container(mut self, container: TestContainer) -> Self {
        self.containers.push(container);
        self
    }

    pub fn setup<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Context<'_>) -> Result<(), TestError> + Send + Sync + 'static,
    {
        self.fixtures.setup = Some(boxed(f));
        self
    }

    pub fn teardown<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Context<'_>) -> Result<(), TestError> + Send + Sync + 'static,
    {
        self.fixtures.teardown = Some(boxed(f));
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn unit_count(&self) -> usize {
        self.containers.iter().map(|c| c.units.len()).sum()
    }

    /// All units with their container, in declaration order
    pub fn units(&self) -> impl Iterator<Item = (&TestContainer, &TestUnit)> {
        self.containers
            .iter()
            .flat_map(|c| c.units.iter().map(move |u| (c, u)))
    }
}

impl Annotated for TestModule {
    fn metadata(&self) -> &Metadata {
        &self.meta
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.meta
    }
}

/// Identity of a unit within a run
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitId {
    pub module: String,
    pub container: String,
    pub name: String,
}

impl UnitId {
    pub fn new(
        module: impl Into<String>,
        container: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            module: module.into(),
            container: container.into(),
            name: name.into(),
        }
    }

    /// Placeholder identity for a module that failed to load
    pub fn load_failure(module: impl Into<String>) -> Self {
        Self::new(module, "", "<load>")
    }

    /// `module::Container` scope name
    pub fn container_path(&self) -> String {
        format!("{}::{}", self.module, self.container)
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.container.is_empty() {
            write!(f, "{}::{}", self.module, self.name)
        } else {
            write!(f, "{}::{}::{}", self.module, self.container, self.name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attr_value_matching_is_case_insensitive() {
        assert!(AttrValue::from("Slow").matches("slow"));
        assert!(AttrValue::from(vec!["fast", "DB"]).matches("db"));
        assert!(AttrValue::from(3).matches(" 3"));
        assert!(AttrValue::from(true).matches("TRUE"));
        assert!(!AttrValue::from("slow").matches("fast"));
    }

    #[test]
    fn test_attr_value_truthiness() {
        assert!(AttrValue::from("yes").is_truthy());
        assert!(!AttrValue::from("false").is_truthy());
        assert!(!AttrValue::from(0).is_truthy());
        assert!(!AttrValue::List(Vec::new()).is_truthy());
    }

    #[test]
    fn test_builder_collects_metadata() {
        let unit = TestUnit::new("test_x", |_| Ok(()))
            .tag("slow")
            .attr("priority", 2)
            .expected_failure();
        assert!(unit.meta.tags.contains("slow"));
        assert_eq!(unit.meta.attrs.get("priority"), Some(&AttrValue::Int(2)));
        assert!(unit.meta.decoration.is_expected_failure());
        assert!(unit.defined_at.unwrap().file.ends_with("unit.rs"));
    }

    #[test]
    fn test_conditional_skip() {
        let always = Decoration::ConditionalSkip {
            condition: Condition::new("always", || true),
            reason: "r".to_string(),
        };
        let never = Decoration::ConditionalSkip {
            condition: Condition::new("never", || false),
            reason: "r".to_string(),
        };
        assert_eq!(always.skip_reason(), Some("r".to_string()));
        assert_eq!(never.skip_reason(), None);
        assert_eq!(Decoration::None.skip_reason(), None);
    }

    #[test]
    fn test_module_units_in_order() {
        let module = TestModule::new("m")
            .container(
                TestContainer::new("A")
                    .unit(TestUnit::new("test_1", |_| Ok(())))
                    .unit(TestUnit::new("test_2", |_| Ok(()))),
            )
            .container(TestContainer::new("B").unit(TestUnit::new("test_3", |_| Ok(()))));
        let names: Vec<_> = module.units().map(|(c, u)| format!("{}.{}", c.name, u.name)).collect();
        assert_eq!(names, vec!["A.test_1", "A.test_2", "B.test_3"]);
        assert_eq!(module.unit_count(), 3);
    }

    #[test]
    fn test_unit_id_display() {
        assert_eq!(UnitId::new("m", "C", "test_a").to_string(), "m::C::test_a");
        assert_eq!(UnitId::load_failure("broken").to_string(), "broken::<load>");
    }
}
