//! Unit selection
//!
//! A `Selector` is a predicate over a unit's effective metadata. Selection
//! prunes a clone of the suite and never touches the original.

mod parser;

use std::collections::BTreeSet;
use std::fmt;

use crate::error::SelectorError;
use crate::models::{AttrValue, TestContainer, TestModule, TestUnit, UnitId};
use crate::registry::{Suite, SuiteEntry};

pub use parser::{parse, parse_attr_spec};

/// Comparison operators
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        };
        write!(f, "{s}")
    }
}

/// Predicate tree
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    True,
    Truthy(String),
    Compare {
        attr: String,
        op: CmpOp,
        value: AttrValue,
    },
    Contains {
        attr: String,
        value: AttrValue,
    },
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

fn quote(value: &AttrValue) -> String {
    match value {
        AttrValue::Str(s) => format!("{s:?}"),
        other => other.to_string(),
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::True => write!(f, "true"),
            Expr::Truthy(attr) => write!(f, "{attr}"),
            Expr::Compare { attr, op, value } => write!(f, "{attr} {op} {}", quote(value)),
            Expr::Contains { attr, value } => write!(f, "{} in {attr}", quote(value)),
            Expr::Not(inner) => write!(f, "not {inner}"),
            Expr::And(l, r) => write!(f, "({l} and {r})"),
            Expr::Or(l, r) => write!(f, "({l} or {r})"),
        }
    }
}

/// A unit together with its enclosing scopes
#[derive(Clone, Copy)]
pub struct Subject<'a> {
    pub module: &'a TestModule,
    pub container: &'a TestContainer,
    pub unit: &'a TestUnit,
}

impl Subject<'_> {
    /// Tags of the unit, its container and its module
    pub fn tags(&self) -> BTreeSet<String> {
        self.unit
            .meta
            .tags
            .iter()
            .chain(&self.container.meta.tags)
            .chain(&self.module.meta.tags)
            .cloned()
            .collect()
    }

    /// Effective value of `attr`; unit attributes shadow container ones,
    /// which shadow module ones
    pub fn lookup(&self, attr: &str) -> Option<AttrValue> {
        match attr {
            "tags" | "tag" => Some(AttrValue::List(self.tags().into_iter().collect())),
            "name" => Some(AttrValue::Str(self.unit.name.clone())),
            "module" => Some(AttrValue::Str(self.module.name.clone())),
            "container" => Some(AttrValue::Str(self.container.name.clone())),
            _ => self
                .unit
                .meta
                .lookup(attr)
                .or_else(|| self.container.meta.lookup(attr))
                .or_else(|| self.module.meta.lookup(attr))
                .cloned(),
        }
    }

    pub fn id(&self) -> UnitId {
        UnitId::new(&self.module.name, &self.container.name, &self.unit.name)
    }
}

fn literal_text(value: &AttrValue) -> String {
    match value {
        AttrValue::List(items) => items.join(","),
        other => other.to_string(),
    }
}

impl Expr {
    pub fn eval(&self, subject: &Subject<'_>) -> bool {
        match self {
            Expr::True => true,
            Expr::Truthy(attr) => subject.lookup(attr).is_some_and(|v| v.is_truthy()),
            Expr::Compare { attr, op, value } => {
                let Some(actual) = subject.lookup(attr) else {
                    // Absent attributes only satisfy inequality
                    return *op == CmpOp::Ne;
                };
                match op {
                    CmpOp::Eq => actual.matches(&literal_text(value)),
                    CmpOp::Ne => !actual.matches(&literal_text(value)),
                    _ => match (actual.as_number(), value.as_number()) {
                        (Some(a), Some(b)) => match op {
                            CmpOp::Lt => a < b,
                            CmpOp::Le => a <= b,
                            CmpOp::Gt => a > b,
                            _ => a >= b,
                        },
                        _ => false,
                    },
                }
            }
            Expr::Contains { attr, value } => {
                let needle = literal_text(value);
                match subject.lookup(attr) {
                    Some(AttrValue::List(items)) => {
                        items.iter().any(|i| i.eq_ignore_ascii_case(&needle))
                    }
                    Some(AttrValue::Str(s)) => s.to_lowercase().contains(&needle.to_lowercase()),
                    Some(other) => other.matches(&needle),
                    None => false,
                }
            }
            Expr::Not(inner) => !inner.eval(subject),
            Expr::And(l, r) => l.eval(subject) && r.eval(subject),
            Expr::Or(l, r) => l.eval(subject) || r.eval(subject),
        }
    }
}

/// Predicate plus an optional name filter
#[derive(Clone, Debug, PartialEq)]
pub struct Selector {
    expr: Expr,
    name_filter: Option<String>,
}

impl Default for Selector {
    fn default() -> Self {
        Self::all()
    }
}

impl Selector {
    /// Select everything
    pub fn all() -> Self {
        Self {
            expr: Expr::True,
            name_filter: None,
        }
    }

    pub fn new(expr: Expr) -> Self {
        Self {
            expr,
            name_filter: None,
        }
    }

    pub fn parse(input: &str) -> Result<Self, SelectorError> {
        parse(input).map(Self::new)
    }

    /// Compact form: constraints within a spec are ANDed, specs are ORed
    pub fn from_attr_specs<S: AsRef<str>>(specs: &[S]) -> Result<Self, SelectorError> {
        let mut exprs = Vec::with_capacity(specs.len());
        for spec in specs {
            exprs.push(parse_attr_spec(spec.as_ref())?);
        }
        let mut exprs = exprs.into_iter();
        let Some(first) = exprs.next() else {
            return Ok(Self::all());
        };
        Ok(Self::new(
            exprs.fold(first, |acc, e| Expr::Or(Box::new(acc), Box::new(e))),
        ))
    }

    /// Both selectors must match
    pub fn and(self, other: Selector) -> Self {
        let expr = match (self.expr, other.expr) {
            (Expr::True, e) | (e, Expr::True) => e,
            (l, r) => Expr::And(Box::new(l), Box::new(r)),
        };
        Self {
            expr,
            name_filter: other.name_filter.or(self.name_filter),
        }
    }

    /// Also require `pattern` to occur in the unit's full identity
    pub fn with_name_filter(mut self, pattern: impl Into<String>) -> Self {
        self.name_filter = Some(pattern.into());
        self
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    pub fn is_all(&self) -> bool {
        self.expr == Expr::True && self.name_filter.is_none()
    }

    pub fn matches(&self, subject: &Subject<'_>) -> bool {
        if let Some(pattern) = &self.name_filter {
            if !subject.id().to_string().contains(pattern.as_str()) {
                return false;
            }
        }
        self.expr.eval(subject)
    }

    /// Pruned copy of `suite` holding only matching units. Containers and
    /// modules left empty are dropped; load failures are always kept.
    pub fn select(&self, suite: &Suite) -> Suite {
        let entries = suite
            .entries()
            .iter()
            .filter_map(|entry| match entry {
                SuiteEntry::Failed(err) => Some(SuiteEntry::Failed(err.clone())),
                SuiteEntry::Loaded(module) => self.select_module(module).map(SuiteEntry::Loaded),
            })
            .collect();
        Suite::new(entries)
    }

    fn select_module(&self, module: &TestModule) -> Option<TestModule> {
        let containers: Vec<TestContainer> = module
            .containers
            .iter()
            .filter_map(|container| {
                let units: Vec<TestUnit> = container
                    .units
                    .iter()
                    .filter(|unit| {
                        self.matches(&Subject {
                            module,
                            container,
                            unit,
                        })
                    })
                    .cloned()
                    .collect();
                if units.is_empty() {
                    return None;
                }
                let mut pruned = container.clone();
                pruned.units = units;
                Some(pruned)
            })
            .collect();

        if containers.is_empty() {
            return None;
        }
        let mut pruned = module.clone();
        pruned.containers = containers;
        Some(pruned)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expr)?;
        if let Some(pattern) = &self.name_filter {
            write!(f, " (name contains {pattern:?})")?;
        }
        Ok(())
    }
}
