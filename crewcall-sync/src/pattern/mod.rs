//! Action patterns and unification
//!
//! A pattern names an action and constrains the fields of a record's input
//! and output maps with terms:
//!
//! - `Lit(v)`: the field must be present and equal to `v`
//! - `Var(x)`: the field must be present; its value binds `x`
//! - `Opt(x)`: binds `x` to the field's value, or to `null` when absent
//!
//! Matching is outcome-aware. A pattern whose output constrains `error`
//! matches only failed records; every other pattern matches only records
//! that succeeded. Pending records never match.

mod frame;

pub use frame::Frame;

use crate::record::{ActionRecord, Status};
use crate::types::{ActionName, Fields, Value};
use std::fmt;

/// A constraint on one field of a record
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    Lit(Value),
    Var(String),
    Opt(String),
}

impl Term {
    /// Name of the variable this term binds, if any
    pub fn variable(&self) -> Option<&str> {
        match self {
            Term::Lit(_) => None,
            Term::Var(name) | Term::Opt(name) => Some(name),
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Lit(value) => write!(f, "{}", value),
            Term::Var(name) => write!(f, "?{}", name),
            Term::Opt(name) => write!(f, "?{}?", name),
        }
    }
}

/// Literal term
pub fn lit(value: impl Into<Value>) -> Term {
    Term::Lit(value.into())
}

/// Required variable
pub fn var(name: &str) -> Term {
    Term::Var(name.to_string())
}

/// Optional variable
pub fn opt(name: &str) -> Term {
    Term::Opt(name.to_string())
}

/// One clause of a sync's `when` list
#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    pub action: ActionName,
    pub input: Vec<(String, Term)>,
    pub output: Vec<(String, Term)>,
}

impl Pattern {
    /// A pattern with no field constraints
    pub fn new(action: ActionName) -> Self {
        Self {
            action,
            input: Vec::new(),
            output: Vec::new(),
        }
    }

    /// Constrain an input field
    pub fn input(mut self, field: &str, term: Term) -> Self {
        self.input.push((field.to_string(), term));
        self
    }

    /// Constrain an output field
    pub fn output(mut self, field: &str, term: Term) -> Self {
        self.output.push((field.to_string(), term));
        self
    }

    /// Bind each named input field to a variable of the same name
    pub fn inputs(mut self, fields: &[&str]) -> Self {
        for field in fields {
            self.input.push((field.to_string(), var(field)));
        }
        self
    }

    /// Bind each named output field to a variable of the same name
    pub fn outputs(mut self, fields: &[&str]) -> Self {
        for field in fields {
            self.output.push((field.to_string(), var(field)));
        }
        self
    }

    /// Whether this pattern matches failed records
    pub fn expects_error(&self) -> bool {
        self.output.iter().any(|(field, _)| field == "error")
    }

    /// Every variable this pattern can bind
    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.input
            .iter()
            .chain(self.output.iter())
            .filter_map(|(_, term)| term.variable())
    }

    /// Unify a completed record with this pattern, extending `frame`
    pub fn unify(&self, record: &ActionRecord, frame: &Frame) -> Option<Frame> {
        if record.action != self.action {
            return None;
        }
        let outcome_ok = match record.status {
            Status::Pending => false,
            Status::Succeeded => !self.expects_error(),
            Status::Failed => self.expects_error(),
        };
        if !outcome_ok {
            return None;
        }

        let mut next = frame.clone();
        if !unify_fields(&self.input, &record.input, &mut next) {
            return None;
        }
        let output = record.output.as_ref()?;
        if !unify_fields(&self.output, output, &mut next) {
            return None;
        }
        Some(next)
    }
}

fn unify_fields(terms: &[(String, Term)], fields: &Fields, frame: &mut Frame) -> bool {
    terms.iter().all(|(field, term)| match term {
        Term::Lit(expected) => fields.get(field) == Some(expected),
        Term::Var(name) => match fields.get(field) {
            Some(value) => frame.bind(name, value.clone()),
            None => false,
        },
        Term::Opt(name) => {
            let value = fields.get(field).cloned().unwrap_or(Value::Null);
            frame.bind(name, value)
        }
    })
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let render = |terms: &[(String, Term)]| {
            terms
                .iter()
                .map(|(field, term)| format!("{}: {}", field, term))
                .collect::<Vec<_>>()
                .join(", ")
        };
        write!(
            f,
            "{} {{{}}} => {{{}}}",
            self.action,
            render(&self.input),
            render(&self.output)
        )
    }
}
