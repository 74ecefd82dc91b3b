//! Step validation
//!
//! Checks every step against the implementations the runner offers before
//! anything executes, and records what is missing as build errors so the
//! executors skip those units with a reason.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::models::{BuildError, BuildErrors, ErrorScope, Specification, Step};
use crate::resolve::ConceptDictionary;

pub const STEP_NOT_IMPLEMENTED: &str = "Step implementation not found";
pub const DUPLICATE_IMPLEMENTATION: &str = "Duplicate step implementation";

/// Validator answer for one step signature
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Implemented,
    NotImplemented,
    /// More than one implementation claims the signature
    Duplicate,
}

/// Source of step implementation verdicts
pub trait StepValidator: Send + Sync {
    fn validate(&self, signature: &str) -> Verdict;
}

/// Accepts everything; used when no implementation list is available
pub struct AcceptAll;

impl StepValidator for AcceptAll {
    fn validate(&self, _signature: &str) -> Verdict {
        Verdict::Implemented
    }
}

/// Validator over a fixed list of implemented signatures
///
/// Aliases register extra signatures served by the same implementation and
/// never count as duplicates of it.
#[derive(Clone, Debug, Default)]
pub struct StaticValidator {
    implementations: HashMap<String, usize>,
}

impl StaticValidator {
    pub fn new<I, S>(signatures: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut validator = Self::default();
        for signature in signatures {
            *validator
                .implementations
                .entry(signature.into())
                .or_insert(0) += 1;
        }
        validator
    }

    /// Register one implementation bound to several signatures
    pub fn with_aliases(mut self, aliases: &[&str]) -> Self {
        for alias in aliases {
            self.implementations.entry(alias.to_string()).or_insert(1);
        }
        self
    }

    pub fn len(&self) -> usize {
        self.implementations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.implementations.is_empty()
    }
}

impl StepValidator for StaticValidator {
    fn validate(&self, signature: &str) -> Verdict {
        match self.implementations.get(signature) {
            None => Verdict::NotImplemented,
            Some(1) => Verdict::Implemented,
            Some(_) => Verdict::Duplicate,
        }
    }
}

struct Walker<'a> {
    dictionary: &'a ConceptDictionary,
    validator: &'a dyn StepValidator,
    errors: &'a mut BuildErrors,
    added: usize,
    /// Concepts already walked, with their first error if any
    concepts: HashMap<String, Option<String>>,
}

impl Walker<'_> {
    /// Check one step; returns the first error message found under it
    fn check(&mut self, step: &Step, file_name: &str) -> Option<String> {
        if step.concept {
            return self.check_concept(step, file_name);
        }

        let message = match self.validator.validate(&step.value) {
            Verdict::Implemented => return None,
            Verdict::NotImplemented => format!("{STEP_NOT_IMPLEMENTED} => '{}'", step.line_text),
            Verdict::Duplicate => format!("{DUPLICATE_IMPLEMENTATION} => '{}'", step.line_text),
        };
        debug!("{}:{} {}", file_name, step.line_no, message);
        self.record(BuildError::validation(
            ErrorScope::Step,
            file_name,
            step.line_no,
            message.clone(),
        ));
        Some(message)
    }

    fn check_concept(&mut self, step: &Step, file_name: &str) -> Option<String> {
        if let Some(result) = self.concepts.get(&step.value) {
            return result.clone();
        }
        let dictionary = self.dictionary;
        let Some(definition) = dictionary.get(&step.value) else {
            let message = format!("Concept definition not found => '{}'", step.line_text);
            self.record(BuildError::validation(
                ErrorScope::Step,
                file_name,
                step.line_no,
                message.clone(),
            ));
            return Some(message);
        };

        // Cycles are rejected when the dictionary is built; the marker only
        // keeps a concept from being walked twice.
        self.concepts.insert(step.value.clone(), None);
        let mut first = None;
        for nested in &definition.steps {
            if let Some(message) = self.check(nested, &definition.file_name) {
                first.get_or_insert(message);
            }
        }
        self.concepts.insert(step.value.clone(), first.clone());
        first
    }

    fn record(&mut self, error: BuildError) {
        self.errors.add(error);
        self.added += 1;
    }
}

/// Validate every spec and record the failures in `errors`
///
/// Returns the number of errors added.
pub fn populate_build_errors(
    specs: &[Arc<Specification>],
    dictionary: &ConceptDictionary,
    validator: &dyn StepValidator,
    errors: &mut BuildErrors,
) -> usize {
    let mut walker = Walker {
        dictionary,
        validator,
        errors,
        added: 0,
        concepts: HashMap::new(),
    };

    for spec in specs {
        let file_name = spec.file_name.as_str();

        let mut spec_error = None;
        for step in spec.contexts.iter().chain(spec.teardowns.iter()) {
            if let Some(message) = walker.check(step, file_name) {
                spec_error.get_or_insert(message);
            }
        }
        if let Some(message) = spec_error {
            walker.record(BuildError::validation(ErrorScope::Spec, file_name, 1, message));
        }

        for scenario in &spec.scenarios {
            let mut scenario_error = None;
            for step in &scenario.steps {
                if let Some(message) = walker.check(step, file_name) {
                    scenario_error.get_or_insert(message);
                }
            }
            if let Some(message) = scenario_error {
                walker.record(BuildError::validation(
                    ErrorScope::Scenario,
                    file_name,
                    scenario.line_no,
                    message,
                ));
            }
        }
    }

    if walker.added > 0 {
        let files: HashSet<&str> = specs.iter().map(|s| s.file_name.as_str()).collect();
        warn!(
            "Validation recorded {} error(s) across {} spec file(s)",
            walker.added,
            files.len()
        );
    }
    walker.added
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Scenario;
    use crate::resolve::ConceptDefinition;

    fn spec() -> Arc<Specification> {
        Arc::new(
            Specification::new("shop.spec", "Shop")
                .with_context(Step::new(2, "Open store"))
                .with_scenario(Scenario::new("Buy", 4).with_step(Step::new(5, "Pay")))
                .with_scenario(
                    Scenario::new("Browse", 8).with_step(Step::new(9, "Look around").as_concept()),
                ),
        )
    }

    fn dictionary() -> ConceptDictionary {
        ConceptDictionary::new(vec![ConceptDefinition::new("Look around", &[], "shop.cpt")
            .with_step(Step::new(2, "Open store"))
            .with_step(Step::new(3, "Scroll"))])
        .unwrap()
    }

    #[test]
    fn test_static_validator_verdicts() {
        let validator = StaticValidator::new(["Pay", "Pay", "Scroll"]).with_aliases(&["Swipe"]);
        assert_eq!(validator.validate("Scroll"), Verdict::Implemented);
        assert_eq!(validator.validate("Swipe"), Verdict::Implemented);
        assert_eq!(validator.validate("Pay"), Verdict::Duplicate);
        assert_eq!(validator.validate("Fly"), Verdict::NotImplemented);
    }

    #[test]
    fn test_missing_step_marks_scenario() {
        let validator = StaticValidator::new(["Open store", "Scroll"]);
        let mut errors = BuildErrors::new();

        let added = populate_build_errors(&[spec()], &dictionary(), &validator, &mut errors);

        assert_eq!(added, 2);
        assert!(errors.step_error("shop.spec", 5).is_some());
        assert_eq!(
            errors.scenario_errors("shop.spec", 4)[0].message,
            "Step implementation not found => 'Pay'"
        );
        assert!(errors.scenario_errors("shop.spec", 8).is_empty());
        assert!(!errors.has_spec_errors("shop.spec"));
    }

    #[test]
    fn test_missing_concept_step_recorded_in_concept_file() {
        let validator = StaticValidator::new(["Open store", "Pay"]);
        let mut errors = BuildErrors::new();

        populate_build_errors(&[spec()], &dictionary(), &validator, &mut errors);

        assert!(errors.step_error("shop.cpt", 3).is_some());
        assert_eq!(errors.scenario_errors("shop.spec", 8).len(), 1);
    }

    #[test]
    fn test_unimplemented_context_is_spec_error() {
        let validator = StaticValidator::new(["Pay", "Scroll"]);
        let mut errors = BuildErrors::new();

        populate_build_errors(&[spec()], &dictionary(), &validator, &mut errors);

        assert!(errors.has_spec_errors("shop.spec"));
        assert!(!errors.has_parse_errors("shop.spec"));
    }

    #[test]
    fn test_accept_all_adds_nothing() {
        let mut errors = BuildErrors::new();
        let added = populate_build_errors(&[spec()], &dictionary(), &AcceptAll, &mut errors);
        assert_eq!(added, 0);
        assert!(errors.is_empty());
    }
}
