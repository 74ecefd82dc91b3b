//! Concept dictionary and expansion
//!
//! A concept is a named group of steps invoked like a single step. The
//! dictionary is built once per run and rejects duplicate signatures,
//! references to unknown concepts and cyclic definitions. Expansion turns
//! an invocation into a result tree whose leaves carry resolved parameters.

#![allow(dead_code)]

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

use super::params::{actual_text, resolve_parameters};
use super::{ArgLookup, ResolveError, SpecialResolver};
use crate::models::{BuildErrors, ConceptResult, ItemResult, Step, StepArg, StepResult};

/// Concept definition as produced by the parser
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConceptDefinition {
    /// Signature with `{}` placeholders
    pub value: String,
    /// Placeholder names, in signature order
    #[serde(default)]
    pub params: Vec<String>,
    #[serde(default)]
    pub steps: Vec<Step>,
    pub file_name: String,
    #[serde(default)]
    pub line_no: usize,
}

impl ConceptDefinition {
    pub fn new(value: impl Into<String>, params: &[&str], file_name: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            params: params.iter().map(|p| p.to_string()).collect(),
            steps: Vec::new(),
            file_name: file_name.into(),
            line_no: 1,
        }
    }

    pub fn with_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    fn nested_concepts(&self) -> impl Iterator<Item = &Step> {
        self.steps.iter().filter(|s| s.concept)
    }
}

/// Errors rejected when building the dictionary
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConceptError {
    #[error("Duplicate concept definition found: '{signature}' in {file_name}")]
    Duplicate {
        signature: String,
        file_name: String,
    },

    #[error("Concept '{referenced_by}' uses undefined concept '{signature}'")]
    Undefined {
        signature: String,
        referenced_by: String,
    },

    #[error("Circular reference in concepts: {}", .chain.join(" -> "))]
    Cycle { chain: Vec<String> },
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Immutable signature to definition map
#[derive(Clone, Debug, Default)]
pub struct ConceptDictionary {
    concepts: IndexMap<String, ConceptDefinition>,
}

impl ConceptDictionary {
    /// Build and check the dictionary
    pub fn new(definitions: Vec<ConceptDefinition>) -> Result<Self, ConceptError> {
        let mut concepts: IndexMap<String, ConceptDefinition> =
            IndexMap::with_capacity(definitions.len());
        for definition in definitions {
            if let Some(existing) = concepts.get(&definition.value) {
                return Err(ConceptError::Duplicate {
                    signature: definition.value.clone(),
                    file_name: existing.file_name.clone(),
                });
            }
            concepts.insert(definition.value.clone(), definition);
        }

        let dictionary = Self { concepts };
        dictionary.check_references()?;
        if let Some(chain) = dictionary.find_cycle() {
            return Err(ConceptError::Cycle { chain });
        }

        debug!("Concept dictionary built with {} concepts", dictionary.len());
        Ok(dictionary)
    }

    pub fn get(&self, signature: &str) -> Option<&ConceptDefinition> {
        self.concepts.get(signature)
    }

    pub fn contains(&self, signature: &str) -> bool {
        self.concepts.contains_key(signature)
    }

    pub fn len(&self) -> usize {
        self.concepts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.concepts.is_empty()
    }

    pub fn definitions(&self) -> impl Iterator<Item = &ConceptDefinition> {
        self.concepts.values()
    }

    fn check_references(&self) -> Result<(), ConceptError> {
        for definition in self.concepts.values() {
            for step in definition.nested_concepts() {
                if !self.contains(&step.value) {
                    return Err(ConceptError::Undefined {
                        signature: step.value.clone(),
                        referenced_by: definition.value.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    fn find_cycle(&self) -> Option<Vec<String>> {
        let mut marks = HashMap::new();
        let mut stack = Vec::new();
        self.concepts
            .keys()
            .find_map(|signature| self.visit(signature, &mut marks, &mut stack))
    }

    fn visit<'a>(
        &'a self,
        signature: &'a str,
        marks: &mut HashMap<&'a str, Mark>,
        stack: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        match marks.get(signature) {
            Some(Mark::Done) => return None,
            Some(Mark::Visiting) => {
                let start = stack.iter().position(|s| *s == signature).unwrap_or(0);
                let mut chain: Vec<String> = stack[start..].iter().map(|s| s.to_string()).collect();
                chain.push(signature.to_string());
                return Some(chain);
            }
            None => {}
        }

        marks.insert(signature, Mark::Visiting);
        stack.push(signature);
        if let Some(definition) = self.concepts.get(signature) {
            for step in definition.nested_concepts() {
                if let Some(chain) = self.visit(&step.value, marks, stack) {
                    return Some(chain);
                }
            }
        }
        stack.pop();
        marks.insert(signature, Mark::Done);
        None
    }
}

/// Resolves spec steps into executable result trees
pub struct StepResolver<'a> {
    dictionary: &'a ConceptDictionary,
    build_errors: &'a BuildErrors,
    special: &'a SpecialResolver,
}

impl<'a> StepResolver<'a> {
    pub fn new(
        dictionary: &'a ConceptDictionary,
        build_errors: &'a BuildErrors,
        special: &'a SpecialResolver,
    ) -> Self {
        Self {
            dictionary,
            build_errors,
            special,
        }
    }

    /// Resolve a list of steps declared in `file_name`
    pub fn resolve_items(
        &self,
        steps: &[Step],
        file_name: &str,
        lookup: &ArgLookup,
    ) -> Result<Vec<ItemResult>, ResolveError> {
        steps
            .iter()
            .map(|step| self.resolve_item(step, file_name, lookup))
            .collect()
    }

    pub fn resolve_item(
        &self,
        step: &Step,
        file_name: &str,
        lookup: &ArgLookup,
    ) -> Result<ItemResult, ResolveError> {
        if step.concept {
            let mut chain = Vec::new();
            self.expand_concept(step, lookup, &mut chain)
                .map(ItemResult::Concept)
        } else {
            self.resolve_leaf(step, file_name, lookup).map(ItemResult::Step)
        }
    }

    fn resolve_leaf(
        &self,
        step: &Step,
        file_name: &str,
        lookup: &ArgLookup,
    ) -> Result<StepResult, ResolveError> {
        let parameters = resolve_parameters(step, lookup, self.special)?;
        let text = actual_text(&step.value, &parameters);
        let mut result = StepResult::new(&step.value, text, step.line_no, parameters);
        if let Some(error) = self.build_errors.step_error(file_name, step.line_no) {
            result.skip(&error.message);
        }
        Ok(result)
    }

    /// Expand a concept invocation, binding its resolved arguments by
    /// position into a fresh lookup for the definition's placeholders
    fn expand_concept(
        &self,
        step: &Step,
        caller: &ArgLookup,
        chain: &mut Vec<String>,
    ) -> Result<ConceptResult, ResolveError> {
        let definition = self
            .dictionary
            .get(&step.value)
            .ok_or_else(|| ResolveError::UnknownConcept(step.value.clone()))?;

        if chain.contains(&definition.value) {
            let mut cycle = chain.clone();
            cycle.push(definition.value.clone());
            return Err(ResolveError::RecursiveConcept(cycle));
        }

        let parameters = resolve_parameters(step, caller, self.special)?;
        if parameters.len() != definition.params.len() {
            return Err(ResolveError::ArgumentCount {
                signature: definition.value.clone(),
                expected: definition.params.len(),
                found: parameters.len(),
            });
        }

        let mut scope = ArgLookup::new();
        for (name, parameter) in definition.params.iter().zip(&parameters) {
            scope.add(
                name.clone(),
                StepArg {
                    name: name.clone(),
                    value: parameter.value.clone(),
                    kind: parameter.kind,
                    table: parameter.table.clone(),
                },
            );
        }

        let text = actual_text(&step.value, &parameters);
        let mut concept = ConceptResult::new(&step.value, text, step.line_no, parameters);

        chain.push(definition.value.clone());
        for child in &definition.steps {
            let item = if child.concept {
                ItemResult::Concept(self.expand_concept(child, &scope, chain)?)
            } else {
                ItemResult::Step(self.resolve_leaf(child, &definition.file_name, &scope)?)
            };
            concept.items.push(item);
        }
        chain.pop();

        Ok(concept)
    }
}
