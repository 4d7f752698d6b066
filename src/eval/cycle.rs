//! Per-render-pass state for `{% cycle %}` tags.
//!
//! Every pass owns one [`CycleRegistry`]. Nothing in it outlives the
//! pass, so rendering the same [`Template`](crate::Template) twice starts
//! every rotation from the first value again.

use std::collections::HashMap;

use crate::ast::expr::Expr;
use crate::ast::template::{CycleKey, CycleNode};
use crate::ast::value::Value;

/// What a cycle step decided: which value expression to evaluate and
/// whether its result should be written to the output.
///
/// The step is handed back to [`CycleRegistry::finish`] together with
/// the evaluated value.
#[derive(Debug)]
pub(crate) struct Step {
    pub expr: Expr,
    pub silent: bool,
    commit: Commit,
}

/// Where the evaluated value of a step goes.
#[derive(Debug)]
enum Commit {
    Anonymous,
    /// Record the value on an existing binding.
    Current(String),
    /// Install a new binding, replacing any other under the same name.
    /// Until then the name still resolves to whatever it meant before.
    Install(String, Binding),
}

#[derive(Debug)]
struct Binding {
    /// The defining tag that created this binding.
    origin: CycleKey,
    values: Vec<Expr>,
    /// Index of the value the next step returns.
    index: usize,
    silent: bool,
    /// Value produced by the most recent step.
    current: Value,
}

#[derive(Default)]
pub(crate) struct CycleRegistry {
    named: HashMap<String, Binding>,
    anonymous: HashMap<CycleKey, usize>,
}

impl CycleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Step a defining tag.
    ///
    /// A tag that already owns its binding continues the rotation. A
    /// binding created by some other tag is replaced once the step is
    /// finished.
    pub fn step_defining(&mut self, node: &CycleNode) -> Option<Step> {
        let Some(binding) = &node.binding else {
            let index = self.anonymous.entry(node.key).or_insert(0);
            let expr = node.values.get(*index)?.clone();
            *index = (*index + 1) % node.values.len();
            tracing::trace!(key = ?node.key, index = *index, "cycle step");
            return Some(Step {
                expr,
                silent: false,
                commit: Commit::Anonymous,
            });
        };

        let owned = self
            .named
            .get(&binding.name)
            .is_some_and(|b| b.origin == node.key);
        if owned {
            return self.step_named(&binding.name);
        }

        let expr = node.values.first()?.clone();
        Some(Step {
            expr,
            silent: binding.silent,
            commit: Commit::Install(
                binding.name.clone(),
                Binding {
                    origin: node.key,
                    values: node.values.clone(),
                    index: 1 % node.values.len(),
                    silent: binding.silent,
                    current: Value::None,
                },
            ),
        })
    }

    /// Step the binding registered under `name`, as a reference does.
    ///
    /// Returns `None` if no defining tag has created it in this pass.
    pub fn step_named(&mut self, name: &str) -> Option<Step> {
        let binding = self.named.get_mut(name)?;
        let expr = binding.values.get(binding.index)?.clone();
        binding.index = (binding.index + 1) % binding.values.len();
        tracing::trace!(name, index = binding.index, "cycle step");

        Some(Step {
            expr,
            silent: binding.silent,
            commit: Commit::Current(name.to_string()),
        })
    }

    /// Record the value a step's expression evaluated to.
    pub fn finish(&mut self, step: Step, value: Value) {
        match step.commit {
            Commit::Anonymous => {}
            Commit::Current(name) => {
                if let Some(binding) = self.named.get_mut(&name) {
                    binding.current = value;
                }
            }
            Commit::Install(name, mut binding) => {
                tracing::debug!(name = %name, silent = binding.silent, "cycle binding created");
                binding.current = value;
                self.named.insert(name, binding);
            }
        }
    }

    /// The most recent value of a named binding, without advancing it.
    pub fn current(&self, name: &str) -> Option<&Value> {
        self.named.get(name).map(|b| &b.current)
    }

    /// Names of all bindings created so far in this pass.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.named.keys().map(String::as_str)
    }
}
