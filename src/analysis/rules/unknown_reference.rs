//! Rule: Unknown Reference
//!
//! Reports an error for every name that does not resolve:
//!
//! - a raised, declared or caught kind that is neither built in nor declared
//! - a call to an operation the manifest does not define
//! - a kind or operation defined twice
//! - a built-in kind redeclared with the other family

use std::collections::HashSet;

use crate::analysis::manifest::Site;
use crate::analysis::{AnalysisRule, Diagnostic, Location, Program, Taxonomy};

/// Rule that checks every kind and operation name resolves.
pub struct UnknownReferenceRule;

impl UnknownReferenceRule {
    pub const ID: &'static str = "unknown-reference";
}

impl AnalysisRule for UnknownReferenceRule {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn description(&self) -> &'static str {
        "Kinds and operations must be declared exactly once"
    }

    fn check(&self, program: &Program<'_>) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        let manifest = program.manifest();
        let builtin = Taxonomy::builtin();

        // Kind declarations
        let mut seen = HashSet::new();
        for (index, decl) in manifest.kinds.iter().enumerate() {
            let location = Location::manifest(format!("kinds[{index}]"));

            if !seen.insert(decl.name.as_str()) {
                diagnostics.push(Diagnostic::error(
                    location,
                    format!("kind '{}' is declared more than once", decl.name),
                    self.id(),
                ));
                continue;
            }

            if let Some(family) = builtin.family(&decl.name) {
                if family != decl.family {
                    diagnostics.push(Diagnostic::error(
                        location,
                        format!(
                            "built-in {} kind '{}' cannot be redeclared as a {}",
                            family, decl.name, decl.family
                        ),
                        self.id(),
                    ));
                }
            }
        }

        // Operations
        let mut seen = HashSet::new();
        for (index, op) in manifest.operations.iter().enumerate() {
            if !seen.insert(op.name.as_str()) {
                diagnostics.push(Diagnostic::error(
                    Location::manifest(format!("operations[{index}]")),
                    format!("operation '{}' is defined more than once", op.name),
                    self.id(),
                ));
                continue;
            }

            for (d, name) in op.declares.iter().enumerate() {
                if !program.taxonomy().contains(name) {
                    diagnostics.push(Diagnostic::error(
                        Location::site(&op.name, &format!("declares[{d}]")),
                        format!("declared kind '{}' is not defined", name),
                        self.id(),
                    ));
                }
            }

            program.walk(op, &mut |visit| match visit.site {
                Site::Raise { kind } if !program.taxonomy().contains(kind) => {
                    diagnostics.push(Diagnostic::error(
                        visit.location,
                        format!("raised kind '{}' is not defined", kind),
                        self.id(),
                    ));
                }
                Site::Call { operation } if program.operation(operation).is_none() => {
                    diagnostics.push(Diagnostic::error(
                        visit.location,
                        format!("call to undefined operation '{}'", operation),
                        self.id(),
                    ));
                }
                Site::Protect { handlers, .. } => {
                    for (h, handler) in handlers.iter().enumerate() {
                        for name in handler.catch.kind_names() {
                            if !program.taxonomy().contains(name) {
                                diagnostics.push(Diagnostic::error(
                                    Location::site(
                                        &op.name,
                                        &format!("{}.handlers[{h}].catch", visit.location.path),
                                    ),
                                    format!("caught kind '{}' is not defined", name),
                                    self.id(),
                                ));
                            }
                        }
                    }
                }
                _ => {}
            });
        }

        diagnostics
    }
}
