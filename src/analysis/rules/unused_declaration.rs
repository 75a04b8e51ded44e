//! Rule: Unused Declaration
//!
//! Warns about entries in an operation's `declares` list that mean nothing:
//! a checked kind that can never escape the body, or a defect kind (defects
//! are unchecked and need no declaration).

use crate::analysis::{AnalysisRule, Diagnostic, Location, Program};
use crate::condition::{Family, FaultKind};

/// Rule that checks declarations match what the body can raise.
pub struct UnusedDeclarationRule;

impl AnalysisRule for UnusedDeclarationRule {
    fn id(&self) -> &'static str {
        "unused-declaration"
    }

    fn description(&self) -> &'static str {
        "Declared kinds should be able to escape the operation"
    }

    fn check(&self, program: &Program<'_>) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        let taxonomy = program.taxonomy();

        for op in program.operations() {
            let inferred = program.infer(op);

            for (d, name) in op.declares.iter().enumerate() {
                let location = Location::site(&op.name, &format!("declares[{d}]"));

                if taxonomy.family(name) == Some(Family::Defect) {
                    diagnostics.push(Diagnostic::warning(
                        location,
                        format!("'{}' is a defect kind and needs no declaration", name),
                        self.id(),
                    ));
                } else if taxonomy.is_checked(name) && !inferred.is_checked(&FaultKind::new(name.as_str())) {
                    diagnostics.push(Diagnostic::warning(
                        location,
                        format!("'{}' is declared but never escapes '{}'", name, op.name),
                        self.id(),
                    ));
                }
            }
        }

        diagnostics
    }
}
