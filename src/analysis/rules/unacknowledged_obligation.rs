//! Rule: Unacknowledged Obligation
//!
//! Reports an error for a raise or call site whose checked kinds are
//! neither caught by an enclosing handler nor declared by the operation.
//!
//! # Valid
//!
//! ```json
//! { "name": "load", "declares": ["NotFound"],
//!   "body": [{ "t": "Raise", "kind": "NotFound" }] }
//! ```
//!
//! # Invalid
//!
//! ```json
//! { "name": "load",
//!   "body": [{ "t": "Call", "operation": "read_block" }] }
//! ```
//!
//! where `read_block` declares `IOFailure`.

use crate::analysis::manifest::Site;
use crate::analysis::{classify, verify, AnalysisRule, Diagnostic, Program};

/// Rule that checks every checked kind is handled or declared.
pub struct UnacknowledgedObligationRule;

impl UnacknowledgedObligationRule {
    pub const ID: &'static str = "unacknowledged-obligation";
}

impl AnalysisRule for UnacknowledgedObligationRule {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn description(&self) -> &'static str {
        "Checked kinds must be handled or declared by the enclosing operation"
    }

    fn check(&self, program: &Program<'_>) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();

        for op in program.operations() {
            let declared = program.declared_tag(op);

            program.walk(op, &mut |visit| {
                let tag = match visit.site {
                    Site::Raise { kind } => classify([kind.as_str()], program.taxonomy()),
                    Site::Call { operation } => program.callee_tag(operation),
                    Site::Protect { .. } => return,
                };

                if let Err(err) = verify(&visit.location, &tag, visit.enclosing, &declared) {
                    diagnostics.push(err.into());
                }
            });
        }

        diagnostics
    }
}
