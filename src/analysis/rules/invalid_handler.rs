//! Rule: Invalid Handler Registration
//!
//! Reports an error for a handler whose predicate names a defect kind or the
//! defect family. Defects are never handled, so such a handler could never
//! be registered at runtime.

use crate::analysis::manifest::Site;
use crate::analysis::{verify_handler, AnalysisRule, Diagnostic, Location, Program};

/// Rule that checks handlers only target faults.
pub struct InvalidHandlerRegistrationRule;

impl InvalidHandlerRegistrationRule {
    pub const ID: &'static str = "invalid-handler-registration";
}

impl AnalysisRule for InvalidHandlerRegistrationRule {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn description(&self) -> &'static str {
        "Handlers may not be registered against defect kinds"
    }

    fn check(&self, program: &Program<'_>) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();

        for op in program.operations() {
            program.walk(op, &mut |visit| {
                let Site::Protect { handlers, .. } = visit.site else {
                    return;
                };

                for (h, handler) in handlers.iter().enumerate() {
                    let location =
                        Location::site(&op.name, &format!("{}.handlers[{h}].catch", visit.location.path));
                    if let Err(err) = verify_handler(&location, &handler.catch, program.taxonomy()) {
                        diagnostics.push(err.into());
                    }
                }
            });
        }

        diagnostics
    }
}
