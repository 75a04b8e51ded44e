//! Rule: Unreachable Handler
//!
//! Handlers are tested in declaration order and the first match wins, so a
//! handler whose kinds are all caught by an earlier handler of the same
//! region never runs.
//!
//! ```json
//! { "t": "Protect", "handlers": [
//!     { "catch": { "t": "Family", "family": "fault" } },
//!     { "catch": { "t": "Kind", "kind": "IOFailure" } }
//! ] }
//! ```

use crate::analysis::manifest::Site;
use crate::analysis::{AnalysisRule, Diagnostic, Location, Program};

/// Rule that checks for handlers shadowed by earlier ones.
pub struct UnreachableHandlerRule;

impl AnalysisRule for UnreachableHandlerRule {
    fn id(&self) -> &'static str {
        "unreachable-handler"
    }

    fn description(&self) -> &'static str {
        "Handlers should not be shadowed by an earlier handler of the same region"
    }

    fn check(&self, program: &Program<'_>) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();

        for op in program.operations() {
            program.walk(op, &mut |visit| {
                let Site::Protect { handlers, .. } = visit.site else {
                    return;
                };

                // Handlers naming defects are reported by another rule
                let catches: Vec<_> = handlers
                    .iter()
                    .map(|h| program.taxonomy().catch_for(&h.catch))
                    .collect();

                for (later, catch) in catches.iter().enumerate() {
                    let Some(catch) = catch else { continue };

                    let shadowing = catches[..later]
                        .iter()
                        .enumerate()
                        .find_map(|(earlier, c)| c.as_ref().filter(|c| c.covers(catch)).map(|c| (earlier, c)));

                    if let Some((earlier, by)) = shadowing {
                        diagnostics.push(Diagnostic::warning(
                            Location::site(&op.name, &format!("{}.handlers[{later}].catch", visit.location.path)),
                            format!(
                                "handler for {} is unreachable: handler #{} ({}) already catches it",
                                catch, earlier, by
                            ),
                            self.id(),
                        ));
                    }
                }
            });
        }

        diagnostics
    }
}
