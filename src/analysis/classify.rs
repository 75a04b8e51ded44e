//! Obligation classification
//!
//! Every kind that can escape an operation is either *checked* (callers must
//! handle it or declare it themselves) or *unchecked*. Defects and exempt
//! faults are unchecked; every other fault is checked.
//!
//! Checking is modular: a call site is judged against the callee's
//! *declared* tag, and each operation is verified against its own
//! declaration, so the obligation holds transitively along the call graph.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::condition::{kinds, DefectKind, Family, FaultKind, Kind};
use crate::resolver::Catch;

use super::manifest::{CatchDecl, Manifest, OperationDecl, Site};
use super::Location;

/* ===================== Taxonomy ===================== */

#[derive(Debug, Clone, PartialEq, Eq)]
struct KindEntry {
    kind: Kind,
    exempt: bool,
}

/// Known kinds with their family and exemption
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Taxonomy {
    kinds: BTreeMap<String, KindEntry>,
}

impl Taxonomy {
    /// The built-in kinds, with `Timeout` and `Cancelled` exempt
    pub fn builtin() -> Self {
        let exempt: Vec<Kind> = kinds::exempt_by_default().into_iter().map(Kind::from).collect();

        let kinds = kinds::builtin()
            .into_iter()
            .map(|kind| {
                let entry = KindEntry {
                    exempt: exempt.contains(&kind),
                    kind,
                };
                (entry.kind.name().to_string(), entry)
            })
            .collect();

        Self { kinds }
    }

    /// Built-ins plus the kinds declared by `manifest`.
    ///
    /// A declaration with the name of a built-in replaces it.
    pub fn from_manifest(manifest: &Manifest) -> Self {
        let mut taxonomy = Self::builtin();
        for decl in &manifest.kinds {
            taxonomy.declare(&decl.name, decl.family, decl.exempt);
        }
        taxonomy
    }

    pub fn declare(&mut self, name: &str, family: Family, exempt: bool) {
        let kind = match family {
            Family::Fault => Kind::Fault(FaultKind::new(name)),
            Family::Defect => Kind::Defect(DefectKind::new(name)),
        };
        self.kinds.insert(name.to_string(), KindEntry { kind, exempt });
    }

    pub fn lookup(&self, name: &str) -> Option<&Kind> {
        self.kinds.get(name).map(|entry| &entry.kind)
    }

    pub fn family(&self, name: &str) -> Option<Family> {
        self.lookup(name).map(Kind::family)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.kinds.contains_key(name)
    }

    pub fn is_exempt(&self, name: &str) -> bool {
        self.kinds.get(name).is_some_and(|entry| entry.exempt)
    }

    /// A known fault kind that is not exempt
    pub fn is_checked(&self, name: &str) -> bool {
        self.kinds
            .get(name)
            .is_some_and(|entry| !entry.exempt && entry.kind.family() == Family::Fault)
    }

    /// Runtime predicate for a declared handler; `None` if it names a defect
    pub fn catch_for(&self, decl: &CatchDecl) -> Option<Catch> {
        match decl {
            CatchDecl::Kind { kind } => self.fault_kind(kind).map(Catch::kind),
            CatchDecl::OneOf { kinds } => kinds
                .iter()
                .map(|kind| self.fault_kind(kind))
                .collect::<Option<Vec<_>>>()
                .map(Catch::one_of),
            CatchDecl::Family { family: Family::Fault } => Some(Catch::any_fault()),
            CatchDecl::Family { family: Family::Defect } => None,
        }
    }

    /// Unknown names are treated as faults; they are reported separately
    fn fault_kind(&self, name: &str) -> Option<FaultKind> {
        match self.lookup(name) {
            Some(Kind::Defect(_)) => None,
            Some(Kind::Fault(kind)) => Some(kind.clone()),
            None => Some(FaultKind::new(name)),
        }
    }
}

impl Default for Taxonomy {
    fn default() -> Self {
        Self::builtin()
    }
}

/* ===================== Tags ===================== */

/// Obligation attached to an operation's interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "t", content = "kinds")]
pub enum ObligationTag {
    /// Callers must handle or re-declare these kinds
    Checked(BTreeSet<FaultKind>),
    Unchecked,
}

impl ObligationTag {
    /// The checked kinds (empty when unchecked)
    pub fn checked(&self) -> impl Iterator<Item = &FaultKind> {
        let kinds = match self {
            ObligationTag::Checked(kinds) => Some(kinds),
            ObligationTag::Unchecked => None,
        };
        kinds.into_iter().flatten()
    }

    pub fn is_checked(&self, kind: &FaultKind) -> bool {
        matches!(self, ObligationTag::Checked(kinds) if kinds.contains(kind))
    }

    pub fn is_unchecked(&self) -> bool {
        matches!(self, ObligationTag::Unchecked)
    }
}

impl fmt::Display for ObligationTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObligationTag::Unchecked => f.write_str("unchecked"),
            ObligationTag::Checked(kinds) => write!(f, "checked({})", join(kinds)),
        }
    }
}

fn join(kinds: &BTreeSet<FaultKind>) -> String {
    kinds.iter().map(FaultKind::name).collect::<Vec<_>>().join(", ")
}

/// Classify the kinds an operation can raise or forward.
///
/// Every known, non-exempt fault kind is checked. Defects and exempt faults
/// are dropped; unknown names are ignored. With nothing checked the result is
/// [`ObligationTag::Unchecked`].
pub fn classify<'k>(kinds: impl IntoIterator<Item = &'k str>, taxonomy: &Taxonomy) -> ObligationTag {
    let checked: BTreeSet<FaultKind> = kinds
        .into_iter()
        .filter(|name| taxonomy.is_checked(name))
        .map(FaultKind::new)
        .collect();

    if checked.is_empty() {
        ObligationTag::Unchecked
    } else {
        ObligationTag::Checked(checked)
    }
}

/* ===================== Verification ===================== */

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ObligationError {
    #[error("{location}: {}", unacknowledged(.kinds))]
    UnacknowledgedObligation {
        location: Location,
        kinds: BTreeSet<FaultKind>,
    },

    #[error("{location}: {}", invalid_registration(.target))]
    InvalidHandlerRegistration { location: Location, target: String },
}

impl ObligationError {
    pub fn location(&self) -> &Location {
        match self {
            ObligationError::UnacknowledgedObligation { location, .. }
            | ObligationError::InvalidHandlerRegistration { location, .. } => location,
        }
    }

    /// The message without the location prefix
    pub fn detail(&self) -> String {
        match self {
            ObligationError::UnacknowledgedObligation { kinds, .. } => unacknowledged(kinds),
            ObligationError::InvalidHandlerRegistration { target, .. } => invalid_registration(target),
        }
    }
}

fn unacknowledged(kinds: &BTreeSet<FaultKind>) -> String {
    let noun = if kinds.len() == 1 { "kind" } else { "kinds" };
    format!("checked {noun} {} neither handled nor declared", join(kinds))
}

fn invalid_registration(target: &str) -> String {
    format!("handler for {target} is not allowed: defects are never handled")
}

/// Check one raise or call site.
///
/// Every checked kind of `callee_tag` must be matched by one of
/// `enclosing_handlers` or appear in `enclosing_declaration`.
pub fn verify(
    location: &Location,
    callee_tag: &ObligationTag,
    enclosing_handlers: &[Catch],
    enclosing_declaration: &ObligationTag,
) -> Result<(), ObligationError> {
    let unacknowledged: BTreeSet<FaultKind> = callee_tag
        .checked()
        .filter(|kind| !enclosing_handlers.iter().any(|catch| catch.matches_fault(kind)))
        .filter(|kind| !enclosing_declaration.is_checked(kind))
        .cloned()
        .collect();

    if unacknowledged.is_empty() {
        Ok(())
    } else {
        Err(ObligationError::UnacknowledgedObligation {
            location: location.clone(),
            kinds: unacknowledged,
        })
    }
}

/// Check that a declared handler can exist at runtime
pub fn verify_handler(
    location: &Location,
    decl: &CatchDecl,
    taxonomy: &Taxonomy,
) -> Result<Catch, ObligationError> {
    taxonomy
        .catch_for(decl)
        .ok_or_else(|| ObligationError::InvalidHandlerRegistration {
            location: location.clone(),
            target: describe_catch(decl, taxonomy),
        })
}

fn describe_catch(decl: &CatchDecl, taxonomy: &Taxonomy) -> String {
    match decl {
        CatchDecl::Family { family } => format!("the {family} family"),
        other => {
            let defects: Vec<&str> = other
                .kind_names()
                .into_iter()
                .filter(|name| taxonomy.family(name) == Some(Family::Defect))
                .collect();
            format!("defect kind {}", defects.join(", "))
        }
    }
}

/* ===================== Program ===================== */

/// A manifest resolved against its taxonomy
#[derive(Debug)]
pub struct Program<'m> {
    manifest: &'m Manifest,
    taxonomy: Taxonomy,
    operations: BTreeMap<&'m str, &'m OperationDecl>,
}

impl<'m> Program<'m> {
    pub fn new(manifest: &'m Manifest) -> Self {
        // First declaration wins; duplicates are reported by the rules
        let mut operations = BTreeMap::new();
        for op in &manifest.operations {
            operations.entry(op.name.as_str()).or_insert(op);
        }

        Self {
            manifest,
            taxonomy: Taxonomy::from_manifest(manifest),
            operations,
        }
    }

    pub fn manifest(&self) -> &'m Manifest {
        self.manifest
    }

    pub fn taxonomy(&self) -> &Taxonomy {
        &self.taxonomy
    }

    pub fn operation(&self, name: &str) -> Option<&'m OperationDecl> {
        self.operations.get(name).copied()
    }

    /// Operations in manifest order
    pub fn operations(&self) -> impl Iterator<Item = &'m OperationDecl> {
        self.manifest.operations.iter()
    }

    /// Tag of the operation's own declaration
    pub fn declared_tag(&self, op: &OperationDecl) -> ObligationTag {
        classify(op.declares.iter().map(String::as_str), &self.taxonomy)
    }

    /// Tag a call to `name` obliges its caller with
    pub fn callee_tag(&self, name: &str) -> ObligationTag {
        self.operation(name)
            .map(|op| self.declared_tag(op))
            .unwrap_or(ObligationTag::Unchecked)
    }

    /// Names of all kinds that can escape `sites`, checked or not
    pub fn escaping(&self, sites: &[Site]) -> BTreeSet<String> {
        let mut escaping = BTreeSet::new();

        for site in sites {
            match site {
                Site::Raise { kind } => {
                    escaping.insert(kind.clone());
                }
                Site::Call { operation } => {
                    escaping.extend(self.callee_tag(operation).checked().map(|k| k.name().to_string()));
                }
                Site::Protect {
                    handlers,
                    body,
                    cleanup,
                } => {
                    let catches: Vec<Catch> = handlers
                        .iter()
                        .filter_map(|h| self.taxonomy.catch_for(&h.catch))
                        .collect();

                    escaping.extend(
                        self.escaping(body)
                            .into_iter()
                            .filter(|name| !self.caught(name, &catches)),
                    );
                    for handler in handlers {
                        escaping.extend(self.escaping(&handler.body));
                    }
                    escaping.extend(self.escaping(cleanup));
                }
            }
        }

        escaping
    }

    /// Infer the tag of an operation from its body
    pub fn infer(&self, op: &OperationDecl) -> ObligationTag {
        let escaping = self.escaping(&op.body);
        classify(escaping.iter().map(String::as_str), &self.taxonomy)
    }

    fn caught(&self, name: &str, catches: &[Catch]) -> bool {
        match self.taxonomy.lookup(name) {
            Some(kind) => catches.iter().any(|c| c.matches(kind)),
            None => {
                let kind = FaultKind::new(name);
                catches.iter().any(|c| c.matches_fault(&kind))
            }
        }
    }

    /// Visit every site of `op`, with the handlers enclosing it.
    ///
    /// Handler bodies and cleanups run outside their own region, so they
    /// only see the handlers of outer regions.
    pub fn walk(&self, op: &'m OperationDecl, visit: &mut dyn FnMut(SiteVisit<'m, '_>)) {
        let mut enclosing = Vec::new();
        self.walk_sites(op, &op.body, "body", &mut enclosing, visit);
    }

    fn walk_sites(
        &self,
        op: &'m OperationDecl,
        sites: &'m [Site],
        prefix: &str,
        enclosing: &mut Vec<Catch>,
        visit: &mut dyn FnMut(SiteVisit<'m, '_>),
    ) {
        for (index, site) in sites.iter().enumerate() {
            let path = format!("{prefix}[{index}]");

            visit(SiteVisit {
                operation: op,
                site,
                location: Location::site(&op.name, &path),
                enclosing: enclosing.as_slice(),
            });

            if let Site::Protect {
                handlers,
                body,
                cleanup,
            } = site
            {
                let outer = enclosing.len();
                enclosing.extend(handlers.iter().filter_map(|h| self.taxonomy.catch_for(&h.catch)));
                self.walk_sites(op, body, &format!("{path}.body"), enclosing, visit);
                enclosing.truncate(outer);

                for (h, handler) in handlers.iter().enumerate() {
                    self.walk_sites(op, &handler.body, &format!("{path}.handlers[{h}].body"), enclosing, visit);
                }
                self.walk_sites(op, cleanup, &format!("{path}.cleanup"), enclosing, visit);
            }
        }
    }
}

/// One site reached by [`Program::walk`]
#[derive(Debug)]
pub struct SiteVisit<'m, 'e> {
    pub operation: &'m OperationDecl,
    pub site: &'m Site,
    pub location: Location,
    /// Predicates of the handlers around this site, outermost first
    pub enclosing: &'e [Catch],
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::manifest::{HandlerDecl, KindDecl};
    use maplit::btreeset;

    fn raise(kind: &str) -> Site {
        Site::Raise {
            kind: kind.to_string(),
        }
    }

    fn call(operation: &str) -> Site {
        Site::Call {
            operation: operation.to_string(),
        }
    }

    fn op(name: &str, declares: &[&str], body: Vec<Site>) -> OperationDecl {
        OperationDecl {
            name: name.to_string(),
            declares: declares.iter().map(|s| s.to_string()).collect(),
            body,
        }
    }

    #[test]
    fn test_classify_drops_defects_and_exempt() {
        let taxonomy = Taxonomy::builtin();
        let tag = classify(["IOFailure", "Timeout", "Internal", "NotFound"], &taxonomy);

        assert_eq!(
            tag,
            ObligationTag::Checked(btreeset! {kinds::IO_FAILURE, kinds::NOT_FOUND})
        );
        assert_eq!(classify(["Cancelled", "InvariantViolation"], &taxonomy), ObligationTag::Unchecked);
    }

    #[test]
    fn test_declared_kinds_extend_taxonomy() {
        let manifest = Manifest {
            kinds: vec![
                KindDecl {
                    name: "QuotaExceeded".into(),
                    family: Family::Fault,
                    exempt: false,
                },
                KindDecl {
                    name: "Timeout".into(),
                    family: Family::Fault,
                    exempt: false,
                },
            ],
            operations: vec![],
        };
        let taxonomy = Taxonomy::from_manifest(&manifest);

        assert!(taxonomy.is_checked("QuotaExceeded"));
        // Redeclaring a built-in replaces its exemption
        assert!(taxonomy.is_checked("Timeout"));
        assert!(!taxonomy.is_checked("Cancelled"));
    }

    #[test]
    fn test_verify_accepts_handled_or_declared() {
        let location = Location::site("fetch", "body[0]");
        let tag = classify(["IOFailure", "NotFound"], &Taxonomy::builtin());

        let handlers = vec![Catch::kind(kinds::IO_FAILURE)];
        let declared = ObligationTag::Checked(btreeset! {kinds::NOT_FOUND});
        assert!(verify(&location, &tag, &handlers, &declared).is_ok());

        let err = verify(&location, &tag, &handlers, &ObligationTag::Unchecked).unwrap_err();
        assert_eq!(
            err,
            ObligationError::UnacknowledgedObligation {
                location: location.clone(),
                kinds: btreeset! {kinds::NOT_FOUND},
            }
        );
        assert_eq!(err.to_string(), "fetch:body[0]: checked kind NotFound neither handled nor declared");
    }

    #[test]
    fn test_verify_unchecked_callee_needs_nothing() {
        let location = Location::site("tick", "body[0]");
        assert!(verify(&location, &ObligationTag::Unchecked, &[], &ObligationTag::Unchecked).is_ok());
    }

    #[test]
    fn test_verify_handler_rejects_defects() {
        let taxonomy = Taxonomy::builtin();
        let location = Location::site("load", "body[0]");

        let err = verify_handler(
            &location,
            &CatchDecl::OneOf {
                kinds: vec!["IOFailure".into(), "Internal".into()],
            },
            &taxonomy,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ObligationError::InvalidHandlerRegistration { ref target, .. } if target == "defect kind Internal"
        ));

        let family = verify_handler(
            &location,
            &CatchDecl::Family {
                family: Family::Defect,
            },
            &taxonomy,
        );
        assert!(family.is_err());

        let ok = verify_handler(
            &location,
            &CatchDecl::Family {
                family: Family::Fault,
            },
            &taxonomy,
        );
        assert_eq!(ok.unwrap(), Catch::AnyFault);
    }

    #[test]
    fn test_infer_subtracts_handled_kinds() {
        let manifest = Manifest {
            kinds: vec![],
            operations: vec![
                op("read_block", &["IOFailure"], vec![raise("IOFailure")]),
                op(
                    "load",
                    &[],
                    vec![
                        Site::Protect {
                            handlers: vec![HandlerDecl {
                                catch: CatchDecl::Kind {
                                    kind: "IOFailure".into(),
                                },
                                body: vec![raise("NotFound")],
                            }],
                            body: vec![call("read_block"), raise("Timeout")],
                            cleanup: vec![raise("InvalidInput")],
                        },
                        raise("Internal"),
                    ],
                ),
            ],
        };
        let program = Program::new(&manifest);
        let load = program.operation("load").unwrap();

        assert_eq!(
            program.escaping(&load.body),
            btreeset! {
                "NotFound".to_string(),
                "Timeout".to_string(),
                "InvalidInput".to_string(),
                "Internal".to_string(),
            }
        );
        assert_eq!(
            program.infer(load),
            ObligationTag::Checked(btreeset! {kinds::NOT_FOUND, kinds::INVALID_INPUT})
        );
        assert_eq!(
            program.callee_tag("read_block"),
            ObligationTag::Checked(btreeset! {kinds::IO_FAILURE})
        );
        assert_eq!(program.callee_tag("missing"), ObligationTag::Unchecked);
    }

    #[test]
    fn test_walk_paths_and_enclosing_handlers() {
        let manifest = Manifest {
            kinds: vec![],
            operations: vec![op(
                "sync",
                &[],
                vec![Site::Protect {
                    handlers: vec![HandlerDecl {
                        catch: CatchDecl::Kind {
                            kind: "IOFailure".into(),
                        },
                        body: vec![raise("NotFound")],
                    }],
                    body: vec![raise("IOFailure")],
                    cleanup: vec![raise("InvalidInput")],
                }],
            )],
        };
        let program = Program::new(&manifest);
        let sync = program.operation("sync").unwrap();

        let mut seen = Vec::new();
        program.walk(sync, &mut |visit| {
            seen.push((visit.location.path.clone(), visit.enclosing.len()));
        });

        assert_eq!(
            seen,
            vec![
                ("body[0]".to_string(), 0),
                ("body[0].body[0]".to_string(), 1),
                ("body[0].handlers[0].body[0]".to_string(), 0),
                ("body[0].cleanup[0]".to_string(), 0),
            ]
        );
    }
}
