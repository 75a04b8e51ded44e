//! Analysis Rules
//!
//! Each file in this module contains one rule:
//!
//! - `unknown_reference.rs` - Undeclared kinds, unknown operations, duplicates
//! - `invalid_handler.rs` - Handlers registered against defects
//! - `unacknowledged_obligation.rs` - Checked kinds neither handled nor declared
//! - `unused_declaration.rs` - Declared kinds that never escape
//! - `unreachable_handler.rs` - Handlers shadowed by an earlier handler

mod invalid_handler;
mod unacknowledged_obligation;
mod unknown_reference;
mod unreachable_handler;
mod unused_declaration;

pub use invalid_handler::InvalidHandlerRegistrationRule;
pub use unacknowledged_obligation::UnacknowledgedObligationRule;
pub use unknown_reference::UnknownReferenceRule;
pub use unreachable_handler::UnreachableHandlerRule;
pub use unused_declaration::UnusedDeclarationRule;
