use thiserror::Error;

/// Precondition failures detected before a hierarchy is built.
///
/// Graph inconsistencies (dangling parents, forbidden transitions, cycles) are
/// never reported here; they only shape the resulting tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HierarchyError {
    #[error("placetype allow-set is empty; every record would be discarded")]
    EmptyAllowSet,

    #[error("root placetype `{0}` is not in the placetype allow-set")]
    RootNotAllowed(String),

    #[error("transition table has no entry for root placetype `{0}`")]
    MissingRootTransitions(String),

    #[error("duplicate record id `{0}` rejected in strict mode")]
    DuplicateId(String),
}
