//! Duplicate detection policy and the operator decision seam.

use std::fmt;
use std::path::Path;

use archivist_core::Identity;
use archivist_store::{MetadataStore, StoreError};
use serde::{Deserialize, Serialize};

/// Maximum number of existing copies listed for one candidate.
pub const SHOWN_COPIES: usize = 10;

/// What to do with a candidate whose identity is already archived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DuplicatePolicy {
    /// Never add a duplicate.
    Skip,
    /// Always add a duplicate.
    Accept,
    /// No operator available and no explicit choice: skip.
    SkipNonInteractive,
    /// Ask the operator for each duplicate.
    #[default]
    Ask,
}

impl DuplicatePolicy {
    /// Resolve the policy from operator flags.
    ///
    /// An explicit skip wins over accept; either wins over non-interactive.
    pub fn from_flags(skip: bool, accept: bool, non_interactive: bool) -> Self {
        match (skip, accept, non_interactive) {
            (true, _, _) => Self::Skip,
            (false, true, _) => Self::Accept,
            (false, false, true) => Self::SkipNonInteractive,
            (false, false, false) => Self::Ask,
        }
    }
}

impl fmt::Display for DuplicatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skip => write!(f, "skip duplicates"),
            Self::Accept => write!(f, "accept duplicates"),
            Self::SkipNonInteractive => write!(f, "skip duplicates (non-interactive)"),
            Self::Ask => write!(f, "ask"),
        }
    }
}

/// Archived paths already holding a candidate's identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExistingCopies {
    /// Up to [`SHOWN_COPIES`] paths, oldest first.
    pub paths: Vec<String>,
    /// Total number of entries with the identity.
    pub total: u64,
}

impl ExistingCopies {
    /// Look up existing copies of an identity. None if there are none.
    pub fn lookup(store: &MetadataStore, identity: &Identity) -> Result<Option<Self>, StoreError> {
        let total = store.count_by_identity(identity.size, &identity.fingerprint)?;
        if total == 0 {
            return Ok(None);
        }
        let paths = store.find_by_identity(identity.size, &identity.fingerprint, SHOWN_COPIES)?;
        Ok(Some(Self { paths, total }))
    }

    /// Copies not included in `paths`.
    pub fn remaining(&self) -> u64 {
        self.total.saturating_sub(self.paths.len() as u64)
    }
}

impl fmt::Display for ExistingCopies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Existing copies:")?;
        for path in &self.paths {
            writeln!(f, "  - {path}")?;
        }
        match self.remaining() {
            0 => Ok(()),
            n => writeln!(f, "  ... +{n} more"),
        }
    }
}

/// Decides whether a duplicate candidate should be added anyway.
///
/// Consulted only under [`DuplicatePolicy::Ask`].
pub trait DuplicatePrompt {
    /// Return true to add the candidate.
    fn confirm(&mut self, candidate: &Path, identity: &Identity, existing: &ExistingCopies) -> bool;
}

impl<F> DuplicatePrompt for F
where
    F: FnMut(&Path, &Identity, &ExistingCopies) -> bool,
{
    fn confirm(&mut self, candidate: &Path, identity: &Identity, existing: &ExistingCopies) -> bool {
        self(candidate, identity, existing)
    }
}

/// Interpret an operator's answer; anything other than yes is no.
pub fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Outcome of applying the policy to one duplicate candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Decision {
    Add,
    Skip,
}

pub(crate) fn decide(
    policy: DuplicatePolicy,
    prompt: &mut dyn DuplicatePrompt,
    candidate: &Path,
    identity: &Identity,
    existing: &ExistingCopies,
) -> Decision {
    let add = match policy {
        DuplicatePolicy::Skip | DuplicatePolicy::SkipNonInteractive => false,
        DuplicatePolicy::Accept => true,
        DuplicatePolicy::Ask => prompt.confirm(candidate, identity, existing),
    };
    if add { Decision::Add } else { Decision::Skip }
}
