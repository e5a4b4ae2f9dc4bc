//! Authorization mode candidates.

use ferrydb_core::AuthMode;
use std::vec;

/// The ordered authorization modes to try for one model and operation.
///
/// The list is finite and fixed once resolved. Each fetch cycle walks it
/// once through [`AuthModeCandidates::attempts`]; a cycle never uses a
/// candidate twice, so the number of attempts is bounded by [`len`].
///
/// [`len`]: AuthModeCandidates::len
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthModeCandidates {
    modes: Vec<AuthMode>,
}

impl AuthModeCandidates {
    /// Creates a candidate list. Later duplicates of a mode are dropped.
    pub fn new(modes: impl IntoIterator<Item = AuthMode>) -> Self {
        let mut unique = Vec::new();
        for mode in modes {
            if !unique.contains(&mode) {
                unique.push(mode);
            }
        }
        Self { modes: unique }
    }

    /// A list holding only [`AuthMode::Default`].
    pub fn single_default() -> Self {
        Self::new([AuthMode::Default])
    }

    /// Returns the number of candidates.
    pub fn len(&self) -> usize {
        self.modes.len()
    }

    /// Returns true if there is no candidate.
    pub fn is_empty(&self) -> bool {
        self.modes.is_empty()
    }

    /// Returns the candidates in order.
    pub fn as_slice(&self) -> &[AuthMode] {
        &self.modes
    }

    /// Starts a new single-pass walk over the candidates.
    pub fn attempts(&self) -> vec::IntoIter<AuthMode> {
        self.modes.clone().into_iter()
    }
}
