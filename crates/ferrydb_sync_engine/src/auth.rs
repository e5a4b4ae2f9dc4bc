//! Authorization mode resolution.

use async_trait::async_trait;
use ferrydb_core::{AuthMode, ModelSchema};
use ferrydb_sync_protocol::{AuthModeCandidates, ModelOperation};
use std::sync::atomic::{AtomicBool, Ordering};

/// Decides which auth modes to try, in order, for a model operation.
#[async_trait]
pub trait AuthModeResolver: Send + Sync {
    /// Returns the ordered candidates for `operation` on `schema`.
    async fn candidate_modes(
        &self,
        schema: &ModelSchema,
        operation: ModelOperation,
    ) -> AuthModeCandidates;
}

/// Always uses the transport's default auth mode.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultAuthModeResolver;

#[async_trait]
impl AuthModeResolver for DefaultAuthModeResolver {
    async fn candidate_modes(
        &self,
        _schema: &ModelSchema,
        _operation: ModelOperation,
    ) -> AuthModeCandidates {
        AuthModeCandidates::single_default()
    }
}

/// Tries every auth mode a schema allows, most specific first.
///
/// User-bound modes come first, then IAM, then API key. While no user is
/// signed in, modes that need one are left out. A schema that declares no
/// auth modes falls back to [`AuthMode::Default`].
#[derive(Debug, Default)]
pub struct MultiAuthModeResolver {
    signed_in: AtomicBool,
}

impl MultiAuthModeResolver {
    /// Creates a resolver with the given sign-in state.
    pub fn new(signed_in: bool) -> Self {
        Self {
            signed_in: AtomicBool::new(signed_in),
        }
    }

    /// Updates the sign-in state.
    pub fn set_signed_in(&self, signed_in: bool) {
        self.signed_in.store(signed_in, Ordering::SeqCst);
    }

    fn priority(mode: AuthMode) -> u8 {
        match mode {
            AuthMode::UserPools => 0,
            AuthMode::Oidc => 1,
            AuthMode::Function => 2,
            AuthMode::Iam => 3,
            AuthMode::ApiKey => 4,
            AuthMode::Default => 5,
        }
    }
}

#[async_trait]
impl AuthModeResolver for MultiAuthModeResolver {
    async fn candidate_modes(
        &self,
        schema: &ModelSchema,
        _operation: ModelOperation,
    ) -> AuthModeCandidates {
        if schema.auth_modes().is_empty() {
            return AuthModeCandidates::single_default();
        }

        let signed_in = self.signed_in.load(Ordering::SeqCst);
        let mut modes: Vec<AuthMode> = schema
            .auth_modes()
            .iter()
            .copied()
            .filter(|mode| signed_in || !mode.requires_user())
            .collect();
        modes.sort_by_key(|mode| Self::priority(*mode));

        AuthModeCandidates::new(modes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> ModelSchema {
        ModelSchema::new("Post")
            .allow_auth_mode(AuthMode::ApiKey)
            .allow_auth_mode(AuthMode::UserPools)
            .allow_auth_mode(AuthMode::Iam)
    }

    #[tokio::test]
    async fn default_resolver_yields_default() {
        let candidates = DefaultAuthModeResolver
            .candidate_modes(&schema(), ModelOperation::Read)
            .await;
        assert_eq!(candidates.as_slice(), &[AuthMode::Default]);
    }

    #[tokio::test]
    async fn signed_in_orders_by_priority() {
        let resolver = MultiAuthModeResolver::new(true);
        let candidates = resolver
            .candidate_modes(&schema(), ModelOperation::Read)
            .await;
        assert_eq!(
            candidates.as_slice(),
            &[AuthMode::UserPools, AuthMode::Iam, AuthMode::ApiKey]
        );
    }

    #[tokio::test]
    async fn signed_out_skips_user_modes() {
        let resolver = MultiAuthModeResolver::new(true);
        resolver.set_signed_in(false);
        let candidates = resolver
            .candidate_modes(&schema(), ModelOperation::Read)
            .await;
        assert_eq!(candidates.as_slice(), &[AuthMode::Iam, AuthMode::ApiKey]);
    }

    #[tokio::test]
    async fn no_declared_modes_falls_back() {
        let resolver = MultiAuthModeResolver::new(false);
        let candidates = resolver
            .candidate_modes(&ModelSchema::new("Note"), ModelOperation::Read)
            .await;
        assert_eq!(candidates, AuthModeCandidates::single_default());
    }
}
