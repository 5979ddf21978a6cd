//! Resolves the acting user and their permissions.
//!
//! Authentication happens in front of this service; the proxy forwards the
//! authenticated user name in [`REMOTE_USER_HEADER`]. Permissions come from
//! the study database.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderMap;

use crate::database::PgPool;
use crate::error::MediaError;
use crate::store::StoreError;

pub const REMOTE_USER_HEADER: &str = "x-remote-user";

pub const MEDIA_READ: &str = "media_read";
pub const MEDIA_WRITE: &str = "media_write";
const SUPERUSER: &str = "superuser";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Actor {
    pub user_id: Option<String>,
    permissions: HashSet<String>,
}

impl Actor {
    pub fn new(user_id: impl Into<String>, permissions: impl IntoIterator<Item = String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            permissions: permissions.into_iter().collect(),
        }
    }

    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn has_permission(&self, code: &str) -> bool {
        self.permissions.contains(code) || self.permissions.contains(SUPERUSER)
    }

    pub fn require(&self, code: &str) -> Result<(), MediaError> {
        if self.has_permission(code) {
            Ok(())
        } else {
            Err(MediaError::PermissionDenied)
        }
    }

    /// Name recorded as `uploaded_by`.
    pub fn user_name(&self) -> &str {
        self.user_id.as_deref().unwrap_or_default()
    }
}

#[async_trait]
pub trait PermissionGate: Send + Sync {
    /// Look up a user by name. Unknown users resolve to an actor without permissions.
    async fn resolve(&self, user_id: &str) -> Result<Actor, StoreError>;
}

pub struct PgPermissionGate {
    pool: Arc<PgPool>,
}

impl PgPermissionGate {
    #[must_use]
    pub const fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PermissionGate for PgPermissionGate {
    async fn resolve(&self, user_id: &str) -> Result<Actor, StoreError> {
        let client = match self.pool.get().await {
            Ok(client) => client,
            Err(err) => {
                sentry::capture_message(
                    &format!("auth::resolve: Failed to get pool: {err}"),
                    sentry::Level::Error,
                );
                return Err(StoreError::Pool(err.to_string()));
            }
        };

        let rows = client
            .query(
                "
                SELECT p.code
                FROM users u
                JOIN user_perm_rel upr ON upr.user_id = u.id
                JOIN permissions p ON p.perm_id = upr.perm_id
                WHERE u.user_id = $1
                ",
                &[&user_id],
            )
            .await?;
        let codes = rows
            .iter()
            .map(|row| row.try_get(0))
            .collect::<Result<Vec<String>, _>>()?;

        Ok(Actor::new(user_id, codes))
    }
}

/// Resolve the caller from the forwarded user header.
pub async fn actor_from_headers(
    gate: &dyn PermissionGate,
    headers: &HeaderMap,
) -> Result<Actor, MediaError> {
    let user_id = headers
        .get(REMOTE_USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    let Some(user_id) = user_id else {
        return Ok(Actor::anonymous());
    };

    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            id: Some(format!("hash_{}", crate::error::hash_pii(user_id))),
            ..Default::default()
        }));
    });

    gate.resolve(user_id).await.map_err(|err| {
        MediaError::persistence("resolve_actor", crate::error::PERMISSION_LOOKUP_FAILED, err)
    })
}

#[cfg(test)]
pub mod testing {
    use std::collections::HashMap;

    use async_trait::async_trait;

    use super::{Actor, PermissionGate};
    use crate::store::StoreError;

    /// Fixed user → permission table.
    #[derive(Default)]
    pub struct StaticGate {
        users: HashMap<String, Vec<String>>,
    }

    impl StaticGate {
        #[must_use]
        pub fn with_user(mut self, user_id: &str, permissions: &[&str]) -> Self {
            self.users.insert(
                user_id.to_string(),
                permissions.iter().map(|p| (*p).to_string()).collect(),
            );
            self
        }
    }

    #[async_trait]
    impl PermissionGate for StaticGate {
        async fn resolve(&self, user_id: &str) -> Result<Actor, StoreError> {
            let permissions = self.users.get(user_id).cloned().unwrap_or_default();
            Ok(Actor::new(user_id, permissions))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::StaticGate;
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_superuser_has_every_permission() {
        let actor = Actor::new("admin", vec![SUPERUSER.to_string()]);
        assert!(actor.has_permission(MEDIA_READ));
        assert!(actor.require(MEDIA_WRITE).is_ok());
    }

    #[test]
    fn test_anonymous_is_denied() {
        let actor = Actor::anonymous();
        assert!(matches!(actor.require(MEDIA_READ), Err(MediaError::PermissionDenied)));
        assert_eq!(actor.user_name(), "");
    }

    #[tokio::test]
    async fn test_actor_from_headers() {
        let gate = StaticGate::default().with_user("reader", &[MEDIA_READ]);

        let mut headers = HeaderMap::new();
        headers.insert(REMOTE_USER_HEADER, HeaderValue::from_static("reader"));
        let actor = actor_from_headers(&gate, &headers).await.unwrap();
        assert_eq!(actor.user_name(), "reader");
        assert!(actor.has_permission(MEDIA_READ));
        assert!(!actor.has_permission(MEDIA_WRITE));

        let actor = actor_from_headers(&gate, &HeaderMap::new()).await.unwrap();
        assert_eq!(actor, Actor::anonymous());
    }
}
