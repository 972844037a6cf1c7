// Permission oracle: resolves what a user may do with a document.
//
// Grounded on the workspace-role gate in `ws/session.rs`'s
// `WorkspaceMembershipStore`/`WorkspaceRole`, generalized from a single
// workspace-wide role into a per-document/per-vault oracle: owners can
// always act, otherwise the effective level is the max of a direct
// document grant and an inherited vault grant.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::postgres::PgPool;
use tokio::sync::RwLock;
use tracing::{info_span, Instrument};
use uuid::Uuid;

/// Coarse workspace-wide role, retained for external-collaborator REST
/// surfaces that gate on "can touch this workspace at all" rather than
/// per-document permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceRole {
    Viewer,
    Editor,
    Owner,
}

impl WorkspaceRole {
    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "viewer" => Some(Self::Viewer),
            "editor" => Some(Self::Editor),
            "owner" => Some(Self::Owner),
            _ => None,
        }
    }

    pub fn allows(self, required: Self) -> bool {
        self.rank() >= required.rank()
    }

    fn rank(self) -> u8 {
        match self {
            Self::Viewer => 1,
            Self::Editor => 2,
            Self::Owner => 3,
        }
    }
}

/// Fine-grained per-document/per-vault permission level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PermissionLevel {
    Read = 1,
    Write = 2,
    Admin = 3,
}

impl PermissionLevel {
    fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "read" => Some(Self::Read),
            "write" => Some(Self::Write),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct DocumentGrantRow {
    owner_id: Uuid,
    vault_id: Option<Uuid>,
    deleted_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, sqlx::FromRow)]
struct PermissionRow {
    level: String,
}

/// Backing store for permission lookups. `Memory` is for tests and for
/// environments running without a configured database.
#[derive(Clone)]
pub enum PermissionStore {
    Postgres(PgPool),
    Memory(Arc<RwLock<MemoryPermissions>>),
}

#[derive(Debug, Default)]
pub struct MemoryPermissions {
    documents: HashMap<Uuid, MemoryDocument>,
    document_grants: HashMap<(Uuid, Uuid), PermissionLevel>,
    vault_grants: HashMap<(Uuid, Uuid), PermissionLevel>,
}

#[derive(Debug, Clone)]
struct MemoryDocument {
    owner_id: Uuid,
    vault_id: Option<Uuid>,
    deleted: bool,
}

impl PermissionStore {
    pub async fn from_env() -> Result<Self> {
        match std::env::var("SCRIPTUM_RELAY_DATABASE_URL") {
            Ok(url) => {
                let pool = PgPool::connect(&url)
                    .await
                    .context("failed to connect permission oracle to postgres")?;
                Ok(Self::Postgres(pool))
            }
            Err(_) => Ok(Self::Memory(Arc::new(RwLock::new(MemoryPermissions::default())))),
        }
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self::Postgres(pool)
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self::Memory(Arc::new(RwLock::new(MemoryPermissions::default())))
    }

    #[cfg(test)]
    pub async fn seed_document(
        &self,
        document_id: Uuid,
        owner_id: Uuid,
        vault_id: Option<Uuid>,
    ) {
        if let Self::Memory(store) = self {
            store.write().await.documents.insert(
                document_id,
                MemoryDocument { owner_id, vault_id, deleted: false },
            );
        }
    }

    #[cfg(test)]
    pub async fn soft_delete_document(&self, document_id: Uuid) {
        if let Self::Memory(store) = self {
            if let Some(doc) = store.write().await.documents.get_mut(&document_id) {
                doc.deleted = true;
            }
        }
    }

    #[cfg(test)]
    pub async fn grant_document(
        &self,
        document_id: Uuid,
        user_id: Uuid,
        level: PermissionLevel,
    ) {
        if let Self::Memory(store) = self {
            store.write().await.document_grants.insert((document_id, user_id), level);
        }
    }

    #[cfg(test)]
    pub async fn grant_vault(&self, vault_id: Uuid, user_id: Uuid, level: PermissionLevel) {
        if let Self::Memory(store) = self {
            store.write().await.vault_grants.insert((vault_id, user_id), level);
        }
    }

    async fn document_grant(
        &self,
        document_id: Uuid,
    ) -> Result<Option<(Uuid, Option<Uuid>)>> {
        match self {
            Self::Postgres(pool) => {
                let row = sqlx::query_as::<_, DocumentGrantRow>(
                    "SELECT owner_id, vault_id, deleted_at FROM documents WHERE id = $1",
                )
                .bind(document_id)
                .fetch_optional(pool)
                .instrument(info_span!("relay.db.query", query = "fetch_document_owner"))
                .await
                .context("failed to fetch document for permission check")?;

                Ok(row.filter(|row| row.deleted_at.is_none()).map(|row| (row.owner_id, row.vault_id)))
            }
            Self::Memory(store) => {
                let store = store.read().await;
                Ok(store
                    .documents
                    .get(&document_id)
                    .filter(|doc| !doc.deleted)
                    .map(|doc| (doc.owner_id, doc.vault_id)))
            }
        }
    }

    async fn direct_permission(
        &self,
        document_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<PermissionLevel>> {
        match self {
            Self::Postgres(pool) => {
                let row = sqlx::query_as::<_, PermissionRow>(
                    "SELECT level FROM document_permissions WHERE document_id = $1 AND user_id = $2",
                )
                .bind(document_id)
                .bind(user_id)
                .fetch_optional(pool)
                .instrument(info_span!("relay.db.query", query = "fetch_document_permission"))
                .await
                .context("failed to fetch document permission")?;

                Ok(row.and_then(|row| PermissionLevel::from_db_value(&row.level)))
            }
            Self::Memory(store) => {
                Ok(store.read().await.document_grants.get(&(document_id, user_id)).copied())
            }
        }
    }

    async fn vault_permission(
        &self,
        vault_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<PermissionLevel>> {
        match self {
            Self::Postgres(pool) => {
                let row = sqlx::query_as::<_, PermissionRow>(
                    "SELECT level FROM vault_permissions WHERE vault_id = $1 AND user_id = $2",
                )
                .bind(vault_id)
                .bind(user_id)
                .fetch_optional(pool)
                .instrument(info_span!("relay.db.query", query = "fetch_vault_permission"))
                .await
                .context("failed to fetch vault permission")?;

                Ok(row.and_then(|row| PermissionLevel::from_db_value(&row.level)))
            }
            Self::Memory(store) => {
                Ok(store.read().await.vault_grants.get(&(vault_id, user_id)).copied())
            }
        }
    }
}

/// Resolves effective access for a user against a document.
///
/// Owner always has admin-level access. Otherwise the effective level
/// is the maximum of a direct document grant and an inherited vault
/// grant. A nonexistent or soft-deleted document denies access.
#[derive(Clone)]
pub struct PermissionOracle {
    store: PermissionStore,
}

impl PermissionOracle {
    pub fn new(store: PermissionStore) -> Self {
        Self { store }
    }

    pub async fn effective_level(
        &self,
        document_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<PermissionLevel>> {
        async {
            let Some((owner_id, vault_id)) = self.store.document_grant(document_id).await? else {
                return Ok(None);
            };

            if owner_id == user_id {
                return Ok(Some(PermissionLevel::Admin));
            }

            let direct = self.store.direct_permission(document_id, user_id).await?;
            let inherited = match vault_id {
                Some(vault_id) => self.store.vault_permission(vault_id, user_id).await?,
                None => None,
            };

            Ok(direct.into_iter().chain(inherited).max())
        }
        .instrument(info_span!(
            "relay.authz.effective_level",
            document_id = %document_id,
            user_id = %user_id
        ))
        .await
    }

    pub async fn can_read(&self, document_id: Uuid, user_id: Uuid) -> Result<bool> {
        Ok(self.effective_level(document_id, user_id).await?.is_some())
    }

    pub async fn can_write(&self, document_id: Uuid, user_id: Uuid) -> Result<bool> {
        Ok(self.effective_level(document_id, user_id).await? >= Some(PermissionLevel::Write))
    }

    pub async fn can_administer(&self, document_id: Uuid, user_id: Uuid) -> Result<bool> {
        Ok(self.effective_level(document_id, user_id).await? >= Some(PermissionLevel::Admin))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn owner_always_has_admin_access() {
        let store = PermissionStore::for_tests();
        let document_id = Uuid::new_v4();
        let owner_id = Uuid::new_v4();
        store.seed_document(document_id, owner_id, None).await;

        let oracle = PermissionOracle::new(store);
        assert_eq!(
            oracle.effective_level(document_id, owner_id).await.unwrap(),
            Some(PermissionLevel::Admin)
        );
    }

    #[tokio::test]
    async fn direct_grant_is_honored() {
        let store = PermissionStore::for_tests();
        let document_id = Uuid::new_v4();
        let owner_id = Uuid::new_v4();
        let collaborator_id = Uuid::new_v4();
        store.seed_document(document_id, owner_id, None).await;
        store.grant_document(document_id, collaborator_id, PermissionLevel::Write).await;

        let oracle = PermissionOracle::new(store);
        assert!(oracle.can_write(document_id, collaborator_id).await.unwrap());
        assert!(!oracle.can_administer(document_id, collaborator_id).await.unwrap());
    }

    #[tokio::test]
    async fn vault_grant_is_inherited_when_no_direct_grant() {
        let store = PermissionStore::for_tests();
        let document_id = Uuid::new_v4();
        let vault_id = Uuid::new_v4();
        let owner_id = Uuid::new_v4();
        let collaborator_id = Uuid::new_v4();
        store.seed_document(document_id, owner_id, Some(vault_id)).await;
        store.grant_vault(vault_id, collaborator_id, PermissionLevel::Read).await;

        let oracle = PermissionOracle::new(store);
        assert!(oracle.can_read(document_id, collaborator_id).await.unwrap());
        assert!(!oracle.can_write(document_id, collaborator_id).await.unwrap());
    }

    #[tokio::test]
    async fn effective_level_is_max_of_direct_and_inherited() {
        let store = PermissionStore::for_tests();
        let document_id = Uuid::new_v4();
        let vault_id = Uuid::new_v4();
        let owner_id = Uuid::new_v4();
        let collaborator_id = Uuid::new_v4();
        store.seed_document(document_id, owner_id, Some(vault_id)).await;
        store.grant_document(document_id, collaborator_id, PermissionLevel::Read).await;
        store.grant_vault(vault_id, collaborator_id, PermissionLevel::Write).await;

        let oracle = PermissionOracle::new(store);
        assert_eq!(
            oracle.effective_level(document_id, collaborator_id).await.unwrap(),
            Some(PermissionLevel::Write)
        );
    }

    #[tokio::test]
    async fn nonexistent_document_denies_access() {
        let store = PermissionStore::for_tests();
        let oracle = PermissionOracle::new(store);

        assert_eq!(
            oracle.effective_level(Uuid::new_v4(), Uuid::new_v4()).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn soft_deleted_document_denies_access_even_for_owner() {
        let store = PermissionStore::for_tests();
        let document_id = Uuid::new_v4();
        let owner_id = Uuid::new_v4();
        store.seed_document(document_id, owner_id, None).await;
        store.soft_delete_document(document_id).await;

        let oracle = PermissionOracle::new(store);
        assert_eq!(oracle.effective_level(document_id, owner_id).await.unwrap(), None);
    }

    #[test]
    fn workspace_role_allows_is_monotonic() {
        assert!(WorkspaceRole::Owner.allows(WorkspaceRole::Editor));
        assert!(WorkspaceRole::Editor.allows(WorkspaceRole::Viewer));
        assert!(!WorkspaceRole::Viewer.allows(WorkspaceRole::Editor));
    }
}
