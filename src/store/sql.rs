use async_trait::async_trait;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::*;

use crate::entity::{key, platform, token};

use super::{Store, StoreError};

/// Document store backed by sea-orm (SQLite or Postgres, by URL).
pub struct SeaOrmStore {
    db: DatabaseConnection,
}

impl SeaOrmStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let db = Database::connect(url).await?;
        Ok(Self { db })
    }

    pub fn from_connection(db: DatabaseConnection) -> Self {
        Self { db }
    }

    async fn create_table<E: EntityTrait>(&self, entity: E) -> Result<(), StoreError> {
        let backend = self.db.get_database_backend();
        let schema = Schema::new(backend);
        let mut stmt = schema.create_table_from_entity(entity);
        stmt.if_not_exists();
        self.db.execute(backend.build(&stmt)).await?;
        Ok(())
    }
}

#[async_trait]
impl Store for SeaOrmStore {
    async fn setup(&self) -> Result<(), StoreError> {
        self.create_table(platform::Entity).await?;
        self.create_table(key::public::Entity).await?;
        self.create_table(key::private::Entity).await?;
        self.create_table(token::id::Entity).await?;
        self.create_table(token::context::Entity).await?;
        Ok(())
    }

    async fn find_platform(&self, platform_url: &str) -> Result<Option<platform::Model>, StoreError> {
        Ok(platform::Entity::find_by_id(platform_url).one(&self.db).await?)
    }

    async fn list_platforms(&self) -> Result<Vec<platform::Model>, StoreError> {
        Ok(platform::Entity::find().all(&self.db).await?)
    }

    async fn upsert_platform(&self, platform: platform::Model) -> Result<(), StoreError> {
        platform::Entity::insert(platform.into_active_model())
            .on_conflict(
                OnConflict::column(platform::Column::PlatformUrl)
                    .update_columns([
                        platform::Column::Name,
                        platform::Column::ClientId,
                        platform::Column::AuthEndpoint,
                        platform::Column::AccesstokenEndpoint,
                        platform::Column::Kid,
                        platform::Column::AuthConfig,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;
        Ok(())
    }

    async fn delete_platform(&self, platform_url: &str) -> Result<(), StoreError> {
        platform::Entity::delete_by_id(platform_url).exec(&self.db).await?;
        Ok(())
    }

    async fn find_public_key(&self, kid: &str) -> Result<Option<key::public::Model>, StoreError> {
        Ok(key::public::Entity::find_by_id(kid).one(&self.db).await?)
    }

    async fn find_private_key(&self, kid: &str) -> Result<Option<key::private::Model>, StoreError> {
        Ok(key::private::Entity::find_by_id(kid).one(&self.db).await?)
    }

    async fn list_public_keys(&self) -> Result<Vec<key::public::Model>, StoreError> {
        Ok(key::public::Entity::find().all(&self.db).await?)
    }

    async fn upsert_key_pair(
        &self,
        public: key::public::Model,
        private: key::private::Model,
    ) -> Result<(), StoreError> {
        key::public::Entity::insert(public.into_active_model())
            .on_conflict(
                OnConflict::column(key::public::Column::Kid)
                    .update_columns([key::public::Column::PlatformUrl, key::public::Column::Pem])
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;
        key::private::Entity::insert(private.into_active_model())
            .on_conflict(
                OnConflict::column(key::private::Column::Kid)
                    .update_columns([key::private::Column::PlatformUrl, key::private::Column::Pem])
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;
        Ok(())
    }

    async fn delete_key_pair(&self, kid: &str) -> Result<(), StoreError> {
        key::public::Entity::delete_by_id(kid).exec(&self.db).await?;
        key::private::Entity::delete_by_id(kid).exec(&self.db).await?;
        Ok(())
    }

    async fn find_id_token(
        &self,
        iss: &str,
        deployment_id: &str,
        user: &str,
    ) -> Result<Option<token::id::Model>, StoreError> {
        let id = (iss.to_string(), deployment_id.to_string(), user.to_string());
        Ok(token::id::Entity::find_by_id(id).one(&self.db).await?)
    }

    async fn upsert_id_token(&self, token: token::id::Model) -> Result<(), StoreError> {
        token::id::Entity::insert(token.into_active_model())
            .on_conflict(
                OnConflict::columns([
                    token::id::Column::Iss,
                    token::id::Column::DeploymentId,
                    token::id::Column::User,
                ])
                .update_columns([
                    token::id::Column::Roles,
                    token::id::Column::UserInfo,
                    token::id::Column::PlatformInfo,
                    token::id::Column::Lis,
                    token::id::Column::Endpoint,
                    token::id::Column::NamesRoles,
                    token::id::Column::LastLaunchAt,
                ])
                .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;
        Ok(())
    }

    async fn find_context_token(
        &self,
        context_id: &str,
        user: &str,
    ) -> Result<Option<token::context::Model>, StoreError> {
        let id = (context_id.to_string(), user.to_string());
        Ok(token::context::Entity::find_by_id(id).one(&self.db).await?)
    }

    async fn upsert_context_token(&self, token: token::context::Model) -> Result<(), StoreError> {
        token::context::Entity::insert(token.into_active_model())
            .on_conflict(
                OnConflict::columns([
                    token::context::Column::ContextId,
                    token::context::Column::User,
                ])
                .update_columns([
                    token::context::Column::Path,
                    token::context::Column::TargetLinkUri,
                    token::context::Column::MessageType,
                    token::context::Column::Version,
                    token::context::Column::Context,
                    token::context::Column::Resource,
                    token::context::Column::Custom,
                    token::context::Column::LaunchPresentation,
                    token::context::Column::DeepLinkingSettings,
                    token::context::Column::LastLaunchAt,
                ])
                .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;
        Ok(())
    }

    async fn update_context_path(
        &self,
        context_id: &str,
        user: &str,
        path: &str,
    ) -> Result<(), StoreError> {
        token::context::Entity::update_many()
            .col_expr(token::context::Column::Path, Expr::value(path))
            .filter(token::context::Column::ContextId.eq(context_id))
            .filter(token::context::Column::User.eq(user))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.db.clone().close().await?;
        Ok(())
    }
}
