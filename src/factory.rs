use crate::config::{SchemaStrategy, SessionFactoryConfig};
use crate::core::{DbError, Result};
use crate::entity::{PersistentObject, PropertyEntity};
use crate::idgen::{DbIdGenerator, IdBlockRetryPolicy, IdGenerator, StoreCounterAuthority};
use crate::schema::{SchemaLifecycleManager, SchemaScripts};
use crate::session::DbSession;
use crate::statement::{StatementRegistry, StatementResolver};
use crate::store::StoreConnector;
use log::{info, warn};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Opens sessions over one store, sharing the statement table and the id
/// generator between them.
pub struct SessionFactory {
    config: SessionFactoryConfig,
    connector: Arc<dyn StoreConnector>,
    resolver: Arc<dyn StatementResolver>,
    id_generator: Arc<dyn IdGenerator>,
}

impl SessionFactory {
    /// Validates `config`, merges its statement overrides into `registry` and
    /// sets up block id allocation against the `next.dbid` property.
    pub fn new(
        config: SessionFactoryConfig,
        connector: Arc<dyn StoreConnector>,
        mut registry: StatementRegistry,
    ) -> Result<Self> {
        config.validate()?;
        if registry.dialect() != config.dialect {
            return Err(DbError::Configuration(format!(
                "statement registry is for dialect '{}' but the factory is configured for '{}'",
                registry.dialect(),
                config.dialect
            )));
        }
        if !registry.is_registered(PropertyEntity::entity_type()) {
            registry.register_conventional::<PropertyEntity>();
        }
        let registry = registry.with_overrides(config.statement_overrides.clone());
        let resolver: Arc<dyn StatementResolver> = Arc::new(registry);

        let retry = IdBlockRetryPolicy {
            max_attempts: config.max_id_block_attempts,
            ..IdBlockRetryPolicy::default()
        };
        let authority = StoreCounterAuthority::new(connector.clone(), resolver.clone())
            .with_retry_policy(retry);
        let id_generator = Arc::new(DbIdGenerator::new(Arc::new(authority), config.id_block_size)?);

        info!(
            "session factory ready (dialect {}, id block size {})",
            config.dialect, config.id_block_size
        );
        Ok(Self {
            config,
            connector,
            resolver,
            id_generator,
        })
    }

    /// Replaces the block id allocator, e.g. with a
    /// [`UuidIdGenerator`](crate::UuidIdGenerator).
    pub fn with_id_generator(mut self, id_generator: Arc<dyn IdGenerator>) -> Self {
        self.id_generator = id_generator;
        self
    }

    pub fn config(&self) -> &SessionFactoryConfig {
        &self.config
    }

    pub fn resolver(&self) -> &Arc<dyn StatementResolver> {
        &self.resolver
    }

    pub fn id_generator(&self) -> &Arc<dyn IdGenerator> {
        &self.id_generator
    }

    pub async fn open_session(&self) -> Result<DbSession> {
        let executor = self.connector.connect().await?;
        Ok(DbSession::new(
            executor,
            self.resolver.clone(),
            self.id_generator.clone(),
        ))
    }

    /// Runs one unit of work: open, `operation`, flush, commit. Any failure
    /// rolls back; the session is closed either way.
    pub async fn run_in_session<T, F>(&self, operation: F) -> Result<T>
    where
        F: for<'a> FnOnce(
            &'a mut DbSession,
        ) -> Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>,
    {
        let mut session = self.open_session().await?;
        let result = match operation(&mut session).await {
            Ok(value) => match session.flush().await {
                Ok(_) => session.commit().await.map(|_| value),
                Err(err) => Err(err),
            },
            Err(err) => Err(err),
        };

        if let Err(err) = &result {
            warn!("unit of work failed, rolling back: {}", err);
            if let Err(rollback_err) = session.rollback().await {
                warn!("rollback failed: {}", rollback_err);
            }
        }
        if let Err(err) = session.close().await {
            warn!("closing session failed: {}", err);
        }
        result
    }

    pub fn schema_manager(&self, scripts: SchemaScripts) -> SchemaLifecycleManager {
        SchemaLifecycleManager::new(scripts, self.config.table_prefix.clone())
    }

    /// Applies the configured [`SchemaStrategy`] at startup. Returns the
    /// upgrade feedback when the `True` strategy upgraded the schema.
    pub async fn perform_schema_operations_on_build(&self, scripts: &SchemaScripts) -> Result<Option<String>> {
        let manager = self.schema_manager(scripts.clone());
        let strategy = self.config.schema_strategy;
        self.run_in_session(move |session| {
            Box::pin(async move {
                if strategy == SchemaStrategy::DropCreate {
                    if let Err(err) = manager.drop(session).await {
                        warn!("ignoring schema drop failure before create: {}", err);
                    }
                }
                match strategy {
                    SchemaStrategy::Create | SchemaStrategy::CreateDrop | SchemaStrategy::DropCreate => {
                        manager.create(session).await?;
                        Ok(None)
                    }
                    SchemaStrategy::False => {
                        manager.check_version(session).await?;
                        Ok(None)
                    }
                    SchemaStrategy::True => manager.update(session).await,
                }
            })
        })
        .await
    }

    /// Drops the schema when the strategy is `CreateDrop`.
    pub async fn perform_schema_operations_on_close(&self, scripts: &SchemaScripts) -> Result<()> {
        if self.config.schema_strategy != SchemaStrategy::CreateDrop {
            return Ok(());
        }
        let manager = self.schema_manager(scripts.clone());
        self.run_in_session(move |session| Box::pin(async move { manager.drop(session).await }))
            .await
    }
}
