//! Schema presence, version verification and upgrade orchestration.
//!
//! The version marker, the upgrade history and the id counter live in the
//! property table as [`PropertyEntity`] rows. The first registered component
//! is the engine component and must own that table.

use crate::core::{DbError, Result};
use crate::entity::PropertyEntity;
use crate::session::DbSession;
use log::info;

pub mod migration;

pub use migration::{SchemaMigrationPlan, SchemaMigrationStep};

/// A group of tables created and dropped together, detected through one
/// marker table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaComponent {
    pub name: String,
    pub marker_table: String,
    pub create: Vec<String>,
    pub drop: Vec<String>,
}

impl SchemaComponent {
    pub fn new(name: impl Into<String>, marker_table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            marker_table: marker_table.into(),
            create: Vec::new(),
            drop: Vec::new(),
        }
    }

    pub fn with_create(mut self, statement: impl Into<String>) -> Self {
        self.create.push(statement.into());
        self
    }

    pub fn with_drop(mut self, statement: impl Into<String>) -> Self {
        self.drop.push(statement.into());
        self
    }
}

/// DDL for one library version: components plus the upgrade path to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaScripts {
    components: Vec<SchemaComponent>,
    migrations: SchemaMigrationPlan,
}

impl SchemaScripts {
    pub fn new(version: u32) -> Self {
        Self {
            components: Vec::new(),
            migrations: SchemaMigrationPlan::new(version),
        }
    }

    pub fn with_component(mut self, component: SchemaComponent) -> Self {
        self.components.push(component);
        self
    }

    pub fn with_migration(mut self, step: SchemaMigrationStep) -> Result<Self> {
        self.migrations.add_step(step)?;
        Ok(self)
    }

    pub fn version(&self) -> u32 {
        self.migrations.target_version()
    }

    pub fn components(&self) -> &[SchemaComponent] {
        &self.components
    }

    pub fn migrations(&self) -> &SchemaMigrationPlan {
        &self.migrations
    }

    fn engine(&self) -> Result<&SchemaComponent> {
        self.components.first().ok_or_else(|| {
            DbError::Configuration("schema scripts define no components".to_string())
        })
    }
}

pub struct SchemaLifecycleManager {
    scripts: SchemaScripts,
    table_prefix: String,
}

impl SchemaLifecycleManager {
    pub fn new(scripts: SchemaScripts, table_prefix: impl Into<String>) -> Self {
        Self {
            scripts,
            table_prefix: table_prefix.into(),
        }
    }

    pub fn scripts(&self) -> &SchemaScripts {
        &self.scripts
    }

    pub async fn is_component_present(&self, session: &mut DbSession, component: &SchemaComponent) -> Result<bool> {
        let table = format!("{}{}", self.table_prefix, component.marker_table);
        session.executor_mut().table_exists(&table).await
    }

    pub async fn is_engine_present(&self, session: &mut DbSession) -> Result<bool> {
        let engine = self.scripts.engine()?;
        self.is_component_present(session, engine).await
    }

    async fn missing_components(&self, session: &mut DbSession) -> Result<Vec<String>> {
        let mut missing = Vec::new();
        for component in &self.scripts.components {
            if !self.is_component_present(session, component).await? {
                missing.push(component.name.clone());
            }
        }
        Ok(missing)
    }

    /// Version marker currently stored in the property table.
    pub async fn stored_version(&self, session: &mut DbSession) -> Result<String> {
        session
            .select_by_id::<PropertyEntity>(PropertyEntity::SCHEMA_VERSION)
            .await?
            .ok_or_else(|| {
                DbError::Configuration(format!(
                    "property '{}' is missing",
                    PropertyEntity::SCHEMA_VERSION
                ))
            })?
            .read()
            .map(|property| property.value.clone())
    }

    /// Fails with [`DbError::SchemaMismatch`] when the stored version differs
    /// from the scripts' version, or with a configuration error naming every
    /// component whose tables are missing.
    pub async fn check_version(&self, session: &mut DbSession) -> Result<()> {
        let engine = self.scripts.engine()?;
        let missing = self.missing_components(session).await?;
        if missing.contains(&engine.name) {
            return Err(DbError::Configuration(format!(
                "no schema tables in store ({}); set schema_strategy to \"true\" or \"create\" for automatic schema creation",
                missing_message(&missing)
            )));
        }

        let found = self.stored_version(session).await?;
        let expected = self.scripts.version().to_string();
        if found != expected {
            return Err(DbError::SchemaMismatch { expected, found });
        }

        if !missing.is_empty() {
            return Err(DbError::Configuration(missing_message(&missing)));
        }
        Ok(())
    }

    /// Creates every missing component. An existing engine must already be at
    /// the current version; a fresh engine gets its properties seeded.
    pub async fn create(&self, session: &mut DbSession) -> Result<()> {
        if self.is_engine_present(session).await? {
            let found = self.stored_version(session).await?;
            let expected = self.scripts.version().to_string();
            if found != expected {
                return Err(DbError::SchemaMismatch { expected, found });
            }
        } else {
            self.create_engine(session).await?;
        }
        self.create_missing_components(session).await
    }

    /// Upgrades an outdated engine, or creates the schema when none exists.
    /// Returns a description of the upgrade, if one ran.
    pub async fn update(&self, session: &mut DbSession) -> Result<Option<String>> {
        let mut feedback = None;
        if self.is_engine_present(session).await? {
            let found = self.stored_version(session).await?;
            let from = found.trim().parse::<u32>().map_err(|_| DbError::SchemaMismatch {
                expected: self.scripts.version().to_string(),
                found: found.clone(),
            })?;
            if from != self.scripts.version() {
                self.upgrade(session, from).await?;
                feedback = Some(format!(
                    "upgraded schema from {} to {}",
                    from,
                    self.scripts.version()
                ));
            }
        } else {
            self.create_engine(session).await?;
        }
        self.create_missing_components(session).await?;
        Ok(feedback)
    }

    /// Runs the migration chain from `from_version` and records it in the
    /// version and history properties.
    pub async fn upgrade(&self, session: &mut DbSession, from_version: u32) -> Result<()> {
        let to_version = self.scripts.version();
        let chain = self.scripts.migrations.resolve_chain(from_version)?;
        for step in chain {
            info!(
                "upgrading schema {} -> {} ({} statements)",
                step.from_version,
                step.to_version,
                step.statements.len()
            );
            for statement in &step.statements {
                session.executor_mut().execute_script(statement).await?;
            }
        }

        let version = session
            .select_by_id::<PropertyEntity>(PropertyEntity::SCHEMA_VERSION)
            .await?
            .ok_or_else(|| {
                DbError::Configuration(format!(
                    "property '{}' is missing",
                    PropertyEntity::SCHEMA_VERSION
                ))
            })?;
        version.write()?.value = to_version.to_string();

        let entry = format!("upgrade({}->{})", from_version, to_version);
        match session
            .select_by_id::<PropertyEntity>(PropertyEntity::SCHEMA_HISTORY)
            .await?
        {
            Some(history) => {
                let mut history = history.write()?;
                history.value = format!("{} {}", history.value, entry);
            }
            None => {
                session
                    .insert(PropertyEntity::new(
                        PropertyEntity::SCHEMA_HISTORY,
                        format!("create({}) {}", from_version, entry),
                    ))
                    .await?;
            }
        }
        session.flush().await?;
        Ok(())
    }

    /// Drops every present component, last registered first.
    pub async fn drop(&self, session: &mut DbSession) -> Result<()> {
        for component in self.scripts.components.iter().rev() {
            if !self.is_component_present(session, component).await? {
                continue;
            }
            info!("dropping schema component '{}'", component.name);
            for statement in &component.drop {
                session.executor_mut().execute_script(statement).await?;
            }
        }
        Ok(())
    }

    async fn create_engine(&self, session: &mut DbSession) -> Result<()> {
        let engine = self.scripts.engine()?;
        self.create_component(session, engine).await?;

        let version = self.scripts.version().to_string();
        session
            .insert(PropertyEntity::new(PropertyEntity::SCHEMA_VERSION, version.clone()))
            .await?;
        session
            .insert(PropertyEntity::new(
                PropertyEntity::SCHEMA_HISTORY,
                format!("create({})", version),
            ))
            .await?;
        session
            .insert(PropertyEntity::new(PropertyEntity::NEXT_DBID, "1"))
            .await?;
        session.flush().await?;
        Ok(())
    }

    async fn create_missing_components(&self, session: &mut DbSession) -> Result<()> {
        for component in self.scripts.components.iter().skip(1) {
            if !self.is_component_present(session, component).await? {
                self.create_component(session, component).await?;
            }
        }
        Ok(())
    }

    async fn create_component(&self, session: &mut DbSession, component: &SchemaComponent) -> Result<()> {
        info!("creating schema component '{}'", component.name);
        for statement in &component.create {
            session.executor_mut().execute_script(statement).await?;
        }
        Ok(())
    }
}

fn missing_message(missing: &[String]) -> String {
    format!("Tables missing for component(s) {}", missing.join(", "))
}
