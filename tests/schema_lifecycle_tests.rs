use dbsession::{
    DbError, DbSession, Dialect, EntityStatements, InMemoryStore, PropertyEntity,
    SchemaComponent, SchemaLifecycleManager, SchemaMigrationStep, SchemaScripts, SchemaStrategy,
    SessionFactory, SessionFactoryConfig, StatementRegistry, Value,
};
use std::sync::Arc;

const PROPERTY_TABLE: &str = "ACT_GE_PROPERTY";

async fn store() -> InMemoryStore {
    let store = InMemoryStore::new();
    store
        .register_statements(PROPERTY_TABLE, &EntityStatements::conventional("Property"))
        .await;
    store
}

fn components(scripts: SchemaScripts) -> SchemaScripts {
    scripts
        .with_component(
            SchemaComponent::new("engine", PROPERTY_TABLE)
                .with_create("CREATE TABLE ACT_GE_PROPERTY KEY name REVISION rev")
                .with_create("CREATE TABLE ACT_RU_TASK KEY id REVISION rev")
                .with_drop("DROP TABLE ACT_RU_TASK")
                .with_drop("DROP TABLE ACT_GE_PROPERTY"),
        )
        .with_component(
            SchemaComponent::new("history", "ACT_HI_TASK")
                .with_create("CREATE TABLE ACT_HI_TASK KEY id")
                .with_drop("DROP TABLE ACT_HI_TASK"),
        )
}

fn scripts_v1() -> SchemaScripts {
    components(SchemaScripts::new(1))
}

fn scripts_v2() -> SchemaScripts {
    components(SchemaScripts::new(2))
        .with_migration(
            SchemaMigrationStep::new(1, 2).with_statement("CREATE TABLE ACT_RU_COMMENT KEY id"),
        )
        .unwrap()
}

fn factory(store: &InMemoryStore, strategy: SchemaStrategy) -> SessionFactory {
    SessionFactory::new(
        SessionFactoryConfig::new(Dialect::H2).schema_strategy(strategy),
        Arc::new(store.clone()),
        StatementRegistry::new(Dialect::H2),
    )
    .unwrap()
}

async fn finish(mut session: DbSession) {
    session.commit().await.unwrap();
    session.close().await.unwrap();
}

async fn create(factory: &SessionFactory, scripts: SchemaScripts) {
    let manager = factory.schema_manager(scripts);
    let mut session = factory.open_session().await.unwrap();
    manager.create(&mut session).await.unwrap();
    finish(session).await;
}

async fn check(factory: &SessionFactory, scripts: SchemaScripts) -> dbsession::Result<()> {
    let manager = factory.schema_manager(scripts);
    let mut session = factory.open_session().await.unwrap();
    let result = manager.check_version(&mut session).await;
    finish(session).await;
    result
}

async fn property(store: &InMemoryStore, name: &str) -> Option<Value> {
    store
        .committed_row(PROPERTY_TABLE, name)
        .await
        .unwrap()
        .and_then(|row| row.get("value").cloned())
}

fn text(value: &str) -> Option<Value> {
    Some(Value::Text(value.to_string()))
}

#[tokio::test]
async fn create_builds_tables_and_seeds_properties() {
    let store = store().await;
    let factory = factory(&store, SchemaStrategy::False);
    create(&factory, scripts_v2()).await;

    assert_eq!(property(&store, PropertyEntity::SCHEMA_VERSION).await, text("2"));
    assert_eq!(property(&store, PropertyEntity::SCHEMA_HISTORY).await, text("create(2)"));
    assert_eq!(property(&store, PropertyEntity::NEXT_DBID).await, text("1"));
    assert!(store.committed_rows("ACT_HI_TASK").await.unwrap().is_empty());

    check(&factory, scripts_v2()).await.unwrap();
    // Creating again is a no-op on an up-to-date schema.
    create(&factory, scripts_v2()).await;
}

#[tokio::test]
async fn check_on_empty_store_reports_missing_components() {
    let store = store().await;
    let factory = factory(&store, SchemaStrategy::False);

    let err = check(&factory, scripts_v2()).await.unwrap_err();
    assert!(err.is_configuration());
    assert!(err.to_string().contains("engine, history"));
}

#[tokio::test]
async fn check_detects_version_mismatch() {
    let store = store().await;
    let factory = factory(&store, SchemaStrategy::False);
    create(&factory, scripts_v1()).await;

    let err = check(&factory, scripts_v2()).await.unwrap_err();
    assert_eq!(
        err,
        DbError::SchemaMismatch {
            expected: "2".to_string(),
            found: "1".to_string(),
        }
    );
}

#[tokio::test]
async fn create_refuses_an_engine_at_another_version() {
    let store = store().await;
    let factory = factory(&store, SchemaStrategy::False);
    create(&factory, scripts_v1()).await;

    let manager = factory.schema_manager(scripts_v2());
    let mut session = factory.open_session().await.unwrap();
    let err = manager.create(&mut session).await.unwrap_err();
    assert!(matches!(err, DbError::SchemaMismatch { .. }));
}

#[tokio::test]
async fn check_reports_a_missing_optional_component() {
    let store = store().await;
    let factory = factory(&store, SchemaStrategy::False);
    create(&factory, scripts_v2()).await;
    store.drop_table("ACT_HI_TASK").await.unwrap();

    let err = check(&factory, scripts_v2()).await.unwrap_err();
    assert_eq!(
        err,
        DbError::Configuration("Tables missing for component(s) history".to_string())
    );

    let manager = factory.schema_manager(scripts_v2());
    let mut session = factory.open_session().await.unwrap();
    assert_eq!(manager.update(&mut session).await.unwrap(), None);
    finish(session).await;
    check(&factory, scripts_v2()).await.unwrap();
}

#[tokio::test]
async fn update_upgrades_an_older_schema() {
    let store = store().await;
    let factory = factory(&store, SchemaStrategy::False);
    create(&factory, scripts_v1()).await;

    let manager = factory.schema_manager(scripts_v2());
    let mut session = factory.open_session().await.unwrap();
    let feedback = manager.update(&mut session).await.unwrap();
    finish(session).await;

    assert_eq!(feedback.as_deref(), Some("upgraded schema from 1 to 2"));
    assert!(store.committed_rows("ACT_RU_COMMENT").await.is_ok());
    assert_eq!(property(&store, PropertyEntity::SCHEMA_VERSION).await, text("2"));
    assert_eq!(
        property(&store, PropertyEntity::SCHEMA_HISTORY).await,
        text("create(1) upgrade(1->2)")
    );
    check(&factory, scripts_v2()).await.unwrap();
}

#[tokio::test]
async fn upgrade_without_a_path_fails() {
    let store = store().await;
    let factory = factory(&store, SchemaStrategy::False);
    create(&factory, scripts_v1()).await;

    // Version 3 scripts know no step from 1.
    let scripts = components(SchemaScripts::new(3))
        .with_migration(SchemaMigrationStep::new(2, 3))
        .unwrap();
    let manager = SchemaLifecycleManager::new(scripts, "");
    let mut session = factory.open_session().await.unwrap();
    let err = manager.upgrade(&mut session, 1).await.unwrap_err();
    assert!(err.is_configuration());
}

#[tokio::test]
async fn drop_removes_every_component() {
    let store = store().await;
    let factory = factory(&store, SchemaStrategy::False);
    create(&factory, scripts_v2()).await;

    let manager = factory.schema_manager(scripts_v2());
    let mut session = factory.open_session().await.unwrap();
    manager.drop(&mut session).await.unwrap();
    assert!(!manager.is_engine_present(&mut session).await.unwrap());
    finish(session).await;

    for table in [PROPERTY_TABLE, "ACT_RU_TASK", "ACT_HI_TASK"] {
        assert!(matches!(
            store.committed_rows(table).await,
            Err(DbError::TableNotFound(_))
        ));
    }
}

#[tokio::test]
async fn create_drop_strategy_creates_on_build_and_drops_on_close() {
    let store = store().await;
    let factory = factory(&store, SchemaStrategy::CreateDrop);

    assert_eq!(
        factory
            .perform_schema_operations_on_build(&scripts_v2())
            .await
            .unwrap(),
        None
    );
    assert_eq!(property(&store, PropertyEntity::SCHEMA_VERSION).await, text("2"));

    factory
        .perform_schema_operations_on_close(&scripts_v2())
        .await
        .unwrap();
    assert!(store.committed_rows(PROPERTY_TABLE).await.is_err());
}

#[tokio::test]
async fn drop_create_strategy_resets_existing_data() {
    let store = store().await;
    create(&factory(&store, SchemaStrategy::False), scripts_v1()).await;

    let factory = factory(&store, SchemaStrategy::DropCreate);
    factory
        .perform_schema_operations_on_build(&scripts_v2())
        .await
        .unwrap();
    assert_eq!(property(&store, PropertyEntity::SCHEMA_VERSION).await, text("2"));
    assert_eq!(property(&store, PropertyEntity::SCHEMA_HISTORY).await, text("create(2)"));

    // Not a create-drop factory: closing leaves the schema alone.
    factory
        .perform_schema_operations_on_close(&scripts_v2())
        .await
        .unwrap();
    assert!(store.committed_rows(PROPERTY_TABLE).await.is_ok());
}

#[tokio::test]
async fn check_only_strategy_fails_on_empty_store() {
    let store = store().await;
    let factory = factory(&store, SchemaStrategy::False);
    let err = factory
        .perform_schema_operations_on_build(&scripts_v2())
        .await
        .unwrap_err();
    assert!(err.is_configuration());
}

#[tokio::test]
async fn update_strategy_upgrades_on_build() {
    let store = store().await;
    create(&factory(&store, SchemaStrategy::False), scripts_v1()).await;

    let factory = factory(&store, SchemaStrategy::True);
    let feedback = factory
        .perform_schema_operations_on_build(&scripts_v2())
        .await
        .unwrap();
    assert_eq!(feedback.as_deref(), Some("upgraded schema from 1 to 2"));
}
