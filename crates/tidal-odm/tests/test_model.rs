//! Integration tests for model persistence operations.
//!
//! Each test builds its own registry, so tests never share server state.

use bson::doc;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tidal_odm::{
    ChangeKind, ConnectOptions, Connection, Model, Registry, TidalError, WriteOutcome,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Test {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    field: String,
}

impl Test {
    fn new(field: &str) -> Self {
        Self {
            id: None,
            field: field.to_string(),
        }
    }

    fn with_id(id: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            field: String::new(),
        }
    }
}

impl Model for Test {
    fn collection_name() -> &'static str {
        "Test"
    }

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn set_id(&mut self, id: String) {
        self.id = Some(id);
    }
}

async fn connect() -> (Registry, Arc<Connection>) {
    let _ = tracing_subscriber::fmt::try_init();
    let registry = Registry::new();
    let conn = registry.connect(ConnectOptions::default()).await.unwrap();
    (registry, conn)
}

#[tokio::test]
async fn test_save() {
    let (_registry, conn) = connect().await;

    let mut test = Test::new("value");
    let outcome = test.save(&conn).await.unwrap();

    assert_eq!(outcome, WriteOutcome::Inserted);
    assert!(test.id.is_some());

    Test::drop_collection(&conn).await.unwrap();
}

#[tokio::test]
async fn test_load() {
    let (_registry, conn) = connect().await;

    let mut alpha = Test::new("value");
    alpha.save(&conn).await.unwrap();

    let mut beta = Test::with_id(alpha.id().unwrap());
    beta.load(&conn).await.unwrap();

    assert_eq!(alpha.field, beta.field);
    assert_eq!(alpha, beta);

    Test::drop_collection(&conn).await.unwrap();
}

#[tokio::test]
async fn test_save_existing() {
    let (_registry, conn) = connect().await;

    let mut alpha = Test::new("value");
    alpha.save(&conn).await.unwrap();
    let id = alpha.id.clone();

    alpha.field = "alpha".to_string();
    assert_eq!(alpha.save(&conn).await.unwrap(), WriteOutcome::Replaced);
    assert_eq!(alpha.field, "alpha");
    assert_eq!(alpha.id, id);

    let mut beta = Test::with_id(alpha.id().unwrap());
    beta.load(&conn).await.unwrap();
    assert_eq!(beta.field, "alpha");
    assert_eq!(Test::count(&conn).await.unwrap(), 1);

    // Saving again without changes writes nothing
    assert_eq!(alpha.save(&conn).await.unwrap(), WriteOutcome::Unchanged);

    Test::drop_collection(&conn).await.unwrap();
}

#[tokio::test]
async fn test_save_with_preset_id_inserts() {
    let (_registry, conn) = connect().await;

    let mut test = Test {
        id: Some("chosen".to_string()),
        field: "value".to_string(),
    };
    assert_eq!(test.save(&conn).await.unwrap(), WriteOutcome::Inserted);
    assert!(Test::exists(&conn, "chosen").await.unwrap());
}

#[tokio::test]
async fn test_load_missing() {
    let (_registry, conn) = connect().await;
    Test::new("value").save(&conn).await.unwrap();

    let mut ghost = Test::with_id("missing");
    let err = ghost.load(&conn).await.unwrap_err();
    assert!(err.is_not_found());

    let mut anonymous = Test::new("value");
    assert!(matches!(
        anonymous.load(&conn).await,
        Err(TidalError::Validation(_))
    ));
}

#[tokio::test]
async fn test_add_single() {
    let (_registry, conn) = connect().await;

    let added = Test::add(&conn, doc! { "field": "value" }).await.unwrap();

    assert_eq!(added.len(), 1);
    assert!(added[0].id.is_some());
    assert_eq!(Test::count(&conn).await.unwrap(), 1);

    Test::drop_collection(&conn).await.unwrap();
}

#[tokio::test]
async fn test_add_multiple() {
    let (_registry, conn) = connect().await;

    Test::add(&conn, [doc! { "field": "alpha" }, doc! { "field": "beta" }])
        .await
        .unwrap();

    assert_eq!(Test::count(&conn).await.unwrap(), 2);

    Test::drop_collection(&conn).await.unwrap();
}

#[tokio::test]
async fn test_add_rejects_schema_mismatch() {
    let (_registry, conn) = connect().await;
    Test::add(&conn, doc! { "field": "kept" }).await.unwrap();

    let result = Test::add(
        &conn,
        vec![doc! { "field": "fine" }, doc! { "other": "missing field" }],
    )
    .await;
    assert!(matches!(result, Err(TidalError::Validation(_))));

    let result = Test::add(&conn, doc! { "field": "x", "$set": 1 }).await;
    assert!(matches!(result, Err(TidalError::Validation(_))));

    // Nothing from the rejected calls was written
    assert_eq!(Test::count(&conn).await.unwrap(), 1);
}

#[tokio::test]
async fn test_add_with_conflicting_ids_writes_nothing() {
    let (_registry, conn) = connect().await;
    Test::add(&conn, doc! { "id": "seed", "field": "seed" }).await.unwrap();

    let repeated = Test::add(
        &conn,
        vec![
            doc! { "field": "fresh" },
            doc! { "id": "dup", "field": "x" },
            doc! { "id": "dup", "field": "y" },
        ],
    )
    .await;
    assert!(matches!(repeated, Err(TidalError::Conflict(_))));

    let taken = Test::add(
        &conn,
        [doc! { "id": "new", "field": "x" }, doc! { "id": "seed", "field": "y" }],
    )
    .await;
    assert!(matches!(taken, Err(TidalError::Conflict(_))));

    assert_eq!(Test::count(&conn).await.unwrap(), 1);
    assert!(!Test::exists(&conn, "dup").await.unwrap());
    assert!(!Test::exists(&conn, "new").await.unwrap());
}

#[tokio::test]
async fn test_exists() {
    let (_registry, conn) = connect().await;

    let mut test = Test::new("value");
    test.save(&conn).await.unwrap();

    assert!(Test::exists(&conn, test.id().unwrap()).await.unwrap());
    assert!(!Test::exists(&conn, "missing").await.unwrap());

    Test::drop_collection(&conn).await.unwrap();
}

#[tokio::test]
async fn test_count() {
    let (_registry, conn) = connect().await;

    Test::add(&conn, doc! { "field": "value" }).await.unwrap();

    assert_eq!(Test::count(&conn).await.unwrap(), 1);

    Test::drop_collection(&conn).await.unwrap();
}

#[tokio::test]
async fn test_drop() {
    let (_registry, conn) = connect().await;

    Test::add(&conn, doc! { "field": "value" }).await.unwrap();

    assert!(Test::drop_collection(&conn).await.unwrap());

    assert!(matches!(
        Test::count(&conn).await,
        Err(TidalError::CollectionNotFound(_))
    ));

    // Dropping again is not an error
    assert!(!Test::drop_collection(&conn).await.unwrap());
}

#[tokio::test]
async fn test_find_by_id() {
    let (_registry, conn) = connect().await;

    let mut alpha = Test::new("value");
    alpha.save(&conn).await.unwrap();

    let beta = Test::find_by_id(&conn, alpha.id().unwrap())
        .await
        .unwrap()
        .expect("saved record should be found");
    assert_eq!(alpha.id, beta.id);

    assert!(Test::find_by_id(&conn, "missing").await.unwrap().is_none());

    Test::drop_collection(&conn).await.unwrap();
}

#[tokio::test]
async fn test_find_one() {
    let (_registry, conn) = connect().await;

    Test::add(&conn, [doc! { "field": "alpha" }, doc! { "field": "beta" }])
        .await
        .unwrap();

    let test = Test::find_one(&conn, doc! { "field": "beta" })
        .await
        .unwrap()
        .expect("beta should match");
    assert_eq!(test.field, "beta");

    assert!(Test::find_one(&conn, doc! { "field": "gamma" })
        .await
        .unwrap()
        .is_none());

    Test::drop_collection(&conn).await.unwrap();
}

#[tokio::test]
async fn test_find() {
    let (_registry, conn) = connect().await;

    Test::add(&conn, [doc! { "field": "alpha" }, doc! { "field": "beta" }])
        .await
        .unwrap();

    let models: Vec<Test> = Test::find_all(&conn).to_list().await.unwrap();
    assert_eq!(models.len(), 2);

    let mut cursor = Test::find(&conn, doc! { "field": "alpha" });
    let first = cursor.next().await.unwrap().unwrap();
    assert_eq!(first.field, "alpha");
    assert!(cursor.next().await.is_none());

    Test::drop_collection(&conn).await.unwrap();
}

#[tokio::test]
async fn test_find_on_missing_collection() {
    let (_registry, conn) = connect().await;

    let result = Test::find_all(&conn).to_list().await;
    assert!(matches!(result, Err(TidalError::CollectionNotFound(_))));
}

#[tokio::test]
async fn test_changes() {
    let (_registry, conn) = connect().await;

    let mut added = Test::add(&conn, [doc! { "field": "alpha" }, doc! { "field": "beta" }])
        .await
        .unwrap();
    let mut alpha = added.remove(0);

    let mut feed = alpha.changes(&conn).await.unwrap();

    let read = async {
        tokio::time::timeout(Duration::from_secs(5), feed.next())
            .await
            .expect("no change within timeout")
            .expect("feed ended")
            .unwrap()
    };

    let write = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        alpha.field = "test".to_string();
        alpha.save(&conn).await.unwrap();
    };

    let (change, ()) = tokio::join!(read, write);

    assert_eq!(change.kind, ChangeKind::Update);
    assert_eq!(change.old_val.unwrap().field, "alpha");
    assert_eq!(change.new_val.unwrap().field, "test");

    Test::drop_collection(&conn).await.unwrap();
}
