use memmodel_rust::seed::demo_schema;
use memmodel_rust::{
    Adapter, Attributes, Columns, Database, InstanceRef, KeyValue, MemoryAdapter, ModelDef,
    ModelError, Relation, RelationValue,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Notify;

fn database() -> Database {
    Database::new(demo_schema(), MemoryAdapter::new()).unwrap()
}

fn cached_many(db: &Database, owner: InstanceRef, name: &str) -> Vec<InstanceRef> {
    db.session()
        .cached_relationship(owner, name)
        .unwrap()
        .map(|value| value.many().to_vec())
        .unwrap_or_default()
}

#[tokio::test]
async fn test_concrete_owner_reassignment() {
    let db = database();
    let mut s = db.session();
    let user_a = s.build("User", Attributes::new().column("id", 1)).unwrap();
    let user_b = s.build("User", Attributes::new().column("id", 2)).unwrap();
    let photo = s
        .build("Photo", Attributes::new().relationship("owner", user_a))
        .unwrap();
    s.set_relationship(photo, "owner", user_b).unwrap();
    drop(s);

    assert_eq!(db.session().get(photo, "owner_id").unwrap(), json!(2));
    assert!(!cached_many(&db, user_a, "photos").contains(&photo));
    assert!(cached_many(&db, user_b, "photos").contains(&photo));
    assert_eq!(
        db.load(photo, "owner").await.unwrap(),
        RelationValue::One(Some(user_b))
    );
}

#[tokio::test]
async fn test_primary_key_propagates_to_unknown_group() {
    let db = database();
    let mut s = db.session();
    let a = s.build("User", Attributes::new().column("name", "a")).unwrap();
    let b = s.copy(a).unwrap();

    s.set(a, "id", 5).unwrap();
    assert_eq!(s.primary_key(b).unwrap(), Some(KeyValue::Int(5)));
    let known = s.known_set_for("User", &KeyValue::Int(5)).unwrap();
    assert!(known.contains(&a) && known.contains(&b));
}

#[tokio::test]
async fn test_identity_conflict_with_persisted_record() {
    let db = database();
    let saved = db.insert("User", Attributes::new()).await.unwrap();
    let key = db.session().primary_key(saved).unwrap().unwrap();

    let mut s = db.session();
    let stranger = s.build("User", Attributes::new()).unwrap();
    let err = s.set(stranger, "id", key.to_value()).unwrap_err();
    assert_eq!(
        err,
        ModelError::IdentityConflict {
            class: "User".to_string(),
            key,
        }
    );
}

#[tokio::test]
async fn test_foreign_key_and_relationship_stay_consistent() {
    let db = database();
    let (user, photo) = {
        let mut s = db.session();
        let user = s.build("User", Attributes::new().column("id", 4)).unwrap();
        let photo = s.build("Photo", Attributes::new()).unwrap();
        s.set_relationship(photo, "owner", user).unwrap();
        assert_eq!(s.get(photo, "owner_id").unwrap(), json!(4));

        s.set(photo, "owner_id", Value::Null).unwrap();
        (user, photo)
    };

    assert_eq!(db.load(photo, "owner").await.unwrap(), RelationValue::One(None));
    assert!(cached_many(&db, user, "photos").is_empty());
}

#[tokio::test]
async fn test_relationship_mutation_does_not_reach_siblings() {
    let db = database();
    let mut s = db.session();
    let user = s.build("User", Attributes::new().column("id", 1)).unwrap();
    let photo = s.build("Photo", Attributes::new()).unwrap();
    let photo_copy = s.copy(photo).unwrap();

    s.set_relationship(photo, "owner", user).unwrap();
    assert_eq!(s.cached_relationship(photo_copy, "owner").unwrap(), None);
    assert_eq!(s.get(photo_copy, "owner_id").unwrap(), Value::Null);

    // once the copy agrees on the foreign key it adopts the sibling's owner
    s.set(photo_copy, "owner_id", 1).unwrap();
    drop(s);
    assert_eq!(
        db.load(photo_copy, "owner").await.unwrap(),
        RelationValue::One(Some(user))
    );
}

#[tokio::test]
async fn test_reassignment_hands_reverse_pointer_to_fresher_copy() {
    let db = database();
    let mut s = db.session();
    let a = s.build("User", Attributes::new().column("id", 1)).unwrap();
    let b = s.build("User", Attributes::new().column("id", 2)).unwrap();
    let photo = s
        .build(
            "Photo",
            Attributes::new().column("id", 7).relationship("owner", a),
        )
        .unwrap();
    let copy = s.copy(photo).unwrap();
    drop(s);

    assert_eq!(db.load(copy, "owner").await.unwrap(), RelationValue::One(Some(a)));
    db.session().set_relationship(photo, "owner", b).unwrap();

    assert_eq!(cached_many(&db, a, "photos"), vec![copy]);
    assert_eq!(cached_many(&db, b, "photos"), vec![photo]);
}

#[tokio::test]
async fn test_primary_key_reaches_referring_foreign_keys() {
    let db = database();
    let mut s = db.session();
    let user = s.build("User", Attributes::new()).unwrap();
    let photo = s
        .build("Photo", Attributes::new().relationship("owner", user))
        .unwrap();
    assert_eq!(s.get(photo, "owner_id").unwrap(), Value::Null);

    s.set(user, "id", 9).unwrap();
    assert_eq!(s.get(photo, "owner_id").unwrap(), json!(9));
}

#[tokio::test]
async fn test_reload_sees_new_records() {
    let db = database();
    let user = db.insert("User", Attributes::new()).await.unwrap();

    let Relation::Pending(handle) = db.relationship(user, "photos").unwrap() else {
        panic!("photos of a persisted user need a fetch");
    };
    assert_eq!(handle.value().await.unwrap(), RelationValue::Many(vec![]));

    db.insert("Photo", Attributes::new().column("owner_id", 1))
        .await
        .unwrap();
    assert_eq!(handle.value().await.unwrap(), RelationValue::Many(vec![]));

    let reloaded = handle.reload().await.unwrap();
    assert_eq!(reloaded.many().len(), 1);
    assert_eq!(db.load(user, "photos").await.unwrap(), reloaded);
}

#[tokio::test]
async fn test_one_to_one_loads_from_both_sides() {
    let db = database();
    let user = db.insert("User", Attributes::new()).await.unwrap();
    db.insert(
        "Email",
        Attributes::new()
            .column("address", "a@example.com")
            .relationship("user", user),
    )
    .await
    .unwrap();
    db.reset();

    let user = db.find("User", &KeyValue::Int(1)).await.unwrap().unwrap();
    let email = db.load(user, "email").await.unwrap().one().unwrap();
    assert_eq!(db.session().get(email, "address").unwrap(), json!("a@example.com"));

    let owner = db.load(email, "user").await.unwrap().one().unwrap();
    assert!(db.session().same_record(owner, user));
}

#[tokio::test]
async fn test_many_to_many_is_not_reversible() {
    let db = database();
    let unsaved = db.build("User", Attributes::new()).unwrap();
    assert_eq!(db.load(unsaved, "groups").await.unwrap(), RelationValue::Many(vec![]));

    let keyed = db.build("User", Attributes::new().column("id", 3)).unwrap();
    let relation = db.relationship(keyed, "groups").unwrap();
    assert!(!relation.is_loaded());
    assert!(matches!(
        relation.resolve().await,
        Err(ModelError::UnsupportedRelationshipDirection { .. })
    ));
}

struct FailingAdapter;

#[async_trait::async_trait]
impl Adapter for FailingAdapter {
    async fn find(&self, _: &ModelDef, _: &KeyValue) -> anyhow::Result<Option<Columns>> {
        anyhow::bail!("connection refused")
    }

    async fn find_by(&self, _: &ModelDef, _: &Columns) -> anyhow::Result<Option<Columns>> {
        anyhow::bail!("connection refused")
    }

    async fn find_all(&self, _: &ModelDef, _: &Columns) -> anyhow::Result<Vec<Columns>> {
        anyhow::bail!("connection refused")
    }

    async fn insert(&self, _: &ModelDef, _: Columns) -> anyhow::Result<Columns> {
        anyhow::bail!("connection refused")
    }

    async fn update(&self, _: &ModelDef, _: Columns) -> anyhow::Result<Columns> {
        anyhow::bail!("connection refused")
    }

    async fn delete(&self, _: &ModelDef, _: &KeyValue) -> anyhow::Result<bool> {
        anyhow::bail!("connection refused")
    }
}

#[tokio::test]
async fn test_failed_fetch_leaves_cache_empty() {
    let db = Database::new(demo_schema(), FailingAdapter).unwrap();
    let photo = db
        .build("Photo", Attributes::new().column("owner_id", 5))
        .unwrap();

    match db.load(photo, "owner").await {
        Err(ModelError::Adapter(message)) => assert!(message.contains("connection refused")),
        other => panic!("expected an adapter error, got {:?}", other),
    }
    assert_eq!(db.session().cached_relationship(photo, "owner").unwrap(), None);
}

/// Holds `find_all` until the test opens the gate
struct GatedAdapter {
    inner: MemoryAdapter,
    gate: Arc<Notify>,
}

#[async_trait::async_trait]
impl Adapter for GatedAdapter {
    async fn find(&self, model: &ModelDef, key: &KeyValue) -> anyhow::Result<Option<Columns>> {
        self.inner.find(model, key).await
    }

    async fn find_by(&self, model: &ModelDef, criteria: &Columns) -> anyhow::Result<Option<Columns>> {
        self.inner.find_by(model, criteria).await
    }

    async fn find_all(&self, model: &ModelDef, criteria: &Columns) -> anyhow::Result<Vec<Columns>> {
        self.gate.notified().await;
        self.inner.find_all(model, criteria).await
    }

    async fn insert(&self, model: &ModelDef, record: Columns) -> anyhow::Result<Columns> {
        self.inner.insert(model, record).await
    }

    async fn update(&self, model: &ModelDef, record: Columns) -> anyhow::Result<Columns> {
        self.inner.update(model, record).await
    }

    async fn delete(&self, model: &ModelDef, key: &KeyValue) -> anyhow::Result<bool> {
        self.inner.delete(model, key).await
    }
}

#[tokio::test]
async fn test_assignment_during_fetch_wins() {
    let gate = Arc::new(Notify::new());
    let adapter = GatedAdapter {
        inner: MemoryAdapter::new(),
        gate: gate.clone(),
    };
    let db = Database::new(demo_schema(), adapter).unwrap();
    let user = db.insert("User", Attributes::new()).await.unwrap();
    db.insert("Photo", Attributes::new().column("owner_id", 1))
        .await
        .unwrap();

    let Relation::Pending(handle) = db.relationship(user, "photos").unwrap() else {
        panic!("photos of a persisted user need a fetch");
    };
    let local = db.build("Photo", Attributes::new()).unwrap();

    let (value, _) = tokio::join!(handle.value(), async {
        db.session()
            .set_relationship(user, "photos", vec![local])
            .unwrap();
        gate.notify_one();
    });

    assert_eq!(value.unwrap(), RelationValue::Many(vec![local]));
    assert_eq!(cached_many(&db, user, "photos"), vec![local]);
}

#[tokio::test]
async fn test_reset_invalidates_handles() {
    let db = database();
    let user = db.build("User", Attributes::new().column("name", "old")).unwrap();
    db.reset();
    let fresh = db.build("User", Attributes::new().column("name", "fresh")).unwrap();

    assert_ne!(user, fresh);
    assert!(matches!(
        db.session().get(user, "name"),
        Err(ModelError::InstanceUnloaded { .. })
    ));
    assert_eq!(db.session().get(fresh, "name").unwrap(), json!("fresh"));
}

#[tokio::test]
async fn test_pending_handle_from_before_reset_stays_unloaded() {
    let db = database();
    let user = db.insert("User", Attributes::new()).await.unwrap();
    let Relation::Pending(handle) = db.relationship(user, "photos").unwrap() else {
        panic!("photos of a persisted user need a fetch");
    };
    db.reset();
    let fresh = db.build("User", Attributes::new()).unwrap();

    assert!(matches!(
        handle.value().await,
        Err(ModelError::InstanceUnloaded { .. })
    ));
    assert_eq!(db.session().cached_relationship(fresh, "photos").unwrap(), None);
}

#[tokio::test]
async fn test_local_attach_does_not_hide_persisted_members() {
    let db = database();
    db.insert("User", Attributes::new()).await.unwrap();
    for title in ["first", "second"] {
        db.insert(
            "Photo",
            Attributes::new().column("title", title).column("owner_id", 1),
        )
        .await
        .unwrap();
    }
    db.reset();

    let user = db.find("User", &KeyValue::Int(1)).await.unwrap().unwrap();
    let local = db
        .build("Photo", Attributes::new().relationship("owner", user))
        .unwrap();

    let photos = db.load(user, "photos").await.unwrap();
    assert_eq!(photos.many().len(), 3);
    assert!(photos.many().contains(&local));
}

#[tokio::test]
async fn test_rejected_insert_persists_nothing() {
    let db = database();
    let email = db.build("Email", Attributes::new()).unwrap();

    let err = db
        .insert("Photo", Attributes::new().relationship("owner", email))
        .await
        .unwrap_err();
    assert!(matches!(err, ModelError::WrongTargetClass { .. }));
    assert!(db.find_all("Photo", &Columns::new()).await.unwrap().is_empty());
    assert_eq!(db.session().instance_count("Photo").unwrap(), 0);
}
