use std::sync::Arc;

use dog_odm::{
    populate, Aggregatable, BulkWritable, Connection, DogError, Docs, Document, ErrorKind, FieldDef,
    FieldType, Filter, HookOp, IndexOptions, Model, Pipeline, Queryable, Schema, Stage, Update,
};
use dog_tenant::{TenantIntrospection, TenantModelExt, TenantOptions, TenantPlugin};
use serde_json::{json, Value};

fn doc(v: Value) -> Document {
    v.as_object().cloned().unwrap_or_default()
}

fn user_schema(options: TenantOptions) -> Schema {
    let mut schema = Schema::new()
        .field(FieldDef::new("name", FieldType::String))
        .field(FieldDef::new("email", FieldType::String).with_index(IndexOptions::unique().sparse()))
        .field(FieldDef::new("status", FieldType::String));
    TenantPlugin::attach(&mut schema, options).unwrap();
    schema
}

fn setup() -> (Connection, Arc<dog_odm::BaseModel>) {
    let conn = Connection::new();
    let users = conn.compile("User", user_schema(TenantOptions::default())).unwrap();
    (conn, users)
}

/// S1. Queries bound to one tenant never see another tenant's documents
#[tokio::test]
async fn test_isolation_between_tenants() {
    let (_conn, users) = setup();
    let a = users.by_tenant("a").unwrap();
    let b = users.by_tenant("b").unwrap();

    a.create(doc(json!({"name": "x", "email": "x@a"}))).await.unwrap();

    assert_eq!(a.find(Filter::new()).await.unwrap().len(), 1);
    assert!(b.find(Filter::new()).await.unwrap().is_empty());
    assert!(b.find_one(Filter::new().with("name", "x")).await.unwrap().is_none());
    assert_eq!(b.count(Filter::new()).await.unwrap(), 0);
    assert_eq!(b.count_documents(Filter::new()).await.unwrap(), 0);

    // a caller-supplied tenant condition is overwritten
    let sneaky = Filter::new().with("tenant", "a");
    assert!(b.find(sneaky).await.unwrap().is_empty());

    // the unbound base model sees everything
    let all = users.find(Filter::new()).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0]["tenant"], json!("a"));
}

/// S2. Binding twice yields the cached instance
#[tokio::test]
async fn test_bound_model_cache_identity() {
    let (_conn, users) = setup();
    let plugin = users.tenant_plugin().unwrap();

    let first = plugin.bound_model(&users, "t1").unwrap();
    let second = plugin.bound_model(&users, "t1").unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    let numeric = plugin.bound_model(&users, 7i64).unwrap();
    let stringy = plugin.bound_model(&users, "7").unwrap();
    assert!(Arc::ptr_eq(&numeric, &stringy));

    assert_eq!(plugin.cache_len(), 2);

    let via_accessor = users.access("byTenant", "t1").unwrap();
    assert_eq!(via_accessor.tenant(), first.tenant());
}

/// S3. Inserting while bound stores the bound tenant
#[tokio::test]
async fn test_insert_many_sets_tenant() {
    let (_conn, users) = setup();
    let t1 = users.by_tenant("t1").unwrap();

    let inserted = t1
        .insert_many(Docs::One(doc(json!({"name": "solo"}))))
        .await
        .unwrap();
    assert_eq!(inserted.len(), 1);
    assert!(inserted[0].has_tenant_context());

    let stored = users.find(Filter::new()).await.unwrap();
    assert_eq!(stored[0]["tenant"], json!("t1"));
    assert_eq!(stored[0]["name"], json!("solo"));
}

/// S4. delete_many without a filter only deletes the bound tenant's documents
#[tokio::test]
async fn test_delete_many_is_scoped() {
    let (_conn, users) = setup();
    let t1 = users.by_tenant("t1").unwrap();
    let t2 = users.by_tenant("t2").unwrap();

    t1.insert_many(Docs::Many(vec![doc(json!({"name": "a"})), doc(json!({"name": "b"}))]))
        .await
        .unwrap();
    t2.insert_many(Docs::One(doc(json!({"name": "c"}))))
        .await
        .unwrap();

    let res = t1.delete_many(None).await.unwrap();
    assert_eq!(res.deleted_count, 2);
    assert_eq!(users.count(Filter::new()).await.unwrap(), 1);

    let res = t1
        .delete_one(Some(Filter::new().with("tenant", "t2")))
        .await
        .unwrap();
    assert_eq!(res.deleted_count, 0);

    let res = t2.remove(None).await.unwrap();
    assert_eq!(res.deleted_count, 1);
}

/// S5. Unique fields are unique per tenant
#[tokio::test]
async fn test_unique_email_per_tenant() {
    let (_conn, users) = setup();
    let a = users.by_tenant("a").unwrap();
    let b = users.by_tenant("b").unwrap();

    a.save(doc(json!({"email": "same@x"}))).await.unwrap();
    b.save(doc(json!({"email": "same@x"}))).await.unwrap();

    let err = a.save(doc(json!({"email": "same@x"}))).await.unwrap_err();
    assert_eq!(DogError::kind_of(&err), ErrorKind::Conflict);
    assert!(err.to_string().contains("tenant_1_email_1"));
}

/// S6. Aggregations are scoped by merging into the leading $match
#[tokio::test]
async fn test_aggregate_is_scoped() {
    let (_conn, users) = setup();
    let t1 = users.by_tenant("t1").unwrap();
    let t2 = users.by_tenant("t2").unwrap();

    t1.insert_many(Docs::Many(vec![
        doc(json!({"status": "active"})),
        doc(json!({"status": "inactive"})),
    ]))
    .await
    .unwrap();
    t2.insert_many(Docs::One(doc(json!({"status": "active"}))))
        .await
        .unwrap();

    let active = t1
        .aggregate(Some(
            Pipeline::new().with(Stage::Match(Filter::new().with("status", "active"))),
        ))
        .await
        .unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0]["tenant"], json!("t1"));

    assert_eq!(t1.aggregate(None).await.unwrap().len(), 2);

    let counted = t2
        .aggregate(Some(Pipeline::new().with(Stage::Count("n".into()))))
        .await
        .unwrap();
    assert_eq!(counted, vec![doc(json!({"n": 1}))]);
}

/// S7. Updates are scoped and cannot move documents between tenants
#[tokio::test]
async fn test_updates_are_scoped() {
    let (_conn, users) = setup();
    let a = users.by_tenant("a").unwrap();
    let b = users.by_tenant("b").unwrap();

    a.insert_many(Docs::Many(vec![doc(json!({"name": "1"})), doc(json!({"name": "2"}))]))
        .await
        .unwrap();
    b.insert_many(Docs::One(doc(json!({"name": "3"}))))
        .await
        .unwrap();

    let res = a
        .update_many(Filter::new(), Update::new().set("status", "x").set("tenant", "b"))
        .await
        .unwrap();
    assert_eq!(res.matched_count, 2);
    assert_eq!(b.count(Filter::new()).await.unwrap(), 1);
    assert_eq!(a.count(Filter::new().with("status", "x")).await.unwrap(), 2);

    let res = b
        .update_one(Filter::new().with("name", "1"), Update::new().set("status", "y"))
        .await
        .unwrap();
    assert_eq!(res.matched_count, 0);

    let res = b
        .update(Filter::new().with("name", "3"), Update::new().unset("tenant"))
        .await
        .unwrap();
    assert_eq!(res.matched_count, 1);
    assert_eq!(b.count(Filter::new()).await.unwrap(), 1);

    let updated = a
        .find_one_and_update(Filter::new().with("name", "2"), Update::new().set("status", "z"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated["tenant"], json!("a"));
    assert_eq!(updated["status"], json!("z"));

    assert!(b
        .find_one_and_remove(Filter::new().with("name", "1"))
        .await
        .unwrap()
        .is_none());
    assert!(a
        .find_one_and_remove(Filter::new().with("name", "1"))
        .await
        .unwrap()
        .is_some());
}

/// S8. A required tenant field is checked by the host's validation
#[tokio::test]
async fn test_required_tenant_id() {
    let conn = Connection::new();
    let opts = TenantOptions::builder().require_tenant_id(true).build();
    let users = conn.compile("User", user_schema(opts)).unwrap();

    let err = users.save(doc(json!({"name": "n"}))).await.unwrap_err();
    assert_eq!(DogError::kind_of(&err), ErrorKind::Unprocessable);

    let err = users
        .insert_many(Docs::One(doc(json!({"name": "n"}))))
        .await
        .unwrap_err();
    assert_eq!(DogError::kind_of(&err), ErrorKind::Unprocessable);

    let t1 = users.by_tenant("t1").unwrap();
    t1.save(doc(json!({"name": "n"}))).await.unwrap();
    t1.insert_many(Docs::One(doc(json!({"name": "m"}))))
        .await
        .unwrap();
    assert_eq!(t1.count(Filter::new()).await.unwrap(), 2);
}

/// S9. Referenced models are re-bound to the same tenant
#[tokio::test]
async fn test_populate_across_models() {
    let (conn, users) = setup();

    let mut post_schema = Schema::new()
        .field(FieldDef::new("title", FieldType::String))
        .field(FieldDef::new("author", FieldType::Ref("User".into())));
    TenantPlugin::attach(&mut post_schema, TenantOptions::default()).unwrap();
    let posts = conn.compile("Post", post_schema).unwrap();

    let ua = users.by_tenant("a").unwrap();
    let ub = users.by_tenant("b").unwrap();
    let ann = ua.save(doc(json!({"name": "ann"}))).await.unwrap();
    let bob = ub.save(doc(json!({"name": "bob"}))).await.unwrap();

    let pa = posts.by_tenant("a").unwrap();
    pa.save(doc(json!({"title": "mine", "author": ann["_id"].clone()})))
        .await
        .unwrap();
    pa.save(doc(json!({"title": "theirs", "author": bob["_id"].clone()})))
        .await
        .unwrap();

    let mut found = pa.find(Filter::new()).await.unwrap();
    populate(pa.as_ref(), &mut found, "author").await.unwrap();

    let by_title = |t: &str| found.iter().find(|d| d["title"] == json!(t)).cloned().unwrap();
    assert_eq!(by_title("mine")["author"]["name"], json!("ann"));
    assert_eq!(by_title("theirs")["author"], Value::Null);

    let via_db = pa.db().unwrap().model("User").unwrap();
    assert!(via_db.has_tenant_context());
    assert_eq!(via_db.tenant(), pa.tenant());
}

/// S10. Models without a compatible plugin come back unbound
#[tokio::test]
async fn test_connection_handle_compatibility() {
    let (conn, users) = setup();
    conn.compile("Tag", Schema::new()).unwrap();

    let mut org_schema = Schema::new();
    let org_plugin = TenantPlugin::attach(
        &mut org_schema,
        TenantOptions::builder().tenant_id_key("org").build(),
    )
    .unwrap();
    conn.compile("Invoice", org_schema).unwrap();

    let plugin = users.tenant_plugin().unwrap();
    assert!(!plugin.is_compatible_to(Some(org_plugin.as_ref() as &dyn TenantIntrospection)));
    assert!(plugin.is_compatible_to(Some(plugin.as_ref() as &dyn TenantIntrospection)));
    assert!(!plugin.is_compatible_to(None));

    let bound = users.by_tenant("a").unwrap();
    let db = bound.db().unwrap();
    assert!(!db.model("Tag").unwrap().has_tenant_context());
    assert!(!db.model("Invoice").unwrap().has_tenant_context());
    assert!(db.model("User").unwrap().has_tenant_context());
    assert!(db.model("Missing").is_err());
}

/// S11. Discriminators are bound under the same tenant
#[tokio::test]
async fn test_discriminators_are_bound() {
    let conn = Connection::new();
    let mut schema = Schema::new().field(FieldDef::new("at", FieldType::Number));
    TenantPlugin::attach(&mut schema, TenantOptions::default()).unwrap();
    let events = conn.compile("Event", schema).unwrap();
    events
        .discriminator_model(
            "Click",
            Schema::new().field(FieldDef::new("url", FieldType::String)),
        )
        .unwrap();

    let a = events.by_tenant("a").unwrap();
    assert_eq!(a.discriminator_names(), vec!["Click".to_string()]);

    let click_a = a.discriminator("Click").unwrap();
    assert!(click_a.has_tenant_context());
    let saved = click_a.save(doc(json!({"url": "/home"}))).await.unwrap();
    assert_eq!(saved["tenant"], json!("a"));
    assert_eq!(saved["__t"], json!("Click"));

    assert_eq!(a.find(Filter::new()).await.unwrap().len(), 1);
    let click_b = events.by_tenant("b").unwrap().discriminator("Click").unwrap();
    assert!(click_b.find(Filter::new()).await.unwrap().is_empty());
    assert!(a.discriminator("Nope").is_none());
}

/// S12. Instances created through a bound model stay scoped
#[tokio::test]
async fn test_instances_stay_scoped() {
    let (_conn, users) = setup();
    let a = users.by_tenant("a").unwrap();

    let mut inst = a.create(doc(json!({"name": "n"}))).await.unwrap();
    assert!(inst.has_tenant_context());

    inst.set("tenant", "b").unwrap();
    inst.set("name", "renamed").unwrap();
    inst.save().await.unwrap();
    assert_eq!(inst.get("tenant"), Some(&json!("a")));
    assert_eq!(a.count(Filter::new().with("name", "renamed")).await.unwrap(), 1);

    let res = inst.remove().await.unwrap();
    assert_eq!(res.deleted_count, 1);
    assert_eq!(users.count(Filter::new()).await.unwrap(), 0);
}

/// S13. Every hookable operation carries the scoping hook
#[test]
fn test_every_op_is_hooked() {
    let schema = user_schema(TenantOptions::default());
    for op in HookOp::ALL {
        assert_eq!(schema.hooks().count(op), 1, "{op} is not scoped");
    }
}

/// S14. Options can come from the connection configuration
#[tokio::test]
async fn test_options_from_connection_config() {
    let conn = Connection::new();
    conn.set("tenant.key", "org");
    conn.set("tenant.accessor", "forOrg");

    let opts = TenantOptions::from_config(&conn.config_snapshot()).unwrap();
    let invoices = conn.compile("Invoice", user_schema(opts)).unwrap();

    let acme = invoices.access("forOrg", "acme").unwrap();
    let saved = acme.save(doc(json!({"name": "i1"}))).await.unwrap();
    assert_eq!(saved["org"], json!("acme"));
    assert!(saved.get("tenant").is_none());
}

/// S15. Saving under another tenant's `_id` never replaces their document
#[tokio::test]
async fn test_save_cannot_take_over_foreign_id() {
    let (_conn, users) = setup();
    let a = users.by_tenant("a").unwrap();
    let b = users.by_tenant("b").unwrap();

    let theirs = b.save(doc(json!({"name": "b-secret"}))).await.unwrap();
    let err = a
        .save(doc(json!({"_id": theirs["_id"].clone(), "name": "hijacked"})))
        .await
        .unwrap_err();
    assert_eq!(DogError::kind_of(&err), ErrorKind::Conflict);

    assert_eq!(b.find(Filter::new()).await.unwrap(), vec![theirs.clone()]);
    assert!(a.find(Filter::new()).await.unwrap().is_empty());

    // re-saving one's own document still replaces it
    let mut mine = a.save(doc(json!({"name": "v1"}))).await.unwrap();
    mine.insert("name".into(), json!("v2"));
    a.save(mine).await.unwrap();
    let found = a.find(Filter::new()).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0]["name"], json!("v2"));
}

/// S16. `_id` stays unique across tenants on bound inserts
#[tokio::test]
async fn test_insert_many_rejects_foreign_id() {
    let (_conn, users) = setup();
    let a = users.by_tenant("a").unwrap();
    let b = users.by_tenant("b").unwrap();

    let theirs = b.save(doc(json!({"name": "b"}))).await.unwrap();
    let err = a
        .insert_many(Docs::One(doc(json!({"_id": theirs["_id"].clone()}))))
        .await
        .unwrap_err();
    assert_eq!(DogError::kind_of(&err), ErrorKind::Conflict);

    let same_id = Filter::new().with("_id", theirs["_id"].clone());
    assert_eq!(users.count(same_id).await.unwrap(), 1);
}

/// S17. Concurrent first binds of one tenant share a single bound model
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_binds_share_instance() {
    let (_conn, users) = setup();
    let plugin = users.tenant_plugin().unwrap();

    let tasks: Vec<_> = (0..64)
        .map(|_| {
            let plugin = plugin.clone();
            let users = users.clone();
            tokio::spawn(async move { plugin.bound_model(&users, "t1").unwrap() })
        })
        .collect();

    let mut bound = Vec::with_capacity(tasks.len());
    for task in tasks {
        bound.push(task.await.unwrap());
    }
    assert!(bound.iter().all(|m| Arc::ptr_eq(m, &bound[0])));
    assert_eq!(plugin.cache_len(), 1);
}
