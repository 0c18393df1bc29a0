use std::collections::HashMap;

use dog_odm::{Aggregatable, Connection, Docs, Document, FieldDef, FieldType, Filter, Queryable, Schema};
use dog_tenant::{TenantModelExt, TenantOptions, TenantPlugin};
use proptest::prelude::*;
use serde_json::json;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
}

fn tenant_name() -> impl Strategy<Value = String> {
    prop_oneof![Just("a".to_string()), Just("b".to_string()), Just("c".to_string())]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Every bound read sees exactly the documents written under its tenant.
    #[test]
    fn bound_reads_see_only_their_tenant(writes in proptest::collection::vec((tenant_name(), 0i64..5), 0..30)) {
        let rt = runtime();
        rt.block_on(async {
            let conn = Connection::new();
            let mut schema = Schema::new().field(FieldDef::new("n", FieldType::Number));
            TenantPlugin::attach(&mut schema, TenantOptions::default()).unwrap();
            let items = conn.compile("Item", schema).unwrap();

            let mut expected: HashMap<String, usize> = HashMap::new();
            for (tenant, n) in &writes {
                let doc: Document = json!({"n": n}).as_object().cloned().unwrap();
                items
                    .by_tenant(tenant.as_str())
                    .unwrap()
                    .insert_many(Docs::One(doc))
                    .await
                    .unwrap();
                *expected.entry(tenant.clone()).or_default() += 1;
            }

            for tenant in ["a", "b", "c"] {
                let bound = items.by_tenant(tenant).unwrap();
                let want = expected.get(tenant).copied().unwrap_or(0);

                let found = bound.find(Filter::new()).await.unwrap();
                prop_assert_eq!(found.len(), want);
                prop_assert!(found.iter().all(|d| d["tenant"] == json!(tenant)));

                let aggregated = bound.aggregate(None).await.unwrap();
                prop_assert_eq!(aggregated.len(), want);
                prop_assert_eq!(bound.count(Filter::new()).await.unwrap(), want as u64);
            }
            Ok(())
        })?;
    }
}
