use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;
use sinks::build_sinks;
use tables::{build_table_store, provision_tables};
use tierforge_config::{EngineSpec, StoreCfg, load_from_path};
use tierforge_core::{ArcDynTableStore, Batch, Offset, Row, Value};
use tokio_util::sync::CancellationToken;

fn demo() -> EngineSpec {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../demos/normalize.yaml");
    load_from_path(path).expect("demo spec")
}

fn person(id: i64, first: &str, last: &str, addresses: &[(i64, &str, i64)]) -> Row {
    let mut row = Row::new()
        .with("id", id)
        .with("firstName", first)
        .with("lastName", last);
    for n in 1..=2 {
        let a = addresses.get(n - 1);
        row.push(format!("streetNo{n}"), a.map(|a| a.0));
        row.push(format!("cityName{n}"), a.map(|a| a.1));
        row.push(format!("zipcode{n}"), a.map(|a| a.2));
        row.push(format!("county{n}"), a.map(|_| "usa"));
    }
    row.with(
        "arrivalTime",
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
    )
}

async fn provisioned(spec: &EngineSpec) -> ArcDynTableStore {
    let store = build_table_store(&StoreCfg::Memory).unwrap();
    provision_tables(&store, &spec.spec.tables).await.unwrap();
    store
}

#[tokio::test]
async fn demo_sinks_normalize_one_batch() {
    let spec = demo();
    let store = provisioned(&spec).await;
    let source = spec.spec.source.table.clone();

    store
        .append_rows(
            &source,
            vec![
                person(1, "abc", "bcd", &[(123, "redmond", 98022), (343, "bellevue", 98077)]),
                person(2, "some", "one", &[(1234, "kirkland", 98088)]),
            ],
            None,
        )
        .await
        .unwrap();

    let schema = store.schema(&source).await.unwrap();
    let sinks = build_sinks(&spec, store.clone(), &schema, CancellationToken::new())
        .unwrap();
    assert_eq!(sinks.len(), 2);

    let read = store.read_since(&source, Offset::ZERO, None).await.unwrap();
    let batch = Batch::new(source.as_str(), Offset::ZERO, read.new_offset, read.commits);

    for sink in &sinks {
        sink.open().await.unwrap();
        let view = sink.reconcile(batch.clone()).await.unwrap();
        let rows = sink.apply(&view).unwrap();
        let out = sink.commit(&view, rows).await.unwrap();
        assert_eq!(out.end, Offset(1));
    }

    let identity = store.scan("silver_identity").await.unwrap();
    assert_eq!(identity.len(), 2);
    assert_eq!(identity[1].value("firstName"), &Value::from("some"));

    let address = store.scan("silver_address").await.unwrap();
    let keys: Vec<_> = address
        .iter()
        .map(|r| (r.value("AddressId").clone(), r.value("PartyId").clone()))
        .collect();
    assert_eq!(
        keys,
        vec![
            (Value::Int(2), Value::Int(1)),
            (Value::Int(3), Value::Int(1)),
            (Value::Int(4), Value::Int(2)),
        ]
    );
}

#[tokio::test]
async fn missing_source_column_is_rejected_at_build() {
    let mut spec = demo();
    let store = provisioned(&spec).await;
    let mut schema_fields = spec.spec.tables[0].fields.clone();
    schema_fields.retain(|f| f.name != "lastName");
    spec.spec.tables[0].fields = schema_fields;
    let source = spec.spec.tables[0].schema().unwrap();

    let err = build_sinks(&spec, store, &source, CancellationToken::new())
        .err()
        .expect("lastName is projected by silver_identity");
    assert!(format!("{err:#}").contains("lastName"));
}
