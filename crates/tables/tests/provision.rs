use pretty_assertions::assert_eq;
use tables::{build_table_store, provision_tables};
use tierforge_config::{StoreCfg, load_from_path};
use tierforge_core::{Offset, Row, StoreError};

fn demo_tables() -> Vec<tierforge_config::TableCfg> {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../demos/normalize.yaml");
    load_from_path(path).expect("demo spec").spec.tables
}

#[tokio::test]
async fn provisioning_twice_is_a_noop() {
    let store = build_table_store(&StoreCfg::Memory).unwrap();
    let tables = demo_tables();

    provision_tables(&store, &tables).await.unwrap();
    provision_tables(&store, &tables).await.unwrap();

    assert_eq!(
        store.list_tables().await.unwrap(),
        vec!["bronze_person", "silver_address", "silver_identity"]
    );
    let address = store.schema("silver_address").await.unwrap();
    assert_eq!(address.fields()[0].name, "AddressId");
    assert!(address.fields()[1].required);
}

#[tokio::test]
async fn conflicting_redeclaration_fails() {
    let store = build_table_store(&StoreCfg::Memory).unwrap();
    let mut tables = demo_tables();
    provision_tables(&store, &tables).await.unwrap();

    tables[1].fields.pop();
    let err = provision_tables(&store, &tables).await.unwrap_err();
    assert!(matches!(err, StoreError::SchemaConflict { .. }));
}

#[tokio::test]
async fn file_store_from_config_persists() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = StoreCfg::File {
        root: dir.path().to_string_lossy().into_owned(),
    };

    {
        let store = build_table_store(&cfg).unwrap();
        provision_tables(&store, &demo_tables()).await.unwrap();
        store
            .append_rows(
                "silver_identity",
                vec![
                    Row::new()
                        .with("id", 1)
                        .with("firstName", "abc")
                        .with("lastName", "bcd"),
                ],
                None,
            )
            .await
            .unwrap();
    }

    let store = build_table_store(&cfg).unwrap();
    provision_tables(&store, &demo_tables()).await.unwrap();
    assert_eq!(store.head("silver_identity").await.unwrap(), Offset(1));
    assert_eq!(store.head("silver_address").await.unwrap(), Offset::ZERO);
}
