use crate::defaults::default_settings;
use crate::grants::{RoleGrant, RowSource};
use crate::loader::{load_document, load_document_with_options, parse_document, LoadOptions};
use crate::model::{PolicyDocument, SettingSource};
use crate::store::PolicyStore;
use flexquery_core_types::{EntitySchema, OperationKind, SchemaRegistry};
use std::env;
use std::sync::{Mutex, OnceLock};

const BLOG_POLICY: &str = r#"
settings:
  pagination:
    max_limit: 100
  rate_limit: 120
entities:
  Article:
    exclude: [internal_notes]
    rate_limit: 60
    roles:
      Staff: "*"
      authenticated:
        rows: {status: published}
        fields: ["*", "author.*"]
        filters: [status]
        order_by: ["-created_at"]
        ops: [get, list]
"#;

#[test]
fn default_settings_have_reasonable_limits() {
    let settings = default_settings();
    assert_eq!(settings.pagination.default_limit, 50);
    assert_eq!(settings.pagination.max_limit, 200);
    assert_eq!(settings.security.max_relation_depth, 2);
    assert!(!settings.security.trust_forwarded_for);
    assert_eq!(settings.rate_limit, None);
}

#[test]
fn parse_document_applies_file_settings() {
    let document = parse_document(BLOG_POLICY).unwrap();
    assert_eq!(document.settings.pagination.max_limit, 100);
    assert_eq!(document.settings.pagination.default_limit, 50);
    assert_eq!(document.settings.rate_limit, Some(120));
    assert_eq!(
        document.provenance.get("pagination.max_limit"),
        Some(&SettingSource::File)
    );
    assert_eq!(
        document.provenance.get("pagination.default_limit"),
        Some(&SettingSource::Builtin)
    );
}

#[test]
fn store_lookups_are_case_insensitive() {
    let store = PolicyStore::new(parse_document(BLOG_POLICY).unwrap()).unwrap();
    assert_eq!(store.grant("article", "staff"), Some(&RoleGrant::Full));
    let Some(RoleGrant::Explicit(grant)) = store.grant("ARTICLE", "Authenticated") else {
        panic!("expected explicit grant");
    };
    assert!(grant.ops.contains(&OperationKind::List));
    assert!(matches!(grant.rows, Some(RowSource::Template(_))));
    assert!(store.grant("article", "anon").is_none());
    assert!(store.grant("comment", "staff").is_none());
    assert_eq!(store.exclude("article").map(|e| e.len()), Some(1));
}

#[test]
fn rejects_unknown_setting_paths() {
    let err = parse_document("settings:\n  pagination:\n    page_size: 10\n").unwrap_err();
    assert!(err.to_string().contains("pagination.page_size"));
}

#[test]
fn rejects_unknown_top_level_keys() {
    assert!(parse_document("{\"entitys\": {}}").is_err());
}

#[test]
fn rejects_max_limit_below_default() {
    let document =
        parse_document("settings:\n  pagination:\n    default_limit: 80\n    max_limit: 40\n")
            .unwrap();
    assert!(PolicyStore::new(document).is_err());
}

#[test]
fn load_reads_file_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let file_path = dir.path().join("policy.json");
    std::fs::write(
        &file_path,
        r#"{"settings": {"security": {"max_relation_depth": 3}}, "entities": {"author": {"roles": {"anon": ""}}}}"#,
    )
    .unwrap();

    let document = load_document_with_options(&LoadOptions {
        paths: vec![file_path],
        include_env: false,
    })
    .unwrap();
    assert_eq!(document.settings.security.max_relation_depth, 3);
    assert_eq!(
        document.entities["author"].roles.get("anon"),
        Some(&RoleGrant::deny())
    );
}

#[test]
fn check_schema_flags_unknown_entities() {
    let schema = SchemaRegistry::from_entities(vec![EntitySchema::new("article")
        .fields(["id", "title", "internal_notes"])
        .relation("author", "author")])
    .unwrap_err();
    assert!(schema.to_string().contains("author"));

    let schema = SchemaRegistry::from_entities(vec![
        EntitySchema::new("article").fields(["id", "title", "internal_notes"])
    ])
    .unwrap();
    let store = PolicyStore::new(parse_document(BLOG_POLICY).unwrap()).unwrap();
    assert!(store.check_schema(&schema).is_ok());

    let document = PolicyDocument::default().with_entity("comment", Default::default());
    let store = PolicyStore::new(document).unwrap();
    assert!(store.check_schema(&schema).is_err());
}

#[test]
fn env_cascade_overrides_file() {
    let _guard = env_guard().lock().unwrap();
    let key = "FLEXQUERY__PAGINATION__DEFAULT_LIMIT";
    env::set_var(key, "25");
    let document = load_document(None).expect("load document");
    env::remove_var(key);
    assert_eq!(document.settings.pagination.default_limit, 25);
    assert_eq!(
        document.provenance.get("pagination.default_limit"),
        Some(&SettingSource::Env)
    );
}

#[test]
fn env_json_blob_records_provenance() {
    let _guard = env_guard().lock().unwrap();
    env::set_var(
        "FLEXQUERY_OVERRIDE_JSON",
        r#"{"security": {"trust_forwarded_for": true}, "always_http_200": true}"#,
    );
    let document = load_document(None).expect("load document with json overrides");
    env::remove_var("FLEXQUERY_OVERRIDE_JSON");
    assert!(document.settings.security.trust_forwarded_for);
    assert!(document.settings.always_http_200);
    assert_eq!(
        document.provenance.get("security.trust_forwarded_for"),
        Some(&SettingSource::Env)
    );
}

fn env_guard() -> &'static Mutex<()> {
    static ENV_GUARD: OnceLock<Mutex<()>> = OnceLock::new();
    ENV_GUARD.get_or_init(|| Mutex::new(()))
}
