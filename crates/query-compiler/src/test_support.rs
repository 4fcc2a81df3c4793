use flexquery_core_types::{EntitySchema, SchemaRegistry};

pub(crate) fn blog_schema() -> SchemaRegistry {
    SchemaRegistry::from_entities(vec![
        EntitySchema::new("article")
            .fields(["id", "title", "status", "body", "created_at", "internal_notes"])
            .json_field("metadata")
            .relation("author", "author")
            .relation("schedule", "schedule"),
        EntitySchema::new("author")
            .fields(["id", "name", "email"])
            .relation("company", "company"),
        EntitySchema::new("company")
            .fields(["id", "name"])
            .relation("owner", "author"),
        EntitySchema::new("schedule").fields(["id", "range", "date"]),
    ])
    .expect("blog schema is valid")
}
