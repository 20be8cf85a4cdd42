use crate::database::Database;
use crate::model::{Attributes, DataType, KeyKind, ModelDef, Schema};
use anyhow::Result;
use log::info;

/// Users with photos, one email address each and group memberships
pub fn demo_schema() -> Schema {
    let mut schema = Schema::new(
        "photo_sharing",
        vec![
            ModelDef::new("User", KeyKind::Id)
                .column("name", DataType::String)
                .column("joined_at", DataType::Date)
                .has_many("photos", "Photo", "owner")
                .one_to_one("email", "Email", "user")
                .many_to_many("groups", "Group"),
            ModelDef::new("Photo", KeyKind::Id)
                .column("title", DataType::String)
                .column("owner_id", DataType::Number)
                .column("group_uuid", DataType::String)
                .belongs_to("owner", "User")
                .belongs_to("group", "Group"),
            ModelDef::new("Email", KeyKind::Uuid)
                .column("address", DataType::String)
                .column("user_id", DataType::Number)
                .belongs_to("user", "User"),
            ModelDef::new("Group", KeyKind::Uuid).column("name", DataType::String),
        ],
    );
    schema.description = Some("Demo schema for the memmodel binary".to_string());
    schema
}

/// Persist a couple of users, photos and a group through `db`
pub async fn load_seed_data(db: &Database) -> Result<()> {
    let ada = db
        .insert("User", Attributes::new().column("name", "Ada"))
        .await?;
    let grace = db
        .insert("User", Attributes::new().column("name", "Grace"))
        .await?;
    let group = db
        .insert("Group", Attributes::new().column("name", "Engines"))
        .await?;

    for (title, owner) in [("Analytical engine", ada), ("Notes", ada), ("Harvard Mark I", grace)] {
        db.insert(
            "Photo",
            Attributes::new()
                .column("title", title)
                .relationship("owner", owner)
                .relationship("group", group),
        )
        .await?;
    }
    db.insert(
        "Email",
        Attributes::new()
            .column("address", "ada@example.com")
            .relationship("user", ada),
    )
    .await?;

    info!("seed data loaded");
    Ok(())
}
