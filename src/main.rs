use memmodel_rust::config::{init_logging, AppConfig};
use memmodel_rust::database::Database;
use memmodel_rust::logic::Session;
use memmodel_rust::model::{Attributes, InstanceRef, RelationValue};
use memmodel_rust::seed;
use memmodel_rust::store::MemoryAdapter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    let config = AppConfig::load()?;
    init_logging(&config.logging);

    println!("memmodel: in-memory identity and relationship demo");

    let adapter = MemoryAdapter::with_first_id(config.model.first_id);
    let db = Database::with_config(seed::demo_schema(), adapter, &config.model)?;

    if std::env::var("LOAD_SEED_DATA").unwrap_or_default() == "true" {
        println!("Loading seed data...");
        seed::load_seed_data(&db).await?;
        println!("Seed data loaded successfully");
    }

    run_scenario(&db)?;

    Ok(())
}

/// Reassign a photo between two users and show both sides of the relationship
fn run_scenario(db: &Database) -> anyhow::Result<()> {
    let mut session = db.session();
    let user_a = session.build("User", Attributes::new().column("id", 1))?;
    let user_b = session.build("User", Attributes::new().column("id", 2))?;
    let photo = session.build("Photo", Attributes::new().relationship("owner", user_a))?;
    session.set_relationship(photo, "owner", user_b)?;

    let photos_of = |session: &Session, user: InstanceRef| {
        session
            .cached_relationship(user, "photos")
            .ok()
            .flatten()
            .map(|value| value.many().to_vec())
            .unwrap_or_default()
    };

    println!("photo.owner_id = {}", session.get(photo, "owner_id")?);
    println!(
        "user A photos contain photo: {}",
        photos_of(&session, user_a).contains(&photo)
    );
    println!(
        "user B photos contain photo: {}",
        photos_of(&session, user_b).contains(&photo)
    );
    if let Some(RelationValue::One(Some(owner))) = session.cached_relationship(photo, "owner")? {
        println!("photo.owner = User {:?}", session.primary_key(owner)?);
    }
    Ok(())
}

