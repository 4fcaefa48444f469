//! Demonstrates using a Container as a registry of shared services.
//!
//! Each component receives only the keys it needs. The key decides the type that
//! comes back, so there are no string lookups and no casts at the call site.
//!
//! Run with: cargo run --example service_registry

use sovran_thc::{Container, Key, ThcError};

fn main() -> Result<(), ThcError> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .init();

    let services = Container::new();

    // Register services
    let database = services.store(DatabaseConfig {
        host: "localhost".to_string(),
        port: 5432,
        database: "myapp".to_string(),
    })?;
    let app = services.store(AppConfig {
        name: "MyApp".to_string(),
        debug: true,
    })?;
    let mut audit = services.store(Vec::<String>::new())?;

    let users = UserService {
        services: services.clone(),
        database: database.clone(),
        app: app.clone(),
        audit: audit.clone(),
    };

    users.create_user("alice")?;
    users.create_user("bob")?;

    // Replace the app config wholesale
    services.update(
        &app,
        AppConfig {
            name: "MyApp".to_string(),
            debug: false,
        },
    )?;
    users.create_user("carol")?;

    println!("\nAudit log ({}):", services);
    services.with(&audit, |entries| {
        for entry in entries {
            println!("  {}", entry);
        }
    })?;
    println!(
        "Audit last written at {}",
        services.last_modified(&audit)?.to_rfc3339()
    );

    // Drop the audit log; the service's copy of the key now finds nothing
    services.remove(&mut audit)?;
    match users.create_user("dave") {
        Err(ThcError::NotFound(id)) => println!("Audit log {} is gone", id),
        other => println!("Unexpected result: {:?}", other),
    }

    // Our own key is tombstoned
    assert_eq!(services.fetch(&audit), Err(ThcError::Tombstoned));
    println!("Final state: {}", services.describe());

    Ok(())
}

#[derive(Clone, Debug)]
struct DatabaseConfig {
    host: String,
    port: u16,
    database: String,
}

#[derive(Clone, Debug)]
struct AppConfig {
    name: String,
    debug: bool,
}

struct UserService {
    services: Container,
    database: Key<DatabaseConfig>,
    app: Key<AppConfig>,
    audit: Key<Vec<String>>,
}

impl UserService {
    fn create_user(&self, username: &str) -> Result<(), ThcError> {
        let db = self.services.fetch(&self.database)?;
        println!(
            "Creating user {} in {}.users on {}:{}",
            username, db.database, db.host, db.port
        );

        self.services.with(&self.app, |cfg| {
            if cfg.debug {
                println!("  -> [DEBUG] {} created user {}", cfg.name, username);
            }
        })?;

        self.services.with_mut(&self.audit, |log| {
            log.push(format!("created user {}", username));
        })
    }
}
