#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use actix_web::{middleware::Logger, web, App, HttpServer};
use passgate::{
    handlers::{configure, health, PasskeyState},
    passkey::PasskeyService,
    settings::PasskeydSettings,
};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load configuration from Settings.toml and environment variables
    // This also loads .env file and initializes the logger
    let settings = PasskeydSettings::load()
        .map_err(|e| std::io::Error::other(format!("Failed to load settings: {e}")))?;

    let policy = settings
        .relying_party_policy()
        .map_err(|e| std::io::Error::other(format!("Invalid passkey settings: {e}")))?;

    let service = PasskeyService::new(settings.toggles(), policy, settings.blob_store());
    let cookies = settings.cookie_factory();
    let state = web::Data::new(PasskeyState::new(
        service,
        cookies,
        &settings.application.principal_header,
    ));

    let bind_address = settings.get_bind_address();
    print_startup_info(&bind_address, &settings);

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(Logger::default())
            .route("/ping", web::get().to(health))
            .configure(configure)
    })
    .bind(&bind_address)?
    .run()
    .await
}

fn print_startup_info(bind_address: &str, settings: &PasskeydSettings) {
    println!("Starting Passgate passkey service on http://{bind_address}");
    println!(
        "Relying party: {} ({})",
        settings.passkey.rp_id, settings.passkey.rp_name
    );
    println!("Credential storage: {:?}", settings.storage.backend);
    println!("Principal header: {}", settings.application.principal_header);
    println!();
    println!("Passkey endpoints:");
    println!("  POST /passkey/register/options     - Registration options");
    println!("  POST /passkey/register             - Complete registration");
    println!("  POST /passkey/authenticate/options - Authentication options");
    println!("  POST /passkey/authenticate         - Complete authentication");
    println!("  GET  /passkey/list                 - List credentials");
    println!("  POST /passkey/delete               - Delete a credential");
    println!("  POST /passkey/activate             - Toggle passkey requirement");
    println!("  GET  /passkey/activated            - Activation state");
    println!("  GET  /passkey/status               - Session and account status");
    println!();
    println!("System endpoints:");
    println!("  GET  /ping                         - Health check");
}
