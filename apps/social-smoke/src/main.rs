use std::env;

use social_client::{ClientConfig, Credentials, SocialClient, logging};
use social_core::SocialError;
use tracing::info;

#[tokio::main]
async fn main() {
    let config = match ClientConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Invalid configuration: {err}");
            eprintln!("Required: SOCIAL_APP_TOKEN; optional: SOCIAL_API_BASE, SOCIAL_SESSION_FILE");
            std::process::exit(1);
        }
    };
    logging::init(config.log_filter.as_deref());

    let client = match SocialClient::with_http(config) {
        Ok(client) => client,
        Err(err) => {
            eprintln!("Failed to initialize client: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = run(&client).await {
        eprintln!("Smoke run failed: {err}");
        std::process::exit(1);
    }
}

async fn run(client: &SocialClient) -> Result<(), SocialError> {
    let user = match (env::var("SOCIAL_USER"), env::var("SOCIAL_PASSWORD")) {
        (Ok(username), Ok(password)) => {
            Some(client.login(Credentials::username(username, password)).await?)
        }
        _ => client.restore_session().await?,
    };
    let Some(user) = user else {
        println!("No session. Set SOCIAL_USER and SOCIAL_PASSWORD to run the live smoke.");
        return Ok(());
    };
    info!(user_id = user.id.as_deref().unwrap_or("-"), "logged in");

    let feed = client.refresh_feed().await?;
    let unread = client.refresh_unread_count().await?;
    println!(
        "Feed: {} events, {} unread (service reports {unread})",
        feed.events.len(),
        feed.unread_count
    );

    let follows = client.retrieve_follows(None).await?;
    let followers = client.retrieve_followers(None).await?;
    println!("Follows {} users, followed by {}", follows.len(), followers.len());

    if env::var_os("SOCIAL_SESSION_FILE").is_none() {
        client.logout().await?;
    }
    Ok(())
}
