use anyhow::{Context, Result};
use std::sync::Arc;

use miniapp_session::auth::{AuthApi, ProfileUpdate, SessionManager, SqliteCredentialStore};
use miniapp_session::auto_login::{AutoLogin, AutoLoginOutcome};
use miniapp_session::config::{AppMode, Config};
use miniapp_session::http_client::ApiClient;
use miniapp_session::identity::{HostIdentityProvider, IdentityProvider};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (for log level)
    let config = Config::load()?;
    config.validate()?;

    // Initialize logging with a configured level
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    let base_url = config.base_url()?;
    tracing::info!("Mode: {:?}, backend: {}", config.mode, base_url);

    let store = Arc::new(SqliteCredentialStore::open(&config.session_db_file)?);
    tracing::info!("Session store: {}", store.path().display());

    if config.logout {
        let client = ApiClient::new(
            base_url,
            store,
            config.http_connect_timeout,
            config.http_request_timeout,
        )?;
        let session = SessionManager::new(AuthApi::new(Arc::new(client)));
        session.logout().await;
        println!("Signed out.");
        return Ok(());
    }

    let client = Arc::new(ApiClient::new(
        base_url,
        store,
        config.http_connect_timeout,
        config.http_request_timeout,
    )?);
    let session = Arc::new(SessionManager::new(AuthApi::new(client)));
    let identity = build_identity_provider(&config)?;

    let outcome = AutoLogin::new(session.clone(), identity).spawn().await?;
    match &outcome {
        AutoLoginOutcome::LoginFailed(reason) | AutoLoginOutcome::TokenRejected(reason) => {
            tracing::warn!("Startup sign-in did not succeed: {}", reason);
        }
        AutoLoginOutcome::NoIdentity => {
            tracing::info!("Running outside Telegram without a stored session");
        }
        _ => {}
    }

    let update = ProfileUpdate {
        phone_number: config.phone.clone(),
        email: config.email.clone(),
    };
    if !update.is_empty() {
        if !session.is_authenticated().await {
            anyhow::bail!("Cannot update the profile without an authenticated session");
        }
        session
            .update_profile(&update)
            .await
            .context("Profile update failed")?;
        tracing::info!("Profile updated");
    }

    print_summary(&session, &outcome).await;
    Ok(())
}

/// Host object from configuration, falling back to the dev mock when enabled
fn build_identity_provider(config: &Config) -> Result<Arc<dyn IdentityProvider>> {
    if let Some(ref raw) = config.telegram_webapp {
        let provider =
            HostIdentityProvider::from_json(raw).context("TELEGRAM_WEBAPP is not valid JSON")?;
        return Ok(Arc::new(provider));
    }

    if config.mock_telegram && config.mode == AppMode::Dev {
        tracing::info!("Telegram WebApp not detected, using the development mock user");
        return Ok(Arc::new(HostIdentityProvider::mock()));
    }

    Ok(Arc::new(HostIdentityProvider::absent()))
}

async fn print_summary(session: &SessionManager, outcome: &AutoLoginOutcome) {
    let snapshot = session.snapshot().await;

    println!();
    println!("  Startup:        {:?}", outcome);
    println!("  Authenticated:  {}", snapshot.is_authenticated);
    println!("  Role:           {}", session.user_role().await);
    if let Some(user) = snapshot.user {
        println!("  User:           {} ({})", user.full_name, user.id);
        if let Some(username) = user.username {
            println!("  Username:       @{}", username);
        }
        if let Some(phone) = user.phone_number {
            println!("  Phone:          {}", phone);
        }
        if let Some(email) = user.email {
            println!("  Email:          {}", email);
        }
        if !user.timezone.is_empty() {
            println!("  Timezone:       {}", user.timezone);
        }
    }
    println!();
}
