pub mod constants;
pub mod error;
pub mod models;
pub mod modules;
mod test_utils;
mod utils;

use modules::system::logger;
use tracing::{error, info};

pub use models::{AppConfig, LoginOutcome};
pub use modules::auth::flow::{get_flow_status, sign_in, SigninContext};
pub use modules::auth::login::login_with_google;
pub use modules::events::{add_listener, subscribe, AuthEvent};

async fn run_interactive_signin() -> Result<LoginOutcome, String> {
    let mut config = modules::system::config::load_app_config()?;
    modules::system::config::apply_env_overrides(&mut config);

    // The loopback listener's port decides the app origin, and with it the
    // redirect URI the backend prepares for.
    let connector = modules::auth::popup::LoopbackConnector::bind().await?;
    config.app_origin = connector.origin().to_string();

    modules::system::config::validate_app_config(&config).map_err(|errors| {
        format!("configuration_validation_failed:\n{}", errors.join("\n"))
    })?;

    let session = modules::persistence::MemoryStore::new();
    let vault = modules::persistence::SqliteStore::open_default()?;

    let ctx = SigninContext {
        config: &config,
        session: &session,
        vault: &vault,
        connector: &connector,
    };
    info!("Starting Google sign-in (a browser window will open)");
    Ok(sign_in(&ctx).await)
}

pub fn run() {
    logger::init_logger();

    let runtime = tokio::runtime::Runtime::new().expect("Failed to create Tokio runtime");
    runtime.block_on(async {
        match run_interactive_signin().await {
            Ok(outcome) => {
                match serde_json::to_string_pretty(&outcome) {
                    Ok(rendered) => println!("{}", rendered),
                    Err(_) => println!("{:?}", outcome),
                }
                if outcome.cancelled {
                    info!("Sign-in window closed before completion");
                } else if !outcome.success {
                    std::process::exit(1);
                }
            }
            Err(e) => {
                error!("{}", e);
                std::process::exit(1);
            }
        }
    });
}
