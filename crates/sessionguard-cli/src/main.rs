//! sessionguard - an interactive shell over a sessionguard session.
//!
//! Stands in for the UI: runs the startup check, then reads commands from
//! stdin and drives the `SessionController` with them.

mod commands;

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::Result;
use sessionguard_core::api::ApiError;
use sessionguard_core::config::Config;
use sessionguard_core::storage::{CookieSink, FileStore, KeyValueStore, KeyringStore};
use sessionguard_core::{
    ApiResponse, RequestOptions, RouteGuard, SessionController, SessionStatus, SessionStores,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commands::{Command, HELP};

const PROMPT: &str = "sessionguard> ";

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // RUST_LOG controls the level (e.g. RUST_LOG=sessionguard_core=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

struct Shell {
    controller: SessionController,
    guard: RouteGuard,
    cookies: Arc<dyn CookieSink>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    init_tracing();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        println!("Usage: sessionguard [--keyring]\n\n{}", HELP);
        return Ok(());
    }
    let use_keyring = args.iter().any(|a| a == "--keyring");

    let config = Config::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        Config::default().with_env_overrides()
    });
    info!(base_url = %config.base_url, keyring = use_keyring, "sessionguard starting");

    let persistent: Arc<dyn KeyValueStore> = if use_keyring {
        Arc::new(KeyringStore::new())
    } else {
        Arc::new(FileStore::in_cache_dir(&config)?)
    };
    let stores = SessionStores {
        persistent,
        ..SessionStores::in_memory()
    };
    let shell = Shell {
        cookies: stores.cookies.clone(),
        guard: RouteGuard::new(config.routes.clone()),
        controller: SessionController::new(&config, stores)?,
    };

    match shell.controller.check_session().await {
        SessionStatus::Authenticated => println!("Restored session for {}", config.base_url),
        _ => println!("Not logged in. Type 'help' for commands."),
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{}", PROMPT);
        io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let command = match Command::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                eprintln!("{}", e);
                continue;
            }
        };
        if command == Command::Quit {
            break;
        }
        if let Err(e) = shell.run(command).await {
            match e.downcast_ref::<ApiError>() {
                Some(api_error) => eprintln!("Error: {}", api_error.user_message()),
                None => eprintln!("Error: {:#}", e),
            }
        }
    }

    info!("sessionguard shutting down");
    Ok(())
}

impl Shell {
    async fn run(&self, command: Command) -> Result<()> {
        match command {
            Command::Login { email } => {
                let password = rpassword::prompt_password("Password: ")?;
                let user = self.controller.login(&email, &password).await?;
                println!("Logged in as {} ({})", user.email, user.id);
            }
            Command::Signup { name, email } => {
                let password = rpassword::prompt_password("Password: ")?;
                let user = self.controller.signup(&name, &email, &password).await?;
                println!("Created account {} ({}). Log in to continue.", user.email, user.id);
            }
            Command::Logout => {
                self.controller.logout_remote().await;
                println!("Logged out");
            }
            Command::Refresh => {
                self.controller.refresh().await?;
                println!("Access token renewed");
            }
            Command::Status => self.print_status()?,
            Command::Get { endpoint } => {
                self.request(&endpoint, RequestOptions::get()).await?;
            }
            Command::Delete { endpoint } => {
                self.request(&endpoint, RequestOptions::delete()).await?;
            }
            Command::Post { endpoint, body } => {
                self.request(&endpoint, RequestOptions::post(body)).await?;
            }
            Command::Put { endpoint, body } => {
                self.request(&endpoint, RequestOptions::put(body)).await?;
            }
            Command::Guard { path } => {
                let header = self.cookies.header_value();
                let decision = self.guard.evaluate_cookie_header(&path, Some(&header));
                println!("{}", serde_json::to_string(&decision)?);
            }
            Command::Help => println!("{}", HELP),
            Command::Quit => {}
        }
        Ok(())
    }

    async fn request(&self, endpoint: &str, options: RequestOptions) -> Result<()> {
        let response = self.controller.execute(endpoint, options).await?;
        print_response(&response)?;
        if !self.controller.snapshot().is_authenticated && response.is_unauthorized() {
            println!("Session ended. Log in again.");
        }
        Ok(())
    }

    fn print_status(&self) -> Result<()> {
        let mut state = self.controller.snapshot();
        // Tokens stay out of the terminal.
        state.access_token = state.access_token.map(|_| "<redacted>".to_string());
        println!("{}", serde_json::to_string_pretty(&state)?);
        if let Some(expires_at) = self.controller.credentials().expires_at() {
            println!("Access token expires at {}", expires_at.to_rfc3339());
        }
        Ok(())
    }
}

fn print_response(response: &ApiResponse) -> Result<()> {
    println!("{}", response.status);
    if !response.body.is_null() {
        println!("{}", serde_json::to_string_pretty(&response.body)?);
    }
    Ok(())
}
