use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use porten_common::models::auth::{LoginRequest, RegisterRequest, TokenResponse};
use porten_common::models::page::Page;
use porten_common::models::user::{UserDetail, UserSummary};
use porten_db::{create_pool, run_migrations, Session};
use porten_server::auth::password::PasswordContext;
use porten_server::auth::service;
use porten_server::config::load_config;
use porten_server::users::user_service;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

#[derive(Parser)]
#[command(name = "porten", version, about = "Porten CLI - user accounts")]
struct Cli {
    /// Server URL
    #[arg(long, env = "PORTEN_URL", default_value = "http://localhost:8000")]
    server: String,

    /// Access token for authenticated commands
    #[arg(long, env = "PORTEN_TOKEN")]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an administrator directly in the database
    CreateAdmin {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        /// Server config file (for the database URL and hashing scheme)
        #[arg(long, env = "PORTEN_CONFIG", default_value = "server-config.yaml")]
        config: String,
    },
    /// Register a new account
    Register { email: String, password: String },
    /// Log in and print an access token
    Login { email: String, password: String },
    /// Show the authenticated user
    Me,
    /// List users (admin only)
    Users {
        #[arg(long, default_value = "1")]
        page: usize,
        #[arg(long, default_value = "50")]
        size: usize,
    },
    /// Show a user
    User { id: String },
    /// Update a user's name or password
    UpdateUser {
        id: String,
        #[arg(long)]
        full_name: Option<String>,
        #[arg(long)]
        password: Option<String>,
    },
    /// Delete a user
    DeleteUser { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let api = Api {
        client: Client::new(),
        server: cli.server,
        token: cli.token,
    };

    match cli.command {
        Commands::CreateAdmin {
            email,
            password,
            config,
        } => {
            cmd_create_admin(&config, &email, &password).await?;
        }
        Commands::Register { email, password } => {
            let user: UserDetail = api
                .send(
                    api.post("/api/auth/register")
                        .json(&RegisterRequest { email, password }),
                )
                .await?;
            println!("Registered: {} ({})", user.email, user.id);
        }
        Commands::Login { email, password } => {
            let token: TokenResponse = api
                .send(api.post("/api/auth/login").json(&LoginRequest { email, password }))
                .await?;
            println!("{}", token.access);
        }
        Commands::Me => {
            let user: UserDetail = api.send(api.authed(api.get("/api/auth/me"))?).await?;
            print_user(&user);
        }
        Commands::Users { page, size } => {
            let request = api
                .authed(api.get("/api/users"))?
                .query(&[("page", page), ("size", size)]);
            let page: Page<UserSummary> = api.send(request).await?;
            println!("{:<38} EMAIL", "ID");
            for user in &page.items {
                println!("{:<38} {}", user.id, user.email);
            }
            println!("\npage {} ({} per page), {} total", page.page, page.size, page.total);
        }
        Commands::User { id } => {
            let user: UserDetail = api
                .send(api.authed(api.get(&format!("/api/users/{}", id)))?)
                .await?;
            print_user(&user);
        }
        Commands::UpdateUser {
            id,
            full_name,
            password,
        } => {
            let mut body = Map::new();
            if let Some(name) = full_name {
                body.insert("full_name".to_string(), Value::String(name));
            }
            if let Some(password) = password {
                body.insert("password".to_string(), Value::String(password));
            }
            if body.is_empty() {
                anyhow::bail!("Nothing to update: pass --full-name and/or --password");
            }
            let request = api
                .authed(api.client.patch(api.url(&format!("/api/users/{}", id))))?
                .json(&body);
            api.send_empty(request).await?;
            println!("User {} updated", id);
        }
        Commands::DeleteUser { id } => {
            let request = api.authed(api.client.delete(api.url(&format!("/api/users/{}", id))))?;
            api.send_empty(request).await?;
            println!("User {} deleted", id);
        }
    }

    Ok(())
}

async fn cmd_create_admin(config_path: &str, email: &str, password: &str) -> Result<()> {
    let config = load_config(config_path)?;
    let pool = create_pool(&config.db.url)
        .await
        .context("Failed to create database pool")?;
    run_migrations(&pool)
        .await
        .context("Failed to run migrations")?;

    let users = user_service(PasswordContext::new(config.auth.password_hashing_scheme));
    let mut session = Session::new(pool);
    let user = service::create_admin(&mut session, &users, email, password).await?;
    println!("Admin created: {} ({})", user.email, user.user_id);
    Ok(())
}

fn print_user(user: &UserDetail) {
    println!("ID:    {}", user.id);
    println!("Email: {}", user.email);
    println!("Name:  {}", user.full_name.as_deref().unwrap_or("-"));
    println!("Admin: {}", if user.is_admin { "yes" } else { "no" });
}

struct Api {
    client: Client,
    server: String,
    token: Option<String>,
}

impl Api {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.server.trim_end_matches('/'), path)
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.client.get(self.url(path))
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.client.post(self.url(path))
    }

    fn authed(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        let token = self
            .token
            .as_deref()
            .context("This command needs an access token: pass --token or set PORTEN_TOKEN")?;
        Ok(request.bearer_auth(token))
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let resp = check_status(request).await?;
        resp.json().await.context("Failed to parse response")
    }

    async fn send_empty(&self, request: RequestBuilder) -> Result<()> {
        check_status(request).await?;
        Ok(())
    }
}

async fn check_status(request: RequestBuilder) -> Result<Response> {
    let resp = request
        .send()
        .await
        .context("Failed to connect to server")?;

    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body: Value = resp.json().await.unwrap_or(Value::Null);
    let err = body
        .get("error")
        .and_then(|v| v.as_str())
        .unwrap_or("Unknown error");
    anyhow::bail!("Server returned {}: {}", status, err);
}
