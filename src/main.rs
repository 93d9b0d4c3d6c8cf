use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use luna_practice::{create_router, AppState, Config, JsonFileStore, RecordStore};
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "config/luna-practice";

/// Luna language-practice service
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP control API
    Serve {
        /// Config file (extension optional)
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: String,
    },

    /// Print streak, speaking time and recent sessions for a learner
    Progress {
        #[arg(short, long)]
        user: String,

        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: String,

        /// Number of recent sessions to list
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config } => {
            let cfg = Config::load(&config)?;
            init_tracing(&cfg);
            serve(cfg).await
        }
        Commands::Progress {
            user,
            config,
            limit,
        } => {
            let cfg = Config::load(&config)?;
            init_tracing(&cfg);
            print_progress(&cfg, &user, limit).await
        }
    }
}

fn init_tracing(cfg: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cfg.service.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn serve(cfg: Config) -> Result<()> {
    info!("{} v{}", cfg.service.name, env!("CARGO_PKG_VERSION"));
    info!("Record store: {}", cfg.store.path);
    info!("Backend functions: {}", cfg.services.base_url);

    let state = AppState::from_config(&cfg).await?;
    let router = create_router(state.clone());

    let addr = format!("{}:{}", cfg.http.bind, cfg.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("HTTP API listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
        })
        .await
        .context("HTTP server failed")?;

    // Same cleanup as a closing page
    state.conversation.teardown().await;
    state.game.end_game().await;
    info!("Stopped");
    Ok(())
}

async fn print_progress(cfg: &Config, user_id: &str, limit: usize) -> Result<()> {
    let store = JsonFileStore::open(&cfg.store.path).await?;

    match store.get_progress(user_id).await? {
        Some(progress) => {
            println!("Learner:        {}", progress.user_id);
            println!("Streak:         {} day(s)", progress.streak_days);
            println!("Speaking time:  {} min", progress.speaking_time_minutes);
            println!("Words learned:  {}", progress.words_learned);
            println!("Last activity:  {}", progress.last_activity.to_rfc3339());
        }
        None => println!("No progress recorded for {}", user_id),
    }

    let counts = store.session_counts(user_id).await?;
    println!(
        "Sessions:       {} conversation, {} translation",
        counts.conversation_sessions, counts.translation_sessions
    );

    let sessions = store.list_sessions(user_id).await?;
    if !sessions.is_empty() {
        println!();
        println!("Recent sessions:");
        for session in sessions.iter().take(limit) {
            println!(
                "  {}  {:<16} {:<8} {:>3} min  score {:>3}",
                session.completed_at.format("%Y-%m-%d %H:%M"),
                session.session_type.as_str(),
                session.language,
                session.duration_minutes,
                session.score
            );
        }
    }

    Ok(())
}
