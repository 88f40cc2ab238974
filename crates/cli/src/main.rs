use clap::{Parser, Subcommand};
use insights::server::{ErrorBody, FollowUpParams, FollowUpReply};

#[derive(Parser)]
#[command(name = "insights")]
#[command(about = "Health Insights follow-up service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Run the HTTP server (POST /api/followup, GET /api/health, GET /api/test-followup).
    Serve {
        /// Config file path (default: INSIGHTS_CONFIG_PATH or ~/.insights/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// HTTP port (default from config, INSIGHTS_PORT, or 8000)
        #[arg(long, short)]
        port: Option<u16>,

        /// Answer every question with the mock model (same as USE_MOCK_LLM=true).
        #[arg(long)]
        mock: bool,
    },

    /// Ask follow-up questions against a running server. Reads questions from stdin when none is given.
    Ask {
        /// Config file path, used to find the server address.
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// Session key to continue; a new one is generated when omitted.
        #[arg(long, value_name = "KEY")]
        session: Option<String>,

        /// Single question; omit for an interactive prompt.
        question: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("insights {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Serve { config, port, mock }) => {
            if let Err(e) = run_serve(config, port, mock).await {
                log::error!("server failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Ask {
            config,
            session,
            question,
        }) => {
            if let Err(e) = run_ask(config, session, question).await {
                log::error!("ask failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

async fn run_serve(
    config_path: Option<std::path::PathBuf>,
    port: Option<u16>,
    mock: bool,
) -> anyhow::Result<()> {
    let (mut config, path) = insights::config::load_config(config_path)?;
    if let Some(p) = port {
        config.server.port = p;
    }
    if mock {
        config.gateway.force_mock = true;
    }
    log::info!(
        "starting server on {}:{} (config {})",
        config.server.bind,
        config.server.port,
        path.display()
    );
    insights::server::run_server(config).await
}

async fn run_ask(
    config_path: Option<std::path::PathBuf>,
    session: Option<String>,
    question: Option<String>,
) -> anyhow::Result<()> {
    use std::io::{self, Write};

    let (config, _) = insights::config::load_config(config_path)?;
    let base_url = format!("http://{}:{}", config.server.bind.trim(), config.server.port);
    let session_key = session.unwrap_or_else(insights::session::new_session_key);
    let client = reqwest::Client::new();

    if let Some(q) = question {
        let reply = ask_once(&client, &base_url, &session_key, &q).await?;
        print_reply(&reply);
        return Ok(());
    }

    println!("session {}", session_key);
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("/exit") || input.eq_ignore_ascii_case("/quit") {
            break;
        }
        match ask_once(&client, &base_url, &session_key, input).await {
            Ok(reply) => print_reply(&reply),
            Err(e) => eprintln!("ask error: {:#}", e),
        }
    }
    Ok(())
}

fn print_reply(reply: &FollowUpReply) {
    println!("< [{}] {}", reply.provenance, reply.answer.trim());
}

async fn ask_once(
    client: &reqwest::Client,
    base_url: &str,
    session_key: &str,
    question: &str,
) -> anyhow::Result<FollowUpReply> {
    let params = FollowUpParams {
        session_key: session_key.to_string(),
        question: question.to_string(),
    };
    let res = client
        .post(format!("{}/api/followup", base_url))
        .json(&params)
        .send()
        .await?;
    let status = res.status();
    if !status.is_success() {
        let body: ErrorBody = res.json().await.unwrap_or_else(|_| {
            ErrorBody::new(status.to_string(), "server returned a non-JSON error")
        });
        anyhow::bail!("{}: {} ({})", status, body.error, body.details);
    }
    Ok(res.json().await?)
}
