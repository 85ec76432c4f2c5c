use anyhow::Context;
use clap::{Parser, Subcommand};
use runchat_core::api::endpoints::RunId;
use runchat_core::api::ApiClient;
use runchat_core::chat::{
    stream_chat, AnswerContent, ChatBackend, ChatSession, HttpChatBackend, Message, MessageStatus, Role,
    StreamCallbacks, TablePreviewState,
};
use runchat_core::config::{self, BackendFlavor, Config};
use runchat_core::runs::RunsApi;
use runchat_core::session::{AuthGuard, SessionStore};
use runchat_core::table::{load_preview, HttpArtifactFetcher, TablePreview};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

#[derive(Parser)]
#[command(name = "runchat")]
#[command(about = "Ask questions about pipeline runs", long_about = None)]
struct Cli {
    /// Config file path (default: RUNCHAT_CONFIG_PATH or ~/.runchat/config.json)
    #[arg(long, short, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config file.
    Init,

    /// List runs.
    Runs {
        /// Ask the backend to re-sync runs before listing.
        #[arg(long)]
        refresh: bool,
    },

    /// Show one run: detail, normalized metrics and the report link.
    Run {
        id: RunId,
    },

    /// Print the persisted conversation of a run.
    History {
        #[arg(long, value_name = "ID")]
        run: RunId,
    },

    /// Delete the persisted conversation of a run.
    Clear {
        #[arg(long, value_name = "ID")]
        run: RunId,
    },

    /// Ask one question and stream the answer.
    Ask {
        #[arg(long, value_name = "ID")]
        run: RunId,

        question: String,
    },

    /// Chat about a run (interactive). `/clear` deletes the history, `/exit` quits.
    Chat {
        #[arg(long, value_name = "ID")]
        run: RunId,

        /// Wait for whole answers instead of streaming progress.
        #[arg(long)]
        sync: bool,
    },

    /// Fetch a CSV/TSV artifact and print its preview.
    Preview {
        url: String,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let config_path = cli.config;

    let result = match cli.command {
        Some(Commands::Version) => {
            println!("runchat {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(Commands::Init) => run_init(config_path),
        Some(Commands::Runs { refresh }) => run_runs(config_path, refresh).await,
        Some(Commands::Run { id }) => run_show(config_path, id).await,
        Some(Commands::History { run }) => run_history(config_path, run).await,
        Some(Commands::Clear { run }) => run_clear(config_path, run).await,
        Some(Commands::Ask { run, question }) => run_ask(config_path, run, question).await,
        Some(Commands::Chat { run, sync }) => run_chat(config_path, run, sync).await,
        Some(Commands::Preview { url }) => run_preview(url).await,
        None => {
            println!("Run with --help for usage");
            Ok(())
        }
    };

    if let Err(e) = result {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(config::default_config_path);
    let written = runchat_core::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", written.display());
    Ok(())
}

/// A signed-in client plus the task that signs out on unrecoverable 401s.
struct Connection {
    config: Config,
    client: ApiClient,
    _watcher: JoinHandle<()>,
}

async fn connect(config_path: Option<PathBuf>) -> anyhow::Result<Connection> {
    let (config, path) = config::load_config(config_path)?;
    log::debug!("using config {}", path.display());
    let base_url = config::resolve_api_base_url(&config);
    let store = Arc::new(SessionStore::new());
    let client = ApiClient::new(&base_url, store).context("building HTTP client")?;
    let auth = AuthGuard::new(client.clone());
    let watcher = auth.watch_unauthorized();

    if auth.bootstrap().await.is_none() {
        let creds = config::resolve_credentials(&config)
            .context("not signed in: set RUNCHAT_EMAIL (or auth.email) and RUNCHAT_PASSWORD")?;
        auth.login(&creds.email, &creds.password)
            .await
            .with_context(|| format!("signing in to {}", base_url))?;
    }

    Ok(Connection {
        config,
        client,
        _watcher: watcher,
    })
}

async fn run_runs(config_path: Option<PathBuf>, refresh: bool) -> anyhow::Result<()> {
    let conn = connect(config_path).await?;
    let runs = RunsApi::new(conn.client).list_runs(refresh).await?;
    if runs.is_empty() {
        println!("no runs");
    }
    for run in runs {
        let marker = if run.is_chat_ready() {
            "chat"
        } else if run.is_failed() {
            "failed"
        } else {
            "-"
        };
        println!("{:>5}  {:<12} {:<8} {}  {}", run.pk, run.status, marker, run.run_id, run.name);
    }
    Ok(())
}

async fn run_show(config_path: Option<PathBuf>, id: RunId) -> anyhow::Result<()> {
    let conn = connect(config_path).await?;
    let runs = RunsApi::new(conn.client);
    let detail = runs.run_detail(id).await?;
    println!("{} ({})", detail.summary.name, detail.summary.run_id);
    println!("status:   {}", detail.summary.status);
    println!("pipeline: {}", detail.summary.pipeline);
    if let Some(created) = detail.summary.created_at {
        println!("created:  {}", created);
    }
    if let Some(completed) = detail.summary.completed_at {
        println!("finished: {}", completed);
    }

    match runs.run_metrics(id).await {
        Ok(metrics) => println!("metrics:\n{}", serde_json::to_string_pretty(&metrics)?),
        Err(e) => log::warn!("metrics unavailable: {}", e),
    }
    match runs.multiqc_report_url(id).await {
        Ok(url) => println!("report:   {}", url),
        Err(e) => log::warn!("report unavailable: {}", e),
    }
    Ok(())
}

async fn run_history(config_path: Option<PathBuf>, run_id: RunId) -> anyhow::Result<()> {
    let conn = connect(config_path).await?;
    let history = HttpChatBackend::new(conn.client).history(run_id).await?;
    if history.is_empty() {
        println!("no messages");
    }
    for msg in history {
        print_message(&Message::from_history(msg));
    }
    Ok(())
}

async fn run_clear(config_path: Option<PathBuf>, run_id: RunId) -> anyhow::Result<()> {
    let conn = connect(config_path).await?;
    HttpChatBackend::new(conn.client).clear_history(run_id).await?;
    println!("cleared conversation for run {}", run_id);
    Ok(())
}

/// Prints agent progress to stderr and the answer to stdout.
#[derive(Default)]
struct PrintCallbacks {
    answered: bool,
}

impl StreamCallbacks for PrintCallbacks {
    fn on_status(&mut self, step: &str, message: &str) {
        eprintln!("  [{}] {}", step, message);
    }

    fn on_answer(&mut self, content: &AnswerContent) {
        self.answered = true;
        println!("{}", content.answer.trim());
        print_details(&content.citations, &content.notes, content.confidence);
        if let Some(ref url) = content.table_url {
            println!("  table: {}", url);
        }
        if let Some(ref url) = content.plot_url {
            println!("  plot: {}", url);
        }
    }

    fn on_error(&mut self, message: &str) {
        eprintln!("agent error: {}", message);
    }

    fn on_message_id(&mut self, id: i64) {
        log::debug!("answer stored as message {}", id);
    }
}

async fn run_ask(config_path: Option<PathBuf>, run_id: RunId, question: String) -> anyhow::Result<()> {
    let conn = connect(config_path).await?;
    let mut callbacks = PrintCallbacks::default();
    stream_chat(&conn.client, run_id, &question, &mut callbacks).await?;
    if !callbacks.answered {
        anyhow::bail!("no answer received");
    }
    Ok(())
}

async fn run_chat(config_path: Option<PathBuf>, run_id: RunId, sync: bool) -> anyhow::Result<()> {
    use std::io::{self, Write};

    let conn = connect(config_path).await?;
    let flavor = if sync { BackendFlavor::Sync } else { conn.config.chat.flavor };
    let detail = RunsApi::new(conn.client.clone()).run_detail(run_id).await?;
    let session = ChatSession::new(
        Some(run_id),
        flavor,
        Arc::new(HttpChatBackend::new(conn.client.clone())),
        Arc::new(HttpArtifactFetcher::new()),
    );
    let mut notices = session.subscribe_errors();

    if !detail.summary.is_chat_ready() {
        session.set_enabled(false).await;
        println!(
            "run {} is {}; chat is available once it has completed",
            run_id, detail.summary.status
        );
    }

    session.load_history().await?;
    session.settle().await;
    for msg in session.messages().await {
        print_message(&msg);
    }

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
        if input.eq_ignore_ascii_case("/clear") {
            if session.delete_history().await.is_ok() {
                println!("conversation cleared");
            }
            print_notices(&mut notices);
            continue;
        }

        session.set_draft(input).await;
        if !session.submit_draft().await {
            println!("chat is disabled for this run");
            continue;
        }
        follow_progress(&session).await;
        session.settle().await;
        if let Some(reply) = session.messages().await.pop() {
            print_message(&reply);
        }
        print_notices(&mut notices);
    }

    session.close().await;
    Ok(())
}

/// Echo agent progress lines until the submission settles.
async fn follow_progress(session: &ChatSession) {
    let mut last = String::new();
    while session.is_submitting().await {
        let status = session
            .messages()
            .await
            .pop()
            .and_then(|m| m.agent_status)
            .map(|s| s.message);
        if let Some(text) = status {
            if text != last {
                eprintln!("  {}", text);
                last = text;
            }
        }
        tokio::time::sleep(Duration::from_millis(150)).await;
    }
}

fn print_notices(notices: &mut broadcast::Receiver<runchat_core::chat::ErrorNotice>) {
    while let Ok(notice) = notices.try_recv() {
        eprintln!(
            "error {} at {}: {}",
            notice.status, notice.endpoint, notice.message
        );
        if let Some(detail) = notice.detail {
            eprintln!("  detail: {}", detail);
        }
    }
}

async fn run_preview(url: String) -> anyhow::Result<()> {
    let preview = load_preview(&HttpArtifactFetcher::new(), &url).await?;
    print_table(&preview);
    Ok(())
}

fn print_message(msg: &Message) {
    let who = match msg.role {
        Role::User => "you",
        Role::Assistant => "agent",
    };
    match msg.status {
        MessageStatus::Pending => println!("{}> ...", who),
        MessageStatus::Error => println!(
            "{}> error: {}",
            who,
            msg.error.as_deref().unwrap_or("unknown error")
        ),
        MessageStatus::Complete => {
            println!("{}> {}", who, msg.content.trim());
            print_details(&msg.citations, &msg.notes, msg.confidence);
            if let Some(ref explanation) = msg.confidence_explanation {
                println!("  ({})", explanation);
            }
            if let Some(ref url) = msg.plot_url {
                println!("  plot: {}", url);
            }
            if let Some(ref url) = msg.table_url {
                println!("  table: {}", url);
            }
            match msg.table_preview {
                Some(TablePreviewState::Ready { ref preview }) => print_table(preview),
                Some(TablePreviewState::Error { ref message }) => println!("  {}", message),
                Some(TablePreviewState::Loading) | None => {}
            }
        }
    }
}

fn print_details(citations: &[String], notes: &[String], confidence: Option<f64>) {
    if !citations.is_empty() {
        println!("  sources: {}", citations.join(", "));
    }
    for note in notes {
        println!("  note: {}", note);
    }
    if let Some(c) = confidence {
        println!("  confidence: {:.0}%", c);
    }
}

fn print_table(preview: &TablePreview) {
    if preview.headers.is_empty() {
        println!("  (empty table)");
        return;
    }
    println!("  {}", preview.headers.join(" | "));
    for row in &preview.rows {
        println!("  {}", row.join(" | "));
    }
}
