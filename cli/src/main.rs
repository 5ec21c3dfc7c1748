mod api;
mod live;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("websocket failed: {0}")]
    Ws(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("websocket closed")]
    WsClosed,
    #[error("event decode failed: {0}")]
    Decode(#[from] whiteboard_frames::CodecError),
    #[error("canvas error: {0}")]
    Scene(#[from] whiteboard_canvas::doc::SceneError),
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    #[error("server returned error for {context}: {message}")]
    ServerError { context: String, message: String },
    #[error("missing expected field `{0}`")]
    MissingField(&'static str),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

impl From<tokio_tungstenite::tungstenite::Error> for CliError {
    fn from(error: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Ws(Box::new(error))
    }
}

#[derive(Parser, Debug)]
#[command(name = "whiteboard-cli", about = "Whiteboard room API and live session CLI")]
struct Cli {
    #[arg(long, env = "WHITEBOARD_BASE_URL", default_value = "http://127.0.0.1:3000")]
    base_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check that the server is up.
    Ping,
    Rooms(RoomsCommand),
    /// Join a room and print every event as the local mirror applies it.
    Watch(WatchArgs),
    /// Join a room, send one chat message and leave.
    Chat(ChatArgs),
}

#[derive(Args, Debug)]
struct RoomsCommand {
    #[command(subcommand)]
    command: RoomsSubcommand,
}

#[derive(Subcommand, Debug)]
enum RoomsSubcommand {
    List,
    Create {
        #[arg(long)]
        name: String,
        #[arg(long, env = "WHITEBOARD_USER_ID")]
        created_by: String,
        #[arg(long, default_value_t = false)]
        private: bool,
    },
    Show {
        room_id: String,
    },
    Canvas {
        room_id: String,
    },
    /// Print the room's drawing log, oldest first.
    Events {
        room_id: String,
    },
}

#[derive(Args, Debug, Clone)]
pub struct Identity {
    #[arg(long, env = "WHITEBOARD_USER_ID")]
    pub user_id: Option<String>,
    #[arg(long, env = "WHITEBOARD_USERNAME", default_value = "cli")]
    pub username: String,
}

impl Identity {
    /// The configured user id, or a fresh one per run.
    fn resolved_user_id(&self) -> String {
        self.user_id.clone().unwrap_or_else(|| format!("cli-{}", uuid::Uuid::new_v4().simple()))
    }
}

#[derive(Args, Debug)]
pub struct WatchArgs {
    pub room_id: String,
    #[command(flatten)]
    pub identity: Identity,
    #[arg(long, help = "Stop after this many events")]
    pub max_events: Option<usize>,
}

#[derive(Args, Debug)]
pub struct ChatArgs {
    pub room_id: String,
    #[arg(required = true, num_args = 1..)]
    pub message: Vec<String>,
    #[command(flatten)]
    pub identity: Identity,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let cli = Cli::parse();
    let base_url = cli.base_url.trim_end_matches('/').to_owned();

    match cli.command {
        Command::Ping => api::ping(&base_url).await,
        Command::Rooms(rooms) => run_rooms(&base_url, rooms).await,
        Command::Watch(args) => live::watch(&base_url, args).await,
        Command::Chat(args) => live::chat(&base_url, args).await,
    }
}

async fn run_rooms(base_url: &str, rooms: RoomsCommand) -> Result<(), CliError> {
    let json = match rooms.command {
        RoomsSubcommand::List => api::request(base_url, reqwest::Method::GET, "/api/rooms", None).await?,
        RoomsSubcommand::Create { name, created_by, private } => {
            let body = serde_json::json!({ "name": name, "createdBy": created_by, "isPublic": !private });
            api::request(base_url, reqwest::Method::POST, "/api/rooms", Some(body)).await?
        }
        RoomsSubcommand::Show { room_id } => {
            api::request(base_url, reqwest::Method::GET, &format!("/api/rooms/{room_id}"), None).await?
        }
        RoomsSubcommand::Canvas { room_id } => api::fetch_canvas(base_url, &room_id).await?,
        RoomsSubcommand::Events { room_id } => {
            api::request(base_url, reqwest::Method::GET, &format!("/api/rooms/{room_id}/events"), None).await?
        }
    };
    api::print_json(&json)
}
