use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::{
    chart::ChartOptions,
    db::Player,
    events::emit_serialized,
    history::{self, HistoryView},
    models::{Annotation, Session},
    monitor::{SessionController, SessionState},
    AppState,
};

pub const COMMAND_RESULT_EVENT: &str = "command-result";
pub const COMMAND_ERROR_EVENT: &str = "command-error";

const HELP: &str = "players | add-player <name> | games | start <player id|name> <game...> | \
ping <text...> | stop | status | sessions | history <index> | games-played | help | quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Players,
    AddPlayer(String),
    Games,
    Start { player: String, game: String },
    Ping(String),
    Stop,
    Status,
    Sessions,
    History(usize),
    GamesPlayed,
    Help,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim();
        let (name, rest) = match line.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (line, ""),
        };

        let command = match name {
            "players" => Command::Players,
            "add-player" if !rest.is_empty() => Command::AddPlayer(rest.to_string()),
            "add-player" => return Err("usage: add-player <name>".into()),
            "games" => Command::Games,
            "start" => {
                let (player, game) = rest
                    .split_once(char::is_whitespace)
                    .ok_or_else(|| "usage: start <player id|name> <game...>".to_string())?;
                Command::Start {
                    player: player.to_string(),
                    game: game.trim().to_string(),
                }
            }
            "ping" => Command::Ping(rest.to_string()),
            "stop" => Command::Stop,
            "status" => Command::Status,
            "sessions" => Command::Sessions,
            "history" => Command::History(
                rest.parse()
                    .map_err(|_| "usage: history <index>".to_string())?,
            ),
            "games-played" => Command::GamesPlayed,
            "help" => Command::Help,
            "quit" | "exit" => Command::Quit,
            other => return Err(format!("unknown command '{other}' (try 'help')")),
        };
        Ok(command)
    }
}

fn controller_from_state(state: &AppState) -> SessionController {
    state.controller.clone()
}

pub async fn list_players(state: &AppState) -> Result<Vec<Player>, String> {
    state.db.list_players().await.map_err(|e| e.to_string())
}

pub async fn add_player(state: &AppState, name: &str) -> Result<Player, String> {
    state.db.insert_player(name).await.map_err(|e| e.to_string())
}

pub fn list_games(state: &AppState) -> Vec<String> {
    state.settings.current().games
}

/// Starts a session for the named player and spawns the live refresh loop.
pub async fn start_session(state: &AppState, player: &str, game: &str) -> Result<Session, String> {
    let player = state
        .db
        .find_player(player)
        .await
        .map_err(|e| e.to_string())?;

    let settings = state.settings.current();
    let controller = controller_from_state(state);
    let session = controller
        .start(player.map(|p| p.id), game, &settings.device_port)
        .await
        .map_err(|e| e.to_string())?;

    state.live.lock().await.start_streaming(
        controller,
        state.sink.clone(),
        settings.refresh_interval(),
        ChartOptions {
            include_raw_channels: settings.show_raw_channels,
        },
    );
    Ok(session)
}

pub async fn send_ping(state: &AppState, text: &str) -> Result<Annotation, String> {
    controller_from_state(state)
        .ping(text)
        .await
        .map_err(|e| e.to_string())
}

/// Stops the live loop, which releases the device and records the stop. The
/// direct call afterwards only matters when no loop was running.
pub async fn stop_session(state: &AppState) -> Result<SessionState, String> {
    state
        .live
        .lock()
        .await
        .stop_streaming()
        .await
        .map_err(|e| e.to_string())?;

    let controller = controller_from_state(state);
    controller.stop().await;
    Ok(controller.get_state().await)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    #[serde(flatten)]
    pub state: SessionState,
    pub streaming: bool,
}

pub async fn get_status(state: &AppState) -> StatusReport {
    StatusReport {
        state: controller_from_state(state).get_state().await,
        streaming: state.live.lock().await.is_running(),
    }
}

pub async fn list_sessions(state: &AppState) -> Result<Vec<Session>, String> {
    history::list_sessions(&state.db)
        .await
        .map_err(|e| e.to_string())
}

/// `index` refers to the order `list_sessions` returns, newest first.
pub async fn get_history(state: &AppState, index: usize) -> Result<HistoryView, String> {
    let sessions = list_sessions(state).await?;
    let session = sessions
        .get(index)
        .ok_or_else(|| format!("no session at index {index} ({} recorded)", sessions.len()))?;
    let rate = state.settings.current().sampling_rate_hz;
    history::history_view(&state.db, session, rate)
        .await
        .map_err(|e| e.to_string())
}

pub async fn list_games_played(state: &AppState) -> Result<Vec<String>, String> {
    state.db.list_games_played().await.map_err(|e| e.to_string())
}

fn to_value<T: Serialize>(value: T) -> Result<Value, String> {
    serde_json::to_value(value).map_err(|e| e.to_string())
}

pub async fn execute(state: &AppState, command: &Command) -> Result<Value, String> {
    match command {
        Command::Players => to_value(list_players(state).await?),
        Command::AddPlayer(name) => to_value(add_player(state, name).await?),
        Command::Games => to_value(list_games(state)),
        Command::Start { player, game } => to_value(start_session(state, player, game).await?),
        Command::Ping(text) => to_value(send_ping(state, text).await?),
        Command::Stop => to_value(stop_session(state).await?),
        Command::Status => to_value(get_status(state).await),
        Command::Sessions => to_value(list_sessions(state).await?),
        Command::History(index) => to_value(get_history(state, *index).await?),
        Command::GamesPlayed => to_value(list_games_played(state).await?),
        Command::Help | Command::Quit => Ok(json!(HELP)),
    }
}

/// Parses and runs one line, emitting the outcome. Returns `false` once the
/// operator asks to quit.
pub async fn dispatch(state: &AppState, line: &str) -> bool {
    if line.trim().is_empty() {
        return true;
    }

    let command = match Command::parse(line) {
        Ok(command) => command,
        Err(error) => {
            emit_serialized(
                state.sink.as_ref(),
                COMMAND_ERROR_EVENT,
                &json!({ "command": line.trim(), "error": error }),
            );
            return true;
        }
    };

    if command == Command::Quit {
        return false;
    }

    match execute(state, &command).await {
        Ok(result) => emit_serialized(
            state.sink.as_ref(),
            COMMAND_RESULT_EVENT,
            &json!({ "command": line.trim(), "result": result }),
        ),
        Err(error) => emit_serialized(
            state.sink.as_ref(),
            COMMAND_ERROR_EVENT,
            &json!({ "command": line.trim(), "error": error }),
        ),
    }
    true
}

/// Reads commands until `quit` or end of input.
pub async fn run_console<R>(state: &AppState, input: R) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        if !dispatch(state, &line).await {
            break;
        }
    }
    Ok(())
}
