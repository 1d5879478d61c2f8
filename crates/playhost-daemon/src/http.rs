use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use playhost_proto::protocol::{Command, SessionStatus, MAX_VOLUME_PERCENT};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::error::ControlError;
use crate::router::{CommandRouter, DispatchOutcome};

#[derive(Clone)]
struct HttpState {
    router: CommandRouter,
}

#[derive(Serialize)]
struct VolumeStatus {
    volume: u8,
}

#[derive(Serialize)]
struct CommandResult {
    applied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl IntoResponse for ControlError {
    fn into_response(self) -> Response {
        let status = match self {
            ControlError::Unsupported { .. } => StatusCode::CONFLICT,
            ControlError::Launch(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ControlError::NotOpen => StatusCode::NOT_FOUND,
            ControlError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::BAD_GATEWAY,
        };
        let body = CommandResult {
            applied: false,
            error: Some(self.to_string()),
        };
        (status, Json(body)).into_response()
    }
}

pub fn app(router: CommandRouter) -> Router {
    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/volume", get(get_volume))
        .route("/api/volume/:volume", get(set_volume).post(set_volume))
        .route("/api/command/:name", get(run_command).post(run_command))
        .route("/api/jukebox/playlists", get(jukebox_playlists))
        .route("/api/jukebox/playlists/:name/tracks", get(jukebox_tracks))
        .with_state(HttpState { router })
}

pub fn start_server(
    bind_address: String,
    port: u16,
    router: CommandRouter,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API server listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app(router)).await {
            error!("HTTP server error: {}", e);
        }
    })
}

/// Parameterless commands addressable by name.
fn command_by_name(name: &str) -> Option<Command> {
    let command = match name {
        "play" => Command::Play,
        "pause" => Command::Pause,
        "stop" => Command::Stop,
        "close" => Command::Close,
        "rewind" => Command::Rewind,
        "fast_forward" => Command::FastForward,
        "rewind_long" => Command::RewindLong,
        "fast_forward_long" => Command::FastForwardLong,
        "toggle_mute" => Command::ToggleMute,
        "full_screen" => Command::FullScreen,
        _ => return None,
    };
    Some(command)
}

fn outcome(outcome: DispatchOutcome) -> Response {
    match outcome {
        DispatchOutcome::Applied => Json(CommandResult {
            applied: true,
            error: None,
        })
        .into_response(),
        DispatchOutcome::Dropped => Json(CommandResult {
            applied: false,
            error: None,
        })
        .into_response(),
        DispatchOutcome::Failed(reason) => ControlError::Backend(reason).into_response(),
    }
}

async fn get_status(State(state): State<HttpState>) -> Json<SessionStatus> {
    Json(state.router.status().await)
}

async fn get_volume(State(state): State<HttpState>) -> Json<VolumeStatus> {
    Json(VolumeStatus {
        volume: state.router.volume().await,
    })
}

async fn set_volume(State(state): State<HttpState>, Path(volume): Path<i32>) -> Response {
    let value = volume.clamp(0, MAX_VOLUME_PERCENT as i32) as u8;
    info!("HTTP API: Set volume to {}%", value);
    match state.router.dispatch(Command::SetVolume { value }).await {
        Ok(o) => outcome(o),
        Err(e) => e.into_response(),
    }
}

async fn run_command(State(state): State<HttpState>, Path(name): Path<String>) -> Response {
    let Some(command) = command_by_name(&name) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    info!("HTTP API: {}", command.name());
    match state.router.dispatch(command).await {
        Ok(o) => outcome(o),
        Err(e) => e.into_response(),
    }
}

async fn jukebox_playlists(State(state): State<HttpState>) -> Json<Vec<String>> {
    Json(state.router.jukebox_playlists().await)
}

async fn jukebox_tracks(
    State(state): State<HttpState>,
    Path(name): Path<String>,
) -> Json<Vec<String>> {
    Json(state.router.jukebox_tracks(&name).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fake_selector;
    use playhost_proto::config::Config;
    use playhost_proto::media::BackendKind;

    #[test]
    fn command_names_round_trip() {
        for name in [
            "play",
            "pause",
            "stop",
            "close",
            "rewind",
            "fast_forward",
            "rewind_long",
            "fast_forward_long",
            "toggle_mute",
            "full_screen",
        ] {
            let command = command_by_name(name).unwrap();
            assert_eq!(command.name(), name);
        }
        assert!(command_by_name("set_volume").is_none());
        assert!(command_by_name("eject").is_none());
    }

    #[test]
    fn errors_map_to_status_codes() {
        let unsupported = ControlError::Unsupported {
            operation: "full_screen",
            backend: BackendKind::Playlist,
        };
        assert_eq!(unsupported.into_response().status(), StatusCode::CONFLICT);
        assert_eq!(
            ControlError::Launch("gone".into()).into_response().status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            outcome(DispatchOutcome::Failed("boom".into())).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(outcome(DispatchOutcome::Dropped).status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_command_is_not_found() {
        let (_provider, selector, _rx) = fake_selector(&Config::default());
        let state = HttpState {
            router: CommandRouter::new(selector),
        };
        let response = run_command(State(state), Path("eject".to_string())).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
