//! # WebSocket Match Example
//!
//! Joins a match on a remote authority over WebSocket, plays East's opening
//! discard and then follows the match until Ctrl+C or disconnect.
//!
//! ## Running
//!
//! ```sh
//! # Start a match authority on localhost:3030, then:
//! cargo run --example websocket_match
//!
//! # Override the authority URL:
//! MAHJONG_URL=ws://my-server:3030/client cargo run --example websocket_match
//! ```

use std::time::Duration;

use mahjong_match_client::{
    ActionOutcome, MatchSession, SessionConfig, SessionEvent, WebSocketTransport, Wind,
};

/// Default authority URL when `MAHJONG_URL` is not set.
const DEFAULT_URL: &str = "ws://localhost:3030/client";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    // Set `RUST_LOG=debug` for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Connect ─────────────────────────────────────────────────────
    let url = std::env::var("MAHJONG_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
    tracing::info!("Connecting to {url}");
    let transport = WebSocketTransport::connect_with_timeout(&url, Duration::from_secs(10)).await?;

    let config = SessionConfig::new().with_response_timeout(Duration::from_secs(15));
    let (mut session, mut events) = MatchSession::new(transport, config);

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::StateChanged(view) => {
                    tracing::info!("[rev {}] {} to play", view.revision, view.current_turn);
                }
                SessionEvent::ActionRejected { action, code, .. } => {
                    tracing::warn!("{action} rejected ({code:?})");
                }
                SessionEvent::Terminated => break,
            }
        }
    });

    // ── Start ───────────────────────────────────────────────────────
    let state = session.start().await?;
    tracing::info!("Match {} started, {} to play", state.id, state.current_turn);

    // ── Opening discard ─────────────────────────────────────────────
    let opening = session.state().and_then(|state| {
        let east = state.player(Wind::East);
        east.current_draw.or_else(|| east.hand.first().copied())
    });
    if let Some(tile) = opening {
        match session.discard(Wind::East, tile).await {
            Ok(ActionOutcome::Dropped(reason)) => tracing::info!("Not our move: {reason}"),
            Ok(outcome) => tracing::info!("Discarded {tile}: {outcome:?}"),
            Err(e) if e.is_recoverable() => tracing::warn!("Discard failed, rolled back: {e}"),
            Err(e) => return Err(e.into()),
        }
    }

    // ── Follow the match ────────────────────────────────────────────
    loop {
        tokio::select! {
            event = session.next_event() => match event {
                Ok(event) => tracing::info!("Event: {event:?}"),
                Err(e) => {
                    tracing::warn!("Stopped following the match: {e}");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, shutting down…");
                break;
            }
        }
    }

    // ── Cleanup ─────────────────────────────────────────────────────
    session.terminate().await;
    tracing::info!("Session closed. Goodbye!");
    Ok(())
}
