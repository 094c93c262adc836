//! # Loopback Match Example
//!
//! Runs a complete match session against an authority in the same process:
//!
//! 1. Connect the session to a toy authority through `channel_pair`
//! 2. Start the match
//! 3. Show that an out-of-turn intent is dropped locally
//! 4. Play a few rounds as East, applying the other seats' moves as events
//! 5. Tear the session down
//!
//! ## Running
//!
//! ```sh
//! cargo run --example loopback_match
//!
//! # Show every frame and state change:
//! RUST_LOG=debug cargo run --example loopback_match
//! ```

use mahjong_match_client::protocol::DiscardTileRequest;
use mahjong_match_client::tile::TILE_COUNT;
use mahjong_match_client::{
    channel_pair, Action, AuthorityEnd, ClientRequest, MatchError, MatchEvent, MatchSession,
    MatchState, Rules, ServerMessage, SessionConfig, SessionEvent, StandardRules, TileId, Wind,
};

/// Rounds East plays before the demo ends.
const ROUNDS: usize = 5;

/// Tiles dealt to every seat.
const HAND_SIZE: usize = 13;

/// Events that follow each of East's discards: three seats draw and
/// discard, then East draws.
const EVENTS_PER_ROUND: usize = 7;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Connect ─────────────────────────────────────────────────────
    let (transport, authority) = channel_pair();
    let authority_task = tokio::spawn(run_authority(authority));

    let (mut session, mut events) = MatchSession::new(transport, SessionConfig::new());

    // ── View layer ──────────────────────────────────────────────────
    let view_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::StateChanged(view) => {
                    let Some(east) = view.seat(Wind::East) else {
                        continue;
                    };
                    let hand: Vec<&str> = east.hand.iter().map(|t| t.asset_key.as_str()).collect();
                    tracing::info!(
                        "[rev {}] {} to play | East: {}{}",
                        view.revision,
                        view.current_turn,
                        hand.join(" "),
                        east.draw
                            .as_ref()
                            .map(|t| format!(" + {}", t.asset_key))
                            .unwrap_or_default()
                    );
                }
                SessionEvent::ActionRejected { action, reason, .. } => {
                    tracing::warn!(
                        "{action} rejected: {}",
                        reason.as_deref().unwrap_or("no reason")
                    );
                }
                SessionEvent::Terminated => {
                    tracing::info!("Session terminated");
                    break;
                }
            }
        }
    });

    // ── Play ────────────────────────────────────────────────────────
    session.start().await?;

    let outcome = session.discard(Wind::South, TileId(0)).await?;
    tracing::info!("South tried to play out of turn: {outcome:?}");

    for round in 1..=ROUNDS {
        // Discard whatever was just drawn.
        let Some(tile) = session
            .state()
            .and_then(|state| state.player(Wind::East).current_draw)
        else {
            break;
        };
        let outcome = session.discard(Wind::East, tile).await?;
        tracing::info!("Round {round}: East discarded {tile} ({outcome:?})");

        for _ in 0..EVENTS_PER_ROUND {
            let event = session.next_event().await?;
            tracing::debug!("Event: {event:?}");
        }
    }

    // ── Cleanup ─────────────────────────────────────────────────────
    session.terminate().await;
    view_task.await?;
    authority_task.await??;
    tracing::info!("Goodbye!");
    Ok(())
}

// ── Toy authority ───────────────────────────────────────────────────

/// The authority's copy of the match plus the undealt wall.
struct Table {
    state: MatchState,
    wall: Vec<TileId>,
}

impl Table {
    /// Deal from a fixed permutation of the set so the demo is repeatable.
    fn deal() -> Self {
        let mut deck = (0..u16::from(TILE_COUNT))
            .map(|i| TileId(((i * 37) % u16::from(TILE_COUNT)) as u8))
            .collect::<Vec<_>>()
            .into_iter();

        let mut state = MatchState::new(uuid::Uuid::new_v4(), Wind::East);
        for seat in Wind::ALL {
            state.players[seat].hand = deck.by_ref().take(HAND_SIZE).collect();
        }
        state.players[Wind::East].current_draw = deck.next();

        Self {
            state,
            wall: deck.collect(),
        }
    }

    fn push(&mut self, authority: &AuthorityEnd, event: MatchEvent) -> Result<(), MatchError> {
        self.state = StandardRules
            .apply_event(&self.state, &event)
            .map_err(MatchError::InvalidEvent)?;
        authority.send(&ServerMessage::MatchEvent(event))
    }

    /// Every other seat draws and throws the drawn tile away; then East draws.
    fn play_others(&mut self, authority: &AuthorityEnd) -> Result<(), MatchError> {
        while self.state.current_turn != Wind::East {
            let seat = self.state.current_turn;
            let Some(tile) = self.wall.pop() else {
                return Ok(());
            };
            self.push(authority, MatchEvent::TileDrawn { seat, tile })?;
            self.push(authority, MatchEvent::TileDiscarded { seat, tile })?;
        }
        if let Some(tile) = self.wall.pop() {
            self.push(
                authority,
                MatchEvent::TileDrawn {
                    seat: Wind::East,
                    tile,
                },
            )?;
        }
        Ok(())
    }
}

async fn run_authority(mut authority: AuthorityEnd) -> Result<(), MatchError> {
    let mut table = Table::deal();

    while let Some(text) = authority.recv().await {
        match serde_json::from_str::<ClientRequest>(&text)? {
            ClientRequest::StartMatch { client_version, .. } => {
                tracing::info!("Authority: client {client_version} joined");
                authority.send(&ServerMessage::match_started(table.state.clone()))?;
            }
            ClientRequest::DiscardTile(DiscardTileRequest {
                player,
                tile,
                request_id,
            }) => match StandardRules.apply(&table.state, player, &Action::Discard(tile)) {
                Ok(next) => {
                    table.state = next;
                    authority.send(&ServerMessage::accepted().answering(request_id))?;
                    table.play_others(&authority)?;
                }
                Err(reason) => {
                    let verdict = ServerMessage::rejected(reason.code(), reason.to_string());
                    authority.send(&verdict.answering(request_id))?;
                }
            },
        }
    }

    tracing::info!("Authority: client left");
    Ok(())
}
