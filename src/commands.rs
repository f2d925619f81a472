//! Admin command surface: parsing, authorization and reply rendering.

use anyhow::Result;
use std::fmt::Write as _;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::{normalize_channel_id, DEFAULT_HISTORY_DISPLAY};
use crate::engine::{HistorySnapshot, InfoSnapshot, StatsSnapshot, StatusSnapshot};
use crate::executor::EngineHandle;
use crate::gap::{MANUAL_GAP_MAX, MANUAL_GAP_MIN};
use crate::retry::{retry_async, RetryPolicy};
use crate::telegram::Inbound;
use crate::transport::Broadcaster;
use crate::types::{DestinationId, GapMode, Parity, ResetReason};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    Start,
    Help,
    Status,
    Info,
    History(usize),
    Stats,
    SetMode(GapMode),
    SetGap(Parity, u32),
    AddChannel(DestinationId),
    RemoveChannel(DestinationId),
    Channels,
    Reset,
}

/// Parse a `/command args` line. `Err` carries the usage text to send back.
pub fn parse(text: &str) -> Result<AdminCommand, String> {
    let mut parts = text.split_whitespace();
    let head = parts.next().unwrap_or_default();
    // "/status@MyBot" in clients that append the bot name
    let name = head
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or_default()
        .to_lowercase();
    let args: Vec<&str> = parts.collect();

    match name.as_str() {
        "start" => Ok(AdminCommand::Start),
        "help" => Ok(AdminCommand::Help),
        "status" => Ok(AdminCommand::Status),
        "info" => Ok(AdminCommand::Info),
        "stats" => Ok(AdminCommand::Stats),
        "channels" => Ok(AdminCommand::Channels),
        "reset" => Ok(AdminCommand::Reset),
        "histo" | "history" => match args.first() {
            None => Ok(AdminCommand::History(DEFAULT_HISTORY_DISPLAY)),
            Some(n) => n
                .parse::<usize>()
                .ok()
                .filter(|&n| n > 0)
                .map(AdminCommand::History)
                .ok_or_else(|| "❌ Usage: /histo [count]".to_string()),
        },
        "setmode" => args
            .first()
            .and_then(|m| m.parse::<GapMode>().ok())
            .map(AdminCommand::SetMode)
            .ok_or_else(|| "❌ Usage: /setmode auto | /setmode manual".to_string()),
        "setgap" => {
            let usage = || {
                format!(
                    "❌ Usage: /setgap even|odd <{}-{}>",
                    MANUAL_GAP_MIN, MANUAL_GAP_MAX
                )
            };
            let parity = args.first().and_then(|p| p.parse::<Parity>().ok()).ok_or_else(usage)?;
            let value = args
                .get(1)
                .and_then(|v| v.parse::<u32>().ok())
                .ok_or_else(usage)?;
            Ok(AdminCommand::SetGap(parity, value))
        }
        "addchannel" | "removechannel" => {
            let id = args
                .first()
                .and_then(|raw| raw.parse::<i64>().ok())
                .map(normalize_channel_id)
                .ok_or_else(|| format!("❌ Usage: /{} <chat id>", name))?;
            if name == "addchannel" {
                Ok(AdminCommand::AddChannel(id))
            } else {
                Ok(AdminCommand::RemoveChannel(id))
            }
        }
        _ => Err("❓ Unknown command. Send /help for the list.".to_string()),
    }
}

/// Everyone may command when no admin is configured.
pub fn is_authorized(sender_id: i64, admin_id: i64) -> bool {
    admin_id == 0 || sender_id == admin_id
}

pub const UNAUTHORIZED_REPLY: &str = "⛔ This command is reserved for the administrator";

/// Run a command against the engine and render the reply.
pub async fn execute(cmd: AdminCommand, engine: &EngineHandle) -> Result<String> {
    let reply = match cmd {
        AdminCommand::Start | AdminCommand::Help => help_text(),
        AdminCommand::Status => render_status(&engine.get_status().await?),
        AdminCommand::Info => render_info(&engine.get_info().await?),
        AdminCommand::History(n) => render_history(&engine.get_history(n).await?),
        AdminCommand::Stats => render_stats(&engine.get_stats().await?),
        AdminCommand::SetMode(mode) => {
            let active = engine.set_mode(mode).await?;
            format!(
                "✅ Mode set to {}\n📊 Active thresholds: even {} / odd {}",
                mode, active.even, active.odd
            )
        }
        AdminCommand::SetGap(parity, value) => match engine.set_gap(parity, value).await? {
            Ok(manual) => format!(
                "✅ Manual {} gap set to {}\n⚙️ Manual thresholds: even {} / odd {}",
                parity, value, manual.even, manual.odd
            ),
            Err(e) => format!("❌ {}", e),
        },
        AdminCommand::AddChannel(id) => match engine.add_destination(id).await? {
            Ok(()) => format!("✅ Destination {} added", id),
            Err(e) => format!("❌ {}", e),
        },
        AdminCommand::RemoveChannel(id) => match engine.remove_destination(id).await? {
            Ok(()) => format!("✅ Destination {} removed", id),
            Err(e) => format!("❌ {}", e),
        },
        AdminCommand::Channels => {
            let list = engine.list_destinations().await?;
            if list.is_empty() {
                "📭 No destinations configured".to_string()
            } else {
                let mut out = "📡 Destinations:\n".to_string();
                for id in list {
                    let _ = writeln!(out, "• {}", id);
                }
                out
            }
        }
        AdminCommand::Reset => {
            engine.reset(ResetReason::Admin).await?;
            "🔄 Reset done. History, predictions and counters cleared.".to_string()
        }
    };
    Ok(reply)
}

/// Route one inbound update. Feed posts are ingested in order; a command is
/// executed and its reply handed to a delivery task, so a throttled reply never
/// holds up the next feed post.
pub async fn handle_inbound(
    inbound: Inbound,
    engine: EngineHandle,
    broadcaster: Broadcaster,
    admin_id: i64,
    policy: RetryPolicy,
) -> Option<JoinHandle<()>> {
    match inbound {
        Inbound::FeedPost { text, is_edit } => {
            if let Err(e) = engine.ingest(text, is_edit).await {
                error!("Failed to ingest feed post: {}", e);
            }
            None
        }
        Inbound::Command {
            chat_id,
            sender_id,
            text,
        } => {
            let reply = if !is_authorized(sender_id, admin_id) {
                warn!(sender = sender_id, command = %text, "Unauthorized command");
                UNAUTHORIZED_REPLY.to_string()
            } else {
                info!(sender = sender_id, command = %text, "⌨️ Admin command");
                match parse(&text) {
                    Ok(cmd) => match execute(cmd, &engine).await {
                        Ok(reply) => reply,
                        Err(e) => {
                            error!("Command failed: {}", e);
                            "❌ Internal error, see logs".to_string()
                        }
                    },
                    Err(usage) => usage,
                }
            };
            Some(spawn_reply(broadcaster, policy, chat_id, reply))
        }
    }
}

pub fn spawn_reply(
    broadcaster: Broadcaster,
    policy: RetryPolicy,
    chat_id: i64,
    reply: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = retry_async(&policy, "reply", || broadcaster.reply(chat_id, &reply)).await {
            warn!(chat = chat_id, "Failed to reply to command: {}", e);
        }
    })
}

pub fn help_text() -> String {
    format!(
        "📖 Parity prediction bot\n\n\
         Tracks even/odd totals from the source channel. When a run of one parity \
         reaches its gap threshold minus one, the opposite parity is predicted for \
         the next game and checked over 3 games (0️⃣ 1️⃣ 2️⃣).\n\n\
         Commands:\n\
         /status - current state\n\
         /info - destinations and last game\n\
         /histo [n] - last n games with gap analysis\n\
         /stats - detailed statistics\n\
         /setmode auto|manual - threshold mode\n\
         /setgap even|odd <{min}-{max}> - manual threshold\n\
         /addchannel <id> - add a destination\n\
         /removechannel <id> - remove a destination\n\
         /channels - list destinations\n\
         /reset - clear history and predictions\n\
         /help - this message",
        min = MANUAL_GAP_MIN,
        max = MANUAL_GAP_MAX
    )
}

fn or_na<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "N/A".to_string())
}

pub fn render_status(s: &StatusSnapshot) -> String {
    let last_parity = s
        .last_total
        .map(|t| Parity::of(t).to_string())
        .unwrap_or_else(|| "N/A".to_string());
    let open = match &s.open_prediction {
        Some(p) => format!(
            "#{} → {} {} ({} checked)",
            p.target_game,
            p.predicted.emoji(),
            p.predicted,
            p.checked_games.len()
        ),
        None => "none".to_string(),
    };
    format!(
        "📊 Bot status\n\n\
         🎮 Last game: #{}\n\
         🔢 Last total: {} ({})\n\
         📜 History: {}/{}\n\n\
         📈 Counters:\n\
         • Even: {}\n\
         • Odd: {}\n\
         • Current even run: {}\n\
         • Current odd run: {}\n\n\
         ⚙️ Mode: {}\n\
         • Even threshold: {}\n\
         • Odd threshold: {}\n\n\
         🔮 Predictions:\n\
         • Open: {}\n\
         • Made: {}\n\
         • Won: {}\n\
         • Lost: {}",
        or_na(s.last_game_number),
        or_na(s.last_total),
        last_parity,
        s.history_len,
        s.history_capacity,
        s.counters.even_count,
        s.counters.odd_count,
        s.streak.even_run,
        s.streak.odd_run,
        s.mode,
        s.thresholds.even,
        s.thresholds.odd,
        open,
        s.counters.predictions_made,
        s.counters.predictions_won,
        s.counters.predictions_lost
    )
}

pub fn render_info(i: &InfoSnapshot) -> String {
    let destinations = if i.destinations.is_empty() {
        "none".to_string()
    } else {
        i.destinations
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    };
    format!(
        "ℹ️ Configuration\n\n\
         📡 Destinations: {}\n\
         🎮 Last source game: {}\n\
         ⏳ Awaiting finalization: {} game(s)\n\
         🔮 Open predictions: {}",
        destinations,
        or_na(i.last_game_number),
        i.pending_finalization,
        i.open_predictions
    )
}

pub fn render_history(h: &HistorySnapshot) -> String {
    if h.games.is_empty() {
        return "📭 No history yet".to_string();
    }
    let mut out = format!("📜 Last {} games\n\n", h.games.len());
    for g in &h.games {
        let _ = writeln!(
            out,
            "• Game #{}: {} → {} {}",
            g.game_number,
            g.total,
            g.parity.emoji(),
            g.parity
        );
    }
    let _ = write!(
        out,
        "\n📊 Gap analysis (game numbers):\n\
         • Max EVEN gap: {}\n\
         • Mean EVEN gap: {:.2}\n\
         • Max ODD gap: {}\n\
         • Mean ODD gap: {:.2}\n\n\
         ⚙️ {} thresholds: even {} / odd {}",
        h.gap_stats.even_max,
        h.gap_stats.even_mean,
        h.gap_stats.odd_max,
        h.gap_stats.odd_mean,
        h.mode,
        h.thresholds.even,
        h.thresholds.odd
    );
    out
}

pub fn render_stats(s: &StatsSnapshot) -> String {
    format!(
        "📈 Detailed statistics\n\n\
         🎮 Games analyzed: {}\n\
         🔢 Even: {} | Odd: {}\n\n\
         📊 Even gaps:\n\
         • Max observed: {}\n\
         • Mean: {:.2}\n\
         • Active threshold: {}\n\n\
         📊 Odd gaps:\n\
         • Max observed: {}\n\
         • Mean: {:.2}\n\
         • Active threshold: {}\n\n\
         ⚙️ Mode: {} (auto {}/{}, manual {}/{})\n\n\
         🔮 Predictions:\n\
         • Total: {}\n\
         • Won: {} ✅\n\
         • Lost: {} ❌\n\
         • Win rate: {:.1}%",
        s.games_analyzed,
        s.counters.even_count,
        s.counters.odd_count,
        s.gap_stats.even_max,
        s.gap_stats.even_mean,
        s.thresholds.even,
        s.gap_stats.odd_max,
        s.gap_stats.odd_mean,
        s.thresholds.odd,
        s.mode,
        s.auto_thresholds.even,
        s.auto_thresholds.odd,
        s.manual_thresholds.even,
        s.manual_thresholds.odd,
        s.counters.predictions_made,
        s.counters.predictions_won,
        s.counters.predictions_lost,
        s.win_rate_percent
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!(parse("/status"), Ok(AdminCommand::Status));
        assert_eq!(parse("/STATS"), Ok(AdminCommand::Stats));
        assert_eq!(parse("/info@parity_bot"), Ok(AdminCommand::Info));
        assert_eq!(parse("/histo"), Ok(AdminCommand::History(20)));
        assert_eq!(parse("/histo 5"), Ok(AdminCommand::History(5)));
        assert!(parse("/histo zero").is_err());
        assert!(parse("/dance").is_err());
    }

    #[test]
    fn test_parse_setmode_and_setgap() {
        assert_eq!(parse("/setmode manual"), Ok(AdminCommand::SetMode(GapMode::Manual)));
        assert!(parse("/setmode").is_err());
        assert_eq!(parse("/setgap pair 5"), Ok(AdminCommand::SetGap(Parity::Even, 5)));
        assert_eq!(parse("/setgap odd 7"), Ok(AdminCommand::SetGap(Parity::Odd, 7)));
        // Range is checked by the engine, not the parser.
        assert_eq!(parse("/setgap impair 40"), Ok(AdminCommand::SetGap(Parity::Odd, 40)));
        assert!(parse("/setgap both 3").unwrap_err().contains("2-10"));
    }

    #[test]
    fn test_parse_channel_commands() {
        assert_eq!(
            parse("/addchannel 1003725380926"),
            Ok(AdminCommand::AddChannel(-1003725380926))
        );
        assert_eq!(parse("/removechannel -42"), Ok(AdminCommand::RemoveChannel(-42)));
        assert!(parse("/addchannel").is_err());
    }

    #[test]
    fn test_authorization() {
        assert!(is_authorized(5, 0));
        assert!(is_authorized(5, 5));
        assert!(!is_authorized(6, 5));
    }

    #[test]
    fn test_help_lists_commands() {
        let help = help_text();
        for cmd in ["/status", "/histo", "/setgap", "/addchannel", "/reset"] {
            assert!(help.contains(cmd), "missing {}", cmd);
        }
    }
}
