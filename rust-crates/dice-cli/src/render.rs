//! Plain-text rendering of controller state. Stdout carries these lines; logs go to file.

use dice_sync::{
    amount::format_eth,
    controller::{
        GameController,
        GameWriter,
        Notification,
        NotificationKind,
        result_message,
    },
    leaderboard::Leaderboard,
    read_cache::FieldRead,
    tracker::LifecycleState,
};
use std::fmt::Display;

const LABEL_WIDTH: usize = 19;

fn row(label: &str, value: impl Display) -> String {
    format!("{:<LABEL_WIDTH$}{value}", format!("{label}:"))
}

fn field<T>(label: &str, value: &FieldRead<T>, show: impl Fn(&T) -> String) -> String {
    match value {
        Ok(value) => row(label, show(value)),
        Err(err) => row(label, format!("unavailable ({})", err.message)),
    }
}

pub fn notification_line(notification: &Notification) -> String {
    match notification.kind {
        NotificationKind::Success => format!("[ok] {}", notification.message),
        NotificationKind::Error => format!("[error] {}", notification.message),
    }
}

/// Prints each notification once, when it first appears.
#[derive(Default)]
pub struct NotificationPrinter {
    last: Option<Notification>,
}

impl NotificationPrinter {
    pub fn next_line<W: GameWriter>(&mut self, controller: &GameController<W>) -> Option<String> {
        let current = controller.notification();
        if current == self.last.as_ref() {
            return None;
        }
        self.last = current.cloned();
        current.map(notification_line)
    }

    pub fn observe<W: GameWriter>(&mut self, controller: &GameController<W>) {
        if let Some(line) = self.next_line(controller) {
            println!("{line}");
        }
    }
}

pub fn status_lines<W: GameWriter>(controller: &GameController<W>) -> Vec<String> {
    let mut lines = Vec::new();
    match controller.effective_address() {
        Some(address) => lines.push(row("Player", address)),
        None => lines.push(row("Player", "not connected")),
    }
    lines.push(row("Network", controller.network_status()));
    if let Some(warning) = controller.network_warning() {
        lines.push(warning.to_string());
    }
    let state = controller.tracker().state();
    if state != LifecycleState::Idle {
        lines.push(row("Transaction", state));
    }

    let Some(snapshot) = controller.snapshot() else {
        lines.push("No contract data loaded yet".to_string());
        return lines;
    };
    lines.push(field("Wallet balance", &snapshot.wallet_balance, |balance| {
        format!("{} ETH", format_eth(*balance))
    }));
    lines.push(row(
        "Minimum bet",
        format!("{} ETH", format_eth(snapshot.min_bet_or_fallback())),
    ));
    lines.push(field("Multiplier", &snapshot.multiplier, |m| format!("{m}x")));
    lines.push(field("Your score", &snapshot.player_score, ToString::to_string));
    lines.push(field(
        "Most recent roll",
        &snapshot.most_recent_roll,
        ToString::to_string,
    ));
    lines.push(field("Pool liquidity", &snapshot.total_liquidity, |total| {
        format!("{} ETH", format_eth(*total))
    }));
    lines.push(field("Your pool balance", &snapshot.provider_balance, |balance| {
        format!(
            "{} ETH ({}% of pool)",
            format_eth(*balance),
            snapshot.pool_share_percentage()
        )
    }));
    lines.push(field("Your pool shares", &snapshot.provider_shares, |shares| {
        format_eth(*shares)
    }));

    let history: Vec<String> = controller
        .correlator()
        .history()
        .map(|result| format!("  {}", result_message(result)))
        .collect();
    if !history.is_empty() {
        lines.push("Recent results:".to_string());
        lines.extend(history);
    }
    lines
}

pub fn leaderboard_lines(board: &Leaderboard) -> Vec<String> {
    let stats = &board.stats;
    let mut lines = vec![format!(
        "Players: {}  Highest score: {}  Average score: {}",
        stats.total_players, stats.highest_score, stats.average_score
    )];
    if board.entries.is_empty() {
        lines.push("No players yet".to_string());
    }
    lines.extend(board.entries.iter().map(|entry| {
        format!("#{:<4}{}  {}", entry.position, entry.address, entry.score)
    }));
    lines
}
