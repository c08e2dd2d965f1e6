// Line-oriented console front end.
//
// Reads commands from stdin, forwards them to the event loop, and prints the
// updates it pushes back. `status` and `history` render the most recent
// snapshot locally.

use std::fmt::Write as _;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::debug;

use rocketrace_core::model::RaceOutcome;
use rocketrace_core::session::RacePhase;

use crate::protocol::{AppSnapshot, UiUpdate, UserCommand};

const HELP: &str = "commands: list | select <rocket-id> | start | abandon | retry | status | history | quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleInput {
    Command(UserCommand),
    Status,
    History,
    Help,
}

pub fn parse_command(line: &str) -> Result<ConsoleInput, String> {
    let mut parts = line.split_whitespace();
    let Some(verb) = parts.next() else {
        return Err("empty command".into());
    };
    let input = match verb.to_ascii_lowercase().as_str() {
        "list" | "rockets" => ConsoleInput::Command(UserCommand::LoadRockets),
        "select" | "sel" => match parts.next() {
            Some(id) => ConsoleInput::Command(UserCommand::Select(id.to_string())),
            None => return Err("usage: select <rocket-id>".into()),
        },
        "start" => ConsoleInput::Command(UserCommand::StartRace),
        "abandon" => ConsoleInput::Command(UserCommand::Abandon),
        "retry" => ConsoleInput::Command(UserCommand::RetryResult),
        "quit" | "exit" | "q" => ConsoleInput::Command(UserCommand::Quit),
        "status" => ConsoleInput::Status,
        "history" => ConsoleInput::History,
        "help" | "?" => ConsoleInput::Help,
        other => return Err(format!("unknown command `{other}`; {HELP}")),
    };
    Ok(input)
}

/// Text for one pushed update. Snapshots are not printed as they arrive;
/// the console only announces phase changes for them.
pub fn render(update: &UiUpdate) -> Option<String> {
    let text = match update {
        UiUpdate::Rockets(rockets) => {
            let mut out = String::from("Rockets:");
            for rocket in rockets {
                let _ = write!(out, "\n  {:<12} {}  {}", rocket.id, rocket.name, rocket.description);
            }
            out
        }
        UiUpdate::RocketsFailed(e) => format!("Error loading rockets: {e}"),
        UiUpdate::Snapshot(_) => return None,
        UiUpdate::RaceStartFailed(e) => format!("Could not start race: {e}"),
        UiUpdate::FeedError { rocket_id, message } => {
            format!("Progress feed for {rocket_id} failed: {message}")
        }
        UiUpdate::RaceFinished(record) => match record.outcome() {
            RaceOutcome::Winner(id) => format!("Race #{} finished: {id} wins", record.short_id()),
            RaceOutcome::BothExploded => {
                format!("Race #{} finished: both rockets exploded", record.short_id())
            }
            RaceOutcome::Undecided => format!("Race #{} archived without a winner", record.short_id()),
        },
        UiUpdate::ReconcileFailed { race_id, attempts } => format!(
            "No result for race {race_id} after {attempts} attempts; `retry` or `abandon`"
        ),
        UiUpdate::Notice(text) => text.clone(),
    };
    Some(text)
}

pub fn render_status(snapshot: &AppSnapshot) -> String {
    let mut out = format!("Phase: {:?}", snapshot.phase);
    if let Some(race_id) = &snapshot.active_race_id {
        let _ = write!(out, "  race {race_id}");
    }
    if snapshot.selected.is_empty() {
        out.push_str("\n  no rockets selected");
    }
    for rocket in &snapshot.selected {
        let _ = write!(out, "\n  {} ({})", rocket.name, rocket.id);
        if let Some(p) = rocket.progress {
            let _ = write!(out, "  {:>3}%", p.progress);
            if p.exploded {
                out.push_str("  EXPLODED");
            } else if rocket.winning {
                out.push_str("  WINNING");
            }
        }
    }
    out
}

pub fn render_history(snapshot: &AppSnapshot) -> String {
    if snapshot.history.is_empty() {
        return "No finished races yet".into();
    }
    let mut out = String::from("Finished races:");
    for entry in &snapshot.history {
        let [rocket1, rocket2] = entry.record.participants();
        let _ = write!(out, "\n  {}  {} vs {}  {}", entry.label, rocket1, rocket2, entry.summary);
        if let Some(duration) = entry.record.duration() {
            let _ = write!(out, "  ({:.1}s)", duration.num_milliseconds() as f64 / 1000.0);
        }
    }
    out
}

/// Drive the console until the user quits or stdin closes.
pub async fn run(mut ui_rx: mpsc::Receiver<UiUpdate>, cmd_tx: mpsc::Sender<UserCommand>) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let mut latest: Option<AppSnapshot> = None;
    let mut last_phase: Option<RacePhase> = None;

    print_line(&mut stdout, HELP).await?;
    cmd_tx.send(UserCommand::LoadRockets).await?;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    debug!("stdin closed");
                    let _ = cmd_tx.send(UserCommand::Quit).await;
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match parse_command(&line) {
                    Ok(ConsoleInput::Command(cmd)) => {
                        let quit = cmd == UserCommand::Quit;
                        cmd_tx.send(cmd).await?;
                        if quit {
                            break;
                        }
                    }
                    Ok(ConsoleInput::Status) => {
                        let text = latest.as_ref().map(render_status).unwrap_or_else(|| "No session yet".into());
                        print_line(&mut stdout, &text).await?;
                    }
                    Ok(ConsoleInput::History) => {
                        let text = latest.as_ref().map(render_history).unwrap_or_else(|| "No session yet".into());
                        print_line(&mut stdout, &text).await?;
                    }
                    Ok(ConsoleInput::Help) => print_line(&mut stdout, HELP).await?,
                    Err(e) => print_line(&mut stdout, &e).await?,
                }
            }

            update = ui_rx.recv() => {
                let Some(update) = update else {
                    debug!("ui channel closed");
                    break;
                };
                if let UiUpdate::Snapshot(snapshot) = &update {
                    if last_phase != Some(snapshot.phase) {
                        last_phase = Some(snapshot.phase);
                        print_line(&mut stdout, &render_status(snapshot)).await?;
                    }
                    latest = Some(snapshot.as_ref().clone());
                }
                if let Some(text) = render(&update) {
                    print_line(&mut stdout, &text).await?;
                }
            }
        }
    }
    Ok(())
}

async fn print_line(stdout: &mut tokio::io::Stdout, text: &str) -> std::io::Result<()> {
    stdout.write_all(text.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{HistoryEntry, RocketView};
    use chrono::{Duration, Utc};
    use rocketrace_core::model::{FinishedRace, RaceParticipant, RocketProgress};

    #[test]
    fn parses_known_commands() {
        assert_eq!(
            parse_command("select falcon").unwrap(),
            ConsoleInput::Command(UserCommand::Select("falcon".into()))
        );
        assert_eq!(parse_command("  START ").unwrap(), ConsoleInput::Command(UserCommand::StartRace));
        assert_eq!(parse_command("retry").unwrap(), ConsoleInput::Command(UserCommand::RetryResult));
        assert_eq!(parse_command("history").unwrap(), ConsoleInput::History);
        assert_eq!(parse_command("q").unwrap(), ConsoleInput::Command(UserCommand::Quit));
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse_command("select").is_err());
        assert!(parse_command("launch").unwrap_err().contains("unknown command"));
        assert!(parse_command("").is_err());
    }

    fn record(id: &str, winner: Option<&str>, both_exploded: bool) -> FinishedRace {
        let finished_at = Utc::now();
        FinishedRace {
            id: id.into(),
            winner: winner.map(String::from),
            rocket1: RaceParticipant { id: "R1".into(), progress: 100, exploded: both_exploded },
            rocket2: RaceParticipant { id: "R2".into(), progress: 30, exploded: both_exploded },
            started_at: Some(finished_at - Duration::milliseconds(12_500)),
            finished_at,
        }
    }

    #[test]
    fn finished_race_messages() {
        let won = render(&UiUpdate::RaceFinished(record("race-1234", Some("R1"), false))).unwrap();
        assert_eq!(won, "Race #1234 finished: R1 wins");

        let boom = render(&UiUpdate::RaceFinished(record("race-5678", None, true))).unwrap();
        assert!(boom.contains("both rockets exploded"));
    }

    #[test]
    fn snapshots_are_not_rendered_inline() {
        let snapshot = AppSnapshot {
            phase: RacePhase::Idle,
            active_race_id: None,
            selected: vec![],
            history: vec![],
        };
        assert!(render(&UiUpdate::Snapshot(Box::new(snapshot))).is_none());
    }

    #[test]
    fn status_marks_winning_and_exploded() {
        let snapshot = AppSnapshot {
            phase: RacePhase::Racing,
            active_race_id: Some("race-9".into()),
            selected: vec![
                RocketView {
                    id: "R1".into(),
                    name: "Falcon".into(),
                    progress: Some(RocketProgress::new(100, false)),
                    winning: true,
                },
                RocketView {
                    id: "R2".into(),
                    name: "Saturn".into(),
                    progress: Some(RocketProgress::new(40, true)),
                    winning: false,
                },
            ],
            history: vec![],
        };
        let text = render_status(&snapshot);
        assert!(text.contains("Phase: Racing  race race-9"));
        assert!(text.contains("Falcon (R1)  100%  WINNING"));
        assert!(text.contains("Saturn (R2)   40%  EXPLODED"));
    }

    #[test]
    fn history_lists_labels_and_durations() {
        let snapshot = AppSnapshot {
            phase: RacePhase::Idle,
            active_race_id: None,
            selected: vec![],
            history: vec![HistoryEntry {
                label: "Race #1234".into(),
                summary: "Falcon wins".into(),
                record: record("race-1234", Some("R1"), false),
            }],
        };
        assert_eq!(
            render_history(&snapshot),
            "Finished races:\n  Race #1234  R1 vs R2  Falcon wins  (12.5s)"
        );
    }
}
