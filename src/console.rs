//! Line-oriented decision surface for the headless binary.
//!
//! Scheduler events are printed as they arrive; the pending decision or
//! running break is answered with short commands typed on stdin.

use anyhow::{Context, Result};
use chrono::Utc;
use log::{debug, warn};
use tokio::{
    io::{self, AsyncBufReadExt, BufReader},
    sync::mpsc::UnboundedReceiver,
};

use crate::{
    breaks::ScheduleSnapshot,
    controls::Controls,
    db::Database,
    models::{BreakKind, TimeSpan},
    ui::{DecisionReply, DecisionResponder, SkipHandle, UiEvent},
};

const HISTORY_LIMIT: u32 = 10;

const HELP: &str = "commands: t (take) | p [span] (postpone) | d (dismiss) | s (skip) | \
                    now <kind> | enable <kind> | disable <kind> | pause [span] | resume | \
                    posture <on|off> | calibrate <cm> | status | history | quit";

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Take,
    Postpone(Option<TimeSpan>),
    Dismiss,
    Skip,
    BreakNow(BreakKind),
    SetEnabled(BreakKind, bool),
    Posture(bool),
    Calibrate(f64),
    Pause(Option<TimeSpan>),
    Resume,
    Status,
    History,
    Help,
    Quit,
}

pub fn parse_command(line: &str) -> Result<ConsoleCommand, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Err("empty command".into());
    };
    let argument = words.next();
    if words.next().is_some() {
        return Err(format!("too many arguments to '{verb}'"));
    }

    let span = |arg: Option<&str>| -> Result<Option<TimeSpan>, String> {
        arg.map(|raw| raw.parse::<TimeSpan>().map_err(|err| err.to_string()))
            .transpose()
    };

    let command = match verb.to_ascii_lowercase().as_str() {
        "t" | "take" => ConsoleCommand::Take,
        "p" | "postpone" => ConsoleCommand::Postpone(span(argument)?),
        "d" | "dismiss" => ConsoleCommand::Dismiss,
        "s" | "skip" => ConsoleCommand::Skip,
        "now" => ConsoleCommand::BreakNow(break_kind(argument)?),
        "enable" => ConsoleCommand::SetEnabled(break_kind(argument)?, true),
        "disable" => ConsoleCommand::SetEnabled(break_kind(argument)?, false),
        "posture" => match argument {
            Some("on") => ConsoleCommand::Posture(true),
            Some("off") => ConsoleCommand::Posture(false),
            _ => return Err("posture on or posture off".into()),
        },
        "calibrate" => {
            let raw = argument.ok_or("calibrate <distance in cm>")?;
            let distance = raw
                .parse::<f64>()
                .ok()
                .filter(|cm| cm.is_finite() && *cm > 0.0)
                .ok_or_else(|| format!("'{raw}' is not a distance in cm"))?;
            ConsoleCommand::Calibrate(distance)
        }
        "pause" => ConsoleCommand::Pause(span(argument)?),
        "resume" => ConsoleCommand::Resume,
        "status" => ConsoleCommand::Status,
        "history" => ConsoleCommand::History,
        "help" | "?" => ConsoleCommand::Help,
        "q" | "quit" | "exit" => ConsoleCommand::Quit,
        other => return Err(format!("unknown command '{other}'")),
    };
    Ok(command)
}

fn break_kind(argument: Option<&str>) -> Result<BreakKind, String> {
    let name = argument.ok_or("which break? micro, stretch or day")?;
    BreakKind::ALL
        .into_iter()
        .find(|kind| kind.as_str().eq_ignore_ascii_case(name))
        .ok_or_else(|| format!("unknown break '{name}'"))
}

/// Tracks what the user can currently act on.
#[derive(Default)]
struct Surface {
    pending: Option<DecisionResponder>,
    running: Option<SkipHandle>,
}

impl Surface {
    fn show(&mut self, event: UiEvent) {
        match event {
            UiEvent::DecisionRequested { prompt, responder } => {
                let choices = if prompt.offer_take_break {
                    "[t]ake, [p]ostpone or [d]ismiss"
                } else {
                    "[p]ostpone or [d]ismiss"
                };
                println!("\n{} ({} left) {choices}", prompt.message, prompt.countdown);
                self.pending = Some(responder);
            }
            UiEvent::DecisionCountdown { remaining, .. } => {
                debug!("decision closes in {remaining}");
            }
            UiEvent::DecisionClosed { kind } => {
                if self
                    .pending
                    .as_ref()
                    .is_some_and(|pending| pending.kind() == kind)
                {
                    self.pending = None;
                }
            }
            UiEvent::BreakStarted {
                kind,
                duration,
                skip,
            } => {
                println!("{kind} started for {duration}; [s]kip to end it early");
                self.running = Some(skip);
            }
            UiEvent::BreakCountdown { remaining, .. } => {
                debug!("break ends in {remaining}");
            }
            UiEvent::BreakFinished { kind, outcome } => {
                println!("{kind}: {}", outcome.as_str());
                self.running = None;
            }
            UiEvent::Status(_) => {}
            UiEvent::Posture(state) => {
                if !state.is_ok() {
                    println!("posture: {state:?}");
                }
            }
            UiEvent::DeviceError { message } => println!("device error: {message}"),
        }
    }

    fn respond(&mut self, reply: DecisionReply) {
        match self.pending.take() {
            Some(responder) => {
                let kind = responder.kind();
                if !responder.respond(reply) {
                    println!("the {kind} prompt already closed");
                }
            }
            None => println!("no break is waiting for an answer"),
        }
    }
}

fn print_status(snapshots: &[ScheduleSnapshot], paused: bool) {
    if paused {
        println!("paused");
    }
    for snapshot in snapshots {
        let state = if snapshot.enabled {
            format!("{:?}", snapshot.phase).to_lowercase()
        } else {
            "disabled".to_string()
        };
        let last = snapshot
            .last_outcome
            .map(|outcome| format!(", last {}", outcome.as_str()))
            .unwrap_or_default();
        println!(
            "{:<14} {:<10} next in {}{last}",
            snapshot.kind.to_string(),
            state,
            snapshot.remaining
        );
    }
}

async fn print_history(history: Option<&Database>) -> Result<()> {
    let Some(db) = history else {
        println!("break history is not available");
        return Ok(());
    };
    let events = db.break_history(HISTORY_LIMIT).await?;
    if events.is_empty() {
        println!("no breaks recorded yet");
    }
    let now = Utc::now();
    for event in events {
        let ago = (now - event.notified_at).num_minutes();
        println!("{ago:>5} min ago  {:<14} {}", event.kind.to_string(), event.outcome.as_str());
    }
    Ok(())
}

/// Runs until `quit`, end of input, or the scheduler's event stream closes.
pub async fn run(
    controls: &Controls,
    mut events: UnboundedReceiver<UiEvent>,
    history: Option<Database>,
) -> Result<()> {
    let mut lines = BufReader::new(io::stdin()).lines();
    let mut surface = Surface::default();
    let scheduler = controls.scheduler();
    println!("{HELP}");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => surface.show(event),
                None => break,
            },
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                let command = match parse_command(&line) {
                    Ok(command) => command,
                    Err(message) => {
                        println!("{message}");
                        continue;
                    }
                };
                match command {
                    ConsoleCommand::Take => surface.respond(DecisionReply::take_break()),
                    ConsoleCommand::Postpone(None) => surface.respond(DecisionReply::postpone()),
                    ConsoleCommand::Postpone(Some(span)) => surface.respond(DecisionReply::postpone_for(span)),
                    ConsoleCommand::Dismiss => surface.respond(DecisionReply::dismiss()),
                    ConsoleCommand::Skip => match surface.running.take() {
                        Some(skip) => skip.skip(),
                        None => println!("no break is running"),
                    },
                    ConsoleCommand::BreakNow(kind) => scheduler.take_break_now(kind),
                    ConsoleCommand::SetEnabled(kind, enabled) => {
                        if let Err(err) = controls.set_enabled(kind, enabled) {
                            println!("{err}");
                        }
                    }
                    ConsoleCommand::Posture(true) => {
                        if let Err(err) = controls.start_posture().await {
                            println!("posture monitoring not started: {err:#}");
                        }
                    }
                    ConsoleCommand::Posture(false) => {
                        if let Err(err) = controls.stop_posture().await {
                            println!("{err:#}");
                        }
                    }
                    ConsoleCommand::Calibrate(distance) => match controls.calibrate(distance).await {
                        Ok(measurement) => println!("calibrated; focal length {:.1}", measurement.focal_length),
                        Err(err) => println!("calibration failed: {err:#}"),
                    },
                    ConsoleCommand::Pause(span) => scheduler.pause(span),
                    ConsoleCommand::Resume => scheduler.resume(),
                    ConsoleCommand::Status => print_status(&scheduler.snapshot(), scheduler.is_paused()),
                    ConsoleCommand::History => {
                        if let Err(err) = print_history(history.as_ref()).await {
                            warn!("failed to read break history: {err:#}");
                        }
                    }
                    ConsoleCommand::Help => println!("{HELP}"),
                    ConsoleCommand::Quit => break,
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_decision_commands() {
        assert_eq!(parse_command("t"), Ok(ConsoleCommand::Take));
        assert_eq!(parse_command(" D "), Ok(ConsoleCommand::Dismiss));
        assert_eq!(parse_command("p"), Ok(ConsoleCommand::Postpone(None)));
        assert_eq!(
            parse_command("p 5m"),
            Ok(ConsoleCommand::Postpone(Some(TimeSpan::from_minutes(5))))
        );
        assert_eq!(parse_command("skip"), Ok(ConsoleCommand::Skip));
    }

    #[test]
    fn parses_scheduler_commands() {
        assert_eq!(
            parse_command("now Stretch"),
            Ok(ConsoleCommand::BreakNow(BreakKind::Stretch))
        );
        assert_eq!(parse_command("pause"), Ok(ConsoleCommand::Pause(None)));
        assert_eq!(
            parse_command("pause 1:00:00"),
            Ok(ConsoleCommand::Pause(Some(TimeSpan::from_minutes(60))))
        );
        assert_eq!(parse_command("quit"), Ok(ConsoleCommand::Quit));
    }

    #[test]
    fn parses_edit_and_posture_commands() {
        assert_eq!(
            parse_command("disable micro"),
            Ok(ConsoleCommand::SetEnabled(BreakKind::Micro, false))
        );
        assert_eq!(
            parse_command("enable DAY"),
            Ok(ConsoleCommand::SetEnabled(BreakKind::Day, true))
        );
        assert_eq!(parse_command("posture on"), Ok(ConsoleCommand::Posture(true)));
        assert_eq!(parse_command("calibrate 60"), Ok(ConsoleCommand::Calibrate(60.0)));
        assert!(parse_command("posture maybe").is_err());
        assert!(parse_command("calibrate -5").is_err());
        assert!(parse_command("enable").is_err());
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(parse_command("").is_err());
        assert!(parse_command("now").is_err());
        assert!(parse_command("now lunch").is_err());
        assert!(parse_command("p soon").is_err());
        assert!(parse_command("pause 5m extra").is_err());
        assert!(parse_command("jump").is_err());
    }

    #[test]
    fn answering_without_a_prompt_is_harmless() {
        let mut surface = Surface::default();
        surface.respond(DecisionReply::dismiss());
        assert!(surface.pending.is_none());
    }

    #[test]
    fn closed_prompt_is_forgotten() {
        let mut surface = Surface::default();
        let (responder, _rx) = DecisionResponder::channel(BreakKind::Micro);
        surface.show(UiEvent::DecisionRequested {
            prompt: crate::ui::DecisionPrompt {
                kind: BreakKind::Micro,
                message: BreakKind::Micro.prompt().into(),
                countdown: TimeSpan::from_seconds(30),
                offer_take_break: true,
            },
            responder,
        });
        assert!(surface.pending.is_some());

        surface.show(UiEvent::DecisionClosed {
            kind: BreakKind::Micro,
        });
        assert!(surface.pending.is_none());
    }
}
