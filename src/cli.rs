//! The operator shell. Reads commands from stdin and drives the engine's
//! lifecycle, standings queries, team management and the report artifact.

use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::config::TeamConfig;
use crate::engine::{Engine, EngineError};
use crate::report::Report;

const PROMPT: &str = "scorekeeper> ";

const HELP: &str = "\
Available commands:

  start | pause | resume | stop   engine lifecycle
  state                           current engine state and iteration
  score-check                     standings, highest first
  uptime                          per-service uptime validation
  report                          write the YAML standings report
  team create <name> <password> <color>
  team edit <name> color|password <value>
  team view <name>
  logs [n]                        tail the engine log
  help
  exit
";

pub async fn run(engine: Engine, log_dir: PathBuf) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    prompt();
    while let Some(line) = lines.next_line().await? {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.is_empty() {
            prompt();
            continue;
        }

        match tokens[0] {
            "help" => print!("{HELP}"),
            "start" => transition(engine.start()),
            "pause" => transition(engine.pause()),
            "resume" => transition(engine.resume()),
            "stop" => transition(engine.stop()),
            "state" | "status" => {
                let snapshot = engine.snapshot();
                println!(
                    "engine is {} (iteration {}, refresh {}s)",
                    snapshot.status,
                    snapshot.iteration,
                    snapshot.refresh.as_secs()
                );
            }
            "score-check" | "scores" => {
                if let Err(err) = score_check(&engine).await {
                    println!("error: {err:#}");
                }
            }
            "uptime" => {
                if let Err(err) = uptime(&engine).await {
                    println!("error: {err:#}");
                }
            }
            "report" => match write_report(&engine, &log_dir).await {
                Ok(path) => println!("report written to {}", path.display()),
                Err(err) => println!("error: {err:#}"),
            },
            "team" => {
                if let Err(err) = team_command(&engine, &tokens[1..]).await {
                    println!("error: {err:#}");
                }
            }
            "logs" => {
                let count = tokens
                    .get(1)
                    .and_then(|n| n.parse::<usize>().ok())
                    .unwrap_or(20);
                if let Err(err) = tail_log(&log_dir, count) {
                    println!("error: {err:#}");
                }
            }
            "exit" | "quit" => break,
            other => println!("unknown command {other:?}; try help"),
        }
        prompt();
    }
    Ok(())
}

fn prompt() {
    print!("{PROMPT}");
    std::io::stdout().flush().ok();
}

fn transition(result: Result<(), EngineError>) {
    match result {
        Ok(()) => println!("ok"),
        Err(err) => println!("error: {err}"),
    }
}

async fn score_check(engine: &Engine) -> Result<()> {
    let standings = engine.database().standings().await?;
    if standings.is_empty() {
        println!("no teams loaded");
        return Ok(());
    }
    println!("{:<6} {:<24} {:>8}", "id", "team", "points");
    for team in standings {
        println!(
            "{:<6} {:<24} {:>8}",
            team.team_id, team.team_name, team.points
        );
    }
    Ok(())
}

async fn uptime(engine: &Engine) -> Result<()> {
    let db = engine.database();
    for team in db.all_teams().await? {
        println!("{} (team {})", team.team_name, team.team_id);
        for row in db.team_services(team.team_id).await? {
            let pct = if row.total_checks > 0 {
                100 * row.successful_checks / row.total_checks
            } else {
                0
            };
            let state = if row.is_up { "up" } else { "down" };
            let drift = if row.successful_checks > row.total_checks {
                "  COUNTER DRIFT"
            } else {
                ""
            };
            println!(
                "  {:<28} {:>4} {:>3}% ({}/{} checks){}",
                row.service_name, state, pct, row.successful_checks, row.total_checks, drift
            );
        }
    }
    Ok(())
}

async fn write_report(engine: &Engine, log_dir: &Path) -> Result<PathBuf> {
    let standings = engine.database().standings().await?;
    Report::from_standings(&standings).write(log_dir)
}

async fn team_command(engine: &Engine, args: &[&str]) -> Result<()> {
    let db = engine.database();
    match args {
        ["create", name, password, color] => {
            let team = TeamConfig {
                id: db.next_team_id().await?,
                name: (*name).to_owned(),
                password: (*password).to_owned(),
                color: (*color).to_owned(),
            };
            engine.enroll_team(&team).await?;
            println!(
                "team {} created with id {}; scored from the next round",
                team.name, team.id
            );
        }
        ["edit", name, "color", value] => {
            let Some(team) = db.team_by_name(name).await? else {
                println!("no team named {name:?}");
                return Ok(());
            };
            db.update_team_color(team.team_id, value).await?;
            println!("team {name} recolored");
        }
        ["edit", name, "password", value] => {
            let Some(team) = db.team_by_name(name).await? else {
                println!("no team named {name:?}");
                return Ok(());
            };
            db.update_team_password(team.team_id, value).await?;
            println!("team {name} password updated");
        }
        ["view", name] => {
            let Some(team) = db.team_by_name(name).await? else {
                println!("no team named {name:?}");
                return Ok(());
            };
            println!(
                "{} (team {}, color {})",
                team.team_name, team.team_id, team.team_color
            );
            for row in db.team_score_breakdown(team.team_id).await? {
                println!(
                    "  {:<28} {:>6} points  ({}/{} checks)",
                    row.service_name, row.points, row.successful_checks, row.total_checks
                );
            }
        }
        _ => println!("usage: team create <name> <password> <color> | team edit <name> color|password <value> | team view <name>"),
    }
    Ok(())
}

/// Prints the last `count` lines of the most recent log file.
fn tail_log(log_dir: &Path, count: usize) -> Result<()> {
    let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;
    for entry in std::fs::read_dir(log_dir)? {
        let entry = entry?;
        if !entry
            .file_name()
            .to_string_lossy()
            .starts_with("scorekeeper.log")
        {
            continue;
        }
        let modified = entry.metadata()?.modified()?;
        if newest.as_ref().map_or(true, |(when, _)| modified > *when) {
            newest = Some((modified, entry.path()));
        }
    }

    let Some((_, path)) = newest else {
        println!("no log files yet");
        return Ok(());
    };
    let text = std::fs::read_to_string(&path)?;
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(count);
    for line in &lines[start..] {
        println!("{line}");
    }
    Ok(())
}
