//! Line commands typed at the prompt, and the checks the table enforces
//! before anything reaches the session.

use std::fmt::Write as _;

use shared::{
    domain::{Participant, ParticipantId, Role, ESTIMATE_DECK},
    protocol::SessionSnapshot,
};

pub const HELP: &str = "\
commands:
  vote <n>               cast an estimate (1, 2, 3, 5, 8, 13)
  reveal                 show all votes once every estimator voted
  reset                  clear votes and hide them again
  name <new name>        change your display name
  role estimator|observer
  react <who> <emoji>    throw an emoji at a participant (name or id)
  show                   print the table
  help                   print this help
  quit                   leave the session";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Vote(i64),
    Reveal,
    Reset,
    Rename(String),
    SetRole(Role),
    React { target: String, emoji: String },
    Show,
    Help,
    Quit,
}

/// Parses one input line. Blank lines yield `Ok(None)`.
pub fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };

    let command = match verb.to_ascii_lowercase().as_str() {
        "vote" => {
            let value = rest
                .parse::<i64>()
                .map_err(|_| format!("not a number: '{rest}'"))?;
            Command::Vote(value)
        }
        "reveal" => Command::Reveal,
        "reset" => Command::Reset,
        "name" => {
            if rest.is_empty() {
                return Err("usage: name <new name>".to_string());
            }
            Command::Rename(rest.to_string())
        }
        "role" => Command::SetRole(rest.parse()?),
        "react" => {
            let (target, emoji) = rest
                .rsplit_once(char::is_whitespace)
                .map(|(target, emoji)| (target.trim(), emoji.trim()))
                .ok_or_else(|| "usage: react <who> <emoji>".to_string())?;
            if target.is_empty() || emoji.is_empty() {
                return Err("usage: react <who> <emoji>".to_string());
            }
            Command::React {
                target: target.to_string(),
                emoji: emoji.to_string(),
            }
        }
        "show" => Command::Show,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(format!("unknown command '{other}', try 'help'")),
    };
    Ok(Some(command))
}

pub fn check_vote(me: &Participant, value: i64) -> Result<(), String> {
    if !me.is_estimator() {
        return Err("observers do not vote; switch with 'role estimator'".to_string());
    }
    if !ESTIMATE_DECK.contains(&value) {
        return Err(format!("{value} is not in the deck {ESTIMATE_DECK:?}"));
    }
    Ok(())
}

pub fn check_reveal(snapshot: &SessionSnapshot) -> Result<(), String> {
    if snapshot.revealed {
        return Err("votes are already revealed".to_string());
    }
    if !snapshot.all_estimators_voted() {
        let waiting: Vec<&str> = snapshot
            .estimators()
            .filter(|participant| !snapshot.has_voted(&participant.id))
            .map(|participant| participant.name.as_str())
            .collect();
        return Err(format!("still waiting for: {}", waiting.join(", ")));
    }
    Ok(())
}

/// Finds a participant by exact id, then by case-insensitive name.
pub fn resolve_target(snapshot: &SessionSnapshot, target: &str) -> Option<ParticipantId> {
    snapshot
        .participants
        .iter()
        .find(|participant| participant.id.as_str() == target)
        .or_else(|| {
            snapshot
                .participants
                .iter()
                .find(|participant| participant.name.eq_ignore_ascii_case(target))
        })
        .map(|participant| participant.id.clone())
}

pub fn render_board(snapshot: &SessionSnapshot, me: &ParticipantId) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "--- {} participant(s), votes {} ---",
        snapshot.participants.len(),
        if snapshot.revealed { "revealed" } else { "hidden" }
    );
    for participant in &snapshot.participants {
        let marker = if &participant.id == me { ">" } else { " " };
        let status = match participant.role {
            Role::Observer => "observing".to_string(),
            Role::Estimator => match snapshot.votes.get(&participant.id).copied().flatten() {
                Some(value) if snapshot.revealed => value.to_string(),
                Some(_) => "voted".to_string(),
                None => "...".to_string(),
            },
        };
        let _ = writeln!(out, "{marker} {:<20} {status}", participant.name);
    }
    if let Some(summary) = snapshot.summary() {
        let _ = writeln!(
            out,
            "lowest {} ({}), highest {} ({}), average {:.1}",
            summary.lowest,
            summary.lowest_names.join(", "),
            summary.highest,
            summary.highest_names.join(", "),
            summary.average
        );
    }
    out
}

#[cfg(test)]
#[path = "tests/commands_tests.rs"]
mod tests;
