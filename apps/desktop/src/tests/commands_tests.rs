use super::*;

fn participant(id: &str, name: &str, role: Role) -> Participant {
    Participant::new(id, name, role)
}

fn table(votes: &[(&str, Option<i64>)], revealed: bool) -> SessionSnapshot {
    let mut snapshot = SessionSnapshot {
        participants: vec![
            participant("a", "Ann", Role::Estimator),
            participant("b", "Ben", Role::Estimator),
            participant("o", "Olga", Role::Observer),
        ],
        revealed,
        ..SessionSnapshot::default()
    };
    for (id, vote) in votes {
        snapshot.votes.insert(ParticipantId::from(*id), *vote);
    }
    snapshot
}

#[test]
fn parses_every_command() {
    assert_eq!(parse_command("vote 5"), Ok(Some(Command::Vote(5))));
    assert_eq!(parse_command("  REVEAL "), Ok(Some(Command::Reveal)));
    assert_eq!(parse_command("reset"), Ok(Some(Command::Reset)));
    assert_eq!(
        parse_command("name Mary Jane"),
        Ok(Some(Command::Rename("Mary Jane".to_string())))
    );
    assert_eq!(
        parse_command("role observer"),
        Ok(Some(Command::SetRole(Role::Observer)))
    );
    assert_eq!(
        parse_command("react Mary Jane 🎉"),
        Ok(Some(Command::React {
            target: "Mary Jane".to_string(),
            emoji: "🎉".to_string(),
        }))
    );
    assert_eq!(parse_command("show"), Ok(Some(Command::Show)));
    assert_eq!(parse_command("?"), Ok(Some(Command::Help)));
    assert_eq!(parse_command("exit"), Ok(Some(Command::Quit)));
    assert_eq!(parse_command("   "), Ok(None));
}

#[test]
fn rejects_malformed_commands() {
    assert!(parse_command("vote five").is_err());
    assert!(parse_command("name").is_err());
    assert!(parse_command("role captain").is_err());
    assert!(parse_command("react 🎉").is_err());
    assert!(parse_command("shuffle").is_err());
}

#[test]
fn only_estimators_vote_and_only_from_the_deck() {
    let estimator = participant("a", "Ann", Role::Estimator);
    let observer = participant("o", "Olga", Role::Observer);

    assert!(check_vote(&estimator, 8).is_ok());
    assert!(check_vote(&estimator, 4).is_err());
    assert!(check_vote(&observer, 8).is_err());
}

#[test]
fn reveal_waits_for_every_estimator() {
    let waiting = table(&[("a", Some(3)), ("b", None)], false);
    let err = check_reveal(&waiting).expect_err("Ben has not voted");
    assert!(err.contains("Ben"));
    assert!(!err.contains("Olga"));

    assert!(check_reveal(&table(&[("a", Some(3)), ("b", Some(5))], false)).is_ok());
    assert!(check_reveal(&table(&[("a", Some(3)), ("b", Some(5))], true)).is_err());
}

#[test]
fn reveal_allowed_when_observer_reveals_lone_estimator_vote() {
    let mut snapshot = SessionSnapshot {
        participants: vec![
            participant("x", "Xavier", Role::Estimator),
            participant("y", "Yara", Role::Observer),
        ],
        ..SessionSnapshot::default()
    };
    snapshot.votes.insert(ParticipantId::from("x"), Some(8));
    snapshot.votes.insert(ParticipantId::from("y"), None);

    assert!(check_reveal(&snapshot).is_ok());
}

#[test]
fn targets_resolve_by_id_then_name() {
    let snapshot = table(&[], false);
    assert_eq!(
        resolve_target(&snapshot, "b"),
        Some(ParticipantId::from("b"))
    );
    assert_eq!(
        resolve_target(&snapshot, "olga"),
        Some(ParticipantId::from("o"))
    );
    assert_eq!(resolve_target(&snapshot, "nobody"), None);
}

#[test]
fn board_hides_values_until_revealed() {
    let me = ParticipantId::from("a");
    let hidden = render_board(&table(&[("a", Some(3)), ("b", None)], false), &me);
    assert!(hidden.contains("votes hidden"));
    assert!(hidden.contains("> Ann"));
    let ann = hidden.lines().find(|line| line.contains("Ann")).expect("Ann row");
    assert!(ann.ends_with("voted"));
    assert!(hidden.contains("observing"));

    let shown = render_board(&table(&[("a", Some(3)), ("b", Some(5))], true), &me);
    assert!(shown.contains("votes revealed"));
    assert!(shown.contains("lowest 3 (Ann), highest 5 (Ben), average 4.0"));
}
