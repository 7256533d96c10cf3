mod common;
use common::*;

use voltronic_bridge::prelude::*;
use voltronic_bridge::voltronic::command::DEFAULT_REPLY_LEN;

#[test]
fn fixed_reply_lengths() -> Result<()> {
    common_setup();
    let table = CommandTable::default();

    assert_eq!(table.expected_length("QPI")?, 8);
    assert_eq!(table.expected_length("QID")?, 18);
    assert_eq!(table.expected_length("QVFW3")?, 19);
    assert_eq!(table.expected_length("QFLAG")?, 15);
    assert_eq!(table.expected_length("QBOOT")?, 5);
    assert_eq!(table.expected_length("QCVT")?, 7);
    assert_eq!(table.expected_length("QPIGS2")?, 71);
    assert_eq!(table.expected_length("QDI")?, 83);
    assert_eq!(table.expected_length("QPGS0")?, 133);

    Ok(())
}

#[test]
fn tracked_lengths_default_and_override() -> Result<()> {
    let table = CommandTable::default();
    assert_eq!(table.expected_length("QMOD")?, 5);
    assert_eq!(table.expected_length("QPIRI")?, 98);
    assert_eq!(table.expected_length("QPIGS")?, 110);
    assert_eq!(table.expected_length("QPIWS")?, 36);

    let config = Config {
        device: "/dev/hidraw0".to_string(),
        qpigs: Some(95),
        ..Default::default()
    };
    let table = CommandTable::new(&config);
    assert_eq!(table.expected_length("QPIGS")?, 95);
    assert_eq!(table.expected_length("QPIRI")?, 98);

    Ok(())
}

#[test]
fn unknown_commands() {
    let table = CommandTable::default();

    assert!(matches!(
        table.expected_length("POP02"),
        Err(ExchangeError::UnknownCommand(name)) if name == "POP02"
    ));
    assert_eq!(table.resolve("POP02", None), DEFAULT_REPLY_LEN);
    assert_eq!(table.resolve("POP02", Some(12)), 12);
    assert_eq!(table.resolve("QPI", Some(12)), 12);
    assert!(table.command("POP02").is_err());
}

#[test]
fn command_tokens_are_validated() {
    assert!(Command::new("QPIGS", 110).is_ok());
    assert!(matches!(Command::new("", 7), Err(ExchangeError::UnknownCommand(_))));
    assert!(matches!(Command::new("Q PI", 7), Err(ExchangeError::UnknownCommand(_))));
    assert!(matches!(Command::new(&"Q".repeat(33), 7), Err(ExchangeError::UnknownCommand(_))));
}

#[test]
fn only_queries_are_idempotent() -> Result<()> {
    assert!(Command::new("QMOD", 5)?.is_idempotent());
    assert!(!Command::new("POP02", 7)?.is_idempotent());
    assert!(!Command::new("PE", 7)?.is_idempotent());

    Ok(())
}

#[test]
fn command_frames() -> Result<()> {
    let command = CommandTable::default().command("QPIGS")?;
    assert_eq!(&command.frame()[..], b"QPIGS\xb7\xa9\r");
    assert_eq!(command.to_string(), "QPIGS");

    Ok(())
}
