use std::path::PathBuf;

use clap::Parser;
use sleuth::cli::commands::run::ModeArg;
use sleuth::cli::{Cli, Commands};

#[test]
fn test_parse_run_with_overrides() {
    let cli = Cli::try_parse_from([
        "sleuth",
        "run",
        "bug-4711.json",
        "--mode",
        "review",
        "--max-dispatches",
        "20",
        "--concurrency",
        "2",
        "--skip",
        "crash-report",
        "--skip",
        "history-search",
        "--forward-boundary",
        "v6.10",
        "--fresh",
        "--strict",
    ])
    .unwrap();

    match cli.command {
        Commands::Run(args) => {
            assert_eq!(args.reference, "bug-4711.json");
            assert_eq!(args.mode, ModeArg::Review);
            assert_eq!(args.max_dispatches, Some(20));
            assert_eq!(args.concurrency, Some(2));
            assert_eq!(args.skip, vec!["crash-report", "history-search"]);
            assert_eq!(args.forward_boundary.as_deref(), Some("v6.10"));
            assert!(args.fresh);
            assert!(args.strict);
            assert!(!args.dry_run);
        }
        _ => panic!("Wrong top-level command"),
    }
}

#[test]
fn test_parse_run_defaults_to_investigation() {
    let cli = Cli::try_parse_from(["sleuth", "run", "free text describing a hang"]).unwrap();

    match cli.command {
        Commands::Run(args) => {
            assert_eq!(args.mode, ModeArg::Investigate);
            assert_eq!(args.max_dispatches, None);
            assert!(args.skip.is_empty());
            assert!(args.state_dir.is_none());
        }
        _ => panic!("Wrong top-level command"),
    }
}

#[test]
fn test_parse_status_with_state_dir() {
    let cli = Cli::try_parse_from(["sleuth", "status", "--state-dir", "/tmp/run", "--json"]).unwrap();

    assert!(cli.json);
    match cli.command {
        Commands::Status(args) => assert_eq!(args.state_dir, Some(PathBuf::from("/tmp/run"))),
        _ => panic!("Wrong top-level command"),
    }
}

#[test]
fn test_parse_show() {
    let cli = Cli::try_parse_from(["sleuth", "--config", "sleuth.yaml", "show"]).unwrap();

    assert_eq!(cli.config, Some(PathBuf::from("sleuth.yaml")));
    assert!(matches!(cli.command, Commands::Show(_)));
}

#[test]
fn test_parse_invalid_mode() {
    let result = Cli::try_parse_from(["sleuth", "run", "x", "--mode", "bisect"]);
    assert!(result.is_err());
}

#[test]
fn test_parse_run_requires_reference() {
    let result = Cli::try_parse_from(["sleuth", "run"]);
    assert!(result.is_err());
}
