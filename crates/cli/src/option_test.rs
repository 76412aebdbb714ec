use clap::Parser;

use crate::option::Opt;

#[test]
fn run_subcommand_requires_at_least_one_year() {
    assert!(Opt::try_parse_from(["lake", "run"]).is_err());
    assert!(Opt::try_parse_from(["lake", "run", "--year", "2024"]).is_ok());
}

#[test]
fn run_subcommand_accepts_repeated_year_flags() {
    let opt = Opt::try_parse_from(["lake", "run", "--year", "2023", "--year", "2024"]).unwrap();
    let crate::option::Command::Run { years } = opt.command else { panic!("expected Run") };
    assert_eq!(years, vec![2023, 2024]);
}

#[test]
fn ingest_subcommand_defaults_force_refresh_to_false() {
    let opt = Opt::try_parse_from(["lake", "ingest", "--year", "2024"]).unwrap();
    let crate::option::Command::Ingest { year, force_refresh } = opt.command else { panic!("expected Ingest") };
    assert_eq!(year, 2024);
    assert!(!force_refresh);
}

#[test]
fn cli_flag_overrides_default_worker_concurrency() {
    let opt = Opt::try_parse_from(["lake", "--worker-concurrency", "3", "run", "--year", "2024"]).unwrap();
    assert_eq!(opt.worker_concurrency, 3);
}
