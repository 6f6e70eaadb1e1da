use std::path::PathBuf;

use clap::Parser;
use msb_protocol::ControlRequest;

use super::*;

#[test]
fn parse_session_command() {
	let cli = Cli::try_parse_from(["msb", "session", "emulator-5554"]).unwrap();
	assert_eq!(
		cli.command,
		Commands::Session {
			device: "emulator-5554".into()
		}
	);
}

#[test]
fn get_session_alias() {
	let cli = Cli::try_parse_from(["msb", "get-session", "emulator-5554"]).unwrap();
	assert!(matches!(cli.command, Commands::Session { .. }));
}

#[test]
fn device_argument_is_required() {
	assert!(Cli::try_parse_from(["msb", "start-server"]).is_err());
	assert!(Cli::try_parse_from(["msb", "health"]).is_err());
}

#[test]
fn verbose_flag_short_and_long() {
	let short = Cli::try_parse_from(["msb", "-v", "devices"]).unwrap();
	assert_eq!(short.verbose, 1);

	let long = Cli::try_parse_from(["msb", "--verbose", "devices"]).unwrap();
	assert_eq!(long.verbose, 1);

	let double = Cli::try_parse_from(["msb", "-vv", "daemon"]).unwrap();
	assert_eq!(double.verbose, 2);
}

#[test]
fn global_config_after_subcommand() {
	let cli = Cli::try_parse_from(["msb", "daemon", "--config", "/etc/msb.json"]).unwrap();
	assert_eq!(cli.config, Some(PathBuf::from("/etc/msb.json")));
	assert_eq!(cli.command, Commands::Daemon);
}

#[test]
fn daemon_sends_no_request() {
	assert_eq!(Commands::Daemon.to_request(), None);
}

#[test]
fn commands_map_to_control_requests() {
	let cases = [
		(vec!["msb", "devices"], ControlRequest::GetDevices),
		(
			vec!["msb", "stop-server", "emulator-5554"],
			ControlRequest::StopServer {
				device_id: "emulator-5554".into(),
			},
		),
		(
			vec!["msb", "server-status", "emulator-5554"],
			ControlRequest::ServerStatus {
				device_id: "emulator-5554".into(),
			},
		),
		(
			vec!["msb", "close-session", "emulator-5554"],
			ControlRequest::CloseSession {
				device_id: "emulator-5554".into(),
			},
		),
		(
			vec!["msb", "health", "emulator-5554"],
			ControlRequest::SessionHealth {
				device_id: "emulator-5554".into(),
			},
		),
		(vec!["msb", "cleanup"], ControlRequest::Cleanup),
		(vec!["msb", "shutdown"], ControlRequest::Shutdown),
	];

	for (args, expected) in cases {
		let cli = Cli::try_parse_from(args.clone()).unwrap();
		assert_eq!(cli.command.to_request(), Some(expected), "args: {args:?}");
	}
}
