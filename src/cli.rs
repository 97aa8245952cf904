use std::path::PathBuf;

use anyhow::{bail, Result};

#[derive(Debug, Default, PartialEq, Eq)]
pub struct CliArgs {
    pub config: Option<PathBuf>,
    pub show_help: bool,
}

/// Parse process arguments.
///
/// Supported forms:
///   ado2gitlab
///   ado2gitlab --config ./migration.toml
///   ado2gitlab --help
pub fn parse_args(args: &[String]) -> Result<CliArgs> {
    let mut parsed = CliArgs::default();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-c" | "--config" => {
                i += 1;
                if i < args.len() {
                    parsed.config = Some(PathBuf::from(&args[i]));
                } else {
                    bail!("Missing value for -c/--config flag");
                }
            }
            "-h" | "--help" => {
                parsed.show_help = true;
            }
            other => {
                bail!("Unknown argument '{other}'. Run with --help for usage.");
            }
        }
        i += 1;
    }
    Ok(parsed)
}

pub fn print_help() {
    println!("ado2gitlab — migrate Azure DevOps work items to GitLab\n");
    println!("USAGE:");
    println!("  ado2gitlab [--config <path>]");
    println!();
    println!("OPTIONS:");
    println!("  -c, --config <path>  Path to the migration config (default: ./migration.toml,");
    println!("                       then the user config directory)");
    println!("  -h, --help           Show this help");
    println!();
    println!("The run is safe to re-invoke: items recorded in the identity map file are");
    println!("skipped, and relation linking is replayed idempotently.");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(strs: &[&str]) -> Vec<String> {
        strs.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn no_args_is_a_default_run() {
        let parsed = parse_args(&[]).unwrap();
        assert_eq!(parsed, CliArgs::default());
    }

    #[test]
    fn config_flag_takes_a_path() {
        let parsed = parse_args(&args(&["--config", "custom.toml"])).unwrap();
        assert_eq!(parsed.config, Some(PathBuf::from("custom.toml")));

        let parsed = parse_args(&args(&["-c", "/etc/mig.toml"])).unwrap();
        assert_eq!(parsed.config, Some(PathBuf::from("/etc/mig.toml")));
    }

    #[test]
    fn missing_config_value_fails() {
        let result = parse_args(&args(&["--config"]));
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Missing value"));
    }

    #[test]
    fn help_flag_is_recognized() {
        assert!(parse_args(&args(&["--help"])).unwrap().show_help);
        assert!(parse_args(&args(&["-h"])).unwrap().show_help);
    }

    #[test]
    fn unknown_argument_fails() {
        let result = parse_args(&args(&["--frobnicate"]));
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("--frobnicate"));
    }
}
