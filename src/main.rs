mod config;
mod generate;
mod journal;
mod logging;
mod notify;
mod password;
mod roster;
mod template;

use anyhow::Result;
use clap::{Parser, Subcommand};
use config::Config;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "labkit",
    about = "Generate per-user lab scripts and email attendees their credentials"
)]
pub struct Args {
    #[arg(long, global = true, help = "Config file path")]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Verbose output (debug logging)")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Write the create-users script, one lab script per user, and the cleanup script
    Generate(GenerateArgs),
    /// Email each attendee their credentials with their lab script attached
    Notify(NotifyArgs),
}

#[derive(clap::Args)]
pub struct GenerateArgs {
    #[arg(long, help = "Delete and regenerate the output directory if it exists")]
    pub force: bool,

    #[arg(long, value_name = "N", help = "Number of users to generate")]
    pub users: Option<usize>,

    #[arg(long, value_name = "DIR", help = "Output directory")]
    pub output_dir: Option<PathBuf>,

    #[arg(long, value_name = "DIR", help = "Directory holding the SQL templates")]
    pub template_dir: Option<PathBuf>,

    #[arg(long, env = "LABKIT_ACCOUNT_URL", help = "Snowflake account URL")]
    pub account_url: Option<String>,
}

#[derive(clap::Args)]
pub struct NotifyArgs {
    #[arg(
        long,
        conflicts_with = "send",
        help = "Compose and preview every email without sending (default)"
    )]
    pub dry_run: bool,

    #[arg(long, help = "Send the emails")]
    pub send: bool,

    #[arg(long = "only", value_name = "USER", action = clap::ArgAction::Append, help = "Only mail the attendee assigned this user (repeatable)")]
    pub only: Vec<String>,

    #[arg(long, value_name = "DIR", help = "Delivery journal directory")]
    pub journal_dir: Option<PathBuf>,

    #[arg(long, value_name = "DIR", help = "Output directory the lab scripts were generated into")]
    pub output_dir: Option<PathBuf>,

    #[arg(long, env = "LABKIT_ACCOUNT_URL", help = "Snowflake account URL")]
    pub account_url: Option<String>,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let cfg = if let Some(config_path) = &args.config {
        Config::load_from(config_path)?
    } else {
        Config::load()?
    };

    logging::init(&cfg.logging, args.verbose);

    match args.command {
        Command::Generate(generate_args) => run_generate(cfg, generate_args),
        Command::Notify(notify_args) => run_notify(cfg, notify_args),
    }
}

fn run_generate(mut cfg: Config, args: GenerateArgs) -> Result<()> {
    if let Some(users) = args.users {
        cfg.user_count = users;
    }
    if let Some(dir) = args.output_dir {
        cfg.output.dir = dir;
    }
    if let Some(dir) = args.template_dir {
        cfg.templates.dir = dir;
    }
    if let Some(url) = args.account_url {
        cfg.account_url = url;
    }
    config::ensure_valid(cfg.validate())?;

    let templates = template::TemplateSet::load(&cfg.templates)?;
    let generator = generate::Generator::new(&cfg, templates);
    let summary = generator.run(cfg.user_count, args.force)?;

    println!("{}", summary);
    Ok(())
}

fn run_notify(mut cfg: Config, args: NotifyArgs) -> Result<()> {
    if let Some(dir) = args.output_dir {
        cfg.output.dir = dir;
    }
    if let Some(url) = args.account_url {
        cfg.account_url = url;
    }
    config::ensure_valid(cfg.validate_notify())?;

    let attendees = notify::select_attendees(&cfg.attendees, &args.only)?;
    if attendees.is_empty() {
        anyhow::bail!(
            "No attendees configured. Add [[attendees]] entries (user, email) to .labkit/config.local.toml"
        );
    }
    notify::ensure_lab_scripts(&cfg.lab_scripts_dir())?;

    let notifier = notify::Notifier::new(&cfg)?;
    let run_id = uuid::Uuid::new_v4().to_string();
    let journal_dir = args
        .journal_dir
        .unwrap_or_else(|| Path::new(".labkit").join("deliveries"));
    let mut journal = journal::Journal::open(&journal_dir, &run_id)?;
    tracing::debug!(run_id = %run_id, journal = %journal.path.display(), "notify run");

    // Dry run unless --send was given explicitly
    let summary = if args.send {
        let mut outbox = notify::smtp::SmtpOutbox::from_config(&cfg)?;
        notifier.run(&attendees, notify::Delivery::Send(&mut outbox), &mut journal)?
    } else {
        notifier.run(&attendees, notify::Delivery::DryRun, &mut journal)?
    };

    if args.send {
        println!("Sent {} emails", summary.sent);
    } else {
        println!(
            "Dry run: composed {} emails, sent none (pass --send to deliver)",
            summary.previewed
        );
    }
    println!("Journal: {}", journal.path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_notify_defaults_to_dry_run() {
        let args = Args::try_parse_from(["labkit", "notify"]).unwrap();
        match args.command {
            Command::Notify(n) => {
                assert!(!n.send);
                assert!(n.only.is_empty());
            }
            Command::Generate(_) => panic!("expected notify"),
        }
    }

    #[test]
    fn test_dry_run_conflicts_with_send() {
        assert!(Args::try_parse_from(["labkit", "notify", "--dry-run", "--send"]).is_err());
    }

    #[test]
    fn test_notify_only_repeats() {
        let args = Args::try_parse_from([
            "labkit", "notify", "--send", "--only", "USER_01", "--only", "USER_07",
        ])
        .unwrap();
        match args.command {
            Command::Notify(n) => {
                assert!(n.send);
                assert_eq!(n.only, vec!["USER_01", "USER_07"]);
            }
            Command::Generate(_) => panic!("expected notify"),
        }
    }

    #[test]
    fn test_generate_flags() {
        let args = Args::try_parse_from([
            "labkit", "--verbose", "generate", "--force", "--users", "25", "--output-dir", "out",
        ])
        .unwrap();
        assert!(args.verbose);
        match args.command {
            Command::Generate(g) => {
                assert!(g.force);
                assert_eq!(g.users, Some(25));
                assert_eq!(g.output_dir, Some(PathBuf::from("out")));
            }
            Command::Notify(_) => panic!("expected generate"),
        }
    }
}
