//! Emailing each attendee their credentials and lab script.
//!
//! Passwords are re-derived here from the identifier, so the notifier never
//! reads the generated create-users script; it only needs the per-user lab
//! file to attach. Every failure is fatal: the run stops at the first
//! attendee that cannot be mailed, after recording it in the journal.

pub mod message;
pub mod smtp;

use crate::config::{Attendee, Config};
use crate::generate::lab_script_name;
use crate::journal::Journal;
use crate::password::derive_password;
use crate::template::{Template, TemplateError};
use anyhow::{Context, Result};
use lettre::message::Mailbox;
use lettre::Message;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Error type for building or delivering one email
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    /// SMTP transport-level failure (connection, STARTTLS, authentication, send).
    #[error("SMTP transport error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),

    /// The recipient or sender address could not be parsed.
    #[error("Email address parse error: {0}")]
    Address(#[from] lettre::address::AddressError),

    /// The email body template could not be rendered.
    #[error("Email body error: {0}")]
    Template(#[from] TemplateError),

    /// The MIME message could not be assembled.
    #[error("Email build error: {0}")]
    Build(String),
}

/// Anything that can take a finished message for delivery
pub trait Outbox {
    fn deliver(&mut self, message: &Message) -> Result<(), MailError>;
}

/// How a run treats each composed message
pub enum Delivery<'a> {
    /// Compose everything, print what would be sent, send nothing
    DryRun,
    Send(&'a mut dyn Outbox),
}

impl Delivery<'_> {
    pub fn as_str(&self) -> &'static str {
        match self {
            Delivery::DryRun => "dry-run",
            Delivery::Send(_) => "send",
        }
    }
}

/// A message ready to go, with what the journal wants to know about it
pub struct Composed {
    pub message: Message,
    pub attachment: PathBuf,
    pub attachment_sha256: String,
}

/// Counts reported after a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NotifySummary {
    pub previewed: usize,
    pub sent: usize,
}

pub struct Notifier {
    from: Mailbox,
    subject: String,
    body: Template,
    password_prefix: String,
    account_url: String,
    lab_scripts_dir: PathBuf,
}

impl Notifier {
    pub fn new(config: &Config) -> Result<Self> {
        let from = Mailbox::new(
            Some(config.sender.name.clone()),
            config
                .sender
                .email
                .parse::<lettre::Address>()
                .context("Invalid sender address")?,
        );

        let body = match &config.email.body_file {
            Some(path) => Template::load("email body", path)?,
            None => Template::new("email body", message::DEFAULT_BODY),
        };
        body.check(message::BODY_VARS)
            .context("Invalid email body template")?;

        Ok(Self {
            from,
            subject: config.email.subject.clone(),
            body,
            password_prefix: config.password_prefix.clone(),
            account_url: config.account_url.clone(),
            lab_scripts_dir: config.lab_scripts_dir(),
        })
    }

    /// Where the generator put this user's lab script
    pub fn attachment_path(&self, user: &str) -> PathBuf {
        self.lab_scripts_dir.join(lab_script_name(user))
    }

    /// Build the message for one attendee
    pub fn compose(&self, attendee: &Attendee) -> Result<Composed> {
        let password = derive_password(&self.password_prefix, &attendee.user);
        let body = message::render_body(
            &self.body,
            &message::BodyFields {
                from_name: self.from.name.as_deref().unwrap_or_default(),
                username: &attendee.user,
                password: &password,
                account_url: &self.account_url,
            },
        )?;

        let attachment = self.attachment_path(&attendee.user);
        let content = std::fs::read(&attachment).with_context(|| {
            format!(
                "Failed to read lab script for {}: {}",
                attendee.user,
                attachment.display()
            )
        })?;
        let attachment_sha256 = sha256(&content);

        let message = message::build(
            &self.from,
            &attendee.email,
            &self.subject,
            body,
            &lab_script_name(&attendee.user),
            content,
        )
        .with_context(|| format!("Failed to build email for {}", attendee.email))?;

        Ok(Composed {
            message,
            attachment,
            attachment_sha256,
        })
    }

    /// Compose and deliver one attendee's email
    pub fn send_email(&self, outbox: &mut dyn Outbox, attendee: &Attendee) -> Result<Composed> {
        let composed = self.compose(attendee)?;
        outbox
            .deliver(&composed.message)
            .with_context(|| format!("Failed to send email to {}", attendee.email))?;
        Ok(composed)
    }

    /// Mail every attendee in order, stopping at the first failure
    pub fn run(
        &self,
        attendees: &[&Attendee],
        mut delivery: Delivery<'_>,
        journal: &mut Journal,
    ) -> Result<NotifySummary> {
        journal.run_start(delivery.as_str(), attendees.len())?;
        let mut summary = NotifySummary::default();

        for attendee in attendees {
            let result = match &mut delivery {
                Delivery::DryRun => self.compose(attendee).map(|composed| {
                    println!(
                        "[dry run] Would send email to {} with username {} (attachment {})",
                        attendee.email,
                        attendee.user,
                        composed.attachment.display()
                    );
                    composed
                }),
                Delivery::Send(outbox) => {
                    println!(
                        "Sending email to {} with username {}",
                        attendee.email, attendee.user
                    );
                    self.send_email(&mut **outbox, attendee)
                }
            };

            match result {
                Ok(composed) => {
                    let outcome = match delivery {
                        Delivery::DryRun => {
                            summary.previewed += 1;
                            "previewed"
                        }
                        Delivery::Send(_) => {
                            summary.sent += 1;
                            "sent"
                        }
                    };
                    tracing::info!(user = %attendee.user, to = %attendee.email, outcome, "attendee done");
                    journal.delivery(
                        outcome,
                        attendee,
                        &composed.attachment,
                        &composed.attachment_sha256,
                    )?;
                }
                Err(err) => {
                    tracing::error!(user = %attendee.user, to = %attendee.email, error = %format!("{:#}", err), "attendee failed");
                    journal.failure(attendee, &format!("{:#}", err))?;
                    journal.run_end(false, summary.previewed, summary.sent)?;
                    return Err(err);
                }
            }
        }

        journal.run_end(true, summary.previewed, summary.sent)?;
        Ok(summary)
    }
}

/// Pick the attendees to mail: everyone, or only the listed identifiers
pub fn select_attendees<'a>(attendees: &'a [Attendee], only: &[String]) -> Result<Vec<&'a Attendee>> {
    if only.is_empty() {
        return Ok(attendees.iter().collect());
    }

    if let Some(unknown) = only
        .iter()
        .find(|user| !attendees.iter().any(|a| &a.user == *user))
    {
        anyhow::bail!("--only {}: no attendee is assigned that user", unknown);
    }

    Ok(attendees
        .iter()
        .filter(|a| only.contains(&a.user))
        .collect())
}

fn sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Fail early, pointing at `generate`, when there are no lab scripts yet
pub fn ensure_lab_scripts(dir: &Path) -> Result<()> {
    if !dir.is_dir() {
        anyhow::bail!(
            "Lab scripts directory {} not found; run `labkit generate` first",
            dir.display()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    /// Keeps every delivered message in memory; optionally fails on one recipient
    #[derive(Default)]
    struct MemoryOutbox {
        delivered: Vec<(Vec<String>, String)>,
        fail_for: Option<String>,
    }

    impl Outbox for MemoryOutbox {
        fn deliver(&mut self, message: &Message) -> Result<(), MailError> {
            let to: Vec<String> = message.envelope().to().iter().map(|a| a.to_string()).collect();
            if self.fail_for.as_ref().is_some_and(|f| to.contains(f)) {
                return Err(MailError::Build("refused by test outbox".to_string()));
            }
            let raw = String::from_utf8_lossy(&message.formatted()).into_owned();
            self.delivered.push((to, raw));
            Ok(())
        }
    }

    fn attendee(user: &str, email: &str) -> Attendee {
        Attendee {
            user: user.to_string(),
            email: email.to_string(),
        }
    }

    fn setup(dir: &Path, users: &[&str]) -> Config {
        let mut config = Config {
            account_url: "https://abc.snowflakecomputing.com/".to_string(),
            ..Config::default()
        };
        config.sender.name = "Jane Doe".to_string();
        config.sender.email = "jane@example.com".to_string();
        config.output.dir = dir.join("lab_content");
        let lab_dir = config.lab_scripts_dir();
        fs::create_dir_all(&lab_dir).unwrap();
        for user in users {
            fs::write(
                lab_dir.join(lab_script_name(user)),
                format!("USE ROLE {}_ROLE;\n", user),
            )
            .unwrap();
        }
        config
    }

    fn read_journal(journal: &Journal) -> Vec<serde_json::Value> {
        fs::read_to_string(&journal.path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn test_compose_uses_rederived_password() {
        let dir = TempDir::new().unwrap();
        let config = setup(dir.path(), &["USER_01"]);
        let notifier = Notifier::new(&config).unwrap();

        let composed = notifier.compose(&attendee("USER_01", "a@example.com")).unwrap();
        let raw = String::from_utf8(composed.message.formatted()).unwrap();
        assert!(raw.contains("- Your password: aA1ffae6cdc31b8a88cc7036fdb8c9a03fac63"));
        assert!(raw.contains("My name is Jane Doe."));
        assert_eq!(
            composed.attachment,
            config.lab_scripts_dir().join("USER_01_snowflake_lab.sql")
        );
        assert_eq!(composed.attachment_sha256, sha256(b"USE ROLE USER_01_ROLE;\n"));
    }

    #[test]
    fn test_compose_missing_lab_file() {
        let dir = TempDir::new().unwrap();
        let config = setup(dir.path(), &[]);
        let notifier = Notifier::new(&config).unwrap();

        let err = notifier
            .compose(&attendee("USER_03", "c@example.com"))
            .err()
            .unwrap();
        assert!(err.to_string().contains("Failed to read lab script for USER_03"));
    }

    #[test]
    fn test_send_email_delivers_one_message() {
        let dir = TempDir::new().unwrap();
        let config = setup(dir.path(), &["USER_02"]);
        let notifier = Notifier::new(&config).unwrap();
        let mut outbox = MemoryOutbox::default();

        notifier
            .send_email(&mut outbox, &attendee("USER_02", "b@example.com"))
            .unwrap();
        assert_eq!(outbox.delivered.len(), 1);
        assert_eq!(outbox.delivered[0].0, vec!["b@example.com"]);
        assert!(outbox.delivered[0].1.contains("USER_02_snowflake_lab.sql"));
    }

    #[test]
    fn test_run_dry_run_sends_nothing() {
        let dir = TempDir::new().unwrap();
        let config = setup(dir.path(), &["USER_01", "USER_02"]);
        let notifier = Notifier::new(&config).unwrap();
        let mut journal = Journal::open(&dir.path().join("journal"), "run-1").unwrap();
        let attendees = [
            attendee("USER_01", "a@example.com"),
            attendee("USER_02", "b@example.com"),
        ];
        let selected: Vec<&Attendee> = attendees.iter().collect();

        let summary = notifier.run(&selected, Delivery::DryRun, &mut journal).unwrap();
        assert_eq!(summary, NotifySummary { previewed: 2, sent: 0 });

        let events = read_journal(&journal);
        let types: Vec<&str> = events.iter().map(|e| e["type"].as_str().unwrap()).collect();
        assert_eq!(types, vec!["run_start", "previewed", "previewed", "run_end"]);
        assert_eq!(events[0]["mode"], "dry-run");
        assert_eq!(events[1]["user"], "USER_01");
        assert_eq!(events[3]["ok"], true);
    }

    #[test]
    fn test_run_send_in_order() {
        let dir = TempDir::new().unwrap();
        let config = setup(dir.path(), &["USER_01", "USER_02", "USER_03"]);
        let notifier = Notifier::new(&config).unwrap();
        let mut journal = Journal::open(&dir.path().join("journal"), "run-2").unwrap();
        let mut outbox = MemoryOutbox::default();
        let attendees = [
            attendee("USER_03", "c@example.com"),
            attendee("USER_01", "a@example.com"),
        ];
        let selected: Vec<&Attendee> = attendees.iter().collect();

        let summary = notifier
            .run(&selected, Delivery::Send(&mut outbox), &mut journal)
            .unwrap();
        assert_eq!(summary.sent, 2);
        let recipients: Vec<&str> = outbox
            .delivered
            .iter()
            .map(|(to, _)| to[0].as_str())
            .collect();
        assert_eq!(recipients, vec!["c@example.com", "a@example.com"]);
    }

    #[test]
    fn test_run_stops_at_first_failure() {
        let dir = TempDir::new().unwrap();
        let config = setup(dir.path(), &["USER_01", "USER_02", "USER_03"]);
        let notifier = Notifier::new(&config).unwrap();
        let mut journal = Journal::open(&dir.path().join("journal"), "run-3").unwrap();
        let mut outbox = MemoryOutbox {
            fail_for: Some("b@example.com".to_string()),
            ..MemoryOutbox::default()
        };
        let attendees = [
            attendee("USER_01", "a@example.com"),
            attendee("USER_02", "b@example.com"),
            attendee("USER_03", "c@example.com"),
        ];
        let selected: Vec<&Attendee> = attendees.iter().collect();

        let err = notifier
            .run(&selected, Delivery::Send(&mut outbox), &mut journal)
            .unwrap_err();
        assert!(err.to_string().contains("b@example.com"));
        assert_eq!(outbox.delivered.len(), 1);

        let events = read_journal(&journal);
        let types: Vec<&str> = events.iter().map(|e| e["type"].as_str().unwrap()).collect();
        assert_eq!(types, vec!["run_start", "sent", "failed", "run_end"]);
        assert!(events[2]["error"].as_str().unwrap().contains("refused by test outbox"));
        assert_eq!(events[3]["ok"], false);
        assert_eq!(events[3]["sent"], 1);
    }

    #[test]
    fn test_custom_body_file() {
        let dir = TempDir::new().unwrap();
        let mut config = setup(dir.path(), &["USER_01"]);
        let body_path = dir.path().join("body.txt");
        fs::write(&body_path, "Hi, use {username} / {password}. -- {from_name}\n").unwrap();
        config.email.body_file = Some(body_path);

        let notifier = Notifier::new(&config).unwrap();
        let composed = notifier.compose(&attendee("USER_01", "a@example.com")).unwrap();
        let raw = String::from_utf8(composed.message.formatted()).unwrap();
        assert!(raw.contains("Hi, use USER_01 / aA1ffae6cdc31b8a88cc7036fdb8c9a03fac63. -- Jane Doe"));
    }

    #[test]
    fn test_custom_body_with_unknown_field_rejected() {
        let dir = TempDir::new().unwrap();
        let mut config = setup(dir.path(), &[]);
        let body_path = dir.path().join("body.txt");
        fs::write(&body_path, "Dear {first_name}\n").unwrap();
        config.email.body_file = Some(body_path);

        let err = Notifier::new(&config).err().unwrap();
        assert!(format!("{:#}", err).contains("first_name"));
    }

    #[test]
    fn test_select_attendees() {
        let attendees = vec![
            attendee("USER_01", "a@example.com"),
            attendee("USER_02", "b@example.com"),
            attendee("USER_03", "c@example.com"),
        ];

        assert_eq!(select_attendees(&attendees, &[]).unwrap().len(), 3);

        let only = vec!["USER_03".to_string(), "USER_01".to_string()];
        let selected = select_attendees(&attendees, &only).unwrap();
        // Config order is kept
        let users: Vec<&str> = selected.iter().map(|a| a.user.as_str()).collect();
        assert_eq!(users, vec!["USER_01", "USER_03"]);

        let err = select_attendees(&attendees, &["USER_09".to_string()]).unwrap_err();
        assert!(err.to_string().contains("USER_09"));
    }

    #[test]
    fn test_ensure_lab_scripts() {
        let dir = TempDir::new().unwrap();
        assert!(ensure_lab_scripts(&dir.path().join("lab_scripts")).is_err());
        fs::create_dir(dir.path().join("lab_scripts")).unwrap();
        assert!(ensure_lab_scripts(&dir.path().join("lab_scripts")).is_ok());
    }
}
