//! Script generation: the create-users script, one lab script per user, and
//! the cleanup script.
//!
//! Each run starts from an empty output directory. [`prepare_output_dir`] is
//! the only place that deletes anything, and it refuses to do so unless the
//! caller passes `force`.

use crate::config::Config;
use crate::password::derive_password;
use crate::roster;
use crate::template::{TemplateSet, VAR_ACCOUNT_URL, VAR_PASSWORD, VAR_USER};
use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub const CREATE_USERS_FILE: &str = "create_users_script.sql";
pub const CLEANUP_FILE: &str = "cleanup_script.sql";
pub const LAB_SCRIPTS_DIR: &str = "lab_scripts";

/// File name of the lab script for one user
pub fn lab_script_name(identifier: &str) -> String {
    format!("{}_snowflake_lab.sql", identifier)
}

/// What `prepare_output_dir` found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prepared {
    Created,
    Replaced,
}

/// Make `dir` an empty directory.
///
/// A missing directory is created. An existing one is removed and recreated
/// only when `force` is set; otherwise this fails and nothing is touched.
pub fn prepare_output_dir(dir: &Path, force: bool) -> Result<Prepared> {
    let prepared = if dir.exists() {
        if !force {
            anyhow::bail!(
                "Output directory {} already exists; pass --force to delete and regenerate it",
                dir.display()
            );
        }
        if !dir.is_dir() {
            anyhow::bail!("Output path {} exists and is not a directory", dir.display());
        }
        tracing::warn!(dir = %dir.display(), "removing previous output");
        fs::remove_dir_all(dir)
            .with_context(|| format!("Failed to remove output directory: {}", dir.display()))?;
        Prepared::Replaced
    } else {
        Prepared::Created
    };

    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory: {}", dir.display()))?;
    Ok(prepared)
}

/// Counts reported after a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub output_dir: PathBuf,
    pub users: usize,
    pub lab_files: usize,
    pub cleanup_blocks: usize,
    pub prepared: Prepared,
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Output: {}", self.output_dir.display())?;
        writeln!(f, "  {}: {} users", CREATE_USERS_FILE, self.users)?;
        writeln!(f, "  {}/: {} lab scripts", LAB_SCRIPTS_DIR, self.lab_files)?;
        write!(f, "  {}: {} blocks", CLEANUP_FILE, self.cleanup_blocks)?;
        if self.prepared == Prepared::Replaced {
            write!(f, "\n  (previous output was deleted)")?;
        }
        Ok(())
    }
}

pub struct Generator {
    templates: TemplateSet,
    identifier_prefix: String,
    password_prefix: String,
    account_url: String,
    output_dir: PathBuf,
}

impl Generator {
    pub fn new(config: &Config, templates: TemplateSet) -> Self {
        Self {
            templates,
            identifier_prefix: config.identifier_prefix.clone(),
            password_prefix: config.password_prefix.clone(),
            account_url: config.account_url.clone(),
            output_dir: config.output.dir.clone(),
        }
    }

    /// Prepare the output directory, then write all three artifacts
    pub fn run(&self, user_count: usize, force: bool) -> Result<Summary> {
        let prepared = prepare_output_dir(&self.output_dir, force)?;

        self.generate_create_users(user_count)?;
        let lab_files = self.generate_lab_scripts(user_count)?;
        let cleanup_blocks = self.generate_cleanup(user_count)?;

        Ok(Summary {
            output_dir: self.output_dir.clone(),
            users: user_count,
            lab_files,
            cleanup_blocks,
            prepared,
        })
    }

    /// Write one create-user block per user to the aggregate script
    pub fn generate_create_users(&self, user_count: usize) -> Result<PathBuf> {
        let path = self.output_dir.join(CREATE_USERS_FILE);
        let mut out = create_file(&path)?;

        for user in roster::identifiers(&self.identifier_prefix, user_count) {
            let password = derive_password(&self.password_prefix, &user);
            let block = self
                .templates
                .create_user
                .render(&[(VAR_USER, user.as_str()), (VAR_PASSWORD, password.as_str())])
                .with_context(|| format!("Failed to render create-user template for {}", user))?;
            out.write_all(block.as_bytes())
                .with_context(|| format!("Failed to write {}", path.display()))?;
            tracing::debug!(user = %user, "create-user block");
        }

        out.flush()
            .with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::info!(path = %path.display(), users = user_count, "wrote create-users script");
        Ok(path)
    }

    /// Write one lab script per user under `lab_scripts/`, returning how many
    /// were written. Fails if `lab_scripts/` already exists.
    pub fn generate_lab_scripts(&self, user_count: usize) -> Result<usize> {
        let dir = self.output_dir.join(LAB_SCRIPTS_DIR);
        fs::create_dir(&dir)
            .with_context(|| format!("Failed to create lab scripts directory: {}", dir.display()))?;

        let mut written = 0;
        for user in roster::identifiers(&self.identifier_prefix, user_count) {
            let script = self
                .templates
                .lab
                .render(&[(VAR_USER, user.as_str()), (VAR_ACCOUNT_URL, self.account_url.as_str())])
                .with_context(|| format!("Failed to render lab template for {}", user))?;
            let path = dir.join(lab_script_name(&user));
            fs::write(&path, script)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            tracing::debug!(user = %user, path = %path.display(), "lab script");
            written += 1;
        }

        tracing::info!(dir = %dir.display(), files = written, "wrote lab scripts");
        Ok(written)
    }

    /// Write a cleanup-user block followed by a cleanup-lab block for each
    /// user, returning the number of blocks written
    pub fn generate_cleanup(&self, user_count: usize) -> Result<usize> {
        let path = self.output_dir.join(CLEANUP_FILE);
        let mut out = create_file(&path)?;

        let mut blocks = 0;
        for user in roster::identifiers(&self.identifier_prefix, user_count) {
            let vars = [(VAR_USER, user.as_str())];
            for template in [&self.templates.cleanup_user, &self.templates.cleanup_lab] {
                let block = template.render(&vars).with_context(|| {
                    format!("Failed to render {} template for {}", template.name, user)
                })?;
                out.write_all(block.as_bytes())
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                blocks += 1;
            }
        }

        out.flush()
            .with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::info!(path = %path.display(), blocks, "wrote cleanup script");
        Ok(blocks)
    }
}

fn create_file(path: &Path) -> Result<BufWriter<File>> {
    let file =
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    Ok(BufWriter::new(file))
}
