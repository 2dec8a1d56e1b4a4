//! SQL and email templates with `{name}` placeholders.
//!
//! Syntax is deliberately small: `{name}` is replaced by a variable, `{{` and
//! `}}` produce literal braces, and anything else inside braces is an error.
//! Every template has a fixed set of variables it may reference; a placeholder
//! outside that set is rejected when the template is loaded, before any output
//! file is touched.

use crate::config::TemplatesConfig;
use anyhow::{Context, Result};
use std::path::Path;

pub const VAR_USER: &str = "user";
pub const VAR_PASSWORD: &str = "password";
pub const VAR_ACCOUNT_URL: &str = "snowflake_account_url";

pub const CREATE_USER_VARS: &[&str] = &[VAR_USER, VAR_PASSWORD];
pub const LAB_VARS: &[&str] = &[VAR_USER, VAR_ACCOUNT_URL];
pub const CLEANUP_VARS: &[&str] = &[VAR_USER];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("unknown placeholder {{{name}}} on line {line}")]
    UnknownPlaceholder { name: String, line: usize },
    #[error("unclosed '{{' on line {line}")]
    Unclosed { line: usize },
    #[error("unmatched '}}' on line {line} (use '}}}}' for a literal brace)")]
    StrayClose { line: usize },
}

/// One piece of a parsed template
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment<'a> {
    Text(&'a str),
    Brace(char),
    Var { name: &'a str, line: usize },
}

#[derive(Debug, Clone)]
pub struct Template {
    pub name: String,
    source: String,
}

impl Template {
    pub fn new(name: &str, source: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            source: source.into(),
        }
    }

    /// Read a template from disk
    pub fn load(name: &str, path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {} template: {}", name, path.display()))?;
        Ok(Self::new(name, source))
    }

    /// Check that every placeholder is in `allowed`
    pub fn check(&self, allowed: &[&str]) -> Result<(), TemplateError> {
        for seg in parse(&self.source)? {
            if let Segment::Var { name, line } = seg {
                if !allowed.contains(&name) {
                    return Err(TemplateError::UnknownPlaceholder {
                        name: name.to_string(),
                        line,
                    });
                }
            }
        }
        Ok(())
    }

    /// Substitute `vars` into the template
    pub fn render(&self, vars: &[(&str, &str)]) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(self.source.len());
        for seg in parse(&self.source)? {
            match seg {
                Segment::Text(text) => out.push_str(text),
                Segment::Brace(c) => out.push(c),
                Segment::Var { name, line } => {
                    let value = vars
                        .iter()
                        .find(|(key, _)| *key == name)
                        .map(|(_, value)| *value)
                        .ok_or_else(|| TemplateError::UnknownPlaceholder {
                            name: name.to_string(),
                            line,
                        })?;
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }
}

fn parse(source: &str) -> Result<Vec<Segment<'_>>, TemplateError> {
    let bytes = source.as_bytes();
    let mut segments = Vec::new();
    let mut line = 1;
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\n' => {
                line += 1;
                i += 1;
            }
            b'{' | b'}' if bytes.get(i + 1) == Some(&bytes[i]) => {
                if start < i {
                    segments.push(Segment::Text(&source[start..i]));
                }
                segments.push(Segment::Brace(bytes[i] as char));
                i += 2;
                start = i;
            }
            b'{' => {
                if start < i {
                    segments.push(Segment::Text(&source[start..i]));
                }
                let close = source[i + 1..]
                    .find(['}', '{', '\n'])
                    .map(|off| i + 1 + off)
                    .filter(|&end| bytes[end] == b'}')
                    .ok_or(TemplateError::Unclosed { line })?;
                segments.push(Segment::Var {
                    name: &source[i + 1..close],
                    line,
                });
                i = close + 1;
                start = i;
            }
            b'}' => return Err(TemplateError::StrayClose { line }),
            _ => i += 1,
        }
    }
    if start < bytes.len() {
        segments.push(Segment::Text(&source[start..]));
    }
    Ok(segments)
}

/// The four SQL templates a generator run needs
#[derive(Debug, Clone)]
pub struct TemplateSet {
    pub create_user: Template,
    pub lab: Template,
    pub cleanup_user: Template,
    pub cleanup_lab: Template,
}

impl TemplateSet {
    /// Load and check all four templates; any missing file or bad
    /// placeholder fails the whole set
    pub fn load(cfg: &TemplatesConfig) -> Result<Self> {
        let set = Self {
            create_user: Template::load("create-user", &cfg.dir.join(&cfg.create_user))?,
            lab: Template::load("lab", &cfg.dir.join(&cfg.lab))?,
            cleanup_user: Template::load("cleanup-user", &cfg.dir.join(&cfg.cleanup_user))?,
            cleanup_lab: Template::load("cleanup-lab", &cfg.dir.join(&cfg.cleanup_lab))?,
        };
        set.check()?;
        Ok(set)
    }

    pub fn check(&self) -> Result<()> {
        for (template, allowed) in [
            (&self.create_user, CREATE_USER_VARS),
            (&self.lab, LAB_VARS),
            (&self.cleanup_user, CLEANUP_VARS),
            (&self.cleanup_lab, CLEANUP_VARS),
        ] {
            template
                .check(allowed)
                .with_context(|| format!("Invalid {} template", template.name))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_render_substitutes_every_occurrence() {
        let t = Template::new("t", "CREATE USER {user} PASSWORD = '{password}';\nGRANT ROLE r TO USER {user};\n");
        let out = t
            .render(&[("user", "USER_01"), ("password", "pw")])
            .unwrap();
        assert_eq!(
            out,
            "CREATE USER USER_01 PASSWORD = 'pw';\nGRANT ROLE r TO USER USER_01;\n"
        );
    }

    #[test]
    fn test_render_escaped_braces() {
        let t = Template::new("t", "SELECT PARSE_JSON('{{\"a\": 1}}') AS {user};");
        let out = t.render(&[("user", "u")]).unwrap();
        assert_eq!(out, "SELECT PARSE_JSON('{\"a\": 1}') AS u;");
    }

    #[test]
    fn test_render_unknown_placeholder() {
        let t = Template::new("t", "line one\nDROP USER {usr};");
        let err = t.render(&[("user", "u")]).unwrap_err();
        assert_eq!(
            err,
            TemplateError::UnknownPlaceholder {
                name: "usr".to_string(),
                line: 2
            }
        );
    }

    #[test]
    fn test_unclosed_and_stray_braces() {
        let t = Template::new("t", "SELECT {user");
        assert_eq!(t.render(&[]).unwrap_err(), TemplateError::Unclosed { line: 1 });

        let t = Template::new("t", "a\n{user\n}");
        assert_eq!(t.render(&[]).unwrap_err(), TemplateError::Unclosed { line: 2 });

        let t = Template::new("t", "SELECT 1; }");
        assert_eq!(t.render(&[]).unwrap_err(), TemplateError::StrayClose { line: 1 });
    }

    #[test]
    fn test_text_without_placeholders_is_unchanged() {
        let source = "USE ROLE SYSADMIN;\n-- nothing to substitute\n";
        let t = Template::new("t", source);
        assert_eq!(t.render(&[("user", "u")]).unwrap(), source);
        assert!(t.check(&[]).is_ok());
    }

    #[test]
    fn test_check_against_allowed_vars() {
        let t = Template::new("lab", "USE {user}; -- {snowflake_account_url} {user}");
        assert!(t.check(LAB_VARS).is_ok());
        assert!(matches!(
            t.check(CLEANUP_VARS),
            Err(TemplateError::UnknownPlaceholder { ref name, .. }) if name == "snowflake_account_url"
        ));
    }

    fn write_templates(dir: &Path, cleanup_lab: &str) -> TemplatesConfig {
        fs::write(dir.join("create.sql"), "CREATE USER {user} PASSWORD='{password}';\n").unwrap();
        fs::write(dir.join("lab.sql"), "-- {snowflake_account_url}\nUSE {user};\n").unwrap();
        fs::write(dir.join("cu.sql"), "DROP USER {user};\n").unwrap();
        fs::write(dir.join("cl.sql"), cleanup_lab).unwrap();
        TemplatesConfig {
            dir: dir.to_path_buf(),
            create_user: "create.sql".into(),
            lab: "lab.sql".into(),
            cleanup_user: "cu.sql".into(),
            cleanup_lab: "cl.sql".into(),
        }
    }

    #[test]
    fn test_template_set_load() {
        let dir = TempDir::new().unwrap();
        let cfg = write_templates(dir.path(), "DROP DATABASE {user}_DB;\n");
        let set = TemplateSet::load(&cfg).unwrap();
        assert_eq!(set.lab.name, "lab");
        assert_eq!(
            set.cleanup_lab.render(&[("user", "USER_01")]).unwrap(),
            "DROP DATABASE USER_01_DB;\n"
        );
    }

    #[test]
    fn test_template_set_rejects_password_in_cleanup() {
        let dir = TempDir::new().unwrap();
        let cfg = write_templates(dir.path(), "-- {password}\n");
        let err = TemplateSet::load(&cfg).unwrap_err();
        assert!(format!("{:#}", err).contains("cleanup-lab"));
    }

    #[test]
    fn test_template_set_missing_file() {
        let dir = TempDir::new().unwrap();
        let mut cfg = write_templates(dir.path(), "DROP DATABASE {user}_DB;\n");
        cfg.lab = "missing.sql".into();
        let err = TemplateSet::load(&cfg).unwrap_err();
        assert!(err.to_string().contains("lab template"));
    }
}
