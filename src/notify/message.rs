//! Email body rendering and MIME assembly.

use super::MailError;
use crate::template::Template;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::Message;

pub const VAR_FROM_NAME: &str = "from_name";
pub const VAR_USERNAME: &str = "username";
pub const VAR_PASSWORD: &str = "password";
pub const VAR_ACCOUNT_URL: &str = "snowflake_account_url";

pub const BODY_VARS: &[&str] = &[VAR_FROM_NAME, VAR_USERNAME, VAR_PASSWORD, VAR_ACCOUNT_URL];

pub const DEFAULT_BODY: &str = "
Hello:

My name is {from_name}. I'm leading your upcoming Snowflake training with Hashmap.

For our session, you will need the following:
- Your username: {username}
- Your password: {password}
- Our Snowflake login: {snowflake_account_url}

You will also need the attached lab SQL file. Please do not modify this.

It is very important that you wait until we start the training to run SQL commands. This Snowflake instance has a limited number of credits and excessive early usage will run the account dry before we can finish the training.

Thank you and please reach out with any questions!

{from_name}
Engineering @ Hashmap
";

const ATTACHMENT_CONTENT_TYPE: &str = "application/sql";

/// Values substituted into the email body
pub struct BodyFields<'a> {
    pub from_name: &'a str,
    pub username: &'a str,
    pub password: &'a str,
    pub account_url: &'a str,
}

pub fn render_body(template: &Template, fields: &BodyFields<'_>) -> Result<String, MailError> {
    Ok(template.render(&[
        (VAR_FROM_NAME, fields.from_name),
        (VAR_USERNAME, fields.username),
        (VAR_PASSWORD, fields.password),
        (VAR_ACCOUNT_URL, fields.account_url),
    ])?)
}

/// A text body plus one SQL file attachment
pub fn build(
    from: &Mailbox,
    to: &str,
    subject: &str,
    body: String,
    attachment_name: &str,
    attachment: Vec<u8>,
) -> Result<Message, MailError> {
    let content_type = ContentType::parse(ATTACHMENT_CONTENT_TYPE)
        .map_err(|e| MailError::Build(e.to_string()))?;

    Message::builder()
        .from(from.clone())
        .to(Mailbox::new(None, to.parse()?))
        .subject(subject)
        .multipart(
            MultiPart::mixed()
                .singlepart(SinglePart::plain(body))
                .singlepart(Attachment::new(attachment_name.to_string()).body(attachment, content_type)),
        )
        .map_err(|e| MailError::Build(e.to_string()))
}
