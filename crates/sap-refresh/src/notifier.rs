//! Status emails sent after each report and on fatal errors.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};

use crate::config::MailSettings;
use crate::error::{RefreshError, Result};
use crate::secret::SecretCodec;

const TIMESTAMP_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    Error,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Success => f.write_str("SUCCESS"),
            Status::Error => f.write_str("ERROR"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEmail {
    pub subject: String,
    pub body: String,
}

pub fn compose_status_email(
    status: Status,
    process: &str,
    message: &str,
    log_file: Option<&Path>,
    at: NaiveDateTime,
) -> StatusEmail {
    let timestamp = at.format(TIMESTAMP_FORMAT).to_string();
    let log = log_file
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "-".to_string());
    StatusEmail {
        subject: format!("PYTHON AUTOMATE ({status}) - [{process}] - {timestamp}"),
        body: format!(
            "Process: {process}\n\
             Status: {status}\n\
             Timestamp: {timestamp}\n\
             \n\
             {message}\n\
             \n\
             Log file: {log}\n"
        ),
    }
}

/// Delivers status notifications.
pub trait Notify {
    fn notify(&self, status: Status, process: &str, message: &str) -> Result<()>;
}

/// Used when no mail server is configured: the status only goes to the log.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl Notify for LogNotifier {
    fn notify(&self, status: Status, process: &str, message: &str) -> Result<()> {
        match status {
            Status::Success => tracing::info!("[{process}] {status}: {message}"),
            Status::Error => tracing::error!("[{process}] {status}: {message}"),
        }
        Ok(())
    }
}

/// Sends status emails over SMTP with STARTTLS.
#[derive(Debug, Clone)]
pub struct SmtpNotifier {
    mail: MailSettings,
    codec: SecretCodec,
    log_file: Option<PathBuf>,
}

impl SmtpNotifier {
    pub fn new(mail: MailSettings, codec: SecretCodec, log_file: Option<PathBuf>) -> Self {
        Self {
            mail,
            codec,
            log_file,
        }
    }

    fn message(&self, email: StatusEmail) -> Result<Message> {
        let mailbox = |address: &str| -> Result<Mailbox> {
            address
                .parse()
                .map_err(|e| RefreshError::Notify(format!("invalid address '{address}': {e}")))
        };
        let mut builder = Message::builder()
            .from(mailbox(&self.mail.user)?)
            .subject(email.subject)
            .header(ContentType::TEXT_PLAIN);
        for recipient in &self.mail.recipients {
            builder = builder.to(mailbox(recipient)?);
        }
        builder
            .body(email.body)
            .map_err(|e| RefreshError::Notify(e.to_string()))
    }
}

impl Notify for SmtpNotifier {
    fn notify(&self, status: Status, process: &str, message: &str) -> Result<()> {
        if self.mail.recipients.is_empty() {
            return Err(RefreshError::Notify("no recipients configured".to_string()));
        }
        let email = compose_status_email(
            status,
            process,
            message,
            self.log_file.as_deref(),
            chrono::Local::now().naive_local(),
        );
        let message = self.message(email)?;

        let password = self.codec.decode(&self.mail.password)?;
        let transport = SmtpTransport::starttls_relay(&self.mail.server)
            .map_err(|e| RefreshError::Notify(e.to_string()))?
            .port(self.mail.port)
            .credentials(Credentials::new(self.mail.user.clone(), password.to_string()))
            .build();
        transport
            .send(&message)
            .map_err(|e| RefreshError::Notify(e.to_string()))?;
        tracing::info!("Sent {status} notification to {}", self.mail.recipients.join(", "));
        Ok(())
    }
}
