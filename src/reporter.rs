//! assembles per-set outcome text and attachments, hands them to the
//! external mail transport.

use crate::config::SetSpec;
use anyhow::{Context, Result};
use lettre::message::{header::ContentType, Attachment, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use std::path::PathBuf;
use tracing::{info, warn};

/// One per-directory log to attach, plain or gzip'd per `compress_log`.
pub struct LogAttachment {
    pub dir_label: String,
    pub path: PathBuf,
    pub compressed: bool,
}

pub struct Report {
    pub set_name: String,
    pub success: bool,
    pub body: String,
    pub attachments: Vec<LogAttachment>,
}

/// Abstraction over "can send a report somewhere" so `--safe` and tests
/// don't need a real SMTP server.
pub trait MailTransport {
    fn send(&self, from: &str, to: &[String], subject: &str, report: &Report) -> Result<()>;
}

pub struct LettreTransport {
    host: String,
    user: Option<String>,
    pass: Option<String>,
}

impl LettreTransport {
    pub fn new(host: String, user: Option<String>, pass: Option<String>) -> Self {
        LettreTransport { host, user, pass }
    }

    fn build_transport(&self) -> Result<SmtpTransport> {
        let mut builder = SmtpTransport::relay(&self.host)
            .with_context(|| format!("failed to configure SMTP relay {}", self.host))?;
        if let (Some(user), Some(pass)) = (&self.user, &self.pass) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }
        Ok(builder.build())
    }
}

impl MailTransport for LettreTransport {
    fn send(&self, from: &str, to: &[String], subject: &str, report: &Report) -> Result<()> {
        let mut multipart = MultiPart::mixed().singlepart(
            SinglePart::builder()
                .header(ContentType::TEXT_PLAIN)
                .body(report.body.clone()),
        );

        for att in &report.attachments {
            let bytes = std::fs::read(&att.path)
                .with_context(|| format!("failed to read log attachment {}", att.path.display()))?;
            let content_type = if att.compressed {
                ContentType::parse("application/gzip").unwrap()
            } else {
                ContentType::TEXT_PLAIN
            };
            let file_name = att
                .path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| att.dir_label.clone());
            multipart = multipart.singlepart(Attachment::new(file_name).body(bytes, content_type));
        }

        for recipient in to {
            let message = Message::builder()
                .from(from.parse().with_context(|| format!("invalid MAILFROM {from}"))?)
                .to(recipient
                    .parse()
                    .with_context(|| format!("invalid MAILTO {recipient}"))?)
                .subject(subject)
                .multipart(multipart.clone())
                .context("failed to build mail message")?;

            let transport = self.build_transport()?;
            transport
                .send(&message)
                .with_context(|| format!("failed to send report mail to {recipient}"))?;
        }
        Ok(())
    }
}

/// Used under `--safe` and in tests: logs instead of sending.
pub struct NullTransport;

impl MailTransport for NullTransport {
    fn send(&self, from: &str, to: &[String], subject: &str, report: &Report) -> Result<()> {
        info!(
            set = %report.set_name,
            %from,
            to = %to.join(","),
            %subject,
            attachments = report.attachments.len(),
            "safe mode: would send report mail"
        );
        Ok(())
    }
}

pub struct Reporter<'a> {
    transport: &'a dyn MailTransport,
}

impl<'a> Reporter<'a> {
    pub fn new(transport: &'a dyn MailTransport) -> Self {
        Reporter { transport }
    }

    /// Builds the subject/body/attachment set and hands it
    /// to the transport. No-ops (and logs nothing but a debug trace) if
    /// `set.mail_to` is empty.
    pub fn report(&self, set: &SetSpec, report: Report) -> Result<()> {
        if set.mail_to.is_empty() {
            return Ok(());
        }
        let subject = if report.success {
            format!("Backup of {} OK", set.name)
        } else {
            format!("Backup of {} FAILED", set.name)
        };
        let from = set
            .mail_from
            .clone()
            .unwrap_or_else(|| format!("jabs@{}", hostname()));

        match self.transport.send(&from, &set.mail_to, &subject, &report) {
            Ok(()) => Ok(()),
            Err(err) => {
                // Mail failure must not fail the set: the transfer already
                // ran. Mail delivery is best-effort.
                warn!(set = %set.name, %err, "failed to send report mail");
                Ok(())
            }
        }
    }
}

fn hostname() -> String {
    lettre::transport::smtp::extension::ClientId::hostname().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct RecordingTransport {
        sent: RefCell<Vec<String>>,
    }

    impl MailTransport for RecordingTransport {
        fn send(&self, _from: &str, _to: &[String], subject: &str, _report: &Report) -> Result<()> {
            self.sent.borrow_mut().push(subject.to_string());
            Ok(())
        }
    }

    fn test_set(mail_to: Vec<String>) -> SetSpec {
        let ini = ini::Ini::load_from_str(&format!(
            r#"
[Global]
PIDFILE = /var/run/jabs.pid

[home]
SRC = /a
DST = /b
BACKUPLIST = /a
MAILTO = {}
"#,
            mail_to.join(",")
        ))
        .unwrap();
        crate::config::SetSpec::from_config(&ini, "home").unwrap()
    }

    #[test]
    fn empty_mail_to_sends_nothing() {
        let transport = RecordingTransport { sent: RefCell::new(vec![]) };
        let reporter = Reporter::new(&transport);
        let set = test_set(vec![]);
        let report = Report {
            set_name: set.name.clone(),
            success: true,
            body: "ok".into(),
            attachments: vec![],
        };
        reporter.report(&set, report).unwrap();
        assert!(transport.sent.borrow().is_empty());
    }

    #[test]
    fn subject_reflects_success() {
        let transport = RecordingTransport { sent: RefCell::new(vec![]) };
        let reporter = Reporter::new(&transport);
        let set = test_set(vec!["ops@example.com".to_string()]);
        let report = Report {
            set_name: set.name.clone(),
            success: true,
            body: "ok".into(),
            attachments: vec![],
        };
        reporter.report(&set, report).unwrap();
        assert_eq!(transport.sent.borrow()[0], "Backup of home OK");
    }

    #[test]
    fn subject_reflects_failure() {
        let transport = RecordingTransport { sent: RefCell::new(vec![]) };
        let reporter = Reporter::new(&transport);
        let set = test_set(vec!["ops@example.com".to_string()]);
        let report = Report {
            set_name: set.name.clone(),
            success: false,
            body: "failed".into(),
            attachments: vec![],
        };
        reporter.report(&set, report).unwrap();
        assert_eq!(transport.sent.borrow()[0], "Backup of home FAILED");
    }
}
