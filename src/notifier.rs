// 📣 Notifiers - deliver change events to people
// One notification per change event. A failed delivery is reported, never
// rolled back into the store.

use crate::config::NotifyConfig;
use crate::error::NotifyError;
use crate::reconciliation::{ChangeEvent, ChangeKind};
use crate::record::{GradeRecord, IdentityKey};
use std::sync::Mutex;
use tracing::{debug, info, warn};

// ============================================================================
// NOTIFICATION
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub kind: ChangeKind,
    pub key: IdentityKey,
}

impl Notification {
    pub fn from_change(event: &ChangeEvent) -> Self {
        let record = event.record();
        let name = record.display_name();

        let (title, headline) = match event.kind() {
            ChangeKind::Added => (
                format!("[Grade update] New course: {}", name),
                "A new grade has been released.",
            ),
            ChangeKind::Updated => (
                format!("[Grade update] Course updated: {}", name),
                "A recorded grade has changed.",
            ),
            ChangeKind::Missing => (
                format!("[Grade update] Course missing: {}", name),
                "A previously recorded course is absent from the latest fetch.",
            ),
        };

        let grade_line = match event.previous() {
            Some(previous) if event.kind() == ChangeKind::Updated => {
                format!("{} → {}", grade_text(previous), grade_text(record))
            }
            _ => grade_text(record),
        };

        let body = format!(
            "{}\n\nCourse:      {} ({})\nSemester:    {}\nGrade:       {}\nGrade point: {}\nCredit:      {}",
            headline,
            name,
            record.course_id(),
            record.semester(),
            grade_line,
            record
                .grade_point()
                .map(|g| g.to_string())
                .unwrap_or_else(|| "-".to_string()),
            record
                .credit()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "-".to_string()),
        );

        Notification {
            title,
            body,
            kind: event.kind(),
            key: record.identity(),
        }
    }
}

fn grade_text(record: &GradeRecord) -> String {
    record.grade().unwrap_or("-").to_string()
}

// ============================================================================
// NOTIFIER TRAIT + DELIVERY
// ============================================================================

/// A delivery channel
pub trait Notifier {
    fn name(&self) -> &str;

    fn send(&self, notification: &Notification) -> Result<(), NotifyError>;

    /// False when there is nowhere to send to; `deliver` then skips sending
    fn has_channels(&self) -> bool {
        true
    }
}

/// Outcome of delivering one run's changes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotifyResult {
    pub attempted: usize,
    pub delivered: usize,
    /// Changes persisted but deliberately not sent (first run)
    pub suppressed: usize,
    /// Changes not sent because no channel is configured
    pub skipped: usize,
    pub failures: Vec<NotifyError>,
}

impl NotifyResult {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Send one notification per change event, collecting failures
pub fn deliver(notifier: &dyn Notifier, changes: &[ChangeEvent]) -> NotifyResult {
    let mut result = NotifyResult::default();

    if !notifier.has_channels() {
        result.skipped = changes.len();
        if result.skipped > 0 {
            debug!(skipped = result.skipped, "no notification channel configured, not sending");
        }
        return result;
    }

    for change in changes {
        let notification = Notification::from_change(change);
        result.attempted += 1;
        match notifier.send(&notification) {
            Ok(()) => result.delivered += 1,
            Err(e) => {
                warn!(key = %notification.key, channel = notifier.name(), error = %e, "notification failed");
                result.failures.push(e);
            }
        }
    }

    if result.attempted > 0 {
        info!(
            attempted = result.attempted,
            delivered = result.delivered,
            failed = result.failures.len(),
            "notifications delivered"
        );
    }
    result
}

// ============================================================================
// CONSOLE
// ============================================================================

#[derive(Debug, Default)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn name(&self) -> &str {
        "console"
    }

    fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let rule = "=".repeat(50);
        println!("\n{}", rule);
        println!("{}", notification.title);
        println!("{}", notification.body);
        println!("{}\n", rule);
        Ok(())
    }
}

// ============================================================================
// IN-MEMORY (dry runs, tests)
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn sent_count(&self) -> usize {
        self.sent().len()
    }
}

impl Notifier for MemoryNotifier {
    fn name(&self) -> &str {
        "memory"
    }

    fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .map_err(|_| NotifyError::new("memory", "notification buffer poisoned"))?
            .push(notification.clone());
        Ok(())
    }
}

// ============================================================================
// MULTI-CHANNEL
// ============================================================================

/// Fans out to every channel. Delivered when at least one channel accepts
/// the notification; individual channel failures are logged.
#[derive(Default)]
pub struct MultiNotifier {
    channels: Vec<Box<dyn Notifier>>,
}

impl MultiNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, channel: Box<dyn Notifier>) {
        self.channels.push(channel);
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn channel_names(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.name()).collect()
    }
}

impl Notifier for MultiNotifier {
    fn name(&self) -> &str {
        "multi"
    }

    fn has_channels(&self) -> bool {
        !self.channels.is_empty()
    }

    fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        if self.channels.is_empty() {
            return Err(NotifyError::new("multi", "no channels configured"));
        }

        let mut errors = Vec::new();
        for channel in &self.channels {
            if let Err(e) = channel.send(notification) {
                warn!(channel = channel.name(), error = %e, "channel delivery failed");
                errors.push(e.to_string());
            }
        }

        if errors.len() == self.channels.len() {
            return Err(NotifyError::new("multi", errors.join("; ")));
        }
        Ok(())
    }
}

/// Build the channel set described by the config
pub fn from_config(config: &NotifyConfig) -> MultiNotifier {
    let mut multi = MultiNotifier::new();

    if let Some(smtp) = &config.smtp {
        #[cfg(feature = "smtp")]
        multi.add(Box::new(smtp::SmtpNotifier::new(smtp.clone())));

        #[cfg(not(feature = "smtp"))]
        warn!(server = %smtp.server, "smtp configured but built without the `smtp` feature");
    }

    if config.console {
        multi.add(Box::new(ConsoleNotifier));
    }

    if multi.is_empty() {
        warn!("no notifier configured, changes will be recorded but not sent");
    }
    multi
}

// ============================================================================
// SMTP
// ============================================================================

#[cfg(feature = "smtp")]
pub mod smtp {
    use super::{Notification, Notifier};
    use crate::config::{SmtpConfig, SmtpSecurity};
    use crate::error::NotifyError;
    use std::time::Duration;

    /// Plain-text mail per notification
    pub struct SmtpNotifier {
        config: SmtpConfig,
    }

    impl SmtpNotifier {
        pub fn new(config: SmtpConfig) -> Self {
            SmtpNotifier { config }
        }

        fn fail(message: String) -> NotifyError {
            NotifyError::new("smtp", message)
        }
    }

    impl Notifier for SmtpNotifier {
        fn name(&self) -> &str {
            "smtp"
        }

        fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
            use lettre::{
                message::header::ContentType,
                transport::smtp::authentication::Credentials,
                Message, SmtpTransport, Transport,
            };

            let email = Message::builder()
                .from(
                    self.config
                        .from
                        .parse()
                        .map_err(|e| Self::fail(format!("Invalid from address: {}", e)))?,
                )
                .to(self
                    .config
                    .to
                    .parse()
                    .map_err(|e| Self::fail(format!("Invalid to address: {}", e)))?)
                .subject(notification.title.clone())
                .header(ContentType::TEXT_PLAIN)
                .body(notification.body.clone())
                .map_err(|e| Self::fail(format!("Failed to build email: {}", e)))?;

            let builder = match self.config.security {
                SmtpSecurity::Ssl => SmtpTransport::relay(&self.config.server)
                    .map_err(|e| Self::fail(format!("SMTP relay error: {}", e)))?,
                SmtpSecurity::Starttls => SmtpTransport::starttls_relay(&self.config.server)
                    .map_err(|e| Self::fail(format!("SMTP relay error: {}", e)))?,
                SmtpSecurity::Plain => SmtpTransport::builder_dangerous(&self.config.server),
            };

            let mut builder = builder
                .port(self.config.port)
                .timeout(Some(Duration::from_secs(self.config.timeout_secs)));

            if !self.config.username.is_empty() {
                builder = builder.credentials(Credentials::new(
                    self.config.username.clone(),
                    self.config.password.clone(),
                ));
            }

            builder
                .build()
                .send(&email)
                .map_err(|e| Self::fail(format!("Failed to send email: {}", e)))?;

            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingNotifier;

    impl Notifier for FailingNotifier {
        fn name(&self) -> &str {
            "failing"
        }

        fn send(&self, _notification: &Notification) -> Result<(), NotifyError> {
            Err(NotifyError::new("failing", "connection refused"))
        }
    }

    fn grade(course_id: &str, grade: &str) -> GradeRecord {
        GradeRecord::new(course_id, "2024S")
            .unwrap()
            .with_course_name("Linear Algebra")
            .with_grade(grade)
            .with_credit(4.0)
    }

    #[test]
    fn test_updated_notification_shows_old_and_new_grade() {
        let event = ChangeEvent::Updated {
            previous: grade("MA201", "B+"),
            current: grade("MA201", "A-"),
        };
        let n = Notification::from_change(&event);
        assert_eq!(n.title, "[Grade update] Course updated: Linear Algebra");
        assert!(n.body.contains("B+ → A-"));
        assert!(n.body.contains("Semester:    2024S"));
        assert!(n.body.contains("Credit:      4"));
    }

    #[test]
    fn test_deliver_counts_each_change() {
        let notifier = MemoryNotifier::new();
        let changes = vec![
            ChangeEvent::Added { record: grade("CS101", "A") },
            ChangeEvent::Added { record: grade("MA201", "B") },
        ];
        let result = deliver(&notifier, &changes);
        assert_eq!(result.attempted, 2);
        assert_eq!(result.delivered, 2);
        assert!(result.is_success());
        assert_eq!(notifier.sent_count(), 2);
        assert_eq!(notifier.sent()[0].key.course_id(), "CS101");
    }

    #[test]
    fn test_deliver_collects_failures() {
        let changes = vec![ChangeEvent::Added { record: grade("CS101", "A") }];
        let result = deliver(&FailingNotifier, &changes);
        assert_eq!(result.delivered, 0);
        assert_eq!(result.failures.len(), 1);
        assert!(!result.is_success());
    }

    #[test]
    fn test_multi_succeeds_when_one_channel_does() {
        let mut multi = MultiNotifier::new();
        multi.add(Box::new(FailingNotifier));
        multi.add(Box::new(MemoryNotifier::new()));

        let changes = vec![ChangeEvent::Added { record: grade("CS101", "A") }];
        let result = deliver(&multi, &changes);
        assert_eq!(result.delivered, 1);
        assert!(result.is_success());
    }

    #[test]
    fn test_multi_fails_when_all_channels_fail() {
        let mut multi = MultiNotifier::new();
        multi.add(Box::new(FailingNotifier));
        let n = Notification::from_change(&ChangeEvent::Added { record: grade("CS101", "A") });
        let err = multi.send(&n).unwrap_err();
        assert!(err.message.contains("connection refused"));

        assert!(MultiNotifier::new().send(&n).is_err());
    }

    #[test]
    fn test_from_config_console_only() {
        let multi = from_config(&NotifyConfig::default());
        assert_eq!(multi.channel_names(), vec!["console"]);
    }

    #[test]
    fn test_no_channels_skips_sending() {
        let multi = from_config(&NotifyConfig {
            console: false,
            smtp: None,
        });
        assert!(multi.is_empty());

        let changes = vec![ChangeEvent::Added { record: grade("CS101", "A") }];
        let result = deliver(&multi, &changes);
        assert_eq!(result.attempted, 0);
        assert_eq!(result.delivered, 0);
        assert_eq!(result.skipped, 1);
        assert!(result.is_success());
    }
}
