use crate::models::AlertMatch;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};

/// Outbound channel for tripped alerts.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<()>;

    /// Whether `send` actually reaches the recipient.
    fn delivers(&self) -> bool {
        true
    }
}

/// Writes alerts to the log. Used when no delivery channel is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<()> {
        info!(to = %recipient, subject = %subject, "{}", body);
        Ok(())
    }

    fn delivers(&self) -> bool {
        false
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    to: &'a str,
    subject: &'a str,
    body: &'a str,
}

/// POSTs `{to, subject, body}` as JSON to a relay that delivers the message.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: url::Url,
}

impl WebhookNotifier {
    pub fn new(url: &str, timeout_secs: u64) -> Result<Self> {
        let url = url::Url::parse(url).with_context(|| format!("Invalid webhook URL {:?}", url))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("Failed to build webhook client")?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<()> {
        debug!("POST {} for {}", self.url, recipient);
        let payload = WebhookPayload { to: recipient, subject, body };
        let resp = self
            .client
            .post(self.url.clone())
            .json(&payload)
            .send()
            .await
            .context("Webhook request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Webhook returned {}: {}", status, body);
        }
        Ok(())
    }
}

// ── Message composition ───────────────────────────────────────────────────────

/// One notification per rule: `(rule name, recipient, subject, body)`.
/// Rules are told apart by id, so same-named rules are sent separately and the
/// unsaved `--alert-below` rule (no id) forms its own group. Matches without a
/// recipient are left out.
pub fn compose_notifications(matches: &[AlertMatch]) -> Vec<(String, String, String, String)> {
    let mut grouped: Vec<(Option<i64>, &str, &str, Vec<&str>)> = Vec::new();

    for m in matches {
        let Some(recipient) = m.recipient.as_deref() else { continue };
        match grouped
            .iter_mut()
            .find(|(id, _, to, _)| *id == m.rule_id && *to == recipient)
        {
            Some((_, _, _, lines)) => lines.push(m.message.as_str()),
            None => grouped.push((m.rule_id, m.rule_name.as_str(), recipient, vec![m.message.as_str()])),
        }
    }

    grouped
        .into_iter()
        .map(|(_, name, to, lines)| {
            let subject = format!("Energy rate alert: {}", name);
            let body = format!("Alert triggered:\n{}", lines.join("\n"));
            (name.to_string(), to.to_string(), subject, body)
        })
        .collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::selection::tests::offer;
    use chrono::NaiveDate;
    use std::sync::Mutex;

    /// Keeps every message instead of delivering it.
    #[derive(Default)]
    pub(crate) struct RecordingNotifier {
        pub sent: Mutex<Vec<(String, String, String)>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push((recipient.into(), subject.into(), body.into()));
            Ok(())
        }
    }

    fn alert(rule: &str, to: Option<&str>, message: &str) -> AlertMatch {
        alert_for(Some(1), rule, to, message)
    }

    fn alert_for(id: Option<i64>, rule: &str, to: Option<&str>, message: &str) -> AlertMatch {
        AlertMatch {
            rule_id: id,
            rule_name: rule.into(),
            recipient: to.map(str::to_string),
            triggered_at: NaiveDate::from_ymd_opt(2026, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            term_months: 12,
            price_threshold: 0.07,
            matched_offer: offer("A", 0.06, Some(12)),
            message: message.into(),
        }
    }

    #[test]
    fn test_compose_groups_by_rule() {
        let matches = [
            alert("cheap", Some("a@example.com"), "line one"),
            alert("other", Some("b@example.com"), "line x"),
            alert("cheap", Some("a@example.com"), "line two"),
            alert("console only", None, "ignored"),
        ];
        let notes = compose_notifications(&matches);
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0].1, "a@example.com");
        assert_eq!(notes[0].2, "Energy rate alert: cheap");
        assert_eq!(notes[0].3, "Alert triggered:\nline one\nline two");
    }

    #[test]
    fn test_same_named_rules_are_sent_separately() {
        let to = Some("me@example.com");
        let matches = [
            alert_for(Some(1), "cheap", to, "$0.0650/kWh below $0.0700 for term 12 mo - A"),
            alert_for(Some(2), "cheap", to, "$0.0650/kWh below $0.0800 for term 12 mo - A"),
            alert_for(None, "cheap", to, "$0.0650/kWh below $0.0900 for term 12 mo - A"),
        ];
        let notes = compose_notifications(&matches);
        assert_eq!(notes.len(), 3);
        assert!(notes.iter().all(|n| n.2 == "Energy rate alert: cheap"));
        assert_eq!(notes[0].3, "Alert triggered:\n$0.0650/kWh below $0.0700 for term 12 mo - A");
        assert_eq!(notes[1].3, "Alert triggered:\n$0.0650/kWh below $0.0800 for term 12 mo - A");
    }

    #[test]
    fn test_log_notifier_never_fails() {
        let res = tokio_test::block_on(LogNotifier.send("ops", "subject", "body"));
        assert!(res.is_ok());
        assert!(!LogNotifier.delivers());
    }

    #[test]
    fn test_webhook_rejects_bad_url() {
        assert!(WebhookNotifier::new("not a url", 5).is_err());
    }
}
