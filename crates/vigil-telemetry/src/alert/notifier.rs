use std::fmt::Write as _;
use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use serde_json::json;
use tracing::instrument;

use crate::config::AlertConfig;
use crate::model::{ErrorRecord, FeedbackRecord, RecordId, Site};
use crate::TelemetryError;

const SERVICE: &str = "webhook";

#[derive(Debug, Serialize)]
struct Markdown<'a> {
    msgtype: &'static str,
    markdown: Content<'a>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    content: &'a str,
}

/// Posts markdown notifications to a site's webhooks, one attempt each.
#[derive(Debug, Clone)]
pub struct AlertNotifier {
    client: Client,
    admin_url: String,
    enabled: bool,
}

impl AlertNotifier {
    pub fn new(config: &AlertConfig) -> Result<Self, TelemetryError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| TelemetryError::Config(format!("alert http client: {e}")))?;
        Ok(Self {
            client,
            admin_url: config.admin_url.trim_end_matches('/').to_string(),
            enabled: config.enabled,
        })
    }

    #[instrument(skip_all, fields(site_id = %site.id, reports_type = ?event.header.reports_type))]
    pub async fn notify_error(&self, site: &Site, event: &ErrorRecord) -> Result<(), TelemetryError> {
        let content = self.render_error(site, event);
        self.post(site.alert_url.as_deref(), &content).await
    }

    #[instrument(skip_all, fields(site_id = %site.id, record_id = %record_id))]
    pub async fn notify_feedback(
        &self,
        site: &Site,
        feedback: &FeedbackRecord,
        record_id: RecordId,
    ) -> Result<(), TelemetryError> {
        let content = self.render_feedback(site, feedback, record_id);
        let url = site.feedback_url.as_deref().or(site.alert_url.as_deref());
        self.post(url, &content).await
    }

    /// Report that a record could not be persisted.
    #[instrument(skip_all, fields(site_id = %site.id))]
    pub async fn notify_error_save(
        &self,
        site: &Site,
        user_id: Option<&str>,
        message: &str,
    ) -> Result<(), TelemetryError> {
        let content = format!(
            "User: <font color=\"warning\">{}</font>\n\
             >Site: <font color=\"comment\">{}</font>\n\
             >Save failure: <font color=\"comment\">{message}</font>",
            user_id.unwrap_or("-"),
            site.name,
        );
        self.post(site.alert_url.as_deref(), &content).await
    }

    pub fn render_error(&self, site: &Site, event: &ErrorRecord) -> String {
        let header = &event.header;
        let mut content = format!(
            "User: <font color=\"warning\">{}</font>\n\
             >Site: <font color=\"comment\">{}</font>\n\
             >Environment: <font color=\"comment\">{}</font>\n",
            header.user_id.as_deref().unwrap_or("-"),
            site.name,
            header.mode.as_deref().unwrap_or("-"),
        );

        let meta = &event.meta;
        let message = json!({
            "value": event.value,
            "type": event.error_type,
            "file": meta.file,
        });
        let stack = serde_json::to_string(&event.stack_trace).unwrap_or_default();
        let detail = event
            .error_detail
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();

        let lines: Vec<(&str, String)> = match header.reports_type.as_deref() {
            Some("js") => vec![
                ("Kind", "JavaScript error".to_string()),
                ("Message", message.to_string()),
                ("Stack", stack),
                ("Detail", detail),
            ],
            Some("resource") => vec![
                ("Kind", "Resource load failure".to_string()),
                ("Message", serde_json::to_string(meta).unwrap_or_default()),
            ],
            Some("unhandledrejection") => vec![
                ("Kind", "Unhandled promise rejection".to_string()),
                (
                    "Message",
                    json!({"value": event.value, "type": event.error_type}).to_string(),
                ),
                ("Stack", stack),
                ("Detail", detail),
            ],
            Some("http" | "http-record") => vec![
                ("Kind", "HTTP request failure".to_string()),
                ("Method", display(meta.method.as_ref())),
                ("URL", display(meta.url.as_ref())),
                ("Params", display(meta.params.as_ref())),
                ("Body", display(meta.body.as_ref())),
                ("Status", display(meta.status.as_ref())),
                ("Message", display(event.value.as_ref())),
            ],
            Some("cors") => vec![
                ("Kind", "Cross-origin failure".to_string()),
                ("Message", display(event.value.as_ref())),
            ],
            Some("react") => vec![
                ("Kind", "React component error".to_string()),
                (
                    "Message",
                    json!({
                        "value": event.value,
                        "type": event.error_type,
                        "file": meta.file,
                        "component_name": meta.component_name,
                    })
                    .to_string(),
                ),
                ("Stack", stack),
                ("Detail", detail),
            ],
            other => vec![
                ("Kind", other.unwrap_or("error").to_string()),
                ("Message", message.to_string()),
            ],
        };
        for (label, value) in lines {
            let _ = writeln!(content, ">{label}: <font color=\"comment\">{value}</font>");
        }
        let _ = write!(
            content,
            ">Details: <font color=\"info\">{}/admin/{}/error</font>",
            self.admin_url, site.id
        );
        content
    }

    pub fn render_feedback(&self, site: &Site, feedback: &FeedbackRecord, id: RecordId) -> String {
        format!(
            "User: <font color=\"warning\">{}</font>\n\
             >Site: <font color=\"comment\">{}</font>\n\
             >Environment: <font color=\"comment\">{}</font>\n\
             >Feedback: <font color=\"comment\">{}</font>\n\
             >Details: <font color=\"info\">{}/admin/{id}/user</font>",
            feedback.header.user_id.as_deref().unwrap_or("-"),
            site.name,
            feedback.header.mode.as_deref().unwrap_or("-"),
            feedback.content,
            self.admin_url,
        )
    }

    async fn post(&self, url: Option<&str>, content: &str) -> Result<(), TelemetryError> {
        if !self.enabled {
            return Ok(());
        }
        let Some(url) = url else {
            tracing::debug!("No webhook configured, skipping notification");
            return Ok(());
        };

        let body = Markdown {
            msgtype: "markdown",
            markdown: Content { content },
        };
        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| TelemetryError::external(SERVICE, e.to_string()))?;

        if !response.status().is_success() {
            return Err(TelemetryError::external(
                SERVICE,
                format!("status {}", response.status()),
            ));
        }
        tracing::debug!(url, "Notification delivered");
        Ok(())
    }
}

fn display<T: ToString>(value: Option<&T>) -> String {
    value.map_or_else(|| "-".to_string(), ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Category, CategoryRecord, SiteDraft, SiteId};
    use chrono::Utc;
    use serde_json::Value;

    fn site(alert_url: Option<&str>) -> Site {
        SiteDraft {
            alert_url: alert_url.map(str::to_string),
            ..SiteDraft::named("shop")
        }
        .into_site(SiteId::new("s1"), Utc::now(), Utc::now())
    }

    fn notifier() -> AlertNotifier {
        AlertNotifier::new(&AlertConfig {
            timeout_ms: 200,
            ..AlertConfig::default()
        })
        .unwrap()
    }

    fn error(reports_type: &str) -> ErrorRecord {
        let Value::Object(doc) = json!({
            "site_id": "s1",
            "create_at": 0,
            "user_id": "u-7",
            "mode": "production",
            "reports_type": reports_type,
            "error_type": "HttpError",
            "value": "boom",
            "meta": {"url": "https://api.test/users", "method": "POST", "status": 502}
        }) else {
            unreachable!()
        };
        match CategoryRecord::from_document(Category::Error, doc).unwrap() {
            CategoryRecord::Error(e) => e,
            _ => unreachable!(),
        }
    }

    #[test]
    fn http_template_lists_request() {
        let content = notifier().render_error(&site(None), &error("http"));
        assert!(content.contains("u-7"));
        assert!(content.contains("shop"));
        assert!(content.contains("production"));
        assert!(content.contains("HTTP request failure"));
        assert!(content.contains("https://api.test/users"));
        assert!(content.contains("502"));
        assert!(content.contains("/admin/s1/error"));
    }

    #[test]
    fn unknown_type_uses_generic_template() {
        let content = notifier().render_error(&site(None), &error("mystery"));
        assert!(content.contains("Kind: <font color=\"comment\">mystery</font>"));
    }

    #[test]
    fn body_is_markdown_envelope() {
        let body = Markdown {
            msgtype: "markdown",
            markdown: Content { content: "hi" },
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({"msgtype": "markdown", "markdown": {"content": "hi"}})
        );
    }

    #[tokio::test]
    async fn missing_webhook_is_skipped() {
        notifier()
            .notify_error(&site(None), &error("js"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unreachable_webhook_is_external_error() {
        let err = notifier()
            .notify_error(&site(Some("http://127.0.0.1:9/hook")), &error("js"))
            .await
            .unwrap_err();
        assert!(matches!(err, TelemetryError::ExternalService { service: SERVICE, .. }));
    }
}
