/// 通知发送 (短信网关)
/// Notification transports
use crate::config::SmsConfig;
use crate::error::TransportError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::io::Read;
use std::time::Duration;
use tracing::{info, warn};

/// 菲律宾手机号: 09XXXXXXXXX / 9XXXXXXXXX / +639XXXXXXXXX / 639XXXXXXXXX
static PH_MOBILE: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^(?:\+?63|0)?(9\d{9})$").ok());

/// 通用号码: 可选+号, 8-15位数字
static GENERIC_NUMBER: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^\+?(\d{8,15})$").ok());

pub trait NotificationTransport: Send + Sync {
    fn send(&self, recipient: &str, message: &str) -> Result<(), TransportError>;
}

/// 号码规范化: 本地格式转 63 开头, 去掉 + 号与分隔符
pub fn normalize_number(raw: &str) -> Result<String, TransportError> {
    let compact: String = raw
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')'))
        .collect();
    if let Some(caps) = PH_MOBILE.as_ref().and_then(|re| re.captures(&compact)) {
        return Ok(format!("63{}", &caps[1]));
    }
    if let Some(caps) = GENERIC_NUMBER.as_ref().and_then(|re| re.captures(&compact)) {
        return Ok(caps[1].to_string());
    }
    Err(TransportError::InvalidRecipient(raw.to_string()))
}

/// 只写日志的发送器 (未配置短信网关时使用)
#[derive(Default)]
pub struct LogTransport;

impl NotificationTransport for LogTransport {
    fn send(&self, recipient: &str, message: &str) -> Result<(), TransportError> {
        info!("📨 [通知] {} ← {}", recipient, message.replace('\n', " | "));
        Ok(())
    }
}

#[derive(Serialize)]
struct SmsPayload<'a> {
    recipient: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sender_id: Option<&'a str>,
    #[serde(rename = "type")]
    kind: &'a str,
    message: &'a str,
}

/// PhilSMS HTTP 网关
pub struct SmsTransport {
    agent: ureq::Agent,
    url: String,
    token: String,
    sender_id: String,
}

impl SmsTransport {
    pub fn new(config: &SmsConfig) -> Result<Self, TransportError> {
        if config.api_token.trim().is_empty() || config.api_base.trim().is_empty() {
            return Err(TransportError::NotConfigured);
        }
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build();
        Ok(Self {
            agent,
            url: format!("{}/sms/send", config.api_base.trim_end_matches('/')),
            token: config.api_token.clone(),
            sender_id: config.sender_id.clone(),
        })
    }

    fn body(recipient: &str, sender_id: Option<&str>, message: &str) -> Result<String, TransportError> {
        serde_json::to_string(&SmsPayload {
            recipient,
            sender_id,
            kind: "plain",
            message,
        })
        .map_err(|e| TransportError::Http(e.to_string()))
    }

    fn post(&self, body: &str) -> Result<(), TransportError> {
        let result = self
            .agent
            .post(&self.url)
            .set("Authorization", &format!("Bearer {}", self.token))
            .set("Accept", "application/json")
            .set("Content-Type", "application/json")
            .send_string(body);
        match result {
            Ok(_) => Ok(()),
            Err(ureq::Error::Status(status, response)) => {
                let mut text = String::new();
                let _ = response.into_reader().take(64 * 1024).read_to_string(&mut text);
                Err(TransportError::Rejected { status, body: text })
            }
            Err(ureq::Error::Transport(t)) => Err(TransportError::Http(t.to_string())),
        }
    }
}

/// 网关拒绝发件人ID时的响应特征
fn sender_rejected(err: &TransportError) -> bool {
    matches!(err, TransportError::Rejected { body, .. }
        if body.contains("Sender ID") && body.contains("not authorized"))
}

impl NotificationTransport for SmsTransport {
    fn send(&self, recipient: &str, message: &str) -> Result<(), TransportError> {
        let recipient = normalize_number(recipient)?;
        let sender = Some(self.sender_id.as_str()).filter(|s| !s.is_empty());
        match self.post(&Self::body(&recipient, sender, message)?) {
            Err(e) if sender.is_some() && sender_rejected(&e) => {
                warn!("⚠️ 发件人ID未授权, 改用默认发件人重试");
                self.post(&Self::body(&recipient, None, message)?)
            }
            other => other,
        }
    }
}
