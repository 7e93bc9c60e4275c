//! Baidu Fanyi general translation adapter.
//!
//! The candidate credential is `appid:secret`. Every request is signed with
//! `md5(appid + q + salt + secret)`.

use crate::classify::{body_error, check_status, transport_error};
use async_trait::async_trait;
use md5::{Digest, Md5};
use rand::Rng;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;
use weave_core::adapter::Adapter;
use weave_core::error::WeaveError;
use weave_core::pool::Transport;
use weave_core::types::*;

pub const DEFAULT_ENDPOINT: &str = "https://fanyi-api.baidu.com/api/trans/vip/translate";

const SUCCESS: &str = "52000";

/// Baidu language code for a language name or code.
///
/// Names are matched case-insensitively; anything unknown is passed through
/// lowercased, so callers may also hand over raw Baidu codes.
pub fn language_code(lang: &str) -> String {
    let lower = lang.trim().to_lowercase();
    let code = match lower.as_str() {
        "auto" | "" => "auto",
        "english" => "en",
        "chinese" | "simplified chinese" => "zh",
        "traditional chinese" => "cht",
        "japanese" => "jp",
        "korean" => "kor",
        "french" => "fra",
        "spanish" => "spa",
        "german" => "de",
        "russian" => "ru",
        "italian" => "it",
        "portuguese" => "pt",
        "arabic" => "ara",
        "thai" => "th",
        "vietnamese" => "vie",
        _ => return lower,
    };
    code.to_string()
}

pub fn sign(appid: &str, query: &str, salt: &str, secret: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(appid.as_bytes());
    hasher.update(query.as_bytes());
    hasher.update(salt.as_bytes());
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

fn split_credential(credential: &Credential) -> Result<(&str, &str), WeaveError> {
    match credential.expose().split_once(':') {
        Some((appid, secret)) if !appid.trim().is_empty() && !secret.trim().is_empty() => {
            Ok((appid.trim(), secret.trim()))
        }
        _ => Err(WeaveError::configuration(format!(
            "baidu credential must be `appid:secret`, got {}",
            credential.masked()
        ))),
    }
}

/// Map a Baidu `error_code` to the error taxonomy.
pub fn classify_error_code(code: &str, message: String) -> WeaveError {
    match code {
        "52001" | "52002" | "54005" => WeaveError::timeout(message),
        "54003" => WeaveError::rate_limit(message, None),
        "52003" | "54001" | "58000" | "90107" => WeaveError::authentication(message),
        "54000" | "54004" | "58001" | "58002" => WeaveError::configuration(message),
        _ => WeaveError::provider(message),
    }
}

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    #[serde(default)]
    error_code: Option<serde_json::Value>,
    #[serde(default)]
    error_msg: Option<String>,
    #[serde(default)]
    trans_result: Vec<TranslatedLine>,
}

#[derive(Debug, Deserialize)]
struct TranslatedLine {
    dst: String,
}

/// Native translation adapter ([`ProviderFamily::NativeTranslate`]).
#[derive(Debug, Clone)]
pub struct BaiduAdapter {
    transport: Transport,
    info: Arc<AdapterInfo>,
}

impl BaiduAdapter {
    pub fn new(transport: Transport) -> Self {
        Self {
            transport,
            info: Arc::new(AdapterInfo {
                family: ProviderFamily::NativeTranslate,
                name: "baidu".to_string(),
            }),
        }
    }
}

#[async_trait]
impl Adapter for BaiduAdapter {
    fn info(&self) -> Arc<AdapterInfo> {
        self.info.clone()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::native_translate()
    }

    async fn call(
        &self,
        candidate: &ModelCandidate,
        spec: &RequestSpec,
    ) -> Result<AdapterResponse, WeaveError> {
        if spec.operation != OperationKind::Translate {
            return Err(WeaveError::unsupported(format!(
                "baidu cannot serve {}",
                spec.operation
            )));
        }
        let query = spec
            .payload
            .text()
            .ok_or_else(|| WeaveError::invalid_request("translate request carries no text"))?;

        let (appid, secret) = split_credential(&candidate.credential)?;
        let salt = rand::thread_rng().gen_range(32768..=65536).to_string();
        let from = language_code(spec.params.source_lang.as_deref().unwrap_or("auto"));
        let to = language_code(spec.params.target_lang.as_deref().unwrap_or("English"));
        let signature = sign(appid, query, &salt, secret);

        let endpoint = match candidate.endpoint.trim() {
            "" => DEFAULT_ENDPOINT,
            endpoint => endpoint,
        };
        let form = [
            ("q", query),
            ("from", from.as_str()),
            ("to", to.as_str()),
            ("appid", appid),
            ("salt", salt.as_str()),
            ("sign", signature.as_str()),
        ];

        debug!(
            "[{}] POST {} {}->{} appid={} chars={}",
            self.info.name,
            endpoint,
            from,
            to,
            appid,
            query.chars().count()
        );

        let client = self.transport.client_for(candidate)?;
        let response = client
            .post(endpoint)
            .form(&form)
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_status(response, &self.info.name, &candidate.credential).await?;

        let body: TranslateResponse = response
            .json()
            .await
            .map_err(|e| body_error("baidu", e))?;

        // error_code arrives as a string or a number depending on the endpoint
        let code = match &body.error_code {
            Some(serde_json::Value::String(code)) => Some(code.clone()),
            Some(serde_json::Value::Number(code)) => Some(code.to_string()),
            _ => None,
        };
        if let Some(code) = code.filter(|c| c != SUCCESS) {
            let message = candidate.credential.redact(&format!(
                "baidu error {}: {}",
                code,
                body.error_msg.as_deref().unwrap_or("unknown error")
            ));
            return Err(classify_error_code(&code, message));
        }

        if body.trans_result.is_empty() {
            return Err(WeaveError::provider("baidu: empty trans_result"));
        }
        let text = body
            .trans_result
            .into_iter()
            .map(|line| line.dst)
            .collect::<Vec<_>>()
            .join("\n");

        Ok(AdapterResponse::text(candidate.model.clone(), text))
    }
}
