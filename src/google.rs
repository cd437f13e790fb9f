use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use log::debug;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::credentials::{CredentialSource, ServiceAccountKey};
use crate::error::{SheetError, SheetResult};
use crate::remote::{Row, TableConnector, TableSession};

const SHEETS_API: &str = "https://sheets.googleapis.com";
const TOKEN_LIFETIME_SECS: i64 = 3600;
/// Sessions are replaced this long before their token expires.
const TOKEN_EXPIRY_MARGIN_SECS: i64 = 60;

/// OAuth scopes requested for the service account.
pub const SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/spreadsheets",
    "https://www.googleapis.com/auth/drive",
];

/// Opens sessions on the first worksheet of a Google spreadsheet using a
/// service-account key.
pub struct GoogleSheetsConnector {
    http: Client,
    credentials: CredentialSource,
    sheet_id: String,
    api_base: String,
}

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: String,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<SheetMeta>,
}

#[derive(Deserialize)]
struct SheetMeta {
    properties: SheetProperties,
}

#[derive(Deserialize)]
struct SheetProperties {
    title: String,
}

#[derive(Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

impl GoogleSheetsConnector {
    /// # Errors
    /// * `SheetError::Connection` if the HTTP client cannot be built
    pub fn new(credentials: CredentialSource, sheet_id: &str, timeout: Duration) -> SheetResult<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SheetError::Connection(format!("cannot build HTTP client: {}", e)))?;
        Ok(GoogleSheetsConnector {
            http,
            credentials,
            sheet_id: sheet_id.to_string(),
            api_base: SHEETS_API.to_string(),
        })
    }

    /// Point the connector at a different API host.
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    async fn access_token(&self, key: &ServiceAccountKey) -> SheetResult<String> {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            iss: &key.client_email,
            scope: SCOPES.join(" "),
            aud: &key.token_uri,
            iat: now,
            exp: now + TOKEN_LIFETIME_SECS,
        };
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| SheetError::Credential(format!("invalid private key: {}", e)))?;
        let assertion = encode(&Header::new(Algorithm::RS256), &claims, &signing_key)
            .map_err(|e| SheetError::Credential(format!("cannot sign token request: {}", e)))?;

        debug!("requesting access token for {}", key.client_email);
        let response = self
            .http
            .post(&key.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await
            .map_err(|e| SheetError::Connection(format!("token request failed: {}", e)))?;
        let response = check_status(response, SheetError::Connection).await?;

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| SheetError::Connection(format!("invalid token response: {}", e)))?;
        Ok(token.access_token)
    }

    async fn first_sheet_title(&self, token: &str) -> SheetResult<String> {
        let url = format!(
            "{}/v4/spreadsheets/{}?fields=sheets.properties.title",
            self.api_base, self.sheet_id
        );
        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| SheetError::Connection(format!("cannot open sheet {}: {}", self.sheet_id, e)))?;
        let response = check_status(response, SheetError::Connection).await?;

        let meta: SpreadsheetMeta = response
            .json()
            .await
            .map_err(|e| SheetError::Connection(format!("invalid spreadsheet metadata: {}", e)))?;
        meta.sheets
            .into_iter()
            .next()
            .map(|s| s.properties.title)
            .ok_or_else(|| SheetError::Connection(format!("spreadsheet {} has no worksheets", self.sheet_id)))
    }
}

#[async_trait]
impl TableConnector for GoogleSheetsConnector {
    fn sheet_id(&self) -> &str {
        &self.sheet_id
    }

    fn max_session_age(&self) -> Option<Duration> {
        Some(Duration::from_secs((TOKEN_LIFETIME_SECS - TOKEN_EXPIRY_MARGIN_SECS) as u64))
    }

    async fn connect(&self) -> SheetResult<Arc<dyn TableSession>> {
        let key = self.credentials.load()?;
        let token = self.access_token(&key).await?;
        let title = self.first_sheet_title(&token).await?;
        debug!("sheet {} resolved to worksheet {:?}", self.sheet_id, title);

        Ok(Arc::new(GoogleSheetSession {
            http: self.http.clone(),
            token,
            values_url: values_url(&self.api_base, &self.sheet_id, &title),
        }))
    }
}

struct GoogleSheetSession {
    http: Client,
    token: String,
    values_url: String,
}

#[async_trait]
impl TableSession for GoogleSheetSession {
    async fn read_all(&self) -> SheetResult<Vec<Row>> {
        let response = self
            .http
            .get(&self.values_url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| SheetError::RemoteRead(e.to_string()))?;
        let response = check_status(response, SheetError::RemoteRead).await?;

        let range: ValueRange = response
            .json()
            .await
            .map_err(|e| SheetError::RemoteRead(format!("invalid value range: {}", e)))?;
        Ok(range
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_to_string).collect())
            .collect())
    }

    async fn append_row(&self, row: &[String]) -> SheetResult<()> {
        let url = format!("{}:append?valueInputOption=RAW", self.values_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(&serde_json::json!({ "values": [row] }))
            .send()
            .await
            .map_err(|e| SheetError::RemoteWrite(e.to_string()))?;
        check_status(response, SheetError::RemoteWrite).await?;
        Ok(())
    }
}

/// Turn a non-success response into an error. Rejected credentials always map
/// to `SheetError::Connection` so the session gets dropped.
async fn check_status(response: Response, kind: fn(String) -> SheetError) -> SheetResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = format!("HTTP {}: {}", status, body.trim());
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        Err(SheetError::Connection(message))
    } else {
        Err(kind(message))
    }
}

/// Values endpoint covering a whole worksheet.
fn values_url(api_base: &str, sheet_id: &str, title: &str) -> String {
    format!(
        "{}/v4/spreadsheets/{}/values/{}",
        api_base,
        sheet_id,
        urlencoding::encode(&quote_sheet_title(title))
    )
}

/// A1 notation for a whole worksheet: the title in single quotes, inner quotes doubled.
fn quote_sheet_title(title: &str) -> String {
    format!("'{}'", title.replace('\'', "''"))
}

fn cell_to_string(cell: Value) -> String {
    match cell {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sessions_are_not_reused_past_the_token_lifetime() {
        let connector = GoogleSheetsConnector::new(
            CredentialSource::Inline("{}".to_string()),
            "abc",
            Duration::from_secs(10),
        )
        .unwrap();
        let cache = crate::connection::ConnectionCache::new(
            Arc::new(connector),
            Duration::from_secs(7200),
            Duration::from_secs(10),
            true,
        );
        assert_eq!(cache.reauth_after(), Duration::from_secs(3540));
    }

    #[test]
    fn quotes_titles() {
        assert_eq!(quote_sheet_title("Sheet1"), "'Sheet1'");
        assert_eq!(quote_sheet_title("Bob's list"), "'Bob''s list'");
    }

    #[test]
    fn values_url_encodes_range() {
        assert_eq!(
            values_url("https://api", "abc", "My Sheet"),
            "https://api/v4/spreadsheets/abc/values/%27My%20Sheet%27"
        );
    }

    #[test]
    fn cells_become_plain_strings() {
        assert_eq!(cell_to_string(Value::from("John")), "John");
        assert_eq!(cell_to_string(Value::from(30)), "30");
        assert_eq!(cell_to_string(Value::Bool(true)), "true");
        assert_eq!(cell_to_string(Value::Null), "");
    }

    #[test]
    fn value_range_without_values_is_empty() {
        let range: ValueRange = serde_json::from_str(r#"{"range": "Sheet1!A1:Z1000"}"#).unwrap();
        assert!(range.values.is_empty());
    }

    #[tokio::test]
    async fn connect_with_bad_credentials_fails_before_any_request() {
        let connector = GoogleSheetsConnector::new(
            CredentialSource::Inline("{}".to_string()),
            "abc",
            Duration::from_secs(1),
        )
        .unwrap()
        .with_api_base("http://127.0.0.1:9");

        let err = match connector.connect().await {
            Ok(_) => panic!("connect should fail"),
            Err(e) => e,
        };
        assert!(matches!(err, SheetError::Credential(_)));
    }
}
