//! [`ClusterService`] over the store's v3 JSON gateway.
//!
//! Every RPC is a `POST` of a JSON body to `/v3/...`. 64-bit integers are
//! rendered as strings by the gateway, so response decoding accepts both
//! strings and numbers.

use std::collections::HashMap;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{header, Certificate, Client, Identity, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::DefragConfig;
use crate::error::{DefragError, Result};
use crate::service::{
    AlarmKind, AlarmMember, ClientError, ClientResult, ClusterMember, ClusterService,
    EndpointStatus,
};

/// gRPC status code for permission denied.
const CODE_PERMISSION_DENIED: i32 = 7;
/// gRPC status code for unauthenticated (expired or invalid token).
const CODE_UNAUTHENTICATED: i32 = 16;

pub struct GatewayClusterService {
    client: Client,
    insecure_transport: bool,
    credentials: Option<(String, String)>,
    /// Auth tokens keyed by base URL.
    tokens: Mutex<HashMap<String, String>>,
}

impl GatewayClusterService {
    /// Build the HTTP client from TLS material, timeouts and keepalive
    /// settings in `config`.
    pub fn new(config: &DefragConfig) -> Result<Self> {
        let mut builder = Client::builder()
            .connect_timeout(config.dial_timeout)
            .tcp_keepalive(config.keepalive_time)
            .http2_keep_alive_interval(config.keepalive_time)
            .http2_keep_alive_timeout(config.keepalive_timeout)
            .danger_accept_invalid_certs(config.insecure_skip_tls_verify);

        if let Some(ca) = &config.ca_file {
            let pem = std::fs::read(ca)?;
            let cert = Certificate::from_pem(&pem).map_err(|e| {
                DefragError::Config(format!("invalid CA file {}: {}", ca.display(), e))
            })?;
            builder = builder.add_root_certificate(cert);
        }

        match (&config.cert_file, &config.key_file) {
            (Some(cert), Some(key)) => {
                let mut pem = std::fs::read(cert)?;
                pem.push(b'\n');
                pem.extend(std::fs::read(key)?);
                let identity = Identity::from_pem(&pem).map_err(|e| {
                    DefragError::Config(format!("invalid client certificate or key: {}", e))
                })?;
                builder = builder.identity(identity);
            }
            (None, None) => {}
            _ => {
                return Err(DefragError::Config(
                    "--cert and --key must be provided together".to_string(),
                ))
            }
        }

        let client = builder
            .build()
            .map_err(|e| DefragError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            insecure_transport: config.insecure_transport,
            credentials: config.credentials(),
            tokens: Mutex::new(HashMap::new()),
        })
    }

    /// Base URL for `endpoint`, adding a scheme when none is given.
    fn base_url(&self, endpoint: &str) -> ClientResult<String> {
        let endpoint = endpoint.trim().trim_end_matches('/');
        match endpoint.split_once("://") {
            Some((scheme, _)) if scheme.eq_ignore_ascii_case("unix") || scheme.eq_ignore_ascii_case("unixs") => {
                Err(ClientError::Unsupported(format!(
                    "unix socket endpoint {} is not reachable over HTTP",
                    endpoint
                )))
            }
            Some(_) => Ok(endpoint.to_string()),
            None if self.insecure_transport => Ok(format!("http://{}", endpoint)),
            None => Ok(format!("https://{}", endpoint)),
        }
    }

    async fn token(&self, base: &str) -> ClientResult<Option<String>> {
        let Some((name, password)) = &self.credentials else {
            return Ok(None);
        };

        if let Some(token) = self.tokens.lock().await.get(base) {
            return Ok(Some(token.clone()));
        }

        // authenticate without the cache lock; calls to other bases proceed
        let resp = self
            .client
            .post(format!("{}/v3/auth/authenticate", base))
            .json(&json!({ "name": name, "password": password }))
            .send()
            .await
            .map_err(transport)?;
        let auth: AuthResponse = decode(resp).await?;
        debug!("authenticated against {}", base);
        self.tokens
            .lock()
            .await
            .insert(base.to_string(), auth.token.clone());
        Ok(Some(auth.token))
    }

    async fn post<T: DeserializeOwned>(&self, endpoint: &str, path: &str, body: &Value) -> ClientResult<T> {
        let base = self.base_url(endpoint)?;
        let token = self.token(&base).await?;

        let mut req = self.client.post(format!("{}{}", base, path)).json(body);
        if let Some(token) = token {
            req = req.header(header::AUTHORIZATION, token);
        }
        let resp = req.send().await.map_err(transport)?;

        let result = decode(resp).await;
        if let Err(ClientError::Status { code: CODE_UNAUTHENTICATED, .. }) = &result {
            self.tokens.lock().await.remove(&base);
        }
        result
    }

    /// Send to each endpoint in turn until one answers.
    async fn post_any<T: DeserializeOwned>(
        &self,
        endpoints: &[String],
        path: &str,
        body: &Value,
    ) -> ClientResult<T> {
        let mut last = ClientError::Transport("no endpoints to connect to".to_string());
        for ep in endpoints {
            match self.post(ep, path, body).await {
                Ok(resp) => return Ok(resp),
                Err(e) if e.is_permission_denied() => return Err(e),
                Err(e) => {
                    debug!("{} via {} failed: {}", path, ep, e);
                    last = e;
                }
            }
        }
        Err(last)
    }
}

fn transport(e: reqwest::Error) -> ClientError {
    ClientError::Transport(e.to_string())
}

async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> ClientResult<T> {
    let status = resp.status();
    let body = resp.bytes().await.map_err(transport)?;
    if !status.is_success() {
        return Err(error_from_response(status, &body));
    }
    serde_json::from_slice(&body).map_err(|e| ClientError::Decode(e.to_string()))
}

fn error_from_response(status: StatusCode, body: &[u8]) -> ClientError {
    let parsed: ErrorBody = serde_json::from_slice(body).unwrap_or_default();
    let message = [parsed.message, parsed.error]
        .into_iter()
        .find(|m| !m.is_empty())
        .unwrap_or_else(|| String::from_utf8_lossy(body).trim().to_string());

    if status == StatusCode::FORBIDDEN || parsed.code == CODE_PERMISSION_DENIED {
        return ClientError::PermissionDenied(message);
    }
    let code = if parsed.code != 0 {
        parsed.code
    } else {
        i32::from(status.as_u16())
    };
    ClientError::Status { code, message }
}

#[async_trait]
impl ClusterService for GatewayClusterService {
    async fn list_members(&self, endpoints: &[String]) -> ClientResult<Vec<ClusterMember>> {
        let resp: MemberListResponse = self
            .post_any(endpoints, "/v3/cluster/member/list", &json!({}))
            .await?;
        Ok(resp.members.into_iter().map(ClusterMember::from).collect())
    }

    async fn status(&self, endpoint: &str) -> ClientResult<EndpointStatus> {
        let resp: StatusResponse = self.post(endpoint, "/v3/maintenance/status", &json!({})).await?;
        Ok(EndpointStatus {
            endpoint: endpoint.to_string(),
            member_id: resp.header.member_id,
            leader_id: resp.leader,
            db_size: resp.db_size,
            db_size_in_use: resp.db_size_in_use,
            revision: resp.header.revision,
            raft_term: resp.raft_term,
            raft_index: resp.raft_index,
        })
    }

    async fn read_key(&self, endpoint: &str, key: &str) -> ClientResult<Option<Vec<u8>>> {
        let body = json!({ "key": STANDARD.encode(key) });
        let resp: RangeResponse = self.post(endpoint, "/v3/kv/range", &body).await?;
        match resp.kvs.into_iter().next() {
            Some(kv) => STANDARD
                .decode(kv.value)
                .map(Some)
                .map_err(|e| ClientError::Decode(e.to_string())),
            None => Ok(None),
        }
    }

    async fn list_alarms(&self, endpoints: &[String]) -> ClientResult<Vec<AlarmMember>> {
        let body = json!({ "action": "GET", "memberID": "0", "alarm": "NONE" });
        let resp: AlarmResponse = self.post_any(endpoints, "/v3/maintenance/alarm", &body).await?;
        Ok(resp.alarms.into_iter().map(AlarmMember::from).collect())
    }

    async fn clear_alarm(&self, endpoints: &[String], alarm: &AlarmMember) -> ClientResult<()> {
        let body = json!({
            "action": "DEACTIVATE",
            "memberID": alarm.member_id.to_string(),
            "alarm": alarm.kind.as_str(),
        });
        let _: Value = self.post_any(endpoints, "/v3/maintenance/alarm", &body).await?;
        Ok(())
    }

    async fn compact(&self, endpoint: &str, revision: i64) -> ClientResult<()> {
        let body = json!({ "revision": revision.to_string(), "physical": true });
        let _: Value = self.post(endpoint, "/v3/kv/compaction", &body).await?;
        Ok(())
    }

    async fn defragment(&self, endpoint: &str) -> ClientResult<()> {
        let _: Value = self.post(endpoint, "/v3/maintenance/defragment", &json!({})).await?;
        Ok(())
    }

    async fn transfer_leadership(&self, endpoint: &str, target: u64) -> ClientResult<()> {
        let body = json!({ "targetID": target.to_string() });
        let _: Value = self
            .post(endpoint, "/v3/maintenance/transfer-leadership", &body)
            .await?;
        Ok(())
    }
}

mod lenient {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum U64 {
        Int(u64),
        Text(String),
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum I64 {
        Int(i64),
        Text(String),
    }

    pub fn uint<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
        match Option::<U64>::deserialize(d)? {
            None => Ok(0),
            Some(U64::Int(n)) => Ok(n),
            Some(U64::Text(s)) => s.parse().map_err(D::Error::custom),
        }
    }

    pub fn int<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
        match Option::<I64>::deserialize(d)? {
            None => Ok(0),
            Some(I64::Int(n)) => Ok(n),
            Some(I64::Text(s)) => s.parse().map_err(D::Error::custom),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ErrorBody {
    error: String,
    code: i32,
    message: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ResponseHeader {
    #[serde(deserialize_with = "lenient::uint")]
    member_id: u64,
    #[serde(deserialize_with = "lenient::int")]
    revision: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StatusResponse {
    header: ResponseHeader,
    #[serde(rename = "dbSize", alias = "db_size", deserialize_with = "lenient::uint")]
    db_size: u64,
    #[serde(rename = "dbSizeInUse", alias = "db_size_in_use", deserialize_with = "lenient::uint")]
    db_size_in_use: u64,
    #[serde(deserialize_with = "lenient::uint")]
    leader: u64,
    #[serde(rename = "raftIndex", alias = "raft_index", deserialize_with = "lenient::uint")]
    raft_index: u64,
    #[serde(rename = "raftTerm", alias = "raft_term", deserialize_with = "lenient::uint")]
    raft_term: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireMember {
    #[serde(rename = "ID", deserialize_with = "lenient::uint")]
    id: u64,
    name: String,
    #[serde(rename = "clientURLs")]
    client_urls: Vec<String>,
    #[serde(rename = "isLearner")]
    is_learner: bool,
}

impl From<WireMember> for ClusterMember {
    fn from(m: WireMember) -> Self {
        ClusterMember {
            id: m.id,
            name: m.name,
            client_urls: m.client_urls,
            is_learner: m.is_learner,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MemberListResponse {
    members: Vec<WireMember>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct KeyValue {
    value: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RangeResponse {
    kvs: Vec<KeyValue>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireAlarm {
    #[serde(rename = "memberID", deserialize_with = "lenient::uint")]
    member_id: u64,
    alarm: Value,
}

impl From<WireAlarm> for AlarmMember {
    fn from(a: WireAlarm) -> Self {
        let name = match &a.alarm {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => String::new(),
        };
        AlarmMember {
            member_id: a.member_id,
            kind: AlarmKind::from_name(&name),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AlarmResponse {
    alarms: Vec<WireAlarm>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AuthResponse {
    token: String,
}
