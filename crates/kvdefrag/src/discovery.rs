//! [`NameService`] over DNS SRV records.

use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use tracing::debug;

use crate::error::{DefragError, Result};
use crate::service::{ClientError, ClientResult, NameService};

pub struct SrvNameService {
    resolver: TokioAsyncResolver,
}

impl SrvNameService {
    /// Resolver configured from the host's system settings.
    pub fn from_system_conf() -> Result<Self> {
        let resolver = TokioAsyncResolver::tokio_from_system_conf()
            .map_err(|e| DefragError::Config(format!("failed to load resolver configuration: {}", e)))?;
        Ok(Self { resolver })
    }
}

/// SRV record names to query, each paired with the scheme its targets use.
/// TLS records come first.
pub fn srv_names(domain: &str, service: &str) -> [(String, &'static str); 2] {
    let svc = if service.is_empty() {
        "etcd-client".to_string()
    } else {
        format!("etcd-client-{}", service)
    };
    [
        (format!("_{}-ssl._tcp.{}", svc, domain), "https"),
        (format!("_{}._tcp.{}", svc, domain), "http"),
    ]
}

/// Endpoint URL for an SRV target, without the target's trailing dot.
pub fn endpoint_url(scheme: &str, target: &str, port: u16) -> String {
    format!("{}://{}:{}", scheme, target.trim_end_matches('.'), port)
}

#[async_trait]
impl NameService for SrvNameService {
    async fn lookup(&self, domain: &str, service: &str) -> ClientResult<Vec<String>> {
        let mut endpoints = Vec::new();
        let mut found = false;
        let mut errors = Vec::new();

        for (name, scheme) in srv_names(domain, service) {
            match self.resolver.srv_lookup(name.as_str()).await {
                Ok(records) => {
                    found = true;
                    for srv in records.iter() {
                        let url = endpoint_url(scheme, &srv.target().to_utf8(), srv.port());
                        debug!("discovered {} via {}", url, name);
                        endpoints.push(url);
                    }
                }
                Err(e) => {
                    debug!("SRV lookup of {} failed: {}", name, e);
                    errors.push(format!("{}: {}", name, e));
                }
            }
        }

        if !found {
            return Err(ClientError::Transport(errors.join("; ")));
        }
        Ok(endpoints)
    }
}
