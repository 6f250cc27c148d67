//! # REST Cluster Backend
//!
//! Talks to a cluster over HTTP:
//!
//! - Cluster-management API (8091, or 18091 for `couchbases://`) for bucket
//!   lookup and scope/collection management
//! - Query service (8093, or 18093 for `couchbases://`) for statements and,
//!   through parameterized statements, single-document operations
//!
//! Query-service error codes are classified into [`StoreError`] so the driver
//! can tell "already exists" and "not yet visible" apart from real faults.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::errors::{StoreError, StoreResult};
use super::statement::Statement;
use super::{ClusterBackend, Keyspace};

const MANAGEMENT_PORT: u16 = 8091;
const MANAGEMENT_TLS_PORT: u16 = 18091;
const QUERY_PORT: u16 = 8093;
const QUERY_TLS_PORT: u16 = 18093;

/// Per-request timeout for the HTTP client
const REQUEST_TIMEOUT: Duration = Duration::from_secs(75);

/// Base URLs derived from a cluster address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub management: String,
    pub query: String,
}

impl Endpoints {
    /// Derive service URLs from a connection string such as
    /// `couchbase://db1,db2?network=external` or a bare host name.
    ///
    /// The first listed node is used; any port in the address is ignored
    /// because it names the data service, not the HTTP services.
    pub fn from_address(address: &str) -> StoreResult<Self> {
        let address = address.trim();
        let (tls, rest) = if let Some(rest) = address.strip_prefix("couchbases://") {
            (true, rest)
        } else if let Some(rest) = address.strip_prefix("couchbase://") {
            (false, rest)
        } else if let Some(rest) = address.strip_prefix("https://") {
            (true, rest)
        } else if let Some(rest) = address.strip_prefix("http://") {
            (false, rest)
        } else {
            (false, address)
        };

        let rest = rest.split(['?', '/']).next().unwrap_or("");
        let node = rest.split(',').next().unwrap_or("").trim();
        let host = match node.rsplit_once(':') {
            Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
            _ => node,
        };

        if host.is_empty() {
            return Err(StoreError::Transport {
                reason: format!("no cluster node in address '{}'", address),
            });
        }

        let (scheme, management_port, query_port) = if tls {
            ("https", MANAGEMENT_TLS_PORT, QUERY_TLS_PORT)
        } else {
            ("http", MANAGEMENT_PORT, QUERY_PORT)
        };

        Ok(Self {
            management: format!("{}://{}:{}", scheme, host, management_port),
            query: format!("{}://{}:{}", scheme, host, query_port),
        })
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<Value>,
    #[serde(default)]
    errors: Vec<QueryErrorBody>,
}

#[derive(Debug, Deserialize)]
struct QueryErrorBody {
    code: i64,
    #[serde(default)]
    msg: String,
}

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    scopes: Vec<ManifestScope>,
}

#[derive(Debug, Deserialize)]
struct ManifestScope {
    name: String,
    #[serde(default)]
    collections: Vec<ManifestCollection>,
}

#[derive(Debug, Deserialize)]
struct ManifestCollection {
    name: String,
}

/// HTTP cluster backend
#[derive(Debug)]
pub struct RestCluster {
    client: Client,
    endpoints: Endpoints,
    username: Option<String>,
    password: Option<String>,
    closed: AtomicBool,
}

impl RestCluster {
    /// Connect and authenticate against the management service.
    pub async fn connect(
        address: &str,
        username: Option<&str>,
        password: Option<&str>,
    ) -> StoreResult<Self> {
        let endpoints = Endpoints::from_address(address)?;
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(transport)?;

        let cluster = Self {
            client,
            endpoints,
            username: username.map(str::to_string),
            password: password.map(str::to_string),
            closed: AtomicBool::new(false),
        };

        let url = service_url(&cluster.endpoints.management, &["pools"])?;
        let resp = cluster.send(cluster.client.get(url)).await?;
        if !resp.status().is_success() {
            return Err(management_failure(resp).await);
        }
        debug!(endpoint = %cluster.endpoints.management, "cluster handshake complete");
        Ok(cluster)
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Transport {
                reason: "connection is closed".to_string(),
            });
        }
        Ok(())
    }

    async fn send(&self, request: RequestBuilder) -> StoreResult<Response> {
        let request = match &self.username {
            Some(user) => request.basic_auth(user, self.password.as_deref()),
            None => request,
        };
        request.send().await.map_err(transport)
    }

    /// Management URL under `/pools/default/buckets/{bucket}`
    fn bucket_url(&self, bucket: &str, rest: &[&str]) -> StoreResult<Url> {
        let mut segments = vec!["pools", "default", "buckets", bucket];
        segments.extend_from_slice(rest);
        service_url(&self.endpoints.management, &segments)
    }

    async fn manifest(&self, bucket: &str) -> StoreResult<Manifest> {
        self.ensure_open()?;
        let resp = self.send(self.client.get(self.bucket_url(bucket, &["scopes"])?)).await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Err(StoreError::BucketNotFound {
                bucket: bucket.to_string(),
            }),
            s if s.is_success() => resp.json::<Manifest>().await.map_err(|e| StoreError::Protocol {
                reason: format!("invalid collection manifest: {}", e),
            }),
            _ => Err(management_failure(resp).await),
        }
    }

    /// Run statement text with named parameters through the query service.
    async fn execute(
        &self,
        text: String,
        params: Vec<(&str, Value)>,
        keyspace: &Keyspace,
        index: Option<&str>,
    ) -> StoreResult<Vec<Value>> {
        self.ensure_open()?;

        let mut body = Map::new();
        body.insert("statement".to_string(), Value::String(text));
        for (name, value) in params {
            body.insert(format!("${}", name), value);
        }

        let url = service_url(&self.endpoints.query, &["query", "service"])?;
        let resp = self.send(self.client.post(url).json(&body)).await?;
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(StoreError::Authentication {
                reason: "query service rejected credentials".to_string(),
            });
        }

        let text = resp.text().await.map_err(transport)?;
        let parsed: QueryResponse = serde_json::from_str(&text).map_err(|e| StoreError::Protocol {
            reason: format!("query service returned {} with unreadable body: {}", status, e),
        })?;

        if let Some(first) = parsed.errors.first() {
            return Err(classify_query_error(first.code, &first.msg, keyspace, index));
        }
        if !status.is_success() {
            return Err(StoreError::Protocol {
                reason: format!("query service returned {}", status),
            });
        }
        Ok(parsed.results)
    }
}

#[async_trait]
impl ClusterBackend for RestCluster {
    async fn open_bucket(&self, bucket: &str) -> StoreResult<()> {
        self.ensure_open()?;
        let url = self.bucket_url(bucket, &[])?;
        let resp = self.send(self.client.get(url)).await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Err(StoreError::BucketNotFound {
                bucket: bucket.to_string(),
            }),
            s if s.is_success() => Ok(()),
            _ => Err(management_failure(resp).await),
        }
    }

    async fn close(&self) -> StoreResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(StoreError::Transport {
                reason: "connection already closed".to_string(),
            });
        }
        Ok(())
    }

    async fn upsert(&self, keyspace: &Keyspace, key: &str, document: Value) -> StoreResult<()> {
        let text = format!("UPSERT INTO {} (KEY, VALUE) VALUES ($key, $doc)", keyspace);
        self.execute(
            text,
            vec![("key", json!(key)), ("doc", document)],
            keyspace,
            None,
        )
        .await
        .map(|_| ())
    }

    async fn get(&self, keyspace: &Keyspace, key: &str) -> StoreResult<Value> {
        let text = format!("SELECT RAW d FROM {} AS d USE KEYS $key", keyspace);
        let rows = self
            .execute(text, vec![("key", json!(key))], keyspace, None)
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| StoreError::DocumentNotFound {
                key: key.to_string(),
            })
    }

    async fn remove(&self, keyspace: &Keyspace, key: &str) -> StoreResult<()> {
        let text = format!("DELETE FROM {} USE KEYS $key RETURNING RAW META().id", keyspace);
        let rows = self
            .execute(text, vec![("key", json!(key))], keyspace, None)
            .await?;
        if rows.is_empty() {
            return Err(StoreError::DocumentNotFound {
                key: key.to_string(),
            });
        }
        Ok(())
    }

    async fn query(&self, statement: &Statement) -> StoreResult<Vec<Value>> {
        debug!(kind = statement.kind(), statement = %statement, "executing statement");
        self.execute(
            statement.to_string(),
            Vec::new(),
            statement.keyspace(),
            statement.index_name(),
        )
        .await
    }

    async fn create_collection(
        &self,
        bucket: &str,
        scope: &str,
        collection: &str,
    ) -> StoreResult<()> {
        self.ensure_open()?;
        let url = self.bucket_url(bucket, &["scopes", scope, "collections"])?;
        let resp = self
            .send(self.client.post(url).form(&[("name", collection)]))
            .await?;
        if resp.status().is_success() {
            return Ok(());
        }

        let keyspace = Keyspace::new(bucket, scope, collection);
        Err(match management_body(resp).await {
            (_, body) if body.contains("already exists") => StoreError::CollectionExists {
                keyspace: keyspace.path(),
            },
            (_, body) if body.contains("not found") && body.to_lowercase().contains("scope") => {
                StoreError::ScopeNotFound {
                    scope: scope.to_string(),
                }
            }
            (status, body) => classify_management_status(status, body),
        })
    }

    async fn drop_collection(&self, bucket: &str, scope: &str, collection: &str) -> StoreResult<()> {
        self.ensure_open()?;
        let url = self.bucket_url(bucket, &["scopes", scope, "collections", collection])?;
        let resp = self.send(self.client.delete(url)).await?;
        if resp.status().is_success() {
            return Ok(());
        }

        Err(match management_body(resp).await {
            (status, body) if status == StatusCode::NOT_FOUND || body.contains("not found") => {
                StoreError::CollectionNotFound {
                    keyspace: Keyspace::new(bucket, scope, collection).path(),
                }
            }
            (status, body) => classify_management_status(status, body),
        })
    }

    async fn collection_exists(
        &self,
        bucket: &str,
        scope: &str,
        collection: &str,
    ) -> StoreResult<bool> {
        let manifest = self.manifest(bucket).await?;
        Ok(manifest
            .scopes
            .iter()
            .filter(|s| s.name == scope)
            .flat_map(|s| s.collections.iter())
            .any(|c| c.name == collection))
    }

    async fn create_scope(&self, bucket: &str, scope: &str) -> StoreResult<()> {
        self.ensure_open()?;
        let resp = self
            .send(self.client.post(self.bucket_url(bucket, &["scopes"])?).form(&[("name", scope)]))
            .await?;
        if resp.status().is_success() {
            return Ok(());
        }

        Err(match management_body(resp).await {
            (_, body) if body.contains("already exists") => StoreError::ScopeExists {
                scope: scope.to_string(),
            },
            (status, body) => classify_management_status(status, body),
        })
    }

    async fn drop_scope(&self, bucket: &str, scope: &str) -> StoreResult<()> {
        self.ensure_open()?;
        let url = self.bucket_url(bucket, &["scopes", scope])?;
        let resp = self.send(self.client.delete(url)).await?;
        if resp.status().is_success() {
            return Ok(());
        }

        Err(match management_body(resp).await {
            (status, body) if status == StatusCode::NOT_FOUND || body.contains("not found") => {
                StoreError::ScopeNotFound {
                    scope: scope.to_string(),
                }
            }
            (status, body) => classify_management_status(status, body),
        })
    }

    async fn scope_exists(&self, bucket: &str, scope: &str) -> StoreResult<bool> {
        let manifest = self.manifest(bucket).await?;
        Ok(manifest.scopes.iter().any(|s| s.name == scope))
    }
}

/// Append percent-encoded path segments to a service base URL.
pub fn service_url(base: &str, segments: &[&str]) -> StoreResult<Url> {
    let mut url = Url::parse(base).map_err(|e| StoreError::Transport {
        reason: format!("invalid service url '{}': {}", base, e),
    })?;
    url.path_segments_mut()
        .map_err(|_| StoreError::Transport {
            reason: format!("service url '{}' cannot carry a path", base),
        })?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn transport(err: reqwest::Error) -> StoreError {
    StoreError::Transport {
        reason: err.to_string(),
    }
}

async fn management_body(resp: Response) -> (StatusCode, String) {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    (status, body)
}

async fn management_failure(resp: Response) -> StoreError {
    let (status, body) = management_body(resp).await;
    classify_management_status(status, body)
}

fn classify_management_status(status: StatusCode, body: String) -> StoreError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StoreError::Authentication {
            reason: format!("management service returned {}", status),
        },
        _ => StoreError::Protocol {
            reason: format!("management service returned {}: {}", status, body.trim()),
        },
    }
}

/// Map a query-service error code onto a store error.
pub fn classify_query_error(
    code: i64,
    msg: &str,
    keyspace: &Keyspace,
    index: Option<&str>,
) -> StoreError {
    let lower = msg.to_lowercase();
    let index_path = || format!("{}.{}", keyspace.path(), index.unwrap_or("?"));

    match code {
        4300 => StoreError::IndexExists { index: index_path() },
        12016 => StoreError::IndexNotFound { index: index_path() },
        5000 if lower.contains("index") && lower.contains("not found") => {
            StoreError::IndexNotFound { index: index_path() }
        }
        5000 if lower.contains("index") && lower.contains("already exist") => {
            StoreError::IndexExists { index: index_path() }
        }
        12003 | 12021 => StoreError::CollectionNotFound {
            keyspace: keyspace.path(),
        },
        4000 => StoreError::NoIndexAvailable {
            keyspace: keyspace.path(),
        },
        3000..=3999 => StoreError::MalformedStatement {
            reason: msg.to_string(),
        },
        10000 => StoreError::Authentication {
            reason: msg.to_string(),
        },
        _ => StoreError::Protocol {
            reason: format!("query error {}: {}", code, msg),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoints_from_connection_string() {
        let ep = Endpoints::from_address("couchbase://db1.local,db2.local?network=external").unwrap();
        assert_eq!(ep.management, "http://db1.local:8091");
        assert_eq!(ep.query, "http://db1.local:8093");
    }

    #[test]
    fn test_endpoints_tls() {
        let ep = Endpoints::from_address("couchbases://secure.example.com").unwrap();
        assert_eq!(ep.management, "https://secure.example.com:18091");
        assert_eq!(ep.query, "https://secure.example.com:18093");
    }

    #[test]
    fn test_endpoints_bare_host_with_port() {
        let ep = Endpoints::from_address("localhost:11210").unwrap();
        assert_eq!(ep.management, "http://localhost:8091");
    }

    #[test]
    fn test_service_url_encodes_segments() {
        let url = service_url(
            "http://db1.local:8091",
            &["pools", "default", "buckets", "app", "scopes", "a%2f", "collections", "x/y"],
        )
        .unwrap();
        assert_eq!(
            url.as_str(),
            "http://db1.local:8091/pools/default/buckets/app/scopes/a%252f/collections/x%2Fy"
        );

        let url = service_url("https://secure.example.com:18093", &["query", "service"]).unwrap();
        assert_eq!(url.as_str(), "https://secure.example.com:18093/query/service");
    }

    #[test]
    fn test_endpoints_empty_address() {
        assert!(Endpoints::from_address("couchbase://").is_err());
        assert!(Endpoints::from_address("  ").is_err());
    }

    #[test]
    fn test_classify_query_errors() {
        let ks = Keyspace::new("app", "_default", "users");

        let err = classify_query_error(4300, "The index #primary already exists.", &ks, Some("#primary"));
        assert_eq!(
            err,
            StoreError::IndexExists {
                index: "app._default.users.#primary".to_string()
            }
        );

        let err = classify_query_error(
            12016,
            "Index Not Found - cause: GSI index idx_email not found.",
            &ks,
            Some("idx_email"),
        );
        assert!(matches!(err, StoreError::IndexNotFound { .. }));

        let err = classify_query_error(5000, "GSI index idx_email not found.", &ks, Some("idx_email"));
        assert!(matches!(err, StoreError::IndexNotFound { .. }));

        let err = classify_query_error(12003, "Keyspace not found in CB datastore", &ks, None);
        assert!(err.is_propagating());

        let err = classify_query_error(4000, "No index available on keyspace", &ks, None);
        assert!(matches!(err, StoreError::NoIndexAvailable { .. }));

        let err = classify_query_error(3000, "syntax error - at )", &ks, None);
        assert!(matches!(err, StoreError::MalformedStatement { .. }));

        let err = classify_query_error(5000, "internal failure", &ks, None);
        assert!(matches!(err, StoreError::Protocol { .. }));
    }
}
