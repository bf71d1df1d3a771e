//! OpenCTI GraphQL client.
//!
//! Panels talk to OpenCTI through the [`IntelApi`] trait. The web layer asks
//! an [`IntelBackend`] for a client built from the current settings, so a
//! settings save takes effect on the next request and tests can swap in a
//! fake backend.

mod queries;

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error};

use crate::config::OpenCtiConfig;
use crate::error::{Error, Result};

/// Group name that marks an account as a connector.
pub const CONNECTOR_GROUP: &str = "Connectors";

/// Build the GraphQL endpoint from a configured base URL.
///
/// Adds `http://` when no scheme is given, drops trailing slashes and
/// appends `/graphql`.
#[must_use]
pub fn graphql_endpoint(url: &str) -> String {
    format!("{}/graphql", base_url(url))
}

/// Base URL with a scheme and no trailing slash.
#[must_use]
pub fn base_url(url: &str) -> String {
    let url = url.trim();
    let with_scheme = if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("http://{url}")
    };
    with_scheme.trim_end_matches('/').to_string()
}

/// Colour band for an OpenCTI confidence score.
#[must_use]
pub fn confidence_color(confidence: i64) -> &'static str {
    match confidence {
        0..=20 => "#ff0000",
        21..=40 => "#ffa700",
        41..=60 => "#fff400",
        61..=80 => "#a3ff00",
        81..=100 => "#2cba00",
        _ => "#000000",
    }
}

/// Link to the OpenCTI dashboard search for `name`.
#[must_use]
pub fn search_link(url: &str, name: &str) -> String {
    format!(
        "{}/dashboard/search/\"{}\"",
        base_url(url),
        name.replace(' ', "%20")
    )
}

/// One object returned by a free-text search.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// OpenCTI internal id.
    pub id: String,
    /// Entity type, e.g. `Indicator`.
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// Creation time as reported by the platform.
    pub created: Option<String>,
    /// Last update time.
    pub updated: Option<String>,
    /// Creator identity name.
    pub author: Option<String>,
    /// Marking definitions, e.g. `TLP:GREEN`.
    pub markings: Vec<String>,
    /// Label values.
    pub labels: Vec<String>,
    /// Display name, when the entity type has one.
    pub name: Option<String>,
    /// Description, when the entity type has one.
    pub description: Option<String>,
    /// Confidence score for domain objects.
    pub confidence: Option<i64>,
}

/// An OpenCTI platform account.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenCtiUser {
    /// Internal id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Login email.
    pub user_email: Option<String>,
    /// First name.
    pub firstname: Option<String>,
    /// Last name.
    pub lastname: Option<String>,
    /// API token of the account.
    pub api_token: Option<String>,
    /// Whether the account comes from an external provider.
    pub external: Option<bool>,
    /// Whether two-factor authentication is active.
    pub otp_activated: Option<bool>,
    /// Creation time.
    pub created_at: Option<String>,
}

/// An OpenCTI group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenCtiGroup {
    /// Internal id.
    pub id: String,
    /// Group name.
    pub name: String,
}

/// An account together with its groups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserWithGroups {
    /// The account.
    #[serde(flatten)]
    pub user: OpenCtiUser,
    /// Groups the account belongs to.
    pub groups: Vec<OpenCtiGroup>,
    /// Whether it belongs to the connector group.
    pub is_connector: bool,
}

/// Input for creating an OpenCTI account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOpenCtiUser {
    /// Login email.
    pub user_email: String,
    /// Display name.
    pub name: String,
    /// Initial password.
    pub password: String,
    /// First name.
    #[serde(default)]
    pub firstname: String,
    /// Last name.
    #[serde(default)]
    pub lastname: String,
    /// Free-text description.
    #[serde(default)]
    pub description: String,
}

/// Whether any of `groups` is the connector group.
#[must_use]
pub fn is_connector(groups: &[OpenCtiGroup]) -> bool {
    groups.iter().any(|group| group.name == CONNECTOR_GROUP)
}

/// Operations the dashboard performs against OpenCTI.
#[async_trait]
pub trait IntelApi: Send + Sync {
    /// Platform version, used as a connection test.
    async fn about_version(&self) -> Result<String>;

    /// Free-text search across STIX core objects.
    async fn search(&self, term: &str, limit: usize) -> Result<Vec<SearchHit>>;

    /// Accounts matching `search`, ordered by name.
    async fn list_users(&self, search: &str) -> Result<Vec<OpenCtiUser>>;

    /// Groups of one account.
    async fn user_groups(&self, user_id: &str) -> Result<Vec<OpenCtiGroup>>;

    /// Create an account and return its id.
    async fn create_user(&self, user: &NewOpenCtiUser) -> Result<String>;

    /// Delete an account.
    async fn delete_user(&self, user_id: &str) -> Result<()>;

    /// Add an account to a group.
    async fn add_group_member(&self, group_id: &str, user_id: &str) -> Result<()>;
}

/// Produces [`IntelApi`] clients for the current connection settings.
pub trait IntelBackend: Send + Sync {
    /// Build a client for `config`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConfigured`] when the URL or key is missing.
    fn client(&self, config: &OpenCtiConfig) -> Result<Arc<dyn IntelApi>>;
}

/// Backend that talks HTTP to a real OpenCTI platform.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenCtiBackend;

impl IntelBackend for OpenCtiBackend {
    fn client(&self, config: &OpenCtiConfig) -> Result<Arc<dyn IntelApi>> {
        Ok(Arc::new(OpenCtiClient::new(config)?))
    }
}

/// List accounts and look up the groups of each.
///
/// # Errors
///
/// Returns the first upstream error encountered.
pub async fn users_with_groups(api: &dyn IntelApi, search: &str) -> Result<Vec<UserWithGroups>> {
    let users = api.list_users(search).await?;
    let mut out = Vec::with_capacity(users.len());
    for user in users {
        let groups = api.user_groups(&user.id).await?;
        let is_connector = is_connector(&groups);
        out.push(UserWithGroups {
            user,
            groups,
            is_connector,
        });
    }
    Ok(out)
}

/// reqwest-based [`IntelApi`].
#[derive(Debug, Clone)]
pub struct OpenCtiClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl OpenCtiClient {
    /// Create a client for the configured platform.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is not configured or the HTTP
    /// client cannot be built.
    pub fn new(config: &OpenCtiConfig) -> Result<Self> {
        if !config.is_configured() {
            return Err(Error::not_configured("OpenCTI URL or API key"));
        }

        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .map_err(|e| Error::internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            endpoint: graphql_endpoint(&config.url),
            api_key: config.api_key.trim().to_string(),
        })
    }

    /// The GraphQL endpoint this client posts to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn query<T: DeserializeOwned>(&self, query: &str, variables: Value) -> Result<T> {
        debug!("POST {}", self.endpoint);
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await?
            .error_for_status()?;

        let body: GraphQlResponse<T> = response.json().await?;
        body.into_data()
    }
}

#[async_trait]
impl IntelApi for OpenCtiClient {
    async fn about_version(&self) -> Result<String> {
        let data: AboutData = self.query(queries::ABOUT, json!({})).await?;
        Ok(data.about.version)
    }

    async fn search(&self, term: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let data: SearchData = self
            .query(queries::SEARCH, json!({ "search": term, "first": limit }))
            .await?;
        Ok(data.into_hits())
    }

    async fn list_users(&self, search: &str) -> Result<Vec<OpenCtiUser>> {
        let data: UsersData = self
            .query(
                queries::USERS,
                json!({
                    "search": search,
                    "count": 25,
                    "orderBy": "name",
                    "orderMode": "asc",
                }),
            )
            .await?;
        Ok(data.users.edges.into_iter().map(|edge| edge.node).collect())
    }

    async fn user_groups(&self, user_id: &str) -> Result<Vec<OpenCtiGroup>> {
        let data: UserGroupsData = self
            .query(queries::USER_GROUPS, json!({ "id": user_id }))
            .await?;
        let user = data
            .user
            .ok_or_else(|| Error::not_found("OpenCTI user", user_id))?;
        Ok(user.groups.edges.into_iter().map(|edge| edge.node).collect())
    }

    async fn create_user(&self, user: &NewOpenCtiUser) -> Result<String> {
        let data: UserAddData = self
            .query(queries::USER_ADD, json!({ "input": user }))
            .await?;
        Ok(data.user_add.id)
    }

    async fn delete_user(&self, user_id: &str) -> Result<()> {
        let _: Value = self
            .query(queries::USER_DELETE, json!({ "id": user_id }))
            .await?;
        Ok(())
    }

    async fn add_group_member(&self, group_id: &str, user_id: &str) -> Result<()> {
        let _: Value = self
            .query(
                queries::GROUP_MEMBER_ADD,
                json!({
                    "id": group_id,
                    "input": { "fromId": user_id, "relationship_type": "member-of" },
                }),
            )
            .await?;
        Ok(())
    }
}

// Wire shapes of the GraphQL responses.

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    #[serde(default)]
    message: Option<String>,
}

impl<T> GraphQlResponse<T> {
    fn into_data(self) -> Result<T> {
        if let Some(first) = self.errors.into_iter().next() {
            let message = first
                .message
                .unwrap_or_else(|| "Unknown GraphQL error".to_string());
            error!("GraphQL error: {message}");
            return Err(Error::GraphQl { message });
        }
        self.data
            .ok_or_else(|| Error::Upstream("response carried no data".to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct Edges<T> {
    edges: Vec<Edge<T>>,
}

#[derive(Debug, Deserialize)]
struct Edge<T> {
    node: T,
}

#[derive(Debug, Deserialize)]
struct AboutData {
    about: About,
}

#[derive(Debug, Deserialize)]
struct About {
    version: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchData {
    stix_core_objects: Edges<SearchNode>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SearchNode {
    id: String,
    entity_type: Option<String>,
    created_at: Option<String>,
    updated_at: Option<String>,
    #[serde(rename = "createdBy")]
    created_by: Option<NamedRef>,
    #[serde(rename = "objectMarking")]
    object_marking: Option<Vec<MarkingRef>>,
    #[serde(rename = "objectLabel")]
    object_label: Option<Vec<LabelRef>>,
    name: Option<String>,
    description: Option<String>,
    confidence: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NamedRef {
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MarkingRef {
    definition: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LabelRef {
    value: Option<String>,
}

impl SearchData {
    fn into_hits(self) -> Vec<SearchHit> {
        self.stix_core_objects
            .edges
            .into_iter()
            .map(|edge| {
                let node = edge.node;
                SearchHit {
                    id: node.id,
                    kind: node.entity_type,
                    created: node.created_at,
                    updated: node.updated_at,
                    author: node.created_by.and_then(|by| by.name),
                    markings: node
                        .object_marking
                        .unwrap_or_default()
                        .into_iter()
                        .filter_map(|m| m.definition)
                        .collect(),
                    labels: node
                        .object_label
                        .unwrap_or_default()
                        .into_iter()
                        .filter_map(|l| l.value)
                        .collect(),
                    name: node.name,
                    description: node.description,
                    confidence: node.confidence,
                }
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct UsersData {
    users: Edges<OpenCtiUser>,
}

#[derive(Debug, Deserialize)]
struct UserGroupsData {
    user: Option<UserGroupsNode>,
}

#[derive(Debug, Deserialize)]
struct UserGroupsNode {
    groups: Edges<OpenCtiGroup>,
}

#[derive(Debug, Deserialize)]
struct UserAddData {
    #[serde(rename = "userAdd")]
    user_add: CreatedRef,
}

#[derive(Debug, Deserialize)]
struct CreatedRef {
    id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graphql_endpoint_normalization() {
        assert_eq!(
            graphql_endpoint("cti.local:8080"),
            "http://cti.local:8080/graphql"
        );
        assert_eq!(
            graphql_endpoint("https://cti.example.org/"),
            "https://cti.example.org/graphql"
        );
        assert_eq!(
            graphql_endpoint("  http://10.0.0.5:4000//  "),
            "http://10.0.0.5:4000/graphql"
        );
    }

    #[test]
    fn test_confidence_color_bands() {
        assert_eq!(confidence_color(0), "#ff0000");
        assert_eq!(confidence_color(20), "#ff0000");
        assert_eq!(confidence_color(21), "#ffa700");
        assert_eq!(confidence_color(50), "#fff400");
        assert_eq!(confidence_color(75), "#a3ff00");
        assert_eq!(confidence_color(100), "#2cba00");
        assert_eq!(confidence_color(101), "#000000");
        assert_eq!(confidence_color(-1), "#000000");
    }

    #[test]
    fn test_search_link_escapes_spaces() {
        assert_eq!(
            search_link("cti.local:8080/", "Cobalt Strike"),
            "http://cti.local:8080/dashboard/search/\"Cobalt%20Strike\""
        );
    }

    #[test]
    fn test_search_response_mapping() {
        let body = json!({
            "data": {
                "stixCoreObjects": {
                    "edges": [{
                        "node": {
                            "id": "abc",
                            "entity_type": "Indicator",
                            "created_at": "2024-07-24T03:53:07.000Z",
                            "updated_at": "2024-07-25T03:53:07.000Z",
                            "createdBy": { "name": "CTI Team" },
                            "objectMarking": [{ "definition": "TLP:GREEN" }],
                            "objectLabel": [{ "value": "apt" }, { "value": "c2" }],
                            "name": "bad.example",
                            "confidence": 75
                        }
                    }, {
                        "node": { "id": "def", "entity_type": "Artifact", "createdBy": null }
                    }]
                }
            }
        });

        let response: GraphQlResponse<SearchData> = serde_json::from_value(body).unwrap();
        let hits = response.into_data().unwrap().into_hits();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].kind.as_deref(), Some("Indicator"));
        assert_eq!(hits[0].author.as_deref(), Some("CTI Team"));
        assert_eq!(hits[0].markings, vec!["TLP:GREEN"]);
        assert_eq!(hits[0].labels, vec!["apt", "c2"]);
        assert_eq!(hits[0].confidence, Some(75));
        assert_eq!(hits[1].author, None);
        assert!(hits[1].labels.is_empty());

        let json = serde_json::to_value(&hits[0]).unwrap();
        assert_eq!(json["type"], "Indicator");
    }

    #[test]
    fn test_graphql_errors_become_error() {
        let body = json!({
            "data": null,
            "errors": [{ "message": "You are not allowed to do this." }]
        });
        let response: GraphQlResponse<Value> = serde_json::from_value(body).unwrap();
        let err = response.into_data().unwrap_err();
        assert!(matches!(err, Error::GraphQl { .. }));
        assert!(err.to_string().contains("not allowed"));
    }

    #[test]
    fn test_users_response_mapping() {
        let body = json!({
            "data": {
                "users": {
                    "edges": [{
                        "node": {
                            "id": "u1",
                            "name": "analyst",
                            "user_email": "analyst@cti.local",
                            "external": false,
                            "otp_activated": true
                        }
                    }]
                }
            }
        });
        let response: GraphQlResponse<UsersData> = serde_json::from_value(body).unwrap();
        let users = response.into_data().unwrap().users.edges;
        assert_eq!(users[0].node.name, "analyst");
        assert_eq!(users[0].node.otp_activated, Some(true));
        assert_eq!(users[0].node.firstname, None);
    }

    #[test]
    fn test_is_connector() {
        let groups = vec![
            OpenCtiGroup {
                id: "g1".to_string(),
                name: "Default".to_string(),
            },
            OpenCtiGroup {
                id: "g2".to_string(),
                name: CONNECTOR_GROUP.to_string(),
            },
        ];
        assert!(is_connector(&groups));
        assert!(!is_connector(&groups[..1]));
    }

    #[test]
    fn test_client_requires_configuration() {
        let config = OpenCtiConfig::with_credentials("http://cti", "");
        assert!(matches!(
            OpenCtiClient::new(&config),
            Err(Error::NotConfigured { .. })
        ));

        let config = OpenCtiConfig::with_credentials("cti:8080", "token");
        let client = OpenCtiClient::new(&config).unwrap();
        assert_eq!(client.endpoint(), "http://cti:8080/graphql");
    }

    #[tokio::test]
    async fn test_refused_connection_is_unavailable() {
        let config = OpenCtiConfig::with_credentials("http://127.0.0.1:1", "token");
        let client = OpenCtiClient::new(&config).unwrap();

        let err = client.about_version().await.unwrap_err();
        assert!(matches!(err, Error::UpstreamUnavailable(_)), "{err:?}");
        assert_eq!(err.status_code(), axum::http::StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        // Accepted by the kernel backlog but never answered.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut config = OpenCtiConfig::with_credentials(format!("http://{addr}"), "token");
        config.timeout_secs = 1;
        let client = OpenCtiClient::new(&config).unwrap();

        let err = client.about_version().await.unwrap_err();
        assert!(matches!(err, Error::UpstreamTimeout), "{err:?}");
        assert_eq!(err.status_code(), axum::http::StatusCode::GATEWAY_TIMEOUT);
        drop(listener);
    }
}
