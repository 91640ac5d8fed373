//! Request info resolution
//!
//! Splits an API path such as
//! `/kapis/iam.kubesphere.io/v1alpha2/workspaces/demo/namespaces/dev/users/bob/status`
//! into group, version, scope, resource, name and subresource, and maps the
//! HTTP method onto a resource verb.

use axum::http::{Method, Uri};

/// Prefixes served by the Kubernetes API server itself
const KUBERNETES_API_PREFIXES: [&str; 2] = ["api", "apis"];

/// Prefix of the platform's own extension APIs
const PLATFORM_API_PREFIX: &str = "kapis";

/// Legacy core group prefix, which has no group segment
const LEGACY_API_PREFIX: &str = "api";

pub const SCOPE_CLUSTER: &str = "Cluster";
pub const SCOPE_WORKSPACE: &str = "Workspace";
pub const SCOPE_NAMESPACE: &str = "Namespace";
pub const SCOPE_DEVOPS: &str = "DevOps";

/// Everything the audit layer needs to know about a request's target
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RequestInfo {
    pub is_resource_request: bool,
    pub is_kubernetes_request: bool,
    pub path: String,
    pub verb: String,
    pub api_prefix: String,
    pub api_group: String,
    pub api_version: String,
    pub cluster: String,
    pub workspace: String,
    pub namespace: String,
    pub devops: String,
    pub resource: String,
    pub name: String,
    pub subresource: String,
    pub resource_scope: String,
}

/// Resolves [`RequestInfo`] from the method and path
#[derive(Debug, Clone, Default)]
pub struct RequestInfoResolver;

impl RequestInfoResolver {
    pub fn new() -> Self {
        Self
    }

    pub fn resolve(&self, method: &Method, uri: &Uri) -> RequestInfo {
        let path = uri.path();
        let mut info = RequestInfo {
            path: path.to_string(),
            verb: method.as_str().to_lowercase(),
            ..Default::default()
        };

        let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        let Some((&prefix, mut rest)) = parts.split_first() else {
            return info;
        };

        if prefix != PLATFORM_API_PREFIX && !KUBERNETES_API_PREFIXES.contains(&prefix) {
            return info;
        }
        info.api_prefix = prefix.to_string();
        info.is_kubernetes_request = KUBERNETES_API_PREFIXES.contains(&prefix);

        if let ["clusters", cluster, tail @ ..] = rest {
            info.cluster = cluster.to_string();
            rest = tail;
        }

        if prefix == LEGACY_API_PREFIX {
            let Some((version, tail)) = rest.split_first() else {
                return info;
            };
            info.api_version = version.to_string();
            rest = tail;
        } else {
            let [group, version, tail @ ..] = rest else {
                return info;
            };
            info.api_group = group.to_string();
            info.api_version = version.to_string();
            rest = tail;
        }

        // Discovery endpoints such as /apis/apps/v1 stop here.
        if rest.is_empty() {
            return info;
        }

        info.is_resource_request = true;
        info.verb = resource_verb(method).to_string();

        loop {
            match rest {
                ["workspaces", workspace, tail @ ..] if !tail.is_empty() => {
                    info.workspace = workspace.to_string();
                    rest = tail;
                },
                ["namespaces", namespace, tail @ ..] if !tail.is_empty() => {
                    info.namespace = namespace.to_string();
                    rest = tail;
                },
                ["devops", devops, tail @ ..] if !tail.is_empty() => {
                    info.devops = devops.to_string();
                    rest = tail;
                },
                _ => break,
            }
        }

        if let Some(resource) = rest.first() {
            info.resource = resource.to_string();
        }
        if let Some(name) = rest.get(1) {
            info.name = name.to_string();
        }
        if let Some(subresource) = rest.get(2) {
            info.subresource = subresource.to_string();
        }

        // A scope object addressed directly scopes itself.
        match info.resource.as_str() {
            "workspaces" if !info.name.is_empty() => info.workspace = info.name.clone(),
            "namespaces" if !info.name.is_empty() => info.namespace = info.name.clone(),
            "devops" if !info.name.is_empty() => info.devops = info.name.clone(),
            _ => {},
        }

        if info.name.is_empty() {
            let collection_verb = match info.verb.as_str() {
                "get" if is_watch(uri) => Some("watch"),
                "get" => Some("list"),
                "delete" => Some("deletecollection"),
                _ => None,
            };
            if let Some(verb) = collection_verb {
                info.verb = verb.to_string();
            }
        }

        info.resource_scope = if !info.namespace.is_empty() {
            SCOPE_NAMESPACE
        } else if !info.devops.is_empty() {
            SCOPE_DEVOPS
        } else if !info.workspace.is_empty() {
            SCOPE_WORKSPACE
        } else {
            SCOPE_CLUSTER
        }
        .to_string();

        info
    }
}

fn resource_verb(method: &Method) -> &str {
    match *method {
        Method::POST => "create",
        Method::GET | Method::HEAD => "get",
        Method::PUT => "update",
        Method::PATCH => "patch",
        Method::DELETE => "delete",
        _ => "",
    }
}

fn is_watch(uri: &Uri) -> bool {
    query_pairs(uri)
        .iter()
        .any(|(key, value)| key == "watch" && (value == "true" || value == "1"))
}

/// Whether the query string carries `name`, with or without a value
pub(crate) fn has_query_param(uri: &Uri, name: &str) -> bool {
    query_pairs(uri).iter().any(|(key, _)| key == name)
}

/// Percent-decoded query pairs; an undecodable query has none.
fn query_pairs(uri: &Uri) -> Vec<(String, String)> {
    serde_urlencoded::from_str(uri.query().unwrap_or_default()).unwrap_or_default()
}
