//! DevOps project registry used for workspace attribution

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Label carrying the workspace a project belongs to
pub const WORKSPACE_LABEL: &str = "kubesphere.io/workspace";

/// A DevOps project as seen by the audit pipeline
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DevOpsProject {
    pub name: String,
    /// Namespace backing the project; older clients address projects by it
    pub admin_namespace: String,
    pub labels: HashMap<String, String>,
}

impl DevOpsProject {
    pub fn new(name: impl Into<String>, admin_namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            admin_namespace: admin_namespace.into(),
            labels: HashMap::new(),
        }
    }

    pub fn in_workspace(mut self, workspace: impl Into<String>) -> Self {
        self.labels
            .insert(WORKSPACE_LABEL.to_string(), workspace.into());
        self
    }

    pub fn workspace(&self) -> Option<&str> {
        self.labels.get(WORKSPACE_LABEL).map(String::as_str)
    }
}

/// List query handed to the registry. Workspace attribution lists every project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Query;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("project registry unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait ProjectLister: Send + Sync {
    async fn list(&self, query: &Query) -> Result<Vec<DevOpsProject>, RegistryError>;
}

/// Project registry held in process memory
#[derive(Debug, Default)]
pub struct InMemoryProjectRegistry {
    projects: Vec<DevOpsProject>,
}

impl InMemoryProjectRegistry {
    pub fn new(projects: Vec<DevOpsProject>) -> Self {
        Self { projects }
    }
}

#[async_trait]
impl ProjectLister for InMemoryProjectRegistry {
    async fn list(&self, _query: &Query) -> Result<Vec<DevOpsProject>, RegistryError> {
        Ok(self.projects.clone())
    }
}
