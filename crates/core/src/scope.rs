//! Directory of known customers and their projects.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::IngestError;

/// Customers and the projects registered under each.
///
/// An `open` directory accepts any id pair; otherwise both ids must be
/// registered.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnownScopes {
    #[serde(default)]
    pub open: bool,
    #[serde(default)]
    customers: BTreeMap<String, BTreeSet<String>>,
}

impl KnownScopes {
    pub fn new() -> Self {
        Self::default()
    }

    /// A directory that accepts every customer and project.
    pub fn open() -> Self {
        Self {
            open: true,
            customers: BTreeMap::new(),
        }
    }

    pub fn with_project(mut self, customer_id: &str, project_id: &str) -> Self {
        self.register(customer_id, project_id);
        self
    }

    pub fn register(&mut self, customer_id: &str, project_id: &str) {
        self.customers
            .entry(customer_id.to_string())
            .or_default()
            .insert(project_id.to_string());
    }

    pub fn customers(&self) -> impl Iterator<Item = (&String, &BTreeSet<String>)> {
        self.customers.iter()
    }

    /// Reject an unknown customer id.
    pub fn validate_customer(&self, customer_id: &str) -> Result<(), IngestError> {
        if self.open || self.customers.contains_key(customer_id) {
            Ok(())
        } else {
            Err(IngestError::UnknownCustomer(customer_id.to_string()))
        }
    }

    /// Reject unknown ids.
    pub fn validate(&self, customer_id: &str, project_id: &str) -> Result<(), IngestError> {
        if self.open {
            return Ok(());
        }
        let projects = self
            .customers
            .get(customer_id)
            .ok_or_else(|| IngestError::UnknownCustomer(customer_id.to_string()))?;
        if projects.contains(project_id) {
            Ok(())
        } else {
            Err(IngestError::UnknownProject {
                customer: customer_id.to_string(),
                project: project_id.to_string(),
            })
        }
    }
}
