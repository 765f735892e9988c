//! Personas: the closed set of conversation modes.
//!
//! A conversation selects exactly one [`PersonaMode`]. The mode decides the
//! system prompt template and which memory scopes retrieval may read. Personas
//! are shared read-only configuration; switching persona never rewrites the
//! turns already recorded.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::memory::ANY_SCOPE;

/// Placeholder substituted with the conversation's customer id.
pub const CUSTOMER_PLACEHOLDER: &str = "{customer}";
/// Placeholder substituted with the conversation's project id.
pub const PROJECT_PLACEHOLDER: &str = "{project}";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersonaMode {
    #[default]
    ScientificAdvisor,
    TechnicalAnalysis,
    CustomerCommunication,
    DataSummary,
    ProjectTracking,
}

impl PersonaMode {
    pub const ALL: [PersonaMode; 5] = [
        Self::ScientificAdvisor,
        Self::TechnicalAnalysis,
        Self::CustomerCommunication,
        Self::DataSummary,
        Self::ProjectTracking,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ScientificAdvisor => "scientific_advisor",
            Self::TechnicalAnalysis => "technical_analysis",
            Self::CustomerCommunication => "customer_communication",
            Self::DataSummary => "data_summary",
            Self::ProjectTracking => "project_tracking",
        }
    }
}

impl std::fmt::Display for PersonaMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PersonaMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == normalized)
            .ok_or_else(|| format!("unknown persona '{s}'"))
    }
}

/// Immutable persona configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    pub mode: PersonaMode,
    pub name: String,
    pub system_prompt_template: String,
    pub allowed_memory_scopes: Vec<String>,
}

impl Persona {
    /// The built-in definition of `mode`.
    pub fn builtin(mode: PersonaMode) -> Self {
        let (name, template, scopes): (&str, &str, &[&str]) = match mode {
            PersonaMode::ScientificAdvisor => (
                "Scientific Advisor",
                concat!(
                    "You are a scientific advisor with access to a knowledge base of customer ",
                    "communications, project facts and technical documents.\n\n",
                    "Ground every answer in the retrieved sources and cite them by number. ",
                    "Use precise scientific language. If the sources do not contain the answer, ",
                    "say so plainly and ask a clarifying question instead of guessing.",
                ),
                &[ANY_SCOPE],
            ),
            PersonaMode::TechnicalAnalysis => (
                "Technical Analysis",
                concat!(
                    "You are a technical analysis specialist.\n\n",
                    "Identify the key parameters, specifications and requirements in the sources. ",
                    "Point out risks and optimization opportunities, use correct units, and base ",
                    "the analysis strictly on the retrieved material.",
                ),
                &["technical", "data"],
            ),
            PersonaMode::CustomerCommunication => (
                "Customer Communication",
                concat!(
                    "You help draft communications for customer {customer} about project {project}.\n\n",
                    "Write clearly and professionally, tailor the message to the customer's history, ",
                    "and finish with concrete next steps.",
                ),
                &["customer", "communication"],
            ),
            PersonaMode::DataSummary => (
                "Data Summary",
                concat!(
                    "You summarize experimental data, reports and technical documents.\n\n",
                    "Lead with the most important findings, keep the quantitative values, ",
                    "call out trends and anomalies, and keep the summary easy to scan.",
                ),
                &["data", "technical"],
            ),
            PersonaMode::ProjectTracking => (
                "Project Tracking",
                concat!(
                    "You track progress and milestones for project {project}.\n\n",
                    "Report the current status, upcoming deadlines and any blockers or risks ",
                    "found in the sources.",
                ),
                &["project", "communication"],
            ),
        };
        Self {
            mode,
            name: name.into(),
            system_prompt_template: template.into(),
            allowed_memory_scopes: scopes.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Fill in the customer and project placeholders.
    pub fn render(&self, customer_id: Option<&str>, project_id: Option<&str>) -> String {
        self.system_prompt_template
            .replace(CUSTOMER_PLACEHOLDER, customer_id.unwrap_or("(unspecified)"))
            .replace(PROJECT_PLACEHOLDER, project_id.unwrap_or("(unspecified)"))
    }
}

/// Override for a built-in persona, as found in configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersonaOverride {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub system_prompt_template: Option<String>,
    #[serde(default)]
    pub allowed_memory_scopes: Option<Vec<String>>,
}

/// Lookup table from mode to persona. Every mode is always present.
#[derive(Debug, Clone)]
pub struct PersonaCatalog {
    personas: HashMap<PersonaMode, Arc<Persona>>,
}

impl PersonaCatalog {
    pub fn builtin() -> Self {
        Self {
            personas: PersonaMode::ALL
                .into_iter()
                .map(|m| (m, Arc::new(Persona::builtin(m))))
                .collect(),
        }
    }

    /// Built-ins with the given overrides applied.
    pub fn with_overrides(overrides: &HashMap<PersonaMode, PersonaOverride>) -> Self {
        let mut catalog = Self::builtin();
        for (mode, o) in overrides {
            let mut persona = Persona::builtin(*mode);
            if let Some(name) = &o.name {
                persona.name = name.clone();
            }
            if let Some(template) = &o.system_prompt_template {
                persona.system_prompt_template = template.clone();
            }
            if let Some(scopes) = &o.allowed_memory_scopes {
                persona.allowed_memory_scopes = scopes.clone();
            }
            catalog.personas.insert(*mode, Arc::new(persona));
        }
        catalog
    }

    pub fn get(&self, mode: PersonaMode) -> Arc<Persona> {
        match self.personas.get(&mode) {
            Some(p) => Arc::clone(p),
            None => Arc::new(Persona::builtin(mode)),
        }
    }
}

impl Default for PersonaCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_mode_is_scientific_advisor() {
        assert_eq!(PersonaMode::default(), PersonaMode::ScientificAdvisor);
    }

    #[test]
    fn mode_parses_loosely() {
        assert_eq!(
            "Technical-Analysis".parse::<PersonaMode>().unwrap(),
            PersonaMode::TechnicalAnalysis
        );
        assert!("pirate".parse::<PersonaMode>().is_err());
    }

    #[test]
    fn render_substitutes_scope() {
        let p = Persona::builtin(PersonaMode::CustomerCommunication);
        let prompt = p.render(Some("acme"), Some("p1"));
        assert!(prompt.contains("customer acme"));
        assert!(prompt.contains("project p1"));
        assert!(!prompt.contains(CUSTOMER_PLACEHOLDER));
    }

    #[test]
    fn overrides_replace_only_given_fields() {
        let mut overrides = HashMap::new();
        overrides.insert(
            PersonaMode::DataSummary,
            PersonaOverride {
                system_prompt_template: Some("Summarize.".into()),
                ..Default::default()
            },
        );
        let catalog = PersonaCatalog::with_overrides(&overrides);
        let p = catalog.get(PersonaMode::DataSummary);
        assert_eq!(p.system_prompt_template, "Summarize.");
        assert_eq!(p.name, "Data Summary");
        assert_eq!(
            catalog.get(PersonaMode::ScientificAdvisor).allowed_memory_scopes,
            vec![ANY_SCOPE.to_string()]
        );
    }
}
