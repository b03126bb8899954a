//! RotationGroups: reusable duty templates applied to events
//!
//! Applying a template records an application plus one applied duty per
//! standard duty name. Turning those into roster duties is left to syncs.

use crate::error::{ConceptError, Result};
use crate::storage::{fresh_id, Collection, Versioned};
use crate::wire::{parse, rows};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crewcall_sync::{Completion, Concept};
use crewcall_types::{fields, Fields};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    #[serde(rename = "_id")]
    pub id: String,
    pub owner: String,
    pub title: String,
    pub members: Vec<String>,
    pub standard_duties: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    #[serde(rename = "_id")]
    pub id: String,
    pub template: String,
    pub event: String,
    pub actor: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedDuty {
    #[serde(rename = "_id")]
    pub id: String,
    pub application: String,
    pub template: String,
    pub event: String,
    pub duty_name: String,
    pub actor: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTemplate {
    pub owner: String,
    pub title: String,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub standard_duties: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTemplate {
    pub template: String,
    pub actor: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub members: Option<Vec<String>>,
    #[serde(default)]
    pub standard_duties: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteTemplate {
    pub template: String,
    pub actor: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApplyTemplate {
    pub template: String,
    pub event: String,
    pub actor: String,
}

/// Result of [`RotationGroups::apply_template`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    pub application: String,
    pub duties_emitted: usize,
}

#[derive(Deserialize)]
struct ByTemplate {
    template: String,
}

#[derive(Deserialize)]
struct ByOwner {
    owner: String,
}

#[derive(Deserialize)]
struct ByApplication {
    application: String,
}

const ACTIONS: &[&str] = &[
    "createTemplate",
    "updateTemplate",
    "deleteTemplate",
    "applyTemplate",
];

const QUERIES: &[&str] = &[
    "_getTemplate",
    "_listTemplatesByOwner",
    "_getApplication",
    "_getAppliedDutiesForApplication",
];

/// Deduplicate keeping first occurrence order
fn unique_members(members: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    members
        .into_iter()
        .filter(|m| seen.insert(m.clone()))
        .collect()
}

/// Trim, drop blanks, then deduplicate
fn unique_duties(duties: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    duties
        .into_iter()
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty() && seen.insert(d.clone()))
        .collect()
}

pub struct RotationGroups {
    templates: Collection<Template>,
    applications: Collection<Application>,
    applied: Collection<AppliedDuty>,
}

impl Default for RotationGroups {
    fn default() -> Self {
        Self::new()
    }
}

impl RotationGroups {
    pub fn new() -> Self {
        Self {
            templates: Collection::new("templates"),
            applications: Collection::new("applications"),
            applied: Collection::new("applied_duties"),
        }
    }

    fn owned_template(&self, template: &str, actor: &str) -> Result<Versioned<Template>> {
        let found = self
            .templates
            .get(template)
            .ok_or_else(|| ConceptError::NotFound(format!("Template {template} not found")))?;
        if found.doc.owner != actor {
            return Err(ConceptError::forbidden(
                "Only the template owner may modify/apply this template",
            ));
        }
        Ok(found)
    }

    pub fn create_template(&self, args: CreateTemplate) -> Result<String> {
        let members = unique_members(args.members);
        let standard_duties = unique_duties(args.standard_duties);
        if members.is_empty() {
            return Err(ConceptError::validation("members must be non-empty"));
        }
        if standard_duties.is_empty() {
            return Err(ConceptError::validation("standardDuties must be non-empty"));
        }

        let now = Utc::now();
        let id = fresh_id();
        self.templates.insert(
            &id,
            Template {
                id: id.clone(),
                owner: args.owner,
                title: args.title,
                members,
                standard_duties,
                created_at: now,
                updated_at: now,
            },
        )?;
        Ok(id)
    }

    /// Provided fields replace the stored ones; an empty update is a no-op
    pub fn update_template(&self, args: UpdateTemplate) -> Result<()> {
        let current = self.owned_template(&args.template, &args.actor)?;

        let members = args.members.map(unique_members);
        if members.as_ref().is_some_and(Vec::is_empty) {
            return Err(ConceptError::validation(
                "members must be non-empty when provided",
            ));
        }
        let standard_duties = args.standard_duties.map(unique_duties);
        if standard_duties.as_ref().is_some_and(Vec::is_empty) {
            return Err(ConceptError::validation(
                "standardDuties must be non-empty when provided",
            ));
        }
        if args.title.is_none() && members.is_none() && standard_duties.is_none() {
            return Ok(());
        }

        self.templates
            .update_if(&args.template, current.version, |template| {
                if let Some(title) = args.title {
                    template.title = title;
                }
                if let Some(members) = members {
                    template.members = members;
                }
                if let Some(duties) = standard_duties {
                    template.standard_duties = duties;
                }
                template.updated_at = Utc::now();
            })?;
        Ok(())
    }

    pub fn delete_template(&self, args: DeleteTemplate) -> Result<()> {
        let current = self.owned_template(&args.template, &args.actor)?;
        self.templates.delete_if(&args.template, current.version)?;
        Ok(())
    }

    pub fn apply_template(&self, args: ApplyTemplate) -> Result<Applied> {
        let template = self.owned_template(&args.template, &args.actor)?.doc;

        let now = Utc::now();
        let application = fresh_id();
        self.applications.insert(
            &application,
            Application {
                id: application.clone(),
                template: args.template.clone(),
                event: args.event.clone(),
                actor: args.actor.clone(),
                created_at: now,
            },
        )?;
        for duty_name in &template.standard_duties {
            let id = fresh_id();
            self.applied.insert(
                &id,
                AppliedDuty {
                    id: id.clone(),
                    application: application.clone(),
                    template: args.template.clone(),
                    event: args.event.clone(),
                    duty_name: duty_name.clone(),
                    actor: args.actor.clone(),
                    created_at: now,
                },
            )?;
        }

        Ok(Applied {
            application,
            duties_emitted: template.standard_duties.len(),
        })
    }

    pub fn get_template(&self, template: &str) -> Option<Template> {
        self.templates.get(template).map(|v| v.doc)
    }

    pub fn templates_by_owner(&self, owner: &str) -> Vec<Template> {
        self.templates.find(|t| t.owner == owner)
    }

    pub fn get_application(&self, application: &str) -> Option<Application> {
        self.applications.get(application).map(|v| v.doc)
    }

    pub fn applied_duties(&self, application: &str) -> Vec<AppliedDuty> {
        self.applied.find(|d| d.application == application)
    }

    fn run(&self, action: &str, input: &Fields) -> Result<Fields> {
        match action {
            "createTemplate" => {
                let template = self.create_template(parse(input)?)?;
                Ok(fields! { "template" => template })
            }
            "updateTemplate" => self.update_template(parse(input)?).map(|_| Fields::new()),
            "deleteTemplate" => self.delete_template(parse(input)?).map(|_| Fields::new()),
            "applyTemplate" => {
                let applied = self.apply_template(parse(input)?)?;
                Ok(fields! {
                    "application" => applied.application,
                    "dutiesEmitted" => applied.duties_emitted,
                })
            }
            other => Err(ConceptError::validation(format!(
                "Unknown action RotationGroups.{other}"
            ))),
        }
    }

    fn lookup(&self, query: &str, input: &Fields) -> Result<Vec<Fields>> {
        match query {
            "_getTemplate" => {
                let ByTemplate { template } = parse(input)?;
                Ok(rows(self.get_template(&template).iter()))
            }
            "_listTemplatesByOwner" => {
                let ByOwner { owner } = parse(input)?;
                Ok(rows(&self.templates_by_owner(&owner)))
            }
            "_getApplication" => {
                let ByApplication { application } = parse(input)?;
                Ok(rows(self.get_application(&application).iter()))
            }
            "_getAppliedDutiesForApplication" => {
                let ByApplication { application } = parse(input)?;
                Ok(rows(&self.applied_duties(&application)))
            }
            other => Err(ConceptError::validation(format!(
                "Unknown query RotationGroups.{other}"
            ))),
        }
    }
}

#[async_trait]
impl Concept for RotationGroups {
    fn name(&self) -> &str {
        "RotationGroups"
    }

    fn actions(&self) -> &[&'static str] {
        ACTIONS
    }

    fn queries(&self) -> &[&'static str] {
        QUERIES
    }

    async fn invoke(&self, action: &str, input: &Fields) -> Completion {
        self.run(action, input).into()
    }

    async fn query(&self, query: &str, input: &Fields) -> std::result::Result<Vec<Fields>, String> {
        self.lookup(query, input).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn create(groups: &RotationGroups, duties: &[&str]) -> Result<String> {
        groups.create_template(CreateTemplate {
            owner: "alice".into(),
            title: "Weekend crew".into(),
            members: strings(&["bob", "carol", "bob"]),
            standard_duties: strings(duties),
        })
    }

    #[test]
    fn create_normalizes_members_and_duties() {
        let groups = RotationGroups::new();
        let id = create(&groups, &[" Setup", "Teardown ", "Setup", "  "]).unwrap();
        let template = groups.get_template(&id).unwrap();
        assert_eq!(template.members, strings(&["bob", "carol"]));
        assert_eq!(template.standard_duties, strings(&["Setup", "Teardown"]));

        let err = create(&groups, &["  "]).unwrap_err();
        assert_eq!(err.to_string(), "standardDuties must be non-empty");
    }

    #[test]
    fn update_requires_owner_and_non_empty_lists() {
        let groups = RotationGroups::new();
        let id = create(&groups, &["Setup"]).unwrap();

        let err = groups
            .update_template(UpdateTemplate {
                template: id.clone(),
                actor: "mallory".into(),
                title: Some("Mine".into()),
                members: None,
                standard_duties: None,
            })
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Only the template owner may modify/apply this template"
        );

        let err = groups
            .update_template(UpdateTemplate {
                template: id.clone(),
                actor: "alice".into(),
                title: None,
                members: Some(Vec::new()),
                standard_duties: None,
            })
            .unwrap_err();
        assert_eq!(err.to_string(), "members must be non-empty when provided");

        groups
            .update_template(UpdateTemplate {
                template: id.clone(),
                actor: "alice".into(),
                title: None,
                members: None,
                standard_duties: Some(strings(&["Cleanup"])),
            })
            .unwrap();
        assert_eq!(
            groups.get_template(&id).unwrap().standard_duties,
            strings(&["Cleanup"])
        );
    }

    #[test]
    fn apply_emits_one_applied_duty_per_standard_duty() {
        let groups = RotationGroups::new();
        let id = create(&groups, &["Setup", "Tickets", "Teardown"]).unwrap();
        let applied = groups
            .apply_template(ApplyTemplate {
                template: id.clone(),
                event: "e1".into(),
                actor: "alice".into(),
            })
            .unwrap();
        assert_eq!(applied.duties_emitted, 3);

        let names: Vec<_> = groups
            .applied_duties(&applied.application)
            .into_iter()
            .map(|d| d.duty_name)
            .collect();
        assert_eq!(names, strings(&["Setup", "Tickets", "Teardown"]));
        assert_eq!(
            groups.get_application(&applied.application).unwrap().event,
            "e1"
        );
    }

    #[tokio::test]
    async fn applied_duty_rows_use_wire_names() {
        let groups = RotationGroups::new();
        let id = create(&groups, &["Setup"]).unwrap();
        let output = groups
            .invoke(
                "applyTemplate",
                &fields! { "template" => id, "event" => "e1", "actor" => "alice" },
            )
            .await;
        let Completion::Success(output) = output else {
            panic!("applyTemplate failed");
        };
        assert_eq!(output["dutiesEmitted"], 1);

        let rows = groups
            .query(
                "_getAppliedDutiesForApplication",
                &fields! { "application" => output["application"].clone() },
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["dutyName"], "Setup");
        assert!(rows[0].contains_key("_id"));
    }
}
