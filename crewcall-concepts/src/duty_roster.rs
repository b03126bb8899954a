//! DutyRoster: duties for an event and their lifecycle
//!
//! A duty moves `Open -> Assigned -> Done` and can be reopened. Organizer
//! checks go through an optional [`OrganizerGuard`] so the roster never
//! depends on the event directory directly.

use crate::dates::parse_date;
use crate::error::{ConceptError, Result};
use crate::storage::{fresh_id, Collection, Versioned};
use crate::wire::{parse, row, rows};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crewcall_sync::{Completion, Concept};
use crewcall_types::{fields, Fields, Value};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DutyStatus {
    Open,
    Assigned,
    Done,
}

impl fmt::Display for DutyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DutyStatus::Open => "Open",
            DutyStatus::Assigned => "Assigned",
            DutyStatus::Done => "Done",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Duty {
    #[serde(rename = "_id")]
    pub id: String,
    pub event: String,
    pub title: String,
    pub due_at: DateTime<Utc>,
    pub status: DutyStatus,
    pub assignee: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Decides whether `actor` organizes `event`
#[async_trait]
pub trait OrganizerGuard: Send + Sync {
    async fn is_organizer(&self, event: &str, actor: &str) -> bool;
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddDuty {
    pub event: String,
    pub actor: String,
    pub title: String,
    #[serde(default)]
    pub due_at: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssignDuty {
    pub duty: String,
    pub actor: String,
    pub assignee: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDuty {
    pub duty: String,
    pub actor: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub due_at: Option<Value>,
}

/// Arguments shared by `unassignDuty`, `markDone`, `reOpen` and `deleteDuty`
#[derive(Debug, Clone, Deserialize)]
pub struct DutyActor {
    pub duty: String,
    pub actor: String,
}

#[derive(Deserialize)]
struct ByDuty {
    duty: String,
}

#[derive(Deserialize)]
struct ByEvent {
    event: String,
}

#[derive(Deserialize)]
struct ByUser {
    user: String,
}

const ACTIONS: &[&str] = &[
    "addDuty",
    "assignDuty",
    "unassignDuty",
    "updateDuty",
    "markDone",
    "reOpen",
    "deleteDuty",
];

const QUERIES: &[&str] = &["_getDuty", "_getEventDuties", "_getUserDuties"];

pub struct DutyRoster {
    duties: Collection<Duty>,
    guard: Option<Arc<dyn OrganizerGuard>>,
}

impl Default for DutyRoster {
    fn default() -> Self {
        Self::new()
    }
}

impl DutyRoster {
    /// A roster that skips organizer checks
    pub fn new() -> Self {
        Self {
            duties: Collection::new("duties"),
            guard: None,
        }
    }

    pub fn with_guard(guard: Arc<dyn OrganizerGuard>) -> Self {
        Self {
            duties: Collection::new("duties"),
            guard: Some(guard),
        }
    }

    fn require_duty(&self, duty: &str) -> Result<Versioned<Duty>> {
        self.duties
            .get(duty)
            .ok_or_else(|| ConceptError::NotFound(format!("Duty {duty} not found")))
    }

    async fn require_organizer(&self, event: &str, actor: &str) -> Result<()> {
        let Some(guard) = &self.guard else {
            return Ok(());
        };
        if guard.is_organizer(event, actor).await {
            Ok(())
        } else {
            Err(ConceptError::forbidden(
                "Only organizers may modify duties for this event",
            ))
        }
    }

    /// Commit a change to a duty read at `current`, stamping `updatedAt`
    fn commit(&self, current: &Versioned<Duty>, f: impl FnOnce(&mut Duty)) -> Result<()> {
        let now = Utc::now();
        self.duties.update_if(&current.doc.id, current.version, |duty| {
            f(duty);
            duty.updated_at = now;
        })?;
        Ok(())
    }

    pub async fn add_duty(&self, args: AddDuty) -> Result<String> {
        let due_at =
            parse_date(&args.due_at).ok_or_else(|| ConceptError::validation("dueAt must be a Date"))?;
        self.require_organizer(&args.event, &args.actor).await?;

        let now = Utc::now();
        let id = fresh_id();
        self.duties.insert(
            &id,
            Duty {
                id: id.clone(),
                event: args.event,
                title: args.title,
                due_at,
                status: DutyStatus::Open,
                assignee: None,
                created_at: now,
                updated_at: now,
            },
        )?;
        Ok(id)
    }

    pub async fn assign_duty(&self, args: AssignDuty) -> Result<()> {
        let current = self.require_duty(&args.duty)?;
        self.require_organizer(&current.doc.event, &args.actor).await?;
        if current.doc.status == DutyStatus::Done {
            return Err(ConceptError::validation(format!(
                "Cannot assign when status is {}",
                current.doc.status
            )));
        }
        self.commit(&current, |duty| {
            duty.assignee = Some(args.assignee);
            duty.status = DutyStatus::Assigned;
        })
    }

    pub async fn unassign_duty(&self, args: DutyActor) -> Result<()> {
        let current = self.require_duty(&args.duty)?;
        self.require_organizer(&current.doc.event, &args.actor).await?;
        if current.doc.status != DutyStatus::Assigned {
            return Err(ConceptError::validation(format!(
                "Cannot unassign when status is {}",
                current.doc.status
            )));
        }
        self.commit(&current, |duty| {
            duty.assignee = None;
            duty.status = DutyStatus::Open;
        })
    }

    pub async fn update_duty(&self, args: UpdateDuty) -> Result<()> {
        let current = self.require_duty(&args.duty)?;
        self.require_organizer(&current.doc.event, &args.actor).await?;

        let due_at = match &args.due_at {
            Some(raw) => Some(
                parse_date(raw).ok_or_else(|| ConceptError::validation("dueAt must be a Date"))?,
            ),
            None => None,
        };
        if args.title.is_none() && due_at.is_none() {
            return Ok(());
        }
        self.commit(&current, |duty| {
            if let Some(title) = args.title {
                duty.title = title;
            }
            if let Some(due_at) = due_at {
                duty.due_at = due_at;
            }
        })
    }

    pub async fn mark_done(&self, args: DutyActor) -> Result<()> {
        let current = self.require_duty(&args.duty)?;
        if current.doc.status == DutyStatus::Done {
            return Err(ConceptError::validation(format!(
                "Cannot markDone when status is {}",
                current.doc.status
            )));
        }
        // The assignee may complete their own duty.
        if current.doc.assignee.as_deref() != Some(args.actor.as_str()) {
            self.require_organizer(&current.doc.event, &args.actor).await?;
        }
        self.commit(&current, |duty| duty.status = DutyStatus::Done)
    }

    pub async fn reopen(&self, args: DutyActor) -> Result<()> {
        let current = self.require_duty(&args.duty)?;
        self.require_organizer(&current.doc.event, &args.actor).await?;
        if current.doc.status != DutyStatus::Done {
            return Err(ConceptError::validation(format!(
                "Cannot reopen when status is {}",
                current.doc.status
            )));
        }
        self.commit(&current, |duty| duty.status = DutyStatus::Open)
    }

    pub async fn delete_duty(&self, args: DutyActor) -> Result<()> {
        let current = self.require_duty(&args.duty)?;
        self.require_organizer(&current.doc.event, &args.actor).await?;
        self.duties.delete_if(&args.duty, current.version)?;
        Ok(())
    }

    pub fn get_duty(&self, duty: &str) -> Option<Duty> {
        self.duties.get(duty).map(|v| v.doc)
    }

    pub fn event_duties(&self, event: &str) -> Vec<Duty> {
        self.duties.find(|d| d.event == event)
    }

    pub fn user_duties(&self, user: &str) -> Vec<Duty> {
        self.duties.find(|d| d.assignee.as_deref() == Some(user))
    }

    async fn run(&self, action: &str, input: &Fields) -> Result<Fields> {
        match action {
            "addDuty" => {
                let duty = self.add_duty(parse(input)?).await?;
                Ok(fields! { "duty" => duty })
            }
            "assignDuty" => self.assign_duty(parse(input)?).await.map(|_| Fields::new()),
            "unassignDuty" => self.unassign_duty(parse(input)?).await.map(|_| Fields::new()),
            "updateDuty" => self.update_duty(parse(input)?).await.map(|_| Fields::new()),
            "markDone" => self.mark_done(parse(input)?).await.map(|_| Fields::new()),
            "reOpen" => self.reopen(parse(input)?).await.map(|_| Fields::new()),
            "deleteDuty" => self.delete_duty(parse(input)?).await.map(|_| Fields::new()),
            other => Err(ConceptError::validation(format!("Unknown action DutyRoster.{other}"))),
        }
    }

    fn lookup(&self, query: &str, input: &Fields) -> Result<Vec<Fields>> {
        match query {
            "_getDuty" => {
                let ByDuty { duty } = parse(input)?;
                Ok(self.get_duty(&duty).iter().map(row).collect())
            }
            "_getEventDuties" => {
                let ByEvent { event } = parse(input)?;
                Ok(rows(&self.event_duties(&event)))
            }
            "_getUserDuties" => {
                let ByUser { user } = parse(input)?;
                Ok(rows(&self.user_duties(&user)))
            }
            other => Err(ConceptError::validation(format!("Unknown query DutyRoster.{other}"))),
        }
    }
}

#[async_trait]
impl Concept for DutyRoster {
    fn name(&self) -> &str {
        "DutyRoster"
    }

    fn actions(&self) -> &[&'static str] {
        ACTIONS
    }

    fn queries(&self) -> &[&'static str] {
        QUERIES
    }

    async fn invoke(&self, action: &str, input: &Fields) -> Completion {
        self.run(action, input).await.into()
    }

    async fn query(&self, query: &str, input: &Fields) -> std::result::Result<Vec<Fields>, String> {
        self.lookup(query, input).map_err(|e| e.to_string())
    }
}
