//! EventDirectory: events and their memberships
//!
//! The creator of an event becomes its first organizer. Organizers invite
//! members, toggle the active flag, remove members and delete the event.

use crate::dates::parse_date;
use crate::duty_roster::OrganizerGuard;
use crate::error::{ConceptError, Result};
use crate::storage::{fresh_id, Collection};
use crate::wire::{parse, row, rows};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crewcall_sync::{Completion, Concept};
use crewcall_types::{fields, Fields, Value};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Organizer,
    DutyMember,
}

impl FromStr for Role {
    type Err = ConceptError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Organizer" => Ok(Role::Organizer),
            "DutyMember" => Ok(Role::DutyMember),
            other => Err(ConceptError::validation(format!("Invalid role {other}"))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Organizer => "Organizer",
            Role::DutyMember => "DutyMember",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
    #[serde(rename = "_id")]
    pub id: String,
    pub event: String,
    pub user: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEvent {
    pub creator: String,
    pub title: String,
    #[serde(default)]
    pub starts_at: Value,
    #[serde(default)]
    pub ends_at: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Invite {
    pub event: String,
    pub inviter: String,
    pub invitee: String,
    pub role: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetActive {
    pub event: String,
    pub setter: String,
    pub flag: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoveMember {
    pub event: String,
    pub actor: String,
    pub member: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteEvent {
    pub event: String,
    pub actor: String,
}

#[derive(Deserialize)]
struct ByEvent {
    event: String,
}

#[derive(Deserialize)]
struct ByUser {
    user: String,
}

#[derive(Deserialize)]
struct EventUser {
    event: String,
    user: String,
}

/// Membership row as returned by the list queries
#[derive(Serialize)]
struct MemberRow<'a> {
    user: &'a str,
    role: Role,
}

#[derive(Serialize)]
struct UserEventRow<'a> {
    event: &'a str,
    role: Role,
}

const ACTIONS: &[&str] = &["createEvent", "invite", "setActive", "removeMember", "deleteEvent"];

const QUERIES: &[&str] = &[
    "eventExists",
    "hasOrganizerRole",
    "_getEventMembers",
    "_getUserEvents",
    "_getEvent",
];

pub struct EventDirectory {
    events: Collection<Event>,
    memberships: Collection<Membership>,
}

impl Default for EventDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl EventDirectory {
    pub fn new() -> Self {
        Self {
            events: Collection::new("events"),
            memberships: Collection::new("memberships"),
        }
    }

    pub fn event_exists(&self, event: &str) -> bool {
        self.events.contains(event)
    }

    pub fn has_organizer_role(&self, event: &str, user: &str) -> bool {
        self.memberships
            .any(|m| m.event == event && m.user == user && m.role == Role::Organizer)
    }

    fn require_event(&self, event: &str) -> Result<()> {
        if self.event_exists(event) {
            Ok(())
        } else {
            Err(ConceptError::NotFound(format!("Event {event} not found")))
        }
    }

    fn require_organizer(&self, event: &str, user: &str, message: &str) -> Result<()> {
        self.require_event(event)?;
        if self.has_organizer_role(event, user) {
            Ok(())
        } else {
            Err(ConceptError::forbidden(message))
        }
    }

    pub fn create_event(&self, args: CreateEvent) -> Result<String> {
        let (Some(starts_at), Some(ends_at)) = (parse_date(&args.starts_at), parse_date(&args.ends_at))
        else {
            return Err(ConceptError::validation(
                "startsAt and endsAt must be valid dates",
            ));
        };
        if starts_at >= ends_at {
            return Err(ConceptError::validation(
                "startsAt must be earlier than endsAt",
            ));
        }

        let now = Utc::now();
        let id = fresh_id();
        self.events.insert(
            &id,
            Event {
                id: id.clone(),
                title: args.title,
                starts_at,
                ends_at,
                active: true,
                created_at: now,
                updated_at: now,
            },
        )?;
        let membership = fresh_id();
        self.memberships.insert(
            &membership,
            Membership {
                id: membership.clone(),
                event: id.clone(),
                user: args.creator,
                role: Role::Organizer,
                created_at: now,
                updated_at: now,
            },
        )?;
        Ok(id)
    }

    /// Add or re-role a member. Repeated invites update the role.
    pub fn invite(&self, args: Invite) -> Result<()> {
        self.require_organizer(&args.event, &args.inviter, "Only organizers may invite members")?;
        let role: Role = args.role.parse()?;

        let now = Utc::now();
        let (event, invitee) = (args.event, args.invitee);
        self.memberships.upsert_where(
            |m| m.event == event && m.user == invitee,
            |m| {
                m.role = role;
                m.updated_at = now;
            },
            || {
                let id = fresh_id();
                (
                    id.clone(),
                    Membership {
                        id,
                        event: event.clone(),
                        user: invitee.clone(),
                        role,
                        created_at: now,
                        updated_at: now,
                    },
                )
            },
        );
        Ok(())
    }

    pub fn set_active(&self, args: SetActive) -> Result<()> {
        self.require_organizer(
            &args.event,
            &args.setter,
            "Only organizers may modify event active status",
        )?;
        let current = self
            .events
            .get(&args.event)
            .ok_or_else(|| ConceptError::NotFound(format!("Event {} not found", args.event)))?;
        self.events.update_if(&args.event, current.version, |event| {
            event.active = args.flag;
            event.updated_at = Utc::now();
        })?;
        Ok(())
    }

    pub fn remove_member(&self, args: RemoveMember) -> Result<()> {
        self.require_organizer(&args.event, &args.actor, "Only organizers may remove members")?;
        let removed = self
            .memberships
            .delete_where(|m| m.event == args.event && m.user == args.member);
        if removed == 0 {
            return Err(ConceptError::NotFound(format!(
                "User {} is not a member of event {}",
                args.member, args.event
            )));
        }
        Ok(())
    }

    /// Delete an event together with all of its memberships
    pub fn delete_event(&self, args: DeleteEvent) -> Result<()> {
        self.require_organizer(&args.event, &args.actor, "Only organizers may delete events")?;
        let current = self
            .events
            .get(&args.event)
            .ok_or_else(|| ConceptError::NotFound(format!("Event {} not found", args.event)))?;
        self.events.delete_if(&args.event, current.version)?;
        self.memberships.delete_where(|m| m.event == args.event);
        Ok(())
    }

    pub fn get_event(&self, event: &str) -> Option<Event> {
        self.events.get(event).map(|v| v.doc)
    }

    pub fn event_members(&self, event: &str) -> Vec<Membership> {
        self.memberships.find(|m| m.event == event)
    }

    pub fn user_events(&self, user: &str) -> Vec<Membership> {
        self.memberships.find(|m| m.user == user)
    }

    fn run(&self, action: &str, input: &Fields) -> Result<Fields> {
        match action {
            "createEvent" => {
                let event = self.create_event(parse(input)?)?;
                Ok(fields! { "event" => event })
            }
            "invite" => self.invite(parse(input)?).map(|_| Fields::new()),
            "setActive" => self.set_active(parse(input)?).map(|_| Fields::new()),
            "removeMember" => self.remove_member(parse(input)?).map(|_| Fields::new()),
            "deleteEvent" => self.delete_event(parse(input)?).map(|_| Fields::new()),
            other => Err(ConceptError::validation(format!(
                "Unknown action EventDirectory.{other}"
            ))),
        }
    }

    /// Boolean checks answer with one row when true and none when false,
    /// so they can gate a sync's where clause.
    fn lookup(&self, query: &str, input: &Fields) -> Result<Vec<Fields>> {
        match query {
            "eventExists" => {
                let ByEvent { event } = parse(input)?;
                let found = self.event_exists(&event);
                Ok(found.then(|| fields! { "event" => event }).into_iter().collect())
            }
            "hasOrganizerRole" => {
                let EventUser { event, user } = parse(input)?;
                let found = self.has_organizer_role(&event, &user);
                Ok(found
                    .then(|| fields! { "event" => event, "user" => user })
                    .into_iter()
                    .collect())
            }
            "_getEventMembers" => {
                let ByEvent { event } = parse(input)?;
                let members = self.event_members(&event);
                Ok(members
                    .iter()
                    .map(|m| row(&MemberRow { user: &m.user, role: m.role }))
                    .collect())
            }
            "_getUserEvents" => {
                let ByUser { user } = parse(input)?;
                let events = self.user_events(&user);
                Ok(events
                    .iter()
                    .map(|m| row(&UserEventRow { event: &m.event, role: m.role }))
                    .collect())
            }
            "_getEvent" => {
                let ByEvent { event } = parse(input)?;
                Ok(rows(self.get_event(&event).iter()))
            }
            other => Err(ConceptError::validation(format!(
                "Unknown query EventDirectory.{other}"
            ))),
        }
    }
}

#[async_trait]
impl Concept for EventDirectory {
    fn name(&self) -> &str {
        "EventDirectory"
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

/// Lets a roster check organizer rights against this directory
#[async_trait]
impl OrganizerGuard for EventDirectory {
    async fn is_organizer(&self, event: &str, actor: &str) -> bool {
        self.has_organizer_role(event, actor)
    }
}
