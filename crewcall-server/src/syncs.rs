//! The sync catalogue
//!
//! Every gated route `<Concept>/<action>` gets three rules:
//!
//! - `_Request`: a request with a valid token dispatches the action
//! - `_Response`: the action succeeded; respond with its output
//! - `_Error`: the action failed; respond with its error
//!
//! On top of those sit the authorization gate, the auth routes backed by the
//! session store, and the cross-concept rules (template fan-out and
//! assignment notifications).

use std::sync::Arc;

use async_trait::async_trait;
use crewcall_types::field_str;
use crewcall_sync::{
    fields, lit, opt, var, ActionName, ActionTemplate, EnrichContext, Fields, FrameQuery,
    Pattern, QueryStage, SessionError, SyncBuilder, SyncError, SyncRule, Value, REQUESTING,
};

use crate::auth::{Authorized, Unauthorized};
use crate::passthrough::PassthroughTable;

pub const UNAUTHORIZED: &str = "Unauthorized";

/// A gated route served by one concept action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub concept: &'static str,
    pub action: &'static str,
    /// Request fields passed through to the action
    pub inputs: &'static [&'static str],
    /// Action output fields copied into the response; none means `{ok: true}`
    pub outputs: &'static [&'static str],
}

impl Route {
    const fn new(
        concept: &'static str,
        action: &'static str,
        inputs: &'static [&'static str],
        outputs: &'static [&'static str],
    ) -> Self {
        Self {
            concept,
            action,
            inputs,
            outputs,
        }
    }

    pub fn path(&self) -> String {
        format!("{}/{}", self.concept, self.action)
    }

    pub fn action_name(&self) -> ActionName {
        ActionName::new(self.concept, self.action)
    }

    fn slug(&self) -> String {
        format!("{}_{}", self.concept, self.action)
    }

    fn request(&self) -> Pattern {
        Pattern::new(request())
            .input("path", lit(self.path()))
            .output("request", var("request"))
    }

    fn rules(&self) -> Result<Vec<SyncRule>, SyncError> {
        let slug = self.slug();

        let mut incoming = self.request().input("token", opt("token"));
        let mut dispatch = ActionTemplate::new(self.action_name());
        for field in self.inputs {
            incoming = incoming.input(field, opt(field));
            dispatch = dispatch.field(field, opt(field));
        }
        let request_rule = SyncBuilder::new(format!("{slug}_Request"))
            .when(incoming)
            .filter(Arc::new(Authorized))
            .then(dispatch)
            .build()?;

        let mut reply = ActionTemplate::new(respond()).binds(&["request"]);
        reply = if self.outputs.is_empty() {
            reply.field("ok", lit(true))
        } else {
            reply.binds(self.outputs)
        };
        let response_rule = SyncBuilder::new(format!("{slug}_Response"))
            .when(self.request())
            .when(Pattern::new(self.action_name()).outputs(self.outputs))
            .then(reply)
            .build()?;

        let error_rule = SyncBuilder::new(format!("{slug}_Error"))
            .when(self.request())
            .when(Pattern::new(self.action_name()).outputs(&["error"]))
            .then(ActionTemplate::new(respond()).binds(&["request", "error"]))
            .build()?;

        Ok(vec![request_rule, response_rule, error_rule])
    }
}

pub const ROUTES: &[Route] = &[
    Route::new("DutyRoster", "addDuty", &["event", "actor", "title", "dueAt"], &["duty"]),
    Route::new("DutyRoster", "assignDuty", &["duty", "actor", "assignee"], &[]),
    Route::new("DutyRoster", "unassignDuty", &["duty", "actor"], &[]),
    Route::new("DutyRoster", "updateDuty", &["duty", "actor", "title", "dueAt"], &[]),
    Route::new("DutyRoster", "markDone", &["duty", "actor"], &[]),
    Route::new("DutyRoster", "reOpen", &["duty", "actor"], &[]),
    Route::new("DutyRoster", "deleteDuty", &["duty", "actor"], &[]),
    Route::new(
        "EventDirectory",
        "createEvent",
        &["creator", "title", "startsAt", "endsAt"],
        &["event"],
    ),
    Route::new("EventDirectory", "invite", &["event", "inviter", "invitee", "role"], &[]),
    Route::new("EventDirectory", "setActive", &["event", "setter", "flag"], &[]),
    Route::new("EventDirectory", "removeMember", &["event", "actor", "member"], &[]),
    Route::new("EventDirectory", "deleteEvent", &["event", "actor"], &[]),
    Route::new("Notify", "notify", &["recipient", "subject", "body"], &["notification"]),
    Route::new("Notify", "markRead", &["notification", "user"], &[]),
    Route::new("Notify", "deleteNotification", &["notification", "user"], &[]),
    Route::new(
        "RotationGroups",
        "createTemplate",
        &["owner", "title", "members", "standardDuties"],
        &["template"],
    ),
    Route::new(
        "RotationGroups",
        "updateTemplate",
        &["template", "actor", "title", "members", "standardDuties"],
        &[],
    ),
    Route::new("RotationGroups", "deleteTemplate", &["template", "actor"], &[]),
    Route::new(
        "RotationGroups",
        "applyTemplate",
        &["template", "event", "actor"],
        &["application", "dutiesEmitted"],
    ),
];

fn request() -> ActionName {
    ActionName::new(REQUESTING, "request")
}

fn respond() -> ActionName {
    ActionName::new(REQUESTING, "respond")
}

fn concept(name: &str, action: &str) -> ActionName {
    ActionName::new(name, action)
}

/// The complete rule set for the standard concepts
pub fn catalogue(table: &Arc<PassthroughTable>) -> Result<Vec<SyncRule>, SyncError> {
    let mut rules = vec![auth_gate(table)?];
    for route in ROUTES {
        rules.extend(route.rules()?);
    }
    rules.push(organizer_check()?);
    for path in ["Auth/createAccount", "/Auth/createAccount"] {
        rules.push(auth_route(path, AuthQuery::CreateAccount)?);
    }
    for path in ["Auth/login", "/Auth/login"] {
        rules.push(auth_route(path, AuthQuery::Login)?);
    }
    for path in ["Auth/logout", "/Auth/logout"] {
        rules.push(auth_route(path, AuthQuery::Logout)?);
    }
    rules.push(apply_template_fan_out()?);
    rules.push(assign_duty_notify()?);
    Ok(rules)
}

/// Requests to gated routes without a valid token are answered
/// `Unauthorized` and never reach a concept
fn auth_gate(table: &Arc<PassthroughTable>) -> Result<SyncRule, SyncError> {
    SyncBuilder::new("AuthGate_Unauthorized")
        .when(
            Pattern::new(request())
                .input("path", var("path"))
                .input("token", opt("token"))
                .output("request", var("request")),
        )
        .filter(Arc::new(Unauthorized::new(table.clone())))
        .then(
            ActionTemplate::new(respond())
                .binds(&["request"])
                .field("error", lit(UNAUTHORIZED)),
        )
        .build()
}

/// `EventDirectory/hasOrganizerRole` answers `{isOrganizer}` instead of
/// dropping the request when the role is missing
fn organizer_check() -> Result<SyncRule, SyncError> {
    let query = QueryStage::new(Arc::new(Probe::new(concept(
        "EventDirectory",
        "hasOrganizerRole",
    ))))
    .input("event", opt("event"))
    .input("user", opt("user"))
    .output("found", "isOrganizer");

    SyncBuilder::new("EventDirectory_hasOrganizerRole_Request")
        .when(
            Pattern::new(request())
                .input("path", lit("EventDirectory/hasOrganizerRole"))
                .input("token", opt("token"))
                .input("event", opt("event"))
                .input("user", opt("user"))
                .output("request", var("request")),
        )
        .filter(Arc::new(Authorized))
        .query(query)
        .then(ActionTemplate::new(respond()).binds(&["request", "isOrganizer"]))
        .build()
}

fn auth_route(path: &str, query: AuthQuery) -> Result<SyncRule, SyncError> {
    let name = format!(
        "Auth_{}{}",
        query.label(),
        if path.starts_with('/') { "_Slash" } else { "" }
    );
    let mut incoming = Pattern::new(request())
        .input("path", lit(path))
        .output("request", var("request"));
    let mut stage = QueryStage::new(Arc::new(query));
    for field in query.inputs() {
        incoming = incoming.input(field, opt(field));
        stage = stage.input(field, opt(field));
    }
    let mut reply = ActionTemplate::new(respond())
        .binds(&["request"])
        .field("error", opt("authError"));
    for field in query.outputs() {
        stage = stage.output(field, field);
        reply = reply.field(field, opt(field));
    }
    stage = stage.output("authError", "authError");

    SyncBuilder::new(name)
        .when(incoming)
        .query(stage)
        .then(reply)
        .build()
}

/// Applying a template with a `dueAt` turns every applied duty into its own
/// `DutyRoster/addDuty` request, each in a flow of its own
fn apply_template_fan_out() -> Result<SyncRule, SyncError> {
    SyncBuilder::new("RotationGroups_applyTemplate_FanOut")
        .when(
            Pattern::new(request())
                .input("path", lit("RotationGroups/applyTemplate"))
                .input("dueAt", var("dueAt"))
                .input("token", opt("token"))
                .output("request", var("request")),
        )
        .when(
            Pattern::new(concept("RotationGroups", "applyTemplate")).outputs(&["application"]),
        )
        .query(
            QueryStage::concept(concept("RotationGroups", "_getAppliedDutiesForApplication"))
                .input("application", var("application"))
                .output("event", "event")
                .output("actor", "actor")
                .output("dutyName", "title"),
        )
        .then(
            ActionTemplate::new(request())
                .field("path", lit("DutyRoster/addDuty"))
                .binds(&["event", "actor", "title", "dueAt"])
                .field("token", opt("token")),
        )
        .build()
}

/// A successful assignment notifies the assignee
fn assign_duty_notify() -> Result<SyncRule, SyncError> {
    SyncBuilder::new("DutyRoster_assignDuty_Notify")
        .when(Pattern::new(concept("DutyRoster", "assignDuty")).inputs(&["duty", "assignee"]))
        .query(
            QueryStage::concept(concept("DutyRoster", "_getDuty"))
                .input("duty", var("duty"))
                .output("title", "title"),
        )
        .then(
            ActionTemplate::new(concept("Notify", "notify"))
                .field("recipient", var("assignee"))
                .field("subject", lit("You have been assigned a duty"))
                .field("body", var("title")),
        )
        .build()
}

/// Session-store operations used as where-queries by the auth routes.
/// Each yields exactly one row; failures land in `authError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthQuery {
    CreateAccount,
    Login,
    Logout,
}

impl AuthQuery {
    fn label(&self) -> &'static str {
        match self {
            AuthQuery::CreateAccount => "createAccount",
            AuthQuery::Login => "login",
            AuthQuery::Logout => "logout",
        }
    }

    fn inputs(&self) -> &'static [&'static str] {
        match self {
            AuthQuery::CreateAccount | AuthQuery::Login => &["email", "pw"],
            AuthQuery::Logout => &["token"],
        }
    }

    fn outputs(&self) -> &'static [&'static str] {
        match self {
            AuthQuery::CreateAccount => &["created", "message"],
            AuthQuery::Login => &["token", "userId"],
            AuthQuery::Logout => &["ok"],
        }
    }
}

fn failed(error: SessionError) -> Fields {
    fields! { "authError" => error.to_string() }
}

#[async_trait]
impl FrameQuery for AuthQuery {
    fn name(&self) -> &str {
        self.label()
    }

    async fn query(&self, input: &Fields, cx: &EnrichContext<'_>) -> Result<Vec<Fields>, String> {
        let text = |name| field_str(input, name).unwrap_or_default();
        let row = match self {
            AuthQuery::CreateAccount => {
                match cx.sessions.create_account(text("email"), text("pw")).await {
                    Ok(_) => fields! {
                        "created" => true,
                        "message" => "Account created, please log in",
                    },
                    Err(error) => {
                        let mut row = failed(error);
                        row.insert("created".to_string(), Value::Bool(false));
                        row
                    }
                }
            }
            AuthQuery::Login => match cx.sessions.login(text("email"), text("pw")).await {
                Ok(session) => fields! { "token" => session.token, "userId" => session.user },
                Err(error) => failed(error),
            },
            AuthQuery::Logout => {
                if cx.sessions.revoke(text("token")).await {
                    fields! { "ok" => true }
                } else {
                    fields! { "authError" => UNAUTHORIZED }
                }
            }
        };
        Ok(vec![row])
    }
}

/// Wraps a row-per-match query into one `{found: bool}` row
pub struct Probe {
    query: ActionName,
    label: String,
}

impl Probe {
    pub fn new(query: ActionName) -> Self {
        let label = format!("probe {query}");
        Self { query, label }
    }
}

#[async_trait]
impl FrameQuery for Probe {
    fn name(&self) -> &str {
        &self.label
    }

    async fn query(&self, input: &Fields, cx: &EnrichContext<'_>) -> Result<Vec<Fields>, String> {
        let rows = cx.concepts.query(&self.query, input).await?;
        Ok(vec![fields! { "found" => !rows.is_empty() }])
    }
}
