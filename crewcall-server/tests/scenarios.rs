//! Request chains through the full sync catalogue

use std::sync::Arc;
use std::time::Duration;

use crewcall_server::auth::JwtSessionStore;
use crewcall_server::App;
use crewcall_sync::{
    fields, request_action, respond_action, ActionName, Fields, Response, SessionStore, Status,
    Value,
};

const TIMEOUT: Duration = Duration::from_secs(5);
const ALICE: &str = "alice@example.com";
const BOB: &str = "bob@example.com";

fn app() -> App {
    let sessions = Arc::new(JwtSessionStore::new(b"scenario-secret", Duration::from_secs(3600)));
    App::with_sessions(sessions).unwrap()
}

async fn signup(app: &App, email: &str) -> String {
    app.sessions.create_account(email, "hunter2").await.unwrap();
    app.sessions.login(email, "hunter2").await.unwrap().token
}

async fn send(app: &App, path: &str, token: Option<&str>, mut body: Fields) -> Response {
    body.insert("path".into(), path.into());
    if let Some(token) = token {
        body.insert("token".into(), token.into());
    }
    app.engine.request_with_timeout(body, TIMEOUT).await.unwrap()
}

fn id(response: &Response, field: &str) -> Value {
    assert!(!response.is_error(), "unexpected error: {:?}", response.body);
    response.body[field].clone()
}

fn invocations(app: &App, action: &str) -> usize {
    let action: ActionName = action.parse().unwrap();
    app.engine
        .log()
        .records()
        .iter()
        .filter(|r| r.action == action)
        .count()
}

fn responses_to(app: &App, response: &Response) -> usize {
    let request = Value::from(response.request);
    app.engine
        .log()
        .records()
        .iter()
        .filter(|r| r.action == respond_action() && r.input.get("request") == Some(&request))
        .count()
}

async fn event_for(app: &App, token: &str) -> Value {
    let created = send(
        app,
        "EventDirectory/createEvent",
        Some(token),
        fields! {
            "creator" => ALICE,
            "title" => "Spring Fair",
            "startsAt" => "2025-04-01T09:00:00Z",
            "endsAt" => "2025-04-01T17:00:00Z",
        },
    )
    .await;
    id(&created, "event")
}

async fn duty_for(app: &App, token: &str, event: &Value) -> Value {
    let added = send(
        app,
        "DutyRoster/addDuty",
        Some(token),
        fields! { "event" => event.clone(), "actor" => ALICE, "title" => "Setup", "dueAt" => "2025-04-01" },
    )
    .await;
    id(&added, "duty")
}

#[tokio::test]
async fn organizer_adds_a_duty_with_one_invocation_and_one_response() {
    let app = app();
    let token = signup(&app, ALICE).await;
    let event = event_for(&app, &token).await;

    let added = send(
        &app,
        "DutyRoster/addDuty",
        Some(&token),
        fields! { "event" => event.clone(), "actor" => ALICE, "title" => "Setup", "dueAt" => "2025-04-01" },
    )
    .await;
    app.engine.settled().await;

    let duty = id(&added, "duty");
    assert_eq!(added.body.len(), 1);
    assert_eq!(invocations(&app, "DutyRoster.addDuty"), 1);
    assert_eq!(responses_to(&app, &added), 1);
    assert!(app.concepts.roster.get_duty(duty.as_str().unwrap()).is_some());
}

#[tokio::test]
async fn non_organizer_gets_exactly_one_error() {
    let app = app();
    let alice = signup(&app, ALICE).await;
    let bob = signup(&app, BOB).await;
    let event = event_for(&app, &alice).await;
    let duty = duty_for(&app, &alice, &event).await;

    let refused = send(
        &app,
        "DutyRoster/assignDuty",
        Some(&bob),
        fields! { "duty" => duty, "actor" => BOB, "assignee" => BOB },
    )
    .await;
    app.engine.settled().await;

    assert_eq!(
        refused.error(),
        Some("Only organizers may modify duties for this event")
    );
    assert_eq!(invocations(&app, "DutyRoster.assignDuty"), 1);
    assert_eq!(responses_to(&app, &refused), 1);
    assert_eq!(invocations(&app, "Notify.notify"), 0);
}

#[tokio::test]
async fn applied_template_fans_out_into_independent_chains() {
    let app = app();
    let token = signup(&app, ALICE).await;
    let event = event_for(&app, &token).await;

    let template = send(
        &app,
        "RotationGroups/createTemplate",
        Some(&token),
        fields! {
            "owner" => ALICE,
            "title" => "Weekend crew",
            "members" => vec![BOB],
            "standardDuties" => vec!["Setup", "Tickets", "Teardown"],
        },
    )
    .await;
    let applied = send(
        &app,
        "RotationGroups/applyTemplate",
        Some(&token),
        fields! {
            "template" => id(&template, "template"),
            "event" => event.clone(),
            "actor" => ALICE,
            "dueAt" => "2025-04-01T08:00:00Z",
        },
    )
    .await;
    app.engine.settled().await;
    assert_eq!(id(&applied, "dutiesEmitted"), 3);

    let mut titles: Vec<_> = app
        .concepts
        .roster
        .event_duties(event.as_str().unwrap())
        .into_iter()
        .map(|d| d.title)
        .collect();
    titles.sort();
    assert_eq!(titles, vec!["Setup", "Teardown", "Tickets"]);

    // Each fanned-out request lives in its own flow and is answered there.
    let records = app.engine.log().records();
    let internal: Vec<_> = records
        .iter()
        .filter(|r| {
            r.action == request_action()
                && r.synced_by.as_deref() == Some("RotationGroups_applyTemplate_FanOut")
        })
        .collect();
    assert_eq!(internal.len(), 3);
    for request in &internal {
        let flow = app.engine.log().flow(request.flow);
        let added: Vec<_> = flow
            .iter()
            .filter(|r| r.action == "DutyRoster.addDuty".parse::<ActionName>().unwrap())
            .collect();
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].status, Status::Succeeded);
        let answered: Vec<_> = flow.iter().filter(|r| r.action == respond_action()).collect();
        assert_eq!(answered.len(), 1);
        assert!(answered[0].input.contains_key("duty"));
    }
    assert!(app.engine.open_requests().is_empty());
}

#[tokio::test]
async fn requests_without_a_valid_token_never_reach_a_concept() {
    let app = app();
    let token = signup(&app, ALICE).await;
    app.sessions.revoke(&token).await;

    let routes: Vec<String> = app.table.exclusions().map(str::to_string).collect();
    for route in &routes {
        for credential in [None, Some("garbage"), Some(token.as_str())] {
            let response = send(&app, route, credential, fields! { "actor" => ALICE }).await;
            assert_eq!(response.error(), Some("Unauthorized"), "{route} with {credential:?}");
        }
    }
    app.engine.settled().await;

    let records = app.engine.log().records();
    assert!(records.iter().all(|r| r.action.concept() == "Requesting"));
    assert_eq!(app.engine.stats().open_requests, 0);
}

#[tokio::test]
async fn assignment_notifies_the_assignee() {
    let app = app();
    let alice = signup(&app, ALICE).await;
    signup(&app, BOB).await;
    let event = event_for(&app, &alice).await;
    let duty = duty_for(&app, &alice, &event).await;

    let assigned = send(
        &app,
        "DutyRoster/assignDuty",
        Some(&alice),
        fields! { "duty" => duty, "actor" => ALICE, "assignee" => BOB },
    )
    .await;
    app.engine.settled().await;
    assert_eq!(assigned.body, fields! { "ok" => true });

    let inbox = app.concepts.notify.user_notifications(BOB, false);
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].body, "Setup");
}

#[tokio::test]
async fn auth_routes_manage_sessions() {
    let app = app();

    let created = send(
        &app,
        "Auth/createAccount",
        None,
        fields! { "email" => "Carol@Example.com", "pw" => "pw" },
    )
    .await;
    assert_eq!(created.body["created"], true);

    let again = send(
        &app,
        "/Auth/createAccount",
        None,
        fields! { "email" => "carol@example.com", "pw" => "pw" },
    )
    .await;
    assert_eq!(again.error(), Some("User already exists"));

    let wrong = send(
        &app,
        "Auth/login",
        None,
        fields! { "email" => "carol@example.com", "pw" => "nope" },
    )
    .await;
    assert_eq!(wrong.body, fields! { "error" => "Log In Failed" });

    let login = send(
        &app,
        "Auth/login",
        None,
        fields! { "email" => "carol@example.com", "pw" => "pw" },
    )
    .await;
    assert_eq!(login.body["userId"], "carol@example.com");
    let token = login.body["token"].as_str().unwrap().to_string();
    assert!(app.sessions.validate(&token).await.is_some());

    let out = send(&app, "Auth/logout", Some(&token), Fields::new()).await;
    assert_eq!(out.body, fields! { "ok" => true });
    assert_eq!(app.sessions.validate(&token).await, None);

    let again = send(&app, "Auth/logout", Some(&token), Fields::new()).await;
    assert_eq!(again.error(), Some("Unauthorized"));
}

#[tokio::test]
async fn concurrent_requests_are_each_answered_once() {
    let app = app();
    let token = signup(&app, ALICE).await;
    let event = event_for(&app, &token).await;

    let pending = (0..16).map(|i| {
        send(
            &app,
            "DutyRoster/addDuty",
            Some(&token),
            fields! {
                "event" => event.clone(),
                "actor" => ALICE,
                "title" => format!("Shift {i}"),
                "dueAt" => "2025-04-01",
            },
        )
    });
    let responses = futures::future::join_all(pending).await;
    app.engine.settled().await;

    for response in &responses {
        id(response, "duty");
        assert_eq!(responses_to(&app, response), 1);
    }
    assert_eq!(invocations(&app, "DutyRoster.addDuty"), 16);
    assert_eq!(app.concepts.roster.event_duties(event.as_str().unwrap()).len(), 16);
}
