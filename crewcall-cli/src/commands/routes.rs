//! Print the passthrough table and what the registry leaves unclassified.

use anyhow::{Context, Result};
use crewcall_server::{App, ServerConfig};
use serde::Serialize;

#[derive(Serialize)]
struct RouteReport<'a> {
    passthrough: Vec<Passthrough<'a>>,
    gated: Vec<&'a str>,
    unverified: Vec<String>,
    stale: Vec<String>,
}

#[derive(Serialize)]
struct Passthrough<'a> {
    route: &'a str,
    justification: &'a str,
}

pub fn show_routes(json: bool) -> Result<()> {
    let app = App::new(&ServerConfig::default()).context("Failed to assemble the engine")?;
    let concepts = app.engine.concepts();
    let report = RouteReport {
        passthrough: app
            .table
            .inclusions()
            .map(|(route, justification)| Passthrough {
                route,
                justification,
            })
            .collect(),
        gated: app.table.exclusions().collect(),
        unverified: app.table.unverified_routes(concepts),
        stale: app.table.stale_routes(concepts),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Passthrough ({}):", report.passthrough.len());
    for entry in &report.passthrough {
        println!("  {:<48} {}", entry.route, entry.justification);
    }
    println!("Gated ({}):", report.gated.len());
    for route in &report.gated {
        println!("  {}", route);
    }
    if !report.unverified.is_empty() {
        println!("Unverified ({}):", report.unverified.len());
        for route in &report.unverified {
            println!("  {}", route);
        }
    }
    if !report.stale.is_empty() {
        println!("Stale ({}):", report.stale.len());
        for route in &report.stale {
            println!("  {}", route);
        }
    }
    Ok(())
}
