//! List the sync catalogue.

use std::sync::Arc;

use anyhow::{Context, Result};
use crewcall_server::{passthrough::PassthroughTable, syncs::catalogue};
use serde::Serialize;

#[derive(Serialize)]
struct RuleSummary {
    name: String,
    when: Vec<String>,
    stages: Vec<String>,
    then: Vec<String>,
}

pub fn list_syncs(json: bool) -> Result<()> {
    let rules = catalogue(&Arc::new(PassthroughTable::standard()))
        .context("Failed to build the sync catalogue")?;
    let summaries: Vec<RuleSummary> = rules
        .iter()
        .map(|rule| RuleSummary {
            name: rule.name().to_string(),
            when: rule.when().iter().map(|p| p.action.to_string()).collect(),
            stages: rule.stages().iter().map(|s| s.name().to_string()).collect(),
            then: rule.then().iter().map(|t| t.action.to_string()).collect(),
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
    } else {
        for rule in &summaries {
            println!("{}: {} -> {}", rule.name, rule.when.join(" + "), rule.then.join(", "));
        }
        println!("{} syncs", summaries.len());
    }
    Ok(())
}
