use crate::output::print_json;
use anyhow::Context;
use chrono::Utc;
use clap::Subcommand;
use drip_core::driver::evaluation_scope;
use drip_core::expression::{parse_condition, parse_time_expression};
use drip_core::recipient::{JsonDirectory, RecipientDirectory};
use drip_core::DripError;
use std::path::Path;

#[derive(Subcommand)]
pub enum EvalSubcommand {
    /// Evaluate a condition for one recipient
    Condition {
        expression: String,
        #[arg(long)]
        recipient: String,
    },
    /// Evaluate a start_at expression for one recipient
    StartAt {
        expression: String,
        #[arg(long)]
        recipient: String,
    },
}

pub fn run(root: &Path, subcmd: EvalSubcommand, json: bool) -> anyhow::Result<()> {
    let directory = JsonDirectory::load(root).context("failed to load recipients")?;
    let now = Utc::now();

    match subcmd {
        EvalSubcommand::Condition {
            expression,
            recipient,
        } => {
            let condition = parse_condition(&expression)?;
            let recipient = directory
                .lookup(&recipient)?
                .ok_or(DripError::RecipientNotFound(recipient))?;
            let ctx = recipient.context();
            let result = condition.evaluate(&evaluation_scope(&ctx, now))?;

            if json {
                print_json(&serde_json::json!({
                    "recipient": recipient.id,
                    "condition": condition.as_str(),
                    "result": result,
                }))?;
            } else {
                println!("{result}");
            }
        }
        EvalSubcommand::StartAt {
            expression,
            recipient,
        } => {
            let expr = parse_time_expression(&expression)?;
            let recipient = directory
                .lookup(&recipient)?
                .ok_or(DripError::RecipientNotFound(recipient))?;
            let ctx = recipient.context();
            let at = expr.evaluate(&evaluation_scope(&ctx, now))?;

            if json {
                print_json(&serde_json::json!({
                    "recipient": recipient.id,
                    "start_at": at,
                }))?;
            } else {
                match at {
                    Some(t) => println!("{}", t.to_rfc3339()),
                    None => println!("(no override: due when scheduled)"),
                }
            }
        }
    }
    Ok(())
}
