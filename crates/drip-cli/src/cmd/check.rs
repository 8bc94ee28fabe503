use crate::output::print_json;
use clap::Subcommand;
use drip_core::expression::{
    parse_condition, parse_time_expression, test_conditions, test_start_at,
};

#[derive(Subcommand)]
pub enum CheckSubcommand {
    /// Probe a condition, e.g. "entity.plan == 'pro'"
    Condition { expression: String },
    /// Probe a start_at expression, e.g. "entity.created_at | add: 3, days"
    StartAt { expression: String },
}

pub fn run(subcmd: CheckSubcommand, json: bool) -> anyhow::Result<()> {
    let (kind, expression, valid) = match &subcmd {
        CheckSubcommand::Condition { expression } => {
            ("condition", expression, test_conditions(expression))
        }
        CheckSubcommand::StartAt { expression } => {
            ("start_at", expression, test_start_at(expression))
        }
    };

    if json {
        print_json(&serde_json::json!({
            "kind": kind,
            "expression": expression,
            "valid": valid,
        }))?;
    } else if valid {
        println!("valid {kind}: {expression}");
    }

    if !valid {
        anyhow::bail!("invalid {kind}: {}", reason(&subcmd));
    }
    Ok(())
}

/// Best-effort detail for a failed probe.
fn reason(subcmd: &CheckSubcommand) -> String {
    let parse_error = match subcmd {
        CheckSubcommand::Condition { expression } => {
            parse_condition(expression).err().map(|e| e.to_string())
        }
        CheckSubcommand::StartAt { expression } => {
            parse_time_expression(expression).err().map(|e| e.to_string())
        }
    };
    parse_error.unwrap_or_else(|| "cannot be evaluated".to_string())
}
