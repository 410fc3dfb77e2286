//! `opex` command line front end for the initiative lifecycle engine

use anyhow::{anyhow, Context};
use chrono::NaiveDate;
use clap::{Arg, ArgAction, ArgMatches, Command};
use opex_core::{
    ApprovalRequest, FileStore, InitiativeLifecycleManager, OpexConfig, OpexError, StaticRoleResolver,
};
use opex_types::{ApproverRef, ConditionFlags, InitiativeDraft, InitiativeId, InitiativeStatus, StepId};
use serde::Serialize;
use std::sync::Arc;

fn cli() -> Command {
    Command::new("opex")
        .version("1.0.0")
        .about("OpEx initiative lifecycle engine")
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("/app/config/opex.json")
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("create")
                .about("Register a new initiative and start its workflow")
                .arg(Arg::new("title").long("title").required(true))
                .arg(Arg::new("description").long("description").default_value(""))
                .arg(Arg::new("site").long("site").value_name("CODE").required(true))
                .arg(Arg::new("discipline").long("discipline").value_name("CODE").required(true))
                .arg(
                    Arg::new("proposal-date")
                        .long("proposal-date")
                        .value_name("YYYY-MM-DD")
                        .help("Defaults to today")
                )
                .arg(Arg::new("savings").long("savings").value_name("AMOUNT").default_value("0"))
                .arg(Arg::new("initiator").long("initiator").value_name("USER"))
        )
        .subcommand(
            Command::new("approve")
                .about("Approve a pending workflow step")
                .arg(Arg::new("step").value_name("STEP_ID").required(true))
                .arg(Arg::new("approver").long("approver").value_name("USER").required(true))
                .arg(Arg::new("comments").long("comments"))
                .arg(Arg::new("signature").long("signature"))
                .arg(
                    Arg::new("moc-required")
                        .long("moc-required")
                        .value_name("BOOL")
                        .value_parser(clap::value_parser!(bool))
                )
                .arg(Arg::new("moc-reference").long("moc-reference").value_name("REF"))
                .arg(
                    Arg::new("capex-required")
                        .long("capex-required")
                        .value_name("BOOL")
                        .value_parser(clap::value_parser!(bool))
                )
                .arg(Arg::new("capex-reference").long("capex-reference").value_name("REF"))
                .arg(
                    Arg::new("actual-savings")
                        .long("actual-savings")
                        .value_name("AMOUNT")
                        .value_parser(clap::value_parser!(f64))
                )
        )
        .subcommand(
            Command::new("reject")
                .about("Reject a pending workflow step")
                .arg(Arg::new("step").value_name("STEP_ID").required(true))
                .arg(Arg::new("approver").long("approver").value_name("USER").required(true))
                .arg(Arg::new("comments").long("comments"))
        )
        .subcommand(
            Command::new("steps")
                .about("List the workflow steps of an initiative")
                .arg(Arg::new("initiative").value_name("ID_OR_IDENTIFIER").required(true))
        )
        .subcommand(
            Command::new("show")
                .about("Show one initiative")
                .arg(Arg::new("initiative").value_name("ID_OR_IDENTIFIER").required(true))
        )
        .subcommand(
            Command::new("list")
                .about("List initiatives")
                .arg(Arg::new("status").long("status").value_name("STATUS"))
                .arg(Arg::new("site").long("site").value_name("CODE"))
        )
        .subcommand(Command::new("catalog").about("Print the stage catalog"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging with INFO as default if RUST_LOG not set
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info")
    ).init();

    let matches = cli().get_matches();

    let config_path = matches
        .get_one::<String>("config")
        .ok_or_else(|| anyhow!("--config is required"))?;
    let config = OpexConfig::from_file(config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path))?;
    log::info!("Loaded configuration from {}", config_path);

    let store = Arc::new(FileStore::new(&config.storage.data_dir)?);
    log::info!("Using data directory: {}", store.root_path().display());

    let roles = Arc::new(StaticRoleResolver::from_bindings(&config.roles));
    let manager = InitiativeLifecycleManager::from_config(&config, store, roles)?;

    let resumed = manager.resume_incomplete_bootstraps().await?;
    if resumed > 0 {
        log::warn!("Created missing workflow steps for {} initiative(s)", resumed);
    }

    match matches.subcommand() {
        Some(("create", args)) => {
            let draft = build_draft(&config, args)?;
            let initiative = manager.create_initiative(draft).await?;
            print_json(&initiative)
        }
        Some(("approve", args)) => {
            let step_id = step_arg(args)?;
            let approver = approver_arg(args)?;
            let outcome = manager
                .engine()
                .approve(&step_id, &approver, build_approval(args))
                .await?;
            print_json(&outcome)
        }
        Some(("reject", args)) => {
            let step_id = step_arg(args)?;
            let approver = approver_arg(args)?;
            let comments = args.get_one::<String>("comments").cloned();
            let step = manager.engine().reject(&step_id, &approver, comments).await?;
            print_json(&step)
        }
        Some(("steps", args)) => {
            let id = resolve_initiative(&manager, args).await?;
            print_json(&manager.list_steps(&id).await?)
        }
        Some(("show", args)) => {
            let id = resolve_initiative(&manager, args).await?;
            print_json(&manager.get_initiative(&id).await?)
        }
        Some(("list", args)) => {
            let mut initiatives = match args.get_one::<String>("site") {
                Some(site) => manager.list_by_site(site).await?,
                None => manager.list_initiatives().await?,
            };
            if let Some(status) = args.get_one::<String>("status") {
                let status = parse_status(status)?;
                initiatives.retain(|i| i.status == status);
            }
            print_json(&initiatives)
        }
        Some(("catalog", _)) => print_json(&manager.engine().catalog().stages()),
        _ => Err(anyhow!("No action specified. Use --help for options.")),
    }
}

fn build_draft(config: &OpexConfig, args: &ArgMatches) -> anyhow::Result<InitiativeDraft> {
    let site_code = required(args, "site")?;
    let site = config
        .find_site(site_code)
        .cloned()
        .ok_or_else(|| OpexError::InvalidInput(format!("Unknown site '{}'", site_code)))?;

    let discipline_code = required(args, "discipline")?;
    let discipline = config
        .find_discipline(discipline_code)
        .cloned()
        .ok_or_else(|| OpexError::InvalidInput(format!("Unknown discipline '{}'", discipline_code)))?;

    let proposal_date = match args.get_one::<String>("proposal-date") {
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .with_context(|| format!("Invalid proposal date '{}'", raw))?,
        None => chrono::Local::now().date_naive(),
    };

    let savings = required(args, "savings")?;
    let estimated_savings: f64 = savings
        .parse()
        .with_context(|| format!("Invalid savings amount '{}'", savings))?;

    Ok(InitiativeDraft {
        title: required(args, "title")?.clone(),
        description: args.get_one::<String>("description").cloned().unwrap_or_default(),
        site: Some(site),
        discipline: Some(discipline),
        proposal_date,
        estimated_savings,
        initiator: args.get_one::<String>("initiator").map(ApproverRef::new),
    })
}

fn build_approval(args: &ArgMatches) -> ApprovalRequest {
    let conditions = ConditionFlags {
        moc_required: args.get_one::<bool>("moc-required").copied(),
        moc_reference: args.get_one::<String>("moc-reference").cloned(),
        capex_required: args.get_one::<bool>("capex-required").copied(),
        capex_reference: args.get_one::<String>("capex-reference").cloned(),
    };

    let mut request = ApprovalRequest::new().with_conditions(conditions);
    if let Some(comments) = args.get_one::<String>("comments") {
        request = request.with_comments(comments.clone());
    }
    if let Some(signature) = args.get_one::<String>("signature") {
        request = request.with_signature(signature.clone());
    }
    if let Some(savings) = args.get_one::<f64>("actual-savings") {
        request = request.with_actual_savings(*savings);
    }
    request
}

/// Accepts either the storage id or the formatted identifier
async fn resolve_initiative(
    manager: &InitiativeLifecycleManager,
    args: &ArgMatches,
) -> anyhow::Result<InitiativeId> {
    let raw = required(args, "initiative")?;
    if raw.contains('/') {
        let initiative = manager
            .find_by_identifier(raw)
            .await?
            .ok_or_else(|| OpexError::NotFound(format!("Initiative {}", raw)))?;
        return Ok(initiative.id);
    }
    InitiativeId::from_string(raw).map_err(|e| anyhow!("Invalid initiative id '{}': {}", raw, e))
}

fn step_arg(args: &ArgMatches) -> anyhow::Result<StepId> {
    let raw = required(args, "step")?;
    StepId::from_string(raw).map_err(|e| anyhow!("Invalid step id '{}': {}", raw, e))
}

fn approver_arg(args: &ArgMatches) -> anyhow::Result<ApproverRef> {
    Ok(ApproverRef::new(required(args, "approver")?.as_str()))
}

fn parse_status(raw: &str) -> anyhow::Result<InitiativeStatus> {
    serde_json::from_value(serde_json::Value::String(raw.to_ascii_uppercase()))
        .map_err(|_| anyhow!("Unknown initiative status '{}'", raw))
}

fn required<'a>(args: &'a ArgMatches, name: &str) -> anyhow::Result<&'a String> {
    args.get_one::<String>(name)
        .ok_or_else(|| anyhow!("--{} is required", name))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"{
        "sites": [{"code": "NDS", "name": "Nagothane", "category": "Petrochemical"}],
        "disciplines": [{"code": "OP", "name": "Operations", "description": ""}]
    }"#;

    #[test]
    fn test_cli_definition_is_consistent() {
        cli().debug_assert();
    }

    #[test]
    fn test_draft_uses_master_data() {
        let config = OpexConfig::from_json_str(CONFIG).unwrap();
        let matches = cli().get_matches_from([
            "opex", "create", "--title", "Steam trap survey", "--site", "NDS", "--discipline", "OP",
            "--proposal-date", "2025-04-02", "--savings", "25000",
        ]);
        let (_, args) = matches.subcommand().unwrap();

        let draft = build_draft(&config, args).unwrap();
        assert_eq!(draft.site.unwrap().name, "Nagothane");
        assert_eq!(draft.proposal_date, NaiveDate::from_ymd_opt(2025, 4, 2).unwrap());
        assert_eq!(draft.estimated_savings, 25000.0);
    }

    #[test]
    fn test_unknown_site_is_rejected() {
        let config = OpexConfig::from_json_str(CONFIG).unwrap();
        let matches = cli().get_matches_from([
            "opex", "create", "--title", "x", "--site", "ZZZ", "--discipline", "OP",
        ]);
        let (_, args) = matches.subcommand().unwrap();

        let err = build_draft(&config, args).unwrap_err();
        assert!(matches!(err.downcast_ref::<OpexError>(), Some(OpexError::InvalidInput(_))));
    }

    #[test]
    fn test_approval_flags_map_to_conditions() {
        let matches = cli().get_matches_from([
            "opex", "approve", "6f1c1f53-1a0e-4b7e-9d43-2f1f0d0c6a11", "--approver", "sh.nds",
            "--moc-required", "true", "--moc-reference", "MOC-118",
        ]);
        let (_, args) = matches.subcommand().unwrap();

        let request = build_approval(args);
        assert_eq!(request.conditions.moc_required, Some(true));
        assert_eq!(request.conditions.moc_reference.as_deref(), Some("MOC-118"));
        assert_eq!(request.conditions.capex_required, None);
        assert!(request.actual_savings.is_none());
    }

    #[test]
    fn test_status_filter_parsing() {
        assert_eq!(parse_status("in_progress").unwrap(), InitiativeStatus::InProgress);
        assert_eq!(parse_status("completed").unwrap(), InitiativeStatus::Closed);
        assert!(parse_status("archived").is_err());
    }
}
