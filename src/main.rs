mod cli;
mod error;
mod filter;
mod fmt;
mod history;
mod models;
mod search;
mod state;
mod store;
mod wechat;

use anyhow::{Context, Result};
use cli::{get_flag, has_flag, positionals};
use fmt::{cprintln, trunc, BOLD, DIM, GREEN, RESET};
use state::ScanState;
use std::path::PathBuf;
use store::Store;

fn main() -> Result<()> {
    let raw_args: Vec<String> = std::env::args().skip(1).collect();

    if raw_args.iter().any(|a| a == "--no-color") {
        fmt::disable_color();
    }
    let args: Vec<String> = raw_args.into_iter().filter(|a| a != "--no-color").collect();

    if args.iter().any(|a| a == "--help" || a == "-h")
        || args.first().map(|s| s.as_str()) == Some("help")
    {
        cli::print_help();
        return Ok(());
    }
    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("colligo {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    match args.first().map(|s| s.as_str()) {
        Some("wechat") => cmd_wechat(&args[1..]),
        Some("search") => cmd_search(&args[1..]),
        Some("list") => cmd_list(&args[1..]),
        Some("view") => cmd_view(&args[1..]),
        Some("stats") => cmd_stats(&args[1..]),
        Some("filter") => cmd_filter(&args[1..]),
        Some("history") => cmd_history(&args[1..]),
        Some(other) => {
            eprintln!("colligo: unknown command '{other}'\n");
            eprintln!("Run 'colligo help' for usage.");
            std::process::exit(1);
        }
        None => {
            cli::print_help();
            Ok(())
        }
    }
}

fn open_store(args: &[String]) -> Store {
    let output = get_flag(args, "--output");
    Store::new(models::output_root(output.as_deref()))
}

fn cmd_wechat(args: &[String]) -> Result<()> {
    let key = wechat::keys::MasterKey::load(
        get_flag(args, "--key").as_deref(),
        get_flag(args, "--key-file").as_deref(),
    )?;
    let data_dir = get_flag(args, "--data-dir").map(PathBuf::from);
    let incremental = has_flag(args, &["--incremental", "-i"]);
    let source = positionals(args, &["--key", "--key-file", "--data-dir", "--output"])
        .into_iter()
        .next()
        .map(PathBuf::from);

    let store = open_store(args);
    let state_path = store.state_path(wechat::PLATFORM);
    let mut state = ScanState::load(&state_path);

    cprintln!("{BOLD}colligo — WeChat extraction{RESET}");
    cprintln!("{DIM}key: {}{RESET}", if key.is_some() { "provided" } else { "none (trying unencrypted)" });
    cprintln!("{DIM}output: {}{RESET}", store.root().display());
    if incremental {
        println!("incremental: {} known conversation(s)", state.conversations.len());
        if !state.last_run.is_empty() {
            println!("last run: {}", state.last_run);
        }
    }

    let mut count = 0usize;
    let mut skipped = 0usize;
    let mut extractor = wechat::Extractor::new(key, data_dir);
    extractor.extract(source.as_deref(), &mut |conv| {
        if incremental && !state.is_changed(&conv) {
            skipped += 1;
            return Ok(());
        }
        store
            .save_conversation(&conv)
            .with_context(|| format!("saving {}", conv.id))?;
        state.record(&conv);
        count += 1;
        cprintln!(
            "  {GREEN}✓{RESET} [{count}] {} {DIM}({} msgs){RESET}",
            trunc(&conv.title, 50),
            conv.message_count()
        );
        Ok(())
    })?;

    // a partial run never reaches this point, so the state only advances
    // after a full pass
    state.save(&state_path)?;

    let skipped_note = if skipped > 0 {
        format!(", {skipped} unchanged skipped")
    } else {
        String::new()
    };
    println!("done: {count} conversation(s) imported{skipped_note}");
    Ok(())
}

fn cmd_search(args: &[String]) -> Result<()> {
    let positional = positionals(args, &["--platform", "--limit", "--output"]);
    let Some(query) = positional.first() else {
        eprintln!("usage: colligo search <query> [--platform P] [--limit N]");
        std::process::exit(1);
    };
    let platform = get_flag(args, "--platform");
    let limit = get_flag(args, "--limit")
        .and_then(|s| s.parse().ok())
        .unwrap_or(20);
    search::run_search(&open_store(args), query, platform.as_deref(), limit)
}

fn cmd_list(args: &[String]) -> Result<()> {
    let platform = get_flag(args, "--platform");
    search::run_list(&open_store(args), platform.as_deref())
}

fn cmd_view(args: &[String]) -> Result<()> {
    let positional = positionals(args, &["--limit", "--output"]);
    let Some(query) = positional.first() else {
        eprintln!("usage: colligo view <id-or-title> [--limit N] [--all]");
        std::process::exit(1);
    };
    let limit = get_flag(args, "--limit")
        .and_then(|s| s.parse().ok())
        .unwrap_or(100);
    let all = has_flag(args, &["--all", "-a"]);
    search::run_view(&open_store(args), query, limit, all)
}

fn cmd_stats(args: &[String]) -> Result<()> {
    search::run_stats(&open_store(args))
}

fn cmd_filter(args: &[String]) -> Result<()> {
    let policy_path = get_flag(args, "--policy")
        .map(PathBuf::from)
        .unwrap_or_else(|| models::colligo_dir().join("filter-policy.json"));
    let platform = get_flag(args, "--platform").unwrap_or_else(|| wechat::PLATFORM.to_string());
    let dry_run = has_flag(args, &["--dry-run"]);

    let policy = filter::FilterPolicy::load(&policy_path)?;
    let store = open_store(args);
    let outcome = filter::apply(&store, &platform, &policy, dry_run)?;

    if dry_run {
        for (id, tier, rule) in &outcome.decisions {
            cprintln!("  {} {DIM}→{RESET} {} {DIM}({rule}){RESET}", trunc(id, 40), tier.as_str());
        }
    }
    println!(
        "{}: {} keep, {} archive, {} exclude",
        if dry_run { "would apply" } else { "applied" },
        outcome.kept,
        outcome.archived,
        outcome.excluded
    );
    Ok(())
}

fn cmd_history(args: &[String]) -> Result<()> {
    let project_root = get_flag(args, "--project-root")
        .map(PathBuf::from)
        .map(Ok)
        .unwrap_or_else(std::env::current_dir)?;
    let sessions_dir = get_flag(args, "--sessions-dir").map(PathBuf::from);
    let settings = history::Settings::new(project_root, sessions_dir);

    match args.first().map(|s| s.as_str()) {
        Some("scan") => {
            let incremental = has_flag(args, &["--incremental", "-i"]);
            history::scan(&settings, incremental)
        }
        Some("replay") => {
            let positional =
                positionals(&args[1..], &["--project-root", "--sessions-dir"]);
            let Some(entity) = positional.first() else {
                eprintln!("usage: colligo history replay <entity>");
                std::process::exit(1);
            };
            history::replay_cmd(&settings, entity)
        }
        _ => {
            eprintln!("usage: colligo history <scan|replay> [OPTIONS]");
            std::process::exit(1);
        }
    }
}
