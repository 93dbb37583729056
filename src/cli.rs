pub fn print_help() {
    println!("colligo {}", env!("CARGO_PKG_VERSION"));
    println!("Harvest personal conversation history into a local, searchable archive.\n");
    print_usage();
    print_options();
}

fn print_usage() {
    println!("USAGE:");
    println!("  colligo wechat [SOURCE] [OPTIONS]   Extract WeChat conversations");
    println!("  colligo search <query> [OPTIONS]    Search imported conversations");
    println!("  colligo list   [OPTIONS]            List imported conversations");
    println!("  colligo view   <id-or-title>        View one conversation");
    println!("  colligo stats                       Archive statistics");
    println!("  colligo filter [OPTIONS]            Apply a filter policy to the archive");
    println!("  colligo history scan   [OPTIONS]    Classify agent session transcripts");
    println!("  colligo history replay <entity>     Write per-session Markdown replays");
    println!("  colligo help | --help | -h          Show this message");
    println!("  colligo --version | -V              Show version\n");
}

fn print_options() {
    println!("WECHAT OPTIONS:");
    println!("  --key <hex>         64-char hex master password");
    println!("  --key-file <path>   File containing the key");
    println!("  --data-dir <dir>    Account data root (default: macOS container)");
    println!("  --incremental, -i   Skip conversations unchanged since last run");
    println!("  --output <dir>      Store root (default: ~/.colligo/harvest)\n");
    println!("SEARCH / LIST / VIEW OPTIONS:");
    println!("  --platform <name>   Restrict to one platform");
    println!("  --limit <n>         Max results / messages shown");
    println!("  --all               View every matching conversation\n");
    println!("FILTER OPTIONS:");
    println!("  --policy <path>     Policy JSON (default: ~/.colligo/filter-policy.json)");
    println!("  --platform <name>   Platform to filter (default: wechat)");
    println!("  --dry-run           Report decisions without touching files\n");
    println!("HISTORY OPTIONS:");
    println!("  --project-root <d>  Project tree to discover entities in (default: cwd)");
    println!("  --sessions-dir <d>  Transcript directory (default: derived from root)");
    println!("  --incremental, -i   Only rescan transcripts whose mtime moved\n");
    println!("ENVIRONMENT:");
    println!("  COLLIGO_OUTPUT       Store root (overridden by --output)");
    println!("  COLLIGO_WECHAT_KEY   Hex master password (overridden by --key)");
    println!("  NO_COLOR / --no-color disable colored output");
}

pub fn get_flag(args: &[String], flag: &str) -> Option<String> {
    args.windows(2).find(|w| w[0] == flag).map(|w| w[1].clone())
}

pub fn has_flag(args: &[String], flags: &[&str]) -> bool {
    args.iter().any(|a| flags.contains(&a.as_str()))
}

/// Arguments that are neither flags nor values of the given value-taking
/// flags.
pub fn positionals(args: &[String], value_flags: &[&str]) -> Vec<String> {
    let mut out = Vec::new();
    let mut skip_next = false;
    for arg in args {
        if skip_next {
            skip_next = false;
            continue;
        }
        if value_flags.contains(&arg.as_str()) {
            skip_next = true;
            continue;
        }
        if arg.starts_with('-') {
            continue;
        }
        out.push(arg.clone());
    }
    out
}
