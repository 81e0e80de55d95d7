use clap::Parser;
use precedent::{
    ConfigDb,
    DataDir,
    Pipeline,
    Settings,
    config::SETTING_KEYS,
    error,
    mcp,
    search,
};
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Cli, Command, ConfigAction, SearchArgs};

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("PRECEDENT_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn runtime() -> error::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            error::Error::Config(format!("failed to start tokio runtime: {e}"))
        })
}

fn main() -> error::Result<()> {
    let cli = Cli::parse();

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    init_tracing(cli.verbose, cli.quiet);

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let config_db = ConfigDb::open(&data_dir.config_db())?;

    match cli.command {
        Command::Search(args) => {
            let settings = Settings::load(&config_db)?;
            cmd_search(&settings, &args)?;
        }
        Command::Config { action } => match action {
            ConfigAction::Show { json } => config_show(&config_db, json)?,
            ConfigAction::Set { key, value } => {
                config_set(&config_db, &key, &value)?;
            }
            ConfigAction::Unset { key } => config_unset(&config_db, &key)?,
        },
        Command::Mcp => {
            let settings = Settings::load(&config_db)?;
            let pipeline = Pipeline::from_settings(&settings);
            runtime()?.block_on(mcp::run_mcp(pipeline))?;
        }
        Command::Completions(_) => {}
    }

    Ok(())
}

fn cmd_search(settings: &Settings, args: &SearchArgs) -> error::Result<()> {
    let pipeline = Pipeline::from_settings(settings);
    let overrides = args.overrides();

    let output =
        runtime()?.block_on(pipeline.run(&args.question, &overrides))?;

    if args.json {
        search::format_json(&output, &args.question)?;
    } else {
        search::format_human(&output);
    }
    Ok(())
}

fn config_show(config_db: &ConfigDb, json: bool) -> error::Result<()> {
    let settings = Settings::load(config_db)?;
    let entries = settings.entries();

    if json {
        let map: serde_json::Map<String, serde_json::Value> = entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), serde_json::Value::String(v)))
            .collect();
        println!("{}", serde_json::Value::Object(map));
    } else {
        let stored: Vec<String> = config_db
            .list_settings()?
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        for (key, value) in entries {
            let marker = if stored.iter().any(|k| k == key) {
                " (set)"
            } else {
                ""
            };
            println!("{key}\t{value}{marker}");
        }
    }
    Ok(())
}

fn config_set(
    config_db: &ConfigDb,
    key: &str,
    value: &str,
) -> error::Result<()> {
    // Reject values that would leave config.redb unloadable.
    let mut settings = Settings::default();
    for (stored, stored_value) in config_db.list_settings()? {
        if stored != key {
            settings.apply(&stored, &stored_value)?;
        }
    }
    settings.apply(key, value)?;
    settings.pipeline.validate()?;

    config_db.set_setting(key, value.trim())?;
    println!("Set {key} = {}", value.trim());
    Ok(())
}

fn config_unset(config_db: &ConfigDb, key: &str) -> error::Result<()> {
    if !SETTING_KEYS.contains(&key) {
        return Err(error::Error::NotFound {
            kind: "setting",
            name: key.to_string(),
        });
    }

    if config_db.remove_setting(key)? {
        println!("Cleared {key}, using the default");
    } else {
        println!("{key} was not set");
    }
    Ok(())
}
