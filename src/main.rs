use clap::{Arg, Command};
use log::LevelFilter;
use smtpd_filter_spamclass::config::DEFAULT_CONFIG_FILE;
use smtpd_filter_spamclass::{Config, Filter, SpamClasses, VERSION};
use std::process;
use tokio::io::BufReader;

const NAME: &str = "filter-spamclass";

#[tokio::main]
async fn main() {
    let matches = Command::new(NAME)
        .version(VERSION)
        .about("OpenSMTPD filter adding X-Spam-Class and X-Spam headers from the X-Spam-Score header")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value(DEFAULT_CONFIG_FILE),
        )
        .arg(
            Arg::new("classes")
                .long("classes")
                .value_name("FILE")
                .help("Class threshold JSON file (overrides class_config_file)")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .value_name("FILE")
                .help("Generate a default configuration file")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("test-config")
                .long("test-config")
                .help("Load the configuration and class thresholds, then exit")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Log every filter event")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    if let Some(generate_path) = matches.get_one::<String>("generate-config") {
        generate_default_config(generate_path);
        return;
    }

    // Debug records are built in; the max level decides what gets through.
    env_logger::Builder::from_default_env()
        .filter_level(LevelFilter::Debug)
        .init();
    set_verbose(matches.get_flag("verbose"));

    let config_path = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or(DEFAULT_CONFIG_FILE);

    let mut config = match Config::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            log::error!("Error loading configuration: {e:#}");
            process::exit(1);
        }
    };
    if matches.get_flag("verbose") {
        config.verbose = true;
    }
    if let Some(classes) = matches.get_one::<String>("classes") {
        config.class_config_file = classes.clone();
    }
    set_verbose(config.verbose);

    let classes = match SpamClasses::load(&config.class_config_file) {
        Ok(classes) => classes,
        Err(e) => {
            log::error!("SpamClasses config error: {e:#}");
            process::exit(1);
        }
    };

    if matches.get_flag("test-config") {
        println!("Configuration: {config_path}");
        println!("Class config file: {}", config.class_config_file);
        println!("Per-recipient class lists: {}", classes.classes.len());
        let mut addresses: Vec<_> = classes.classes.keys().collect();
        addresses.sort();
        for address in addresses {
            let names: Vec<_> = classes.classes[address]
                .iter()
                .map(|class| class.name.as_str())
                .collect();
            println!("  {address}: {}", names.join(", "));
        }
        println!("Configuration OK");
        return;
    }

    log::info!("Starting {NAME} v{VERSION}");
    if config.verbose {
        // SAFETY: getuid/getgid take no arguments and cannot fail.
        let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
        log::debug!("{NAME}: pid={} uid={uid} gid={gid}", process::id());
        match serde_json::to_string(&config) {
            Ok(json) => log::debug!("{NAME}: {json}"),
            Err(e) => log::debug!("{NAME}: {config:?} ({e})"),
        }
    }

    let mut filter = Filter::new(NAME, classes);
    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    if let Err(e) = filter.run(stdin, &mut stdout).await {
        log::error!("{NAME}: {e}");
        process::exit(1);
    }
}

fn set_verbose(verbose: bool) {
    log::set_max_level(if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    });
}

fn generate_default_config(path: &str) {
    match Config::default().to_file(path) {
        Ok(()) => {
            println!("Default configuration written to: {path}");
        }
        Err(e) => {
            eprintln!("Error writing configuration file: {e:#}");
            process::exit(1);
        }
    }
}
