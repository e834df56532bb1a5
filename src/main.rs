#![cfg(feature = "cli")]
use std::path::PathBuf;

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use log::{error, info, LevelFilter};

use smoothdecrypt::config::Config;
use smoothdecrypt::key::{parse_key_id, KeySeed};
use smoothdecrypt::pipeline::Pipeline;

#[cfg(feature = "chrono")]
use chrono::Datelike;

#[derive(Parser)]
#[command(name = "smoothdecrypt", version, disable_version_flag = true, about = "smoothdecrypt CLI")]
struct Cli {
    #[arg(short = 'v', long = "version", action = ArgAction::SetTrue)]
    version: bool,

    #[arg(short = 'd', long = "debug", action = ArgAction::SetTrue)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// CLI subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Derive the content key for a key seed and key id.
    Key {
        /// Key seed, base64.
        #[arg(short = 's', long = "seed")]
        seed: String,
        /// Key id, GUID text.
        #[arg(short = 'k', long = "kid")]
        kid: String,
    },
    /// Decrypt a Smooth Streaming asset directory.
    ///
    /// Media files are decrypted with mp4decrypt, the client manifest loses
    /// its Protection element and all other files are copied. Flags override
    /// values from the config file.
    Decrypt {
        #[arg(short = 'c', long = "config")]
        config: Option<PathBuf>,
        #[arg(short = 's', long = "seed")]
        seed: Option<String>,
        #[arg(short = 'k', long = "kid")]
        kid: Option<String>,
        #[arg(short = 'i', long = "input")]
        input: Option<PathBuf>,
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,
        /// Path to mp4decrypt (searched on PATH when omitted).
        #[arg(short = 't', long = "tool")]
        tool: Option<PathBuf>,
        /// Give up on a file after this many seconds.
        #[arg(long = "timeout")]
        timeout: Option<u64>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::new().filter_level(level).init();

    let current_year = current_year();
    let version = env!("CARGO_PKG_VERSION");
    info!("smoothdecrypt version {} ({})", version, current_year);

    if cli.version {
        return Ok(());
    }

    match cli.command {
        Some(Commands::Key { seed, kid }) => run_key(&seed, &kid),
        Some(Commands::Decrypt {
            config,
            seed,
            kid,
            input,
            output,
            tool,
            timeout,
        }) => {
            let mut config = match config {
                Some(path) => Config::from_path(&path)
                    .with_context(|| format!("Failed to load config {}", path.display()))?,
                None => Config::default(),
            };
            if seed.is_some() {
                config.key_seed = seed;
            }
            if kid.is_some() {
                config.key_id = kid;
            }
            if input.is_some() {
                config.input_dir = input;
            }
            if output.is_some() {
                config.output_dir = output;
            }
            if tool.is_some() {
                config.decrypter.path = tool;
            }
            if timeout.is_some() {
                config.decrypter.timeout_secs = timeout;
            }
            run_decrypt(&config)
        }
        None => Ok(()),
    }
}

fn current_year() -> i64 {
    #[cfg(feature = "chrono")]
    {
        chrono::Local::now().year().into()
    }
    #[cfg(not(feature = "chrono"))]
    {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() / 31_556_952 + 1970)
            .unwrap_or(2024) as i64
    }
}

fn run_key(seed: &str, kid: &str) -> anyhow::Result<()> {
    let seed = KeySeed::from_base64(seed)?;
    let kid = parse_key_id(kid)?;
    log::debug!("Key ID (little-endian): {}", hex::encode(kid.to_bytes_le()));

    let key = seed.derive(&kid);
    info!("[+] {}:{}", kid.as_simple(), key);
    println!("{}", key);
    Ok(())
}

fn run_decrypt(config: &Config) -> anyhow::Result<()> {
    let pipeline = Pipeline::from_config(config).context("Invalid configuration")?;
    info!(
        "[+] Decrypting {} into {}",
        pipeline.input_dir().display(),
        pipeline.output_dir().display()
    );

    let report = pipeline.run()?;
    if !report.is_success() {
        for failure in report.failures() {
            error!(" - {}", failure.asset.path.display());
        }
        anyhow::bail!(
            "{} of {} files failed",
            report.failures().count(),
            report.len()
        );
    }

    info!("[+] Done");
    Ok(())
}
