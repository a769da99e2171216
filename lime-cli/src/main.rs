use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use lime_core::ops::{self, ItemOutcome};
use lime_core::{Engine, SaveFile, account_id_from_steam64, pack, resign, unpack};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "lime-cli")]
#[command(about = "Lime save container (de|en)crypt / resign – CLI tool", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct AccountArg {
    /// 32-bit account id the file is (or will be) signed with
    #[arg(long, conflicts_with = "steam_id")]
    account_id: Option<u32>,

    /// Steam64 id; the account id is extracted from it
    #[arg(long)]
    steam_id: Option<u64>,
}

impl AccountArg {
    fn resolve(&self) -> Result<u32> {
        match (self.account_id, self.steam_id) {
            (Some(id), _) => Ok(id),
            (None, Some(steam)) => Ok(account_id_from_steam64(steam)),
            (None, None) => bail!("either --account-id or --steam-id is required"),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Decrypt a container to its raw payload
    Decrypt {
        /// Path to the encrypted save file
        cipher: PathBuf,

        /// Path to write the decrypted payload
        out_plain: PathBuf,

        #[command(flatten)]
        account: AccountArg,
    },

    /// Encrypt a raw payload into a container
    Encrypt {
        /// Path to the plaintext payload file
        plain: PathBuf,

        /// Path to write the encrypted container
        out_cipher: PathBuf,

        #[command(flatten)]
        account: AccountArg,
    },

    /// Re-sign a file (or every file in a directory) for another account
    Resign {
        /// Save file or directory of save files
        input: PathBuf,

        /// Output file, or output directory for a batch
        output: PathBuf,

        /// Account id the input is currently signed with
        #[arg(long)]
        from: u32,

        /// Account id to re-sign for
        #[arg(long)]
        to: u32,
    },

    /// Brute-force the account id a file was signed with
    Search {
        /// Path to the encrypted save file
        cipher: PathBuf,

        /// First candidate id (inclusive)
        #[arg(long, default_value_t = 0)]
        start: u32,

        /// Last candidate id (inclusive)
        #[arg(long, default_value_t = u32::MAX)]
        end: u32,
    },

    /// Show container structure
    Info {
        /// Path to a save file
        file: PathBuf,
    },
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {:?}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Decrypt {
            cipher,
            out_plain,
            account,
        } => cmd_decrypt(&cipher, &out_plain, account.resolve()?)?,
        Commands::Encrypt {
            plain,
            out_cipher,
            account,
        } => cmd_encrypt(&plain, &out_cipher, account.resolve()?)?,
        Commands::Resign {
            input,
            output,
            from,
            to,
        } => cmd_resign(&input, &output, from, to)?,
        Commands::Search { cipher, start, end } => cmd_search(&cipher, start, end)?,
        Commands::Info { file } => cmd_info(&file)?,
    }

    Ok(())
}

fn cmd_decrypt(cipher_path: &PathBuf, out_plain_path: &PathBuf, account_id: u32) -> Result<()> {
    let enc = fs::read(cipher_path)
        .with_context(|| format!("Failed to read cipher file: {}", cipher_path.display()))?;

    println!("[info] len(enc)={}  account_id={}", enc.len(), account_id);

    let payload = unpack(&enc, account_id)?;

    fs::write(out_plain_path, &payload)
        .with_context(|| format!("Failed to write plaintext file: {}", out_plain_path.display()))?;

    println!("[ok] wrote payload -> {}", out_plain_path.display());

    Ok(())
}

fn cmd_encrypt(plain_path: &PathBuf, out_cipher_path: &PathBuf, account_id: u32) -> Result<()> {
    let payload = fs::read(plain_path)
        .with_context(|| format!("Failed to read plaintext file: {}", plain_path.display()))?;

    let enc = pack(&payload, account_id)?;

    fs::write(out_cipher_path, &enc)
        .with_context(|| format!("Failed to write cipher file: {}", out_cipher_path.display()))?;

    println!("[ok] wrote encrypted container -> {}", out_cipher_path.display());

    Ok(())
}

fn cmd_resign(input: &PathBuf, output: &PathBuf, from: u32, to: u32) -> Result<()> {
    if input.is_dir() {
        return cmd_resign_batch(input, output, from, to);
    }

    let bytes = fs::read(input)
        .with_context(|| format!("Failed to read save file: {}", input.display()))?;
    let resigned = resign(&bytes, from, to)?;
    fs::write(output, &resigned)
        .with_context(|| format!("Failed to write save file: {}", output.display()))?;

    println!("[ok] re-signed {} -> {}", input.display(), output.display());

    Ok(())
}

fn cmd_resign_batch(input_dir: &PathBuf, output_dir: &PathBuf, from: u32, to: u32) -> Result<()> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output dir: {}", output_dir.display()))?;

    let mut names = Vec::new();
    let mut items = Vec::new();
    for entry in fs::read_dir(input_dir)
        .with_context(|| format!("Failed to read input dir: {}", input_dir.display()))?
    {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let bytes =
            fs::read(&path).with_context(|| format!("Failed to read: {}", path.display()))?;
        names.push(path);
        items.push(bytes);
    }

    if items.is_empty() {
        bail!("no files found in {}", input_dir.display());
    }

    let engine = Engine::new();
    let (outcomes, report) = engine
        .run_batch(&items, |bytes| resign(bytes, from, to))
        .context("another operation is already running")?;

    for (path, outcome) in names.iter().zip(outcomes.iter()) {
        let name = path.file_name().unwrap_or_default();
        match outcome {
            ItemOutcome::Done(bytes) => {
                let out_path = output_dir.join(name);
                fs::write(&out_path, bytes)
                    .with_context(|| format!("Failed to write: {}", out_path.display()))?;
                println!("[ok] {}", out_path.display());
            }
            ItemOutcome::Skipped(err) => {
                eprintln!("[warn] skipped {}: {}", path.display(), err);
            }
            ItemOutcome::Canceled => {
                eprintln!("[warn] canceled before {}", path.display());
            }
        }
    }

    println!(
        "[info] processed={}  skipped={}  canceled={}",
        report.processed, report.skipped, report.canceled
    );

    Ok(())
}

fn cmd_search(cipher_path: &PathBuf, start: u32, end: u32) -> Result<()> {
    let bytes = fs::read(cipher_path)
        .with_context(|| format!("Failed to read cipher file: {}", cipher_path.display()))?;

    let file = SaveFile::parse(&bytes)?;
    if !file.is_encrypted() {
        bail!("file is not encrypted, nothing to search for");
    }
    let segment = file
        .segments
        .first()
        .context("container holds no segments")?;

    let span = (end as u64).saturating_sub(start as u64) + 1;
    println!("[info] searching {} candidate ids", span);

    let engine = Engine::new();
    let done = AtomicBool::new(false);

    let result = thread::scope(|scope| {
        scope.spawn(|| {
            while !done.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_millis(500));
                let tested = engine.progress();
                if tested > 0 && !done.load(Ordering::Relaxed) {
                    println!("[info] tested {tested}/{span}");
                }
            }
        });
        let result = engine.search(segment, start..=end);
        done.store(true, Ordering::Relaxed);
        result
    });

    match result.context("another operation is already running")?? {
        Some(id) => {
            println!("[ok] account id found: {}", id);
            println!("[ok] steam64: {}", ops::STEAM64_BASE + id as u64);
        }
        None => println!("[info] no account id in range validated the checksum"),
    }

    Ok(())
}

fn cmd_info(path: &PathBuf) -> Result<()> {
    let bytes =
        fs::read(path).with_context(|| format!("Failed to read file: {}", path.display()))?;

    let file = SaveFile::parse(&bytes)?;

    println!("[info] len={}", bytes.len());
    println!("[info] encrypted={}", file.is_encrypted());
    println!("[info] segments={}", file.segments.len());
    if file.is_encrypted() {
        println!(
            "[info] magic=0x{:08x}  type=0x{:02x}",
            file.header.magic, file.header.encryption_type
        );
        println!("[info] decrypted_length={}", file.footer.decrypted_length);
    }

    Ok(())
}
