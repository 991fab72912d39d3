//! kora-rent — operator CLI for the rent reclamation pipeline.
//!
//! Stages are invoked independently and are idempotent given unchanged
//! inputs:
//!   kora-rent scan --operator <pubkey>      discover sponsored accounts
//!   kora-rent lifecycle scan                reconcile with on-chain state
//!   kora-rent policy evaluate               mark reclaimable/protected/dust
//!   kora-rent reclaim execute               sweep verified balances
//!   kora-rent report                        timeline/metric summary
//!   kora-rent attest generate | verify      signed execution attestation
//!
//! One ledger database per network (kora-rent-<network>.db under the data
//! dir). Exit status is 0 on success and 1 on any critical error, including
//! a failed attestation verification.

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use kora_attest::verify_document;
use kora_chain::RpcChainClient;
use kora_core::config::{EffectiveConfig, Network, Whitelist};
use kora_core::constants::DEFAULT_LOCK_BATCH;
use kora_core::types::Pubkey;
use kora_crypto::OperatorKeypair;
use kora_indexer::Indexer;
use kora_ledger::Ledger;
use kora_lifecycle::LifecycleEngine;
use kora_policy::PolicyEngine;
use kora_reclaimer::{fresh_worker_id, Reclaimer};

// ── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "kora-rent",
    version,
    about = "Discover, classify, and reclaim rent locked in sponsored accounts"
)]
struct Args {
    /// Target network (devnet or mainnet). Selects the ledger database.
    #[arg(long, global = true, default_value = "devnet")]
    network: String,

    /// Chain RPC endpoint. Defaults to the network's public endpoint.
    #[arg(long, global = true)]
    rpc: Option<String>,

    /// Directory holding the per-network ledger databases.
    #[arg(long, global = true, default_value = "~/.kora-rent")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scan the operator's transaction history for sponsored accounts.
    Scan {
        /// Operator (sponsor) address, base58.
        #[arg(long)]
        operator: String,
        /// Report without writing to the ledger.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },

    /// On-chain lifecycle reconciliation.
    Lifecycle {
        #[command(subcommand)]
        command: LifecycleCommand,
    },

    /// Policy evaluation over the ledger.
    Policy {
        #[command(subcommand)]
        command: PolicyCommand,
    },

    /// The reclamation pipeline.
    Reclaim {
        #[command(subcommand)]
        command: ReclaimCommand,
    },

    /// Timeline and metric summary of the ledger.
    Report {
        /// Output format: text or json.
        #[arg(long, default_value = "text")]
        format: String,
        /// Write to a file instead of stdout (whole-file atomic).
        #[arg(long)]
        output: Option<PathBuf>,
        /// Include the full event timeline for one account.
        #[arg(long)]
        account: Option<String>,
    },

    /// Attestation document handling.
    Attest {
        #[command(subcommand)]
        command: AttestCommand,
    },

    /// Generate a fresh operator keypair file.
    Keygen {
        /// Where to write the keypair (JSON array of 64 bytes).
        #[arg(long, default_value = "~/.kora-rent/operator.json")]
        output: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
enum LifecycleCommand {
    /// Probe every tracked account on chain and reconcile the ledger.
    Scan {
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
}

#[derive(Subcommand, Debug)]
enum PolicyCommand {
    /// Apply whitelist, safety, dust, and age rules.
    Evaluate {
        /// Balances below this many lamports are dust.
        #[arg(long, default_value_t = 1_000)]
        min_lamports: u64,
        /// Days an observation must age before reclaim; 0 disables.
        #[arg(long, default_value_t = 0)]
        min_age_days: i64,
        /// Whitelist file: one base58 address per line.
        #[arg(long)]
        whitelist: Option<PathBuf>,
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ReclaimCommand {
    /// Lock, re-verify, and sweep reclaimable accounts.
    Execute {
        /// Operator keypair file. Required unless --dry-run.
        #[arg(long)]
        keypair: Option<PathBuf>,
        /// Rows locked per fetch round.
        #[arg(long, default_value_t = DEFAULT_LOCK_BATCH)]
        batch_size: usize,
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// Clear stale processing locks left by a crashed worker.
    Unlock {
        /// Only clear locks held by this worker id; default clears all.
        #[arg(long)]
        worker: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum AttestCommand {
    /// Build (and optionally sign) the attestation document.
    Generate {
        /// Output file. Defaults to kora-rent-attestation-<network>.json.
        #[arg(long)]
        output: Option<PathBuf>,
        /// Operator keypair for the detached signature.
        #[arg(long)]
        keypair: Option<PathBuf>,
        /// Policy configuration embedded in the manifest.
        #[arg(long, default_value_t = 1_000)]
        min_lamports: u64,
        #[arg(long, default_value_t = 0)]
        min_age_days: i64,
        #[arg(long)]
        whitelist: Option<PathBuf>,
    },
    /// Verify an attestation document offline.
    Verify {
        #[arg(long)]
        file: PathBuf,
    },
}

// ── Main ─────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,sled=warn,reqwest=warn".into()),
        )
        .init();

    let args = Args::parse();
    let network: Network = args.network.parse()?;
    let rpc_url = args
        .rpc
        .clone()
        .unwrap_or_else(|| network.default_rpc_url().to_string());
    let data_dir = expand_tilde(&args.data_dir);

    match args.command {
        Command::Scan { operator, dry_run } => {
            let operator = Pubkey::from_b58(&operator)
                .map_err(|e| anyhow::anyhow!("invalid operator address: {e}"))?;
            let ledger = open_ledger(&data_dir, network)?;
            let chain = RpcChainClient::new(&rpc_url);
            let outcome = Indexer::new(&chain, &ledger, operator, dry_run).run().await?;
            ledger.flush()?;
            println!("Pages scanned:      {}", outcome.pages);
            println!("Signatures seen:    {}", outcome.signatures_seen);
            println!("Accounts discovered: {}", outcome.discovered);
            if outcome.cursor_advanced {
                println!("Resume cursor set.");
            }
            Ok(())
        }

        Command::Lifecycle {
            command: LifecycleCommand::Scan { dry_run },
        } => {
            let ledger = open_ledger(&data_dir, network)?;
            let chain = RpcChainClient::new(&rpc_url);
            let outcome = LifecycleEngine::new(&chain, &ledger, dry_run).run().await?;
            ledger.flush()?;
            println!("Accounts scanned:  {}", outcome.scanned);
            println!("Transitions:       {}", outcome.transitions);
            if outcome.chunk_failures > 0 {
                println!("Chunks skipped on RPC failure: {}", outcome.chunk_failures);
            }
            Ok(())
        }

        Command::Policy {
            command:
                PolicyCommand::Evaluate {
                    min_lamports,
                    min_age_days,
                    whitelist,
                    dry_run,
                },
        } => {
            let whitelist = load_whitelist(whitelist.as_deref())?;
            let config = effective_config(min_lamports, min_age_days, &whitelist);
            let ledger = open_ledger(&data_dir, network)?;
            let outcome = PolicyEngine::new(&ledger, &config, &whitelist, dry_run).evaluate()?;
            ledger.flush()?;
            println!("Evaluated:   {}", outcome.evaluated);
            println!("Protected:   {}", outcome.protected);
            println!("Skipped:     {}", outcome.skipped);
            println!("Dust:        {}", outcome.dust);
            println!("Reclaimable: {}", outcome.reclaimable);
            println!("Deferred:    {}", outcome.deferred);
            Ok(())
        }

        Command::Reclaim {
            command:
                ReclaimCommand::Execute {
                    keypair,
                    batch_size,
                    dry_run,
                },
        } => {
            let keypair = match (&keypair, dry_run) {
                (Some(path), _) => Some(OperatorKeypair::load(&expand_tilde(path))?),
                (None, true) => None,
                (None, false) => bail!("--keypair is required unless --dry-run is set"),
            };
            let ledger = open_ledger(&data_dir, network)?;
            let chain = RpcChainClient::new(&rpc_url);
            let worker_id = fresh_worker_id();
            let outcome = Reclaimer::new(&chain, &ledger, keypair.as_ref(), batch_size, dry_run)
                .run(&worker_id)
                .await?;
            ledger.flush()?;
            if dry_run {
                println!(
                    "Dry run: {} account(s) verified, {} lamports would be reclaimed",
                    outcome.locked - outcome.closed_zero - outcome.skipped,
                    outcome.total_lamports
                );
            } else {
                println!("Reclaimed:   {} account(s)", outcome.reclaimed);
                println!("Lamports:    {}", outcome.total_lamports);
                println!("Batches:     {}", outcome.batches);
                println!("JIT rejects: {} closed_zero, {} skipped", outcome.closed_zero, outcome.skipped);
                println!("Failed:      {}", outcome.failed);
                for signature in &outcome.signatures {
                    println!("  {signature}");
                }
            }
            Ok(())
        }

        Command::Reclaim {
            command: ReclaimCommand::Unlock { worker },
        } => {
            let ledger = open_ledger(&data_dir, network)?;
            let cleared = ledger.unlock(worker.as_deref())?;
            ledger.flush()?;
            println!("Cleared {cleared} processing lock(s).");
            Ok(())
        }

        Command::Report {
            format,
            output,
            account,
        } => {
            let ledger = open_ledger(&data_dir, network)?;
            let report =
                kora_report::build_report(&ledger, network.as_str(), account.as_deref())?;
            let rendered = match format.as_str() {
                "json" => serde_json::to_string_pretty(&report)?,
                "text" => kora_report::render_text(&report),
                other => bail!("unknown report format {other:?} (expected json or text)"),
            };
            match output {
                Some(path) => {
                    let path = expand_tilde(&path);
                    atomic_write(&path, rendered.as_bytes())?;
                    println!("Report written to {}", path.display());
                }
                None => print!("{rendered}"),
            }
            Ok(())
        }

        Command::Attest {
            command:
                AttestCommand::Generate {
                    output,
                    keypair,
                    min_lamports,
                    min_age_days,
                    whitelist,
                },
        } => {
            let keypair = keypair
                .map(|path| OperatorKeypair::load(&expand_tilde(&path)))
                .transpose()?;
            let whitelist = load_whitelist(whitelist.as_deref())?;
            let config = effective_config(min_lamports, min_age_days, &whitelist);
            let ledger = open_ledger(&data_dir, network)?;
            let doc = kora_attest::generate(
                &ledger,
                network.as_str(),
                &config,
                &rpc_url,
                keypair.as_ref(),
            )?;
            let path = output.map(|p| expand_tilde(&p)).unwrap_or_else(|| {
                PathBuf::from(format!("kora-rent-attestation-{network}.json"))
            });
            atomic_write(&path, serde_json::to_string_pretty(&doc)?.as_bytes())?;
            println!("Attestation hash: {}", doc.attestation_hash);
            println!(
                "Signed:           {}",
                if doc.signature.is_some() { "yes" } else { "no" }
            );
            println!("Document:         {}", path.display());
            Ok(())
        }

        Command::Attest {
            command: AttestCommand::Verify { file },
        } => {
            let path = expand_tilde(&file);
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading attestation {}", path.display()))?;
            let doc: serde_json::Value =
                serde_json::from_str(&text).context("parsing attestation JSON")?;
            match verify_document(&doc) {
                Ok(()) => {
                    println!("Verification passed.");
                    println!(
                        "Attestation hash: {}",
                        doc["attestation_hash"].as_str().unwrap_or("<missing>")
                    );
                    Ok(())
                }
                Err(e) => bail!("verification FAILED: {e}"),
            }
        }

        Command::Keygen { output } => {
            let path = expand_tilde(&output);
            if path.exists() {
                bail!(
                    "Keyfile {} already exists. Delete it first to generate a new key.",
                    path.display()
                );
            }
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let keypair = OperatorKeypair::generate();
            std::fs::write(&path, keypair.to_json())
                .with_context(|| format!("writing keypair to {}", path.display()))?;
            println!("Generated operator keypair.");
            println!("Pubkey:  {}", keypair.pubkey_b58());
            println!("Keyfile: {}", path.display());
            println!("\nBACK UP YOUR KEYFILE. It signs reclaim sweeps and attestations.");
            Ok(())
        }
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn open_ledger(data_dir: &PathBuf, network: Network) -> anyhow::Result<Ledger> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("creating data dir {}", data_dir.display()))?;
    let path = network.db_path(data_dir);
    Ledger::open(&path).with_context(|| format!("opening ledger {}", path.display()))
}

fn load_whitelist(path: Option<&std::path::Path>) -> anyhow::Result<Whitelist> {
    match path {
        Some(p) => Ok(Whitelist::load(&expand_tilde(&p.to_path_buf()))?),
        None => Ok(Whitelist::default()),
    }
}

fn effective_config(min_lamports: u64, min_age_days: i64, whitelist: &Whitelist) -> EffectiveConfig {
    EffectiveConfig {
        min_lamports,
        min_age_days,
        batch_size: DEFAULT_LOCK_BATCH,
        whitelist_hash: whitelist.hash_hex(),
    }
}

/// Whole-file atomic write: stage to a sibling temp file, then rename.
fn atomic_write(path: &std::path::Path, bytes: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes).with_context(|| format!("writing {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("renaming {} into place", tmp.display()))?;
    Ok(())
}

fn expand_tilde(path: &PathBuf) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
            return PathBuf::from(home).join(stripped);
        }
    }
    path.clone()
}
