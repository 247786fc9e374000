//! Command-line interface for the broadcast encryption key trees.

#![forbid(unsafe_code)]

use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use bes_core::TreeConfig;
use bes_receiver::session_key;
use bes_schemes::{BroadcastTree, CoverElement, CoverHeader, Scheme, UserBundle};
use clap::{Parser, Subcommand};
use rand::{CryptoRng, RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use tracing::info;

/// Broadcast encryption key tree CLI.
#[derive(Parser)]
#[command(
    name = "bes",
    version,
    author,
    about = "Complete subtree and subset difference key trees"
)]
struct Cli {
    /// Default log filter when RUST_LOG is unset.
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a key tree and save its record.
    Gen {
        /// Scheme: csm or sdm.
        #[arg(long, default_value = "sdm")]
        scheme: Scheme,
        /// Tree height; the tree serves 2^depth users.
        #[arg(long)]
        depth: usize,
        /// Node key size in bits (128, 192 or 256).
        #[arg(long, default_value_t = 128)]
        key_bits: usize,
        /// Optional RNG seed for reproducible generation.
        #[arg(long)]
        seed: Option<u64>,
        /// Output path for the record.
        #[arg(long, value_name = "FILE")]
        out: PathBuf,
    },
    /// Revoke users in a saved tree.
    Deny {
        /// Path to the record, rewritten in place.
        #[arg(long, value_name = "FILE")]
        tree: PathBuf,
        /// Users to revoke.
        #[arg(long, value_delimiter = ',', required = true)]
        users: Vec<usize>,
    },
    /// Print the cover of the allowed users.
    Cover {
        /// Path to the record.
        #[arg(long, value_name = "FILE")]
        tree: PathBuf,
        /// Also write the broadcast header here.
        #[arg(long, value_name = "FILE")]
        header_out: Option<PathBuf>,
    },
    /// Write the provisioning bundle of one user.
    Provision {
        /// Path to the record.
        #[arg(long, value_name = "FILE")]
        tree: PathBuf,
        /// User to provision.
        #[arg(long)]
        user: usize,
        /// Output path for the bundle.
        #[arg(long, value_name = "FILE")]
        out: PathBuf,
    },
    /// Recover a session key from a bundle and a broadcast header.
    Receive {
        /// Path to the user's bundle.
        #[arg(long, value_name = "FILE")]
        bundle: PathBuf,
        /// Path to the broadcast header.
        #[arg(long, value_name = "FILE")]
        header: PathBuf,
    },
    /// Dump node keys and revoked users.
    Inspect {
        /// Path to the record.
        #[arg(long, value_name = "FILE")]
        tree: PathBuf,
    },
    /// Run a local demo: build both trees, revoke users and check every receiver.
    Demo {
        /// Tree height.
        #[arg(long, default_value_t = 4)]
        depth: usize,
        /// Optional RNG seed for reproducibility.
        #[arg(long)]
        seed: Option<u64>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);
    match cli.command {
        Commands::Gen {
            scheme,
            depth,
            key_bits,
            seed,
            out,
        } => cmd_gen(scheme, depth, key_bits, seed, &out),
        Commands::Deny { tree, users } => cmd_deny(&tree, &users),
        Commands::Cover { tree, header_out } => cmd_cover(&tree, header_out.as_deref()),
        Commands::Provision { tree, user, out } => cmd_provision(&tree, user, &out),
        Commands::Receive { bundle, header } => cmd_receive(&bundle, &header),
        Commands::Inspect { tree } => cmd_inspect(&tree),
        Commands::Demo { depth, seed } => cmd_demo(depth, seed),
    }
}

fn init_logging(level: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn cmd_gen(
    scheme: Scheme,
    depth: usize,
    key_bits: usize,
    seed: Option<u64>,
    out: &Path,
) -> Result<()> {
    let config = TreeConfig::new(depth, key_bits).context("tree configuration")?;
    let mut rng = seeded_rng(seed);
    let tree = BroadcastTree::generate(scheme, config, &mut rng).context("generate tree")?;
    save_tree(&tree, out)?;
    info!(%scheme, depth, key_bits, path = %out.display(), "tree written");
    println!(
        "{scheme} tree with {} users written to {}",
        tree.tree().users(),
        out.display()
    );
    Ok(())
}

fn cmd_deny(path: &Path, users: &[usize]) -> Result<()> {
    let mut tree = load_tree(path)?;
    for &user in users {
        tree.deny(user)
            .with_context(|| format!("revoke user {user}"))?;
    }
    save_tree(&tree, path)?;
    println!(
        "{} of {} users revoked",
        tree.tree().revoked_count(),
        tree.tree().users()
    );
    Ok(())
}

fn cmd_cover(path: &Path, header_out: Option<&Path>) -> Result<()> {
    let tree = load_tree(path)?;
    let header = tree.cover_header().context("compute cover")?;
    for element in &header.elements {
        match element {
            CoverElement::Node(node) => println!("node {node}"),
            CoverElement::Subset(subset) => println!("subset {} \\ {}", subset.high, subset.low),
        }
    }
    if header.elements.is_empty() {
        println!("every user is revoked");
    }
    if let Some(out) = header_out {
        let bytes = header.to_bytes().context("serialize header")?;
        fs::write(out, bytes).with_context(|| format!("write {}", out.display()))?;
    }
    Ok(())
}

fn cmd_provision(path: &Path, user: usize, out: &Path) -> Result<()> {
    let tree = load_tree(path)?;
    let bundle = tree
        .provision(user)
        .with_context(|| format!("provision user {user}"))?;
    let bytes = bundle.to_bytes().context("serialize bundle")?;
    fs::write(out, bytes).with_context(|| format!("write {}", out.display()))?;
    println!("bundle for user {user} written to {}", out.display());
    Ok(())
}

fn cmd_receive(bundle_path: &Path, header_path: &Path) -> Result<()> {
    let bytes =
        fs::read(bundle_path).with_context(|| format!("read {}", bundle_path.display()))?;
    let bundle = UserBundle::from_bytes(&bytes).context("deserialize bundle")?;
    let bytes =
        fs::read(header_path).with_context(|| format!("read {}", header_path.display()))?;
    let header = CoverHeader::from_bytes(&bytes).context("deserialize header")?;

    let found = session_key(&bundle, &header)
        .with_context(|| format!("recover session key for user {}", bundle.user))?;
    println!("cover element {}: {:?}", found.position, found.element);
    println!("session key: {}", found.key.to_hex());
    Ok(())
}

fn cmd_inspect(path: &Path) -> Result<()> {
    let tree = load_tree(path)?;
    println!("scheme: {}", tree.scheme());
    print!("{}", tree.tree().dump());
    Ok(())
}

fn cmd_demo(depth: usize, seed: Option<u64>) -> Result<()> {
    let mut rng = seeded_rng(seed);
    let config = TreeConfig::new(depth, 128).context("tree configuration")?;
    let users = config.users();

    let mut revoked: Vec<usize> = (0..users.min(3))
        .map(|_| (rng.next_u64() % users as u64) as usize)
        .collect();
    revoked.sort_unstable();
    revoked.dedup();

    for scheme in [Scheme::Csm, Scheme::Sdm] {
        let mut tree_rng = ChaCha20Rng::from_seed(derive_seed(&mut rng));
        let mut tree = BroadcastTree::generate(scheme, config, &mut tree_rng)?;
        let bundles = (0..users)
            .map(|user| tree.provision(user))
            .collect::<bes_core::Result<Vec<_>>>()?;
        for &user in &revoked {
            tree.deny(user)?;
        }
        let header = tree.cover_header()?;

        let mut shared: Option<(usize, String)> = None;
        for bundle in &bundles {
            match session_key(bundle, &header) {
                Ok(found) if revoked.contains(&bundle.user) => {
                    bail!("revoked user {} recovered cover element {}", bundle.user, found.position)
                }
                Ok(found) => {
                    let key = found.key.to_hex();
                    if let Some((position, expected)) = &shared {
                        if *position == found.position && *expected != key {
                            bail!("users disagree on the key of cover element {position}");
                        }
                    }
                    shared = Some((found.position, key));
                }
                Err(_) if revoked.contains(&bundle.user) => {}
                Err(err) => bail!("user {} could not decrypt: {err}", bundle.user),
            }
        }
        println!(
            "{scheme}: {users} users, revoked {revoked:?}, cover of {} elements, every receiver checked",
            header.elements.len()
        );
    }
    Ok(())
}

fn load_tree(path: &Path) -> Result<BroadcastTree> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    BroadcastTree::load(&mut BufReader::new(file))
        .with_context(|| format!("load tree record {}", path.display()))
}

fn save_tree(tree: &BroadcastTree, path: &Path) -> Result<()> {
    let mut bytes = Vec::new();
    tree.save(&mut bytes).context("serialize tree")?;
    fs::write(path, bytes).with_context(|| format!("write {}", path.display()))
}

fn seeded_rng(seed: Option<u64>) -> impl RngCore + CryptoRng {
    match seed {
        Some(value) => {
            let mut seed_bytes = [0u8; 32];
            seed_bytes[..8].copy_from_slice(&value.to_le_bytes());
            ChaCha20Rng::from_seed(seed_bytes)
        }
        None => {
            let mut seed_bytes = [0u8; 32];
            rand::rngs::OsRng.fill_bytes(&mut seed_bytes);
            ChaCha20Rng::from_seed(seed_bytes)
        }
    }
}

fn derive_seed(rng: &mut impl RngCore) -> [u8; 32] {
    let mut seed_bytes = [0u8; 32];
    rng.fill_bytes(&mut seed_bytes);
    seed_bytes
}
