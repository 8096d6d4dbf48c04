//! CLI driver: loads a dataset, outsources it, and runs update rounds
//! with interleaved triple verification.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context as _, Result};
use clap::Parser;
use rand::rngs::ThreadRng;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use node::cache::CacheManager;
use node::config::{self, defaults};
use node::graph::{self, Graph, UpdateBatch, UpdateKind};
use node::protocol::{Context, Query, Session};
use primitives::{EdgeId, NodeId, Timestamp};

#[derive(Parser, Debug)]
#[command(
    name = "triple-verify",
    about = "Authenticated outsourced graph storage with triple verification"
)]
struct Args {
    /// Dataset index into the built-in registry.
    #[arg(long, default_value_t = defaults::DATASET)]
    dataset: usize,

    /// Initial graph fraction; below 1.0 the remainder streams in as
    /// update batches.
    #[arg(long, default_value_t = defaults::INITIAL_RATIO)]
    init_ratio: f64,

    /// Target node count |V|; overrides --init-ratio when set.
    #[arg(long)]
    scale: Option<usize>,

    /// Edges per synthetic update batch.
    #[arg(long, default_value_t = defaults::BATCH_SIZE)]
    batch_size: usize,

    /// Decoy edges per round (|S|).
    #[arg(long, default_value_t = defaults::TS_SIZE)]
    ts_size: usize,

    /// Query pattern id (e.g. 3n3e) or an edge count for a sampled query.
    #[arg(long, default_value = defaults::QUERY)]
    query: String,

    /// Update rounds to run.
    #[arg(long, default_value_t = defaults::ROUNDS)]
    rounds: usize,

    /// Query cadence in rounds.
    #[arg(long, default_value_t = defaults::QUERY_INTERVAL)]
    interval: usize,

    /// Directory holding the edge-list datasets.
    #[arg(long, default_value = "GDB")]
    data_dir: PathBuf,

    /// Directory for cached keys and ciphertexts.
    #[arg(long, default_value = "cache")]
    cache_dir: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut rng = rand::thread_rng();

    let cache = CacheManager::new(&args.cache_dir)?;
    let (bls, rsa) = match cache.load_keys() {
        Some(keys) => keys,
        None => {
            info!("generating key material (first run)");
            let bls = sig::keygen(&mut rng);
            let rsa = filter::RsaKeyPair::generate_default(&mut rng);
            cache.save_keys(&bls, &rsa)?;
            (bls, rsa)
        }
    };

    let dataset = config::DATASET_NAMES
        .get(args.dataset)
        .copied()
        .with_context(|| format!("dataset index {} out of range", args.dataset))?;
    let path = args.data_dir.join(dataset);

    let pattern = config::pattern(dataset, &args.query);
    let (graph, batches) = load_dataset(&args, &path, pattern.as_ref(), &mut rng)?;
    info!(
        dataset,
        nodes = graph.nodes.len(),
        edges = graph.edges.len(),
        stream_batches = batches.len(),
        "graph ready"
    );

    let query = select_query(&args.query, pattern, &graph, &mut rng)?;
    if !query.edges.iter().all(|e| graph.edges.contains(e)) {
        bail!("query pattern {:?} is not present in the dataset", args.query);
    }
    info!(
        q_nodes = query.nodes.len(),
        q_edges = query.edges.len(),
        "subgraph ready"
    );

    let data_path = cache.data_path(dataset, args.init_ratio, args.scale, &args.query);
    // Sampled (--scale) graphs are drawn fresh every run, so their
    // ciphertexts cannot be reused.
    let cached = if args.scale.is_some() {
        None
    } else {
        cache.load_ciphertexts(&data_path)
    };
    let had_cache = cached.is_some();

    let ctx = Context { bls, rsa };
    // Reserve filter headroom for the whole run: each round adds up to
    // batch_size nodes plus edges and a fresh decoy set.
    let planned_items = args.rounds * (2 * args.batch_size + 3 * args.ts_size);
    let start = Instant::now();
    let (mut session, ciphertexts) = Session::init(
        ctx,
        graph,
        query,
        args.ts_size,
        Timestamp::now(),
        cached,
        planned_items,
    )?;
    info!(elapsed_ms = start.elapsed().as_millis() as u64, "outsourcing complete");
    if !had_cache && args.scale.is_none() {
        cache.save_ciphertexts(&data_path, &ciphertexts)?;
    }

    let report = session.query_round(&mut rng)?;
    info!(
        proved = report.proved,
        stray = report.stray_hits,
        budget = report.budget,
        "initial verification passed"
    );

    for round in 1..=args.rounds {
        let batch = next_batch(&args, round, &batches, &session, &mut rng);
        if batch.is_empty() {
            warn!(round, "empty update batch");
        }
        let kind = batch.kind;

        let start = Instant::now();
        session.update(batch)?;
        let update_ms = start.elapsed().as_millis() as u64;

        if args.interval > 0 && round % args.interval == 0 {
            let start = Instant::now();
            let report = session.query_round(&mut rng)?;
            info!(
                round,
                ?kind,
                update_ms,
                verify_ms = start.elapsed().as_millis() as u64,
                proved = report.proved,
                stray = report.stray_hits,
                "round verified"
            );
        }
    }

    info!(rounds = args.rounds, "all rounds verified");
    Ok(())
}

type Pattern = (BTreeSet<NodeId>, BTreeSet<EdgeId>);

fn load_dataset(
    args: &Args,
    path: &std::path::Path,
    pattern: Option<&Pattern>,
    rng: &mut ThreadRng,
) -> Result<(Graph, Vec<BTreeSet<EdgeId>>)> {
    let loaded = if let Some(scale) = args.scale {
        let full = graph::load_graph(path)
            .with_context(|| format!("loading {}", path.display()))?;
        let adj = graph::adjacency_list(&full);
        let empty = Pattern::default();
        let (locked_nodes, locked_edges) = pattern.unwrap_or(&empty);
        (
            graph::sample_graph(&adj, scale, locked_nodes, locked_edges, rng),
            Vec::new(),
        )
    } else if args.init_ratio < 1.0 {
        graph::load_stream(path, args.init_ratio, args.batch_size)
            .with_context(|| format!("loading {}", path.display()))?
    } else {
        (
            graph::load_graph(path).with_context(|| format!("loading {}", path.display()))?,
            Vec::new(),
        )
    };
    if loaded.0.is_empty() {
        bail!("dataset {} is empty", path.display());
    }
    Ok(loaded)
}

fn select_query(
    key: &str,
    pattern: Option<Pattern>,
    graph: &Graph,
    rng: &mut ThreadRng,
) -> Result<Query> {
    if let Some((nodes, edges)) = pattern {
        return Ok(Query { nodes, edges });
    }
    let n: usize = key
        .parse()
        .with_context(|| format!("unknown query pattern {key:?}"))?;
    let (nodes, edges) = graph::gen_subgraph(&graph.edges, n, rng)
        .context("graph has fewer edges than the requested query size")?;
    Ok(Query { nodes, edges })
}

fn next_batch(
    args: &Args,
    round: usize,
    batches: &[BTreeSet<EdgeId>],
    session: &Session,
    rng: &mut ThreadRng,
) -> UpdateBatch {
    if round <= batches.len() {
        return UpdateBatch::from_stream(&batches[round - 1], &session.graph);
    }
    // Synthetic schedule: every 4th round deletes, the rest add.
    let kind = if round % 4 == 0 {
        UpdateKind::Deletion
    } else {
        UpdateKind::Addition
    };
    graph::gen_update(
        &session.graph,
        args.batch_size,
        kind,
        &session.query.nodes,
        &session.query.edges,
        rng,
    )
}
