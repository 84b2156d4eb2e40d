

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use grag::llm::EmbeddingProviderFactory;
use grag::toolkit::graph_search::{DEFAULT_THRESHOLD, DEFAULT_TOP_K, GragRetriever, SearchResult};
use grag::{AppSettings, JsonNodeStore, safe_truncate_ellipsis};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};


struct Args {
    config: Option<PathBuf>,
    nodes: Option<PathBuf>,
    top_k: usize,
    threshold: f64,
    json: bool,
    similar: Option<String>,
    stats: bool,
    force_refresh: bool,
    queries: Vec<String>,
}

fn parse_args() -> anyhow::Result<Option<Args>> {
    let raw: Vec<String> = env::args().skip(1).collect();
    let mut args = Args {
        config: None,
        nodes: None,
        top_k: DEFAULT_TOP_K,
        threshold: DEFAULT_THRESHOLD,
        json: false,
        similar: None,
        stats: false,
        force_refresh: false,
        queries: Vec::new(),
    };

    let mut i = 0;
    while i < raw.len() {
        let value = |i: usize| raw.get(i + 1).with_context(|| format!("{} expects a value", raw[i]));
        match raw[i].as_str() {
            "--config" | "-c" => {
                args.config = Some(PathBuf::from(value(i)?));
                i += 1;
            }
            "--nodes" | "-n" => {
                args.nodes = Some(PathBuf::from(value(i)?));
                i += 1;
            }
            "--top-k" | "-k" => {
                args.top_k = value(i)?.parse().context("--top-k expects a non-negative integer")?;
                i += 1;
            }
            "--threshold" | "-t" => {
                args.threshold = value(i)?.parse().context("--threshold expects a number")?;
                i += 1;
            }
            "--similar" => {
                args.similar = Some(value(i)?.clone());
                i += 1;
            }
            "--json" => args.json = true,
            "--stats" => args.stats = true,
            "--force-refresh" => args.force_refresh = true,
            "--help" | "-h" => {
                print_help();
                return Ok(None);
            }
            flag if flag.starts_with('-') => bail!("unknown option {flag}, see --help"),
            query => args.queries.push(query.to_string()),
        }
        i += 1;
    }

    Ok(Some(args))
}

fn print_help() {
    println!("grag-search: graph-aware search over a mind-map export");
    println!();
    println!("USAGE: grag-search [OPTIONS] [QUERY]...");
    println!();
    println!("  -c, --config <FILE>     settings file (default: ./grag.toml if present)");
    println!("  -n, --nodes <FILE>      JSON array of node documents (overrides settings)");
    println!("  -k, --top-k <N>         results per query (default: {DEFAULT_TOP_K})");
    println!("  -t, --threshold <X>     minimum score (default: {DEFAULT_THRESHOLD})");
    println!("      --similar <ID>      rank nodes similar to an indexed node");
    println!("      --stats             print index statistics");
    println!("      --force-refresh     rebuild the index before searching");
    println!("      --json              print results as JSON");
    println!();
    println!("Without queries, reads one query per line from stdin.");
    println!("Settings can be overridden with GRAG_* variables, e.g. GRAG_GRAG__HOPS=1.");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive("grag=info".parse()?))
        .init();

    let Some(args) = parse_args()? else {
        return Ok(());
    };

    let mut settings = AppSettings::load(args.config.as_deref())?;
    if let Some(nodes) = &args.nodes {
        settings.nodes_path = nodes.clone();
    }

    let store = Arc::new(JsonNodeStore::new(&settings.nodes_path));
    let embedder = EmbeddingProviderFactory::shared_from_settings(&settings)?;
    let retriever = GragRetriever::new(store, embedder, settings.grag.clone())?;

    retriever.refresh_index(args.force_refresh).await?;

    if args.stats {
        let stats = retriever.get_search_stats().await?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&stats)?);
        } else {
            println!(
                "Nodes:      {} ({} indexed, {} without embeddings)",
                stats.total_nodes,
                stats.indexed_nodes,
                stats.nodes_without_embeddings()
            );
            println!("Edges:      {}", stats.edges);
            println!("Dimension:  {}", stats.embedding_dim);
            println!("Model:      {}", retriever.model_name());
            println!("Built at:   {} (v{})", stats.last_build_time.to_rfc3339(), stats.version);
        }
    }

    if let Some(node_id) = &args.similar {
        let results = retriever.get_similar_nodes(node_id, args.top_k, true).await?;
        print_results(&format!("similar to {node_id}"), &results, args.json)?;
    }

    if !args.queries.is_empty() {
        let answered = retriever.batch_search(args.queries.as_slice(), args.top_k, args.threshold).await?;
        for query in &args.queries {
            let results = answered.get(query).map(Vec::as_slice).unwrap_or_default();
            print_results(query, results, args.json)?;
        }
        return Ok(());
    }

    if args.similar.is_some() || args.stats {
        return Ok(());
    }

    eprintln!("Enter a query per line (Ctrl-D to quit)");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        match retriever.search(query, args.top_k, args.threshold).await {
            Ok(results) => print_results(query, &results, args.json)?,
            Err(e) => eprintln!("Search failed: {e}"),
        }
    }

    Ok(())
}

fn print_results(label: &str, results: &[SearchResult], json: bool) -> anyhow::Result<()> {
    if json {
        let payload = serde_json::json!({ "query": label, "results": results });
        println!("{}", serde_json::to_string(&payload)?);
        return Ok(());
    }

    println!("\n{} ({} results)", label, results.len());
    if results.is_empty() {
        println!("  no nodes above threshold");
    }
    for (rank, result) in results.iter().enumerate() {
        let context = &result.graph_context;
        println!(
            "  {:>2}. [{:.4}] {} {}",
            rank + 1,
            result.score,
            result.node_id,
            safe_truncate_ellipsis(&result.text, 80)
        );
        println!(
            "      seed={} hop={} local={:.4} subgraph={:.4}",
            context.seed_node, context.hop_distance, context.local_similarity, context.subgraph_score
        );
        if !context.neighbors.is_empty() {
            let neighbors: Vec<String> = context
                .neighbors
                .iter()
                .map(|n| {
                    let kinds: Vec<&'static str> = n.relations.iter().map(|k| <&'static str>::from(*k)).collect();
                    format!("{} ({})", n.node_id, kinds.join("+"))
                })
                .collect();
            println!("      neighbors: {}", neighbors.join(", "));
        }
    }
    Ok(())
}
