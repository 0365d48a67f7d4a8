//! relaymq – run a broker from config, or poke at one interactively.
//
//  $ relaymq run --config relaymq.toml
//  $ relaymq shell
//  > create alerts
//  > sub alerts
//  > pub alerts -p 5 disk almost full
//  [alerts] 0190c7e2-... disk almost full (retry 0)
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use rustyline::history::DefaultHistory;
use rustyline::{DefaultEditor, Editor};
use tracing::info;

use relaymq::logging::init_logging_with;
use relaymq::{handler_fn, metrics, Broker, Config, PublishOptions, SubscriptionOptions};

#[derive(Debug, Parser)]
#[command(name = "relaymq", version, about = "relaymq in-process message broker")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a broker with the configured queues until Ctrl-C.
    Run {
        /// Path to config TOML (falls back to RELAYMQ_CONFIG, then defaults)
        #[arg(short, long)]
        config: Option<String>,
        /// Seconds between stats log lines
        #[arg(long, default_value_t = 30)]
        stats_interval_secs: u64,
    },
    /// Interactive shell against an in-process broker.
    Shell {
        #[arg(short, long)]
        config: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.cmd {
        Command::Run {
            config,
            stats_interval_secs,
        } => {
            let cfg = Config::load(config.as_deref())?;
            init_logging_with(&cfg.logging);
            run(cfg, Duration::from_secs(stats_interval_secs.max(1))).await?
        }
        Command::Shell { config } => {
            let cfg = Config::load(config.as_deref())?;
            init_logging_with(&cfg.logging);
            repl(cfg).await?
        }
    }
    Ok(())
}

async fn run(cfg: Config, stats_every: Duration) -> anyhow::Result<()> {
    let broker = Broker::init(cfg).await?;
    let mut ticker = tokio::time::interval(stats_every);
    ticker.tick().await;

    loop {
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                res?;
                info!("Received Ctrl-C");
                break;
            }
            _ = ticker.tick() => {
                let stats = broker.get_all_stats().await;
                let depth: usize = stats.per_queue.iter().map(|q| q.depth).sum();
                info!(
                    queues = stats.per_queue.len(),
                    depth,
                    published = stats.global.total_published,
                    processed = stats.global.total_processed,
                    failed = stats.global.total_failed,
                    dead_lettered = stats.global.total_dead_lettered,
                    pending_retries = stats.pending_retries,
                    "Broker stats"
                );
            }
        }
    }

    broker.shutdown().await;
    Ok(())
}

// ───────────────────────────────────────────────────────────
// Interactive REPL shell
// ───────────────────────────────────────────────────────────
const HELP: &str = "\
create <queue> [max_size] [fifo] [no-dlq]
pub <queue> [-p <priority>] <msg...>
sub <queue>          print every message
fail <queue>         attach a handler that always fails
stats [queue] | tail [n] | dlq <queue> [n] | clear <queue>
drain | metrics | exit";

async fn repl(cfg: Config) -> anyhow::Result<()> {
    let broker = Arc::new(Broker::init(cfg).await?);
    let mut rl: Editor<(), DefaultHistory> = DefaultEditor::new()?;

    println!("relaymq shell. Type `help` for commands.");

    loop {
        let Ok(line) = rl.readline("> ") else { break };
        let _ = rl.add_history_entry(line.as_str());

        match line.split_whitespace().collect::<Vec<_>>().as_slice() {
            [] => {}
            ["help"] => println!("{HELP}"),
            ["exit" | "quit"] => break,

            ["create", queue, flags @ ..] => {
                let mut opts = broker.default_queue_options();
                for flag in flags {
                    match *flag {
                        "fifo" => opts = opts.with_priority_ordering(false),
                        "no-dlq" => opts = opts.with_dead_letter(false),
                        n => match n.parse::<usize>() {
                            Ok(max) => opts = opts.with_max_size(max),
                            Err(_) => println!("ignoring unknown flag `{n}`"),
                        },
                    }
                }
                let q = broker.create_queue(queue, opts);
                println!("> queue {} (max {})", q.name(), q.options().max_size);
            }

            ["pub", queue, "-p", prio, rest @ ..] => match prio.parse::<i32>() {
                Ok(p) => {
                    let opts = PublishOptions::default().with_priority(p);
                    publish(&broker, queue, rest.join(" "), opts).await
                }
                Err(_) => println!("priority must be an integer"),
            },
            ["pub", queue, rest @ ..] => {
                publish(&broker, queue, rest.join(" "), PublishOptions::default()).await
            }

            ["sub", queue] => {
                let handler = handler_fn(|payload, ctx| async move {
                    println!(
                        "[{}] {} {} (retry {})",
                        ctx.queue_name,
                        ctx.message_id,
                        String::from_utf8_lossy(&payload),
                        ctx.retry_count
                    );
                    Ok(())
                });
                match broker.subscribe(queue, handler, SubscriptionOptions::default()) {
                    Ok(id) => println!("> subscribed {id}"),
                    Err(e) => println!("> {e}"),
                }
            }

            ["fail", queue] => {
                let handler = handler_fn(|_, ctx| async move {
                    Err(anyhow::anyhow!("rejected {}", ctx.message_id))
                });
                match broker.subscribe(queue, handler, SubscriptionOptions::default()) {
                    Ok(id) => println!("> failing subscriber {id}"),
                    Err(e) => println!("> {e}"),
                }
            }

            ["stats"] => print_json(&broker.get_all_stats().await),
            ["stats", queue] => match broker.get_queue_stats(queue).await {
                Some(stats) => print_json(&stats),
                None => println!("> no such queue"),
            },

            ["tail", rest @ ..] => {
                let n = rest.first().and_then(|n| n.parse().ok()).unwrap_or(10);
                for record in broker.telemetry().tail(n) {
                    print_json(&record);
                }
            }

            ["dlq", queue, rest @ ..] => {
                let n = rest.first().and_then(|n| n.parse().ok()).unwrap_or(20);
                match broker.dead_letters(queue, n).await {
                    Ok(messages) => {
                        for m in messages {
                            let reason = m.dead_letter.as_ref().map_or("", |d| d.reason.as_str());
                            println!(
                                "{} {} ({})",
                                m.id,
                                String::from_utf8_lossy(&m.payload),
                                reason
                            );
                        }
                    }
                    Err(e) => println!("> {e}"),
                }
            }

            ["clear", queue] => println!("> cleared: {}", broker.clear_queue(queue).await),
            ["drain"] => print_json(&broker.drain_now().await),
            ["metrics"] => print!("{}", metrics::render(&broker.get_all_stats().await)),

            _ => println!("Unknown cmd. Type `help`."),
        }
    }

    broker.shutdown().await;
    Ok(())
}

async fn publish(broker: &Broker, queue: &str, body: String, options: PublishOptions) {
    match broker.publish(queue, body, options).await {
        Ok(id) => println!("> {id}"),
        Err(e) => println!("> {e}"),
    }
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(e) => println!("> failed to render: {e}"),
    }
}
