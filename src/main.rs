use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::info;

use seller_orders::api::HttpSellerApi;
use seller_orders::config;
use seller_orders::grouping::{GroupKey, OrderGroup};
use seller_orders::model::{Order, ServerGroup, ViewMode};
use seller_orders::session::OrdersSession;
use seller_orders::shipping::{ShipOutcome, ShipProgress};

#[derive(Debug, Parser)]
#[command(author, version, about = "Seller order console: list, group and ship orders")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List orders, individually or grouped by checkout
    Orders {
        /// Force a view instead of detecting it (individual | grouped)
        #[arg(long)]
        view: Option<ViewMode>,
    },
    /// List groups as aggregated by the backend
    ServerGroups,
    /// Ship every pending order of a group (key as printed by `orders --view grouped`)
    Ship {
        group: GroupKey,
    },
    /// Ship a single pending order
    ShipOrder {
        order_id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    let api = HttpSellerApi::from_config(&cfg.backend)?;
    let mut session = OrdersSession::from_config(api, &cfg);

    match args.command {
        Command::Orders { view } => {
            session.set_view_override(view);
            let mode = session
                .refresh()
                .await
                .context("could not load orders; retry when the backend is reachable")?;
            match mode {
                ViewMode::Individual => print_orders(session.orders()),
                ViewMode::Grouped => print_groups(&session.groups_newest_first()),
            }
        }
        Command::ServerGroups => {
            let groups = session
                .fetch_server_groups()
                .await
                .context("could not load grouped orders")?;
            print_server_groups(&groups);
        }
        Command::Ship { group } => {
            session.refresh().await.context("could not load orders")?;
            let generation = session.generation();

            let (tx, mut rx) = mpsc::unbounded_channel::<ShipProgress>();
            let printer = tokio::spawn(async move {
                while let Some(p) = rx.recv().await {
                    println!("[{}/{}] {}", p.completed, p.total, p.message);
                }
            });
            let outcome = session.bulk_ship(&group, generation, Some(tx)).await;
            printer.await.context("progress printer panicked")?;

            let outcome = outcome?;
            print_outcome(&outcome);
            if let ShipOutcome::Failure(_) = outcome {
                bail!("no orders in {} could be shipped", group);
            }
        }
        Command::ShipOrder { order_id } => {
            session.refresh().await.context("could not load orders")?;
            session.ship_order(order_id).await?;
            println!("Order #{} shipped", order_id);
        }
    }

    info!("done");
    Ok(())
}

fn print_orders(orders: &[Order]) {
    if orders.is_empty() {
        println!("No orders yet.");
        return;
    }
    let mut sorted: Vec<&Order> = orders.iter().collect();
    sorted.sort_by(|a, b| b.order_date.cmp(&a.order_date));
    println!(
        "{:>8}  {:<20}  {:<24}  {:>10}  {:<10}  {}",
        "ORDER", "BUYER", "PRODUCT", "TOTAL", "STATUS", "DATE"
    );
    for o in sorted {
        println!(
            "{:>8}  {:<20}  {:<24}  {:>10.2}  {:<10}  {}",
            o.id,
            o.buyer_name,
            o.product_name,
            o.total_price,
            o.status,
            o.order_date.format("%Y-%m-%d %H:%M:%S")
        );
    }
}

fn print_groups(groups: &[&OrderGroup]) {
    if groups.is_empty() {
        println!("No orders yet.");
        return;
    }
    for g in groups {
        println!(
            "{}  buyer={}  items={}  total={:.2}  status={}  date={}",
            g.key,
            g.buyer_name,
            g.len(),
            g.total_amount,
            g.overall_status(),
            g.order_date.format("%Y-%m-%d %H:%M:%S")
        );
        for o in &g.orders {
            println!(
                "    #{:<8} {:<24} {:>10.2}  {}",
                o.id, o.product_name, o.total_price, o.status
            );
        }
    }
}

fn print_server_groups(groups: &[ServerGroup]) {
    if groups.is_empty() {
        println!("No grouped orders.");
        return;
    }
    for g in groups {
        println!(
            "buyer={} ({})  items={}  total={:.2}  date={}",
            g.buyer_name,
            g.buyer_id,
            g.orders.len(),
            g.total_amount,
            g.order_date.format("%Y-%m-%d %H:%M:%S")
        );
    }
}

fn print_outcome(outcome: &ShipOutcome) {
    let summary = outcome.summary();
    println!("{}", summary.headline());
    for f in &summary.failed {
        println!("  order #{} failed: {}", f.order_id, f.error);
    }
}
