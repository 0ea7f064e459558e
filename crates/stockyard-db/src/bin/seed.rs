//! # Seed Data Generator
//!
//! Populates a development database with catalog items, a few sales and
//! the ledger rows they produce.
//!
//! ## Usage
//! ```bash
//! # 500 items (default)
//! cargo run -p stockyard-db --bin seed
//!
//! # Custom amount, custom file, custom SKU prefix
//! cargo run -p stockyard-db --bin seed -- --count 2000 --db ./data/dev.db --prefix DEV
//! ```
//!
//! Every item goes through `create_item`, so codes are allocated, prices
//! come from the default calculator and each opening stock is a
//! `PRODUCT_CREATE` movement. The run ends with a ledger conservation check.

use std::env;

use stockyard_core::{
    CatalogItem, InvoiceDraft, InvoiceLine, SkuFormat, TieredMarkupCalculator, DEFAULT_SKU_WIDTH,
};
use stockyard_db::{Database, DbConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Item families for realistic names.
const FAMILIES: &[(&str, &[&str])] = &[
    ("Beverages", &["Cola", "Lemon Soda", "Mineral Water", "Orange Juice", "Iced Tea", "Coffee Beans"]),
    ("Snacks", &["Potato Chips", "Peanuts", "Chocolate Bar", "Cookies", "Crackers"]),
    ("Dairy", &["Whole Milk", "Yogurt", "Cheddar", "Butter"]),
    ("Hardware", &["Screwdriver", "Hammer", "Tape Measure", "Wood Glue", "Sandpaper"]),
    ("Stationery", &["Notebook", "Ballpoint Pen", "Stapler", "Marker Set"]),
];

/// Size variants with a cost addon in cents.
const SIZES: &[(&str, i64)] = &[("Small", 0), ("Medium", 2_500), ("Large", 6_000), ("Pack x6", 15_000)];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,stockyard=debug,sqlx=warn")),
        )
        .init();

    let args: Vec<String> = env::args().collect();

    let mut count: usize = 500;
    let mut db_path = String::from("./stockyard_dev.db");
    let mut prefix = String::from("DEV");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--count" | "-c" => {
                if i + 1 < args.len() {
                    count = args[i + 1].parse().unwrap_or(500);
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--prefix" | "-p" => {
                if i + 1 < args.len() {
                    prefix = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Stockyard Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --count <N>       Number of items to generate (default: 500)");
                println!("  -d, --db <PATH>       Database file path (default: ./stockyard_dev.db)");
                println!("  -p, --prefix <SKU>    SKU prefix (default: DEV)");
                println!("  -h, --help            Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    info!(db = %db_path, count, prefix = %prefix, "Seeding database");

    let db = Database::new(DbConfig::new(&db_path)).await?;

    let existing = db.catalog().count().await?;
    if existing > 0 {
        warn!(existing, "Database already has items, skipping seed");
        return Ok(());
    }

    let sku = SkuFormat::new(prefix, DEFAULT_SKU_WIDTH);
    let pricing = TieredMarkupCalculator::default();
    let start = std::time::Instant::now();
    let mut created: Vec<(i64, String)> = Vec::with_capacity(count);

    'outer: for (family_idx, (family, names)) in FAMILIES.iter().enumerate() {
        for (name_idx, name) in names.iter().enumerate() {
            for (size_idx, (size, addon)) in SIZES.iter().enumerate() {
                if created.len() >= count {
                    break 'outer;
                }
                let seed = family_idx * 1_000 + name_idx * 20 + size_idx;
                let item = generate_item(family, name, size, *addon, seed);
                let item_name = item.name.clone();

                match db.catalog().create_item(item, &sku, &pricing).await {
                    Ok(committed) => created.push((committed.value, item_name)),
                    Err(e) => warn!(name = %item_name, error = %e, "Failed to create item"),
                }
            }
        }
    }

    info!(created = created.len(), elapsed = ?start.elapsed(), "Items created");

    // a handful of sales so history screens have something to show
    let mut sales = 0;
    for (id, name) in created.iter().step_by(7).take(20) {
        let Some(item) = db.catalog().get(*id).await? else {
            continue;
        };
        if item.quantity == 0 {
            continue;
        }
        let draft = InvoiceDraft {
            lines: vec![InvoiceLine {
                item_id: *id,
                item_name: name.clone(),
                quantity: 1,
                unit_price: item.sale_price().map_or(0, |p| p.cents()),
            }],
            ..Default::default()
        };
        match db.invoices().confirm_invoice(&draft).await {
            Ok(committed) => {
                sales += 1;
                info!(invoice = %committed.value.invoice_number, item = %name, "Sale recorded");
            }
            Err(e) => warn!(item = %name, error = %e, "Sale failed"),
        }
    }

    let violations = db.ledger().conservation_violations().await?;
    if violations.is_empty() {
        info!(sales, pending = db.outbox().count_pending().await?, "Seed complete, ledger balanced");
    } else {
        warn!(count = violations.len(), "Ledger conservation violated after seed");
    }

    Ok(())
}

/// Generates one item with deterministic pseudo-random data.
fn generate_item(family: &str, name: &str, size: &str, addon: i64, seed: usize) -> CatalogItem {
    let purchase = 5_000 + ((seed * 37) % 40_000) as i64 + addon;

    let mut item = CatalogItem::new(format!("{} {}", name, size))
        .with_barcode(format!("779{:010}", seed))
        .with_quantity((seed % 41) as i64)
        .with_purchase_price(purchase);
    item.category = Some(family.to_string());
    item.min_stock = Some(5);
    item
}
