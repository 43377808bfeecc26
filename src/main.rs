// ShopLedger - Admin CLI
//
// Maintenance tasks against the SQLite database: migrations, CSV import and
// export, reports and bill printing. `init-config` writes a starter config. The API lives in `shopledger-server`.

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use shopledger::config::Config;
use shopledger::csv_io::{load_products_csv, write_transactions_csv};
use shopledger::logging::init_tracing;
use shopledger::print::render_bill;
use shopledger::reports::{self, Period};
use shopledger::{
    migrate_normalize_received_quantities, table_counts, Business, DatabaseStorage, Storage,
    TransactionFilter,
};

#[derive(Parser, Debug)]
#[command(name = "shopledger")]
#[command(about = "Admin tools for the ShopLedger database", version)]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "shopledger.json")]
    config: PathBuf,

    /// SQLite database (overrides config and SHOPLEDGER_DB)
    #[arg(long)]
    database: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write the effective settings (file, env, flags) to the config path
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Bring the schema up to date and normalize legacy bill data
    Migrate,

    /// Create a business and print its id
    CreateBusiness {
        #[arg(long)]
        name: String,
        /// Defaults to the configured currency
        #[arg(long)]
        currency: Option<String>,
    },

    /// Import products from CSV
    ImportProducts {
        #[arg(long)]
        business_id: i64,
        file: PathBuf,
    },

    /// Export transactions as CSV (stdout unless --out)
    ExportTransactions {
        #[arg(long)]
        business_id: i64,
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Print a report as JSON
    Report {
        #[arg(value_enum)]
        kind: ReportKind,
        #[arg(long)]
        business_id: i64,
        #[arg(long)]
        from: Option<NaiveDate>,
        #[arg(long)]
        to: Option<NaiveDate>,
    },

    /// Render a bill or invoice as plain text
    PrintBill { transaction_id: i64 },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq)]
enum ReportKind {
    CashFlow,
    ProfitAndLoss,
    BalanceSheet,
    Analytics,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let (config, source) = Config::load(&args.config)
        .with_context(|| format!("Failed to load config {}", args.config.display()))?;
    let mut config = config.apply_env();
    config.apply_overrides(args.database.clone(), None);
    init_tracing(&config.log_filter);
    source.log();

    if let Command::InitConfig { force } = &args.command {
        return run_init_config(&config, &args.config, *force);
    }

    let Some(db_path) = config.database.clone() else {
        bail!("no database configured (use --database or SHOPLEDGER_DB)");
    };

    match args.command {
        Command::InitConfig { .. } => Ok(()),
        Command::Migrate => run_migrate(&db_path),
        Command::CreateBusiness { name, currency } => {
            let storage = open(&db_path)?;
            let currency = currency.unwrap_or_else(|| config.default_currency.clone());
            let business = storage.create_business(Business::new(&name, &currency))?;
            println!("✓ Created business {} ({})", business.id, business.name);
            Ok(())
        }
        Command::ImportProducts { business_id, file } => {
            run_import_products(&open(&db_path)?, business_id, &file)
        }
        Command::ExportTransactions { business_id, out } => {
            run_export(&open(&db_path)?, business_id, out.as_deref())
        }
        Command::Report {
            kind,
            business_id,
            from,
            to,
        } => run_report(&open(&db_path)?, kind, business_id, Period::new(from, to)),
        Command::PrintBill { transaction_id } => {
            let storage = open(&db_path)?;
            let tx = storage
                .get_transaction(transaction_id)?
                .with_context(|| format!("transaction {} not found", transaction_id))?;
            let business = storage
                .get_business(tx.business_id)?
                .with_context(|| format!("business {} not found", tx.business_id))?;
            print!("{}", render_bill(&business, &tx));
            Ok(())
        }
    }
}

fn open(path: &Path) -> Result<DatabaseStorage> {
    DatabaseStorage::open(path).with_context(|| format!("Failed to open {}", path.display()))
}

fn run_init_config(config: &Config, path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    config
        .save(path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("✓ Wrote {}", path.display());
    Ok(())
}

fn run_migrate(db_path: &Path) -> Result<()> {
    println!("🗄️  ShopLedger migrations");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    // Schema migrations run inside open()
    let storage = open(db_path)?;
    println!("✓ Schema up to date");

    let changed = storage.with_connection(|conn| migrate_normalize_received_quantities(conn))?;
    println!("✓ Normalized received quantities on {} bills", changed);

    println!("\n📊 Row counts");
    for (table, count) in storage.with_connection(|conn| table_counts(conn))? {
        println!("   {:<22} {}", table, count);
    }
    Ok(())
}

fn run_import_products(storage: &DatabaseStorage, business_id: i64, file: &Path) -> Result<()> {
    if storage.get_business(business_id)?.is_none() {
        bail!("business {} not found", business_id);
    }

    let products = load_products_csv(file, business_id)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let mut imported = 0;
    for product in products {
        storage.create_product(product)?;
        imported += 1;
    }
    println!("✓ Imported {} products", imported);
    Ok(())
}

fn run_export(storage: &DatabaseStorage, business_id: i64, out: Option<&Path>) -> Result<()> {
    let transactions = storage.list_transactions(&TransactionFilter::for_business(business_id))?;
    let written = match out {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            write_transactions_csv(file, &transactions)?
        }
        None => write_transactions_csv(io::stdout().lock(), &transactions)?,
    };
    if out.is_some() {
        println!("✓ Exported {} transactions", written);
    }
    Ok(())
}

fn run_report(
    storage: &DatabaseStorage,
    kind: ReportKind,
    business_id: i64,
    period: Period,
) -> Result<()> {
    let filter = TransactionFilter {
        from: period.from,
        to: period.to,
        ..TransactionFilter::for_business(business_id)
    };
    let transactions = storage.list_transactions(&filter)?;

    let json = match kind {
        ReportKind::CashFlow => serde_json::to_string_pretty(&reports::cash_flow(
            &transactions,
            &storage.list_transfers(business_id)?,
            &storage.list_account_categories(business_id)?,
            period,
        ))?,
        ReportKind::ProfitAndLoss => serde_json::to_string_pretty(&reports::profit_and_loss(
            &transactions,
            &storage.list_account_categories(business_id)?,
            period,
        ))?,
        ReportKind::BalanceSheet => {
            let all = storage.list_transactions(&TransactionFilter::for_business(business_id))?;
            serde_json::to_string_pretty(&reports::balance_sheet(
                &storage.list_accounts(business_id)?,
                &all,
                &storage.list_transfers(business_id)?,
                &storage.list_products(business_id)?,
                period.to.unwrap_or_else(|| Utc::now().date_naive()),
            ))?
        }
        ReportKind::Analytics => serde_json::to_string_pretty(&reports::analytics(
            &transactions,
            &storage.list_products(business_id)?,
        ))?,
    };

    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{}", json)?;
    Ok(())
}
