use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use nestbudget_lib::logging::init_logging;
use nestbudget_lib::model::NewRecurringExpense;
use nestbudget_lib::{Config, EntityId, LocalStore, StorageAdapter};

#[derive(Debug, Parser)]
#[command(name = "nestbudget", about = "Inspect and edit the on-device budget store", version)]
struct Cli {
    /// Optional explicit DB path
    #[arg(long, value_name = "PATH", global = true)]
    db: Option<PathBuf>,

    /// Emit JSON instead of one line per record.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(subcommand)]
    Family(FamilyCommand),
    #[command(subcommand)]
    Month(MonthCommand),
    #[command(subcommand)]
    Expense(ExpenseCommand),
    #[command(subcommand)]
    Recurring(RecurringCommand),
    /// Pending mutations waiting for the backend.
    #[command(subcommand)]
    Queue(QueueCommand),
}

#[derive(Debug, Subcommand)]
enum FamilyCommand {
    /// Create an offline family.
    Create { name: String },
    List,
}

#[derive(Debug, Subcommand)]
enum MonthCommand {
    /// Create a month and materialize the family's recurring expenses into it.
    Create {
        #[arg(long)]
        family: String,
        #[arg(long)]
        year: i32,
        #[arg(long)]
        month: u32,
    },
    List {
        #[arg(long)]
        family: String,
    },
}

#[derive(Debug, Subcommand)]
enum ExpenseCommand {
    List {
        #[arg(long)]
        family: String,
        #[arg(long)]
        month: String,
    },
}

#[derive(Debug, Args)]
struct RecurringArgs {
    #[arg(long)]
    family: String,
    #[arg(long)]
    title: String,
    #[arg(long)]
    category: String,
    #[arg(long)]
    value: f64,
    #[arg(long)]
    due_day: Option<u32>,
    /// Number of installments; requires --start-year and --start-month.
    #[arg(long, requires_all = ["start_year", "start_month"])]
    installments: Option<u32>,
    #[arg(long)]
    start_year: Option<i32>,
    #[arg(long)]
    start_month: Option<u32>,
}

#[derive(Debug, Subcommand)]
enum RecurringCommand {
    Add(RecurringArgs),
    List {
        #[arg(long)]
        family: String,
    },
}

#[derive(Debug, Subcommand)]
enum QueueCommand {
    List,
    Clear,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => {}
        Err(err) => {
            eprintln!("Error: {err:#}");
            process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::from_env().context("read configuration")?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }
    let _guard = init_logging(&config).context("initialize logging")?;

    let store = LocalStore::open(&config.db_path)
        .await
        .with_context(|| format!("open store at {}", config.db_path.display()))?;
    let adapter = StorageAdapter::offline(store.clone());
    let result = dispatch(&adapter, cli.command, cli.json).await;
    store.close().await;
    result
}

fn print_records<T: Serialize>(
    records: &[T],
    json: bool,
    line: impl Fn(&T) -> String,
) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(records).context("serialize output")?
        );
    } else {
        for record in records {
            println!("{}", line(record));
        }
    }
    Ok(())
}

async fn dispatch(adapter: &StorageAdapter, command: Commands, json: bool) -> Result<()> {
    match command {
        Commands::Family(FamilyCommand::Create { name }) => {
            let family = adapter.create_family(&name, true).await?;
            print_records(&[family], json, |f| format!("{}\t{}", f.id, f.name))
        }
        Commands::Family(FamilyCommand::List) => {
            let families = adapter.get_families().await?;
            print_records(&families, json, |f| {
                let mode = if f.is_offline { "offline" } else { "cloud" };
                format!("{}\t{}\t{mode}", f.id, f.name)
            })
        }
        Commands::Month(MonthCommand::Create {
            family,
            year,
            month,
        }) => {
            let family = EntityId::classify(family);
            let created = adapter.insert_month(&family, year, month).await?;
            let expenses = adapter.get_expenses(&family, &created.id).await?;
            if !json {
                eprintln!("materialized {} recurring expense(s)", expenses.len());
            }
            print_records(&[created], json, |m| {
                format!("{}\t{}-{:02}", m.id, m.year, m.month)
            })
        }
        Commands::Month(MonthCommand::List { family }) => {
            let months = adapter.get_months(&EntityId::classify(family)).await?;
            print_records(&months, json, |m| {
                format!("{}\t{}-{:02}\tincome={}", m.id, m.year, m.month, m.income)
            })
        }
        Commands::Expense(ExpenseCommand::List { family, month }) => {
            let expenses = adapter
                .get_expenses(&EntityId::classify(family), &EntityId::classify(month))
                .await?;
            print_records(&expenses, json, |e| {
                let plan = e
                    .installment_info
                    .map(|i| format!("\t{}/{}", i.current, i.total))
                    .unwrap_or_default();
                let pending = if e.is_pending { "\tpending" } else { "" };
                format!("{}\t{}\t{}\t{}{plan}{pending}", e.id, e.title, e.category, e.value)
            })
        }
        Commands::Recurring(RecurringCommand::Add(args)) => {
            let input = NewRecurringExpense {
                title: args.title,
                category: args.category,
                subcategory_id: None,
                value: args.value,
                due_day: args.due_day,
                has_installments: args.installments.is_some(),
                total_installments: args.installments,
                start_year: args.start_year,
                start_month: args.start_month,
            };
            let template = adapter
                .insert_recurring(&EntityId::classify(args.family), &input)
                .await?;
            print_records(&[template], json, |t| format!("{}\t{}", t.id, t.title))
        }
        Commands::Recurring(RecurringCommand::List { family }) => {
            let templates = adapter.get_recurring(&EntityId::classify(family)).await?;
            print_records(&templates, json, |t| {
                let plan = match (t.total_installments, t.start_year, t.start_month) {
                    (Some(n), Some(y), Some(m)) if t.has_installments => {
                        format!("\t{n} from {y}-{m:02}")
                    }
                    _ => String::new(),
                };
                format!("{}\t{}\t{}{plan}", t.id, t.title, t.value)
            })
        }
        Commands::Queue(QueueCommand::List) => {
            let items = adapter.queue().all().await?;
            print_records(&items, json, |i| {
                format!(
                    "{}\t{}\t{}\t{}",
                    i.id,
                    i.entity,
                    i.action.as_str(),
                    i.family_id
                )
            })
        }
        Commands::Queue(QueueCommand::Clear) => {
            let removed = adapter.queue().clear().await?;
            println!("removed {removed} item(s)");
            Ok(())
        }
    }
}
