//! wide-scan CLI

use arrow::util::pretty::print_batches;
use clap::{Args, Parser, Subcommand};
use std::sync::Arc;
use std::time::Instant;
use wide_scan::datagen::{
    wide_table_schema, WideTableGenerator, GROUP_COLUMN, TS_COLUMN, VALUE_COLUMN,
};
use wide_scan::execution::{EngineConfig, ExecutionContext};
use wide_scan::physical::aggregate::KeyKind;
use wide_scan::physical::{
    AsyncFilteredCursorFactory, FrameRecord, GroupBy, MemoryPageFrameSource, SumLong256,
    VectorAggregateExec,
};
use wide_scan::{Result, WideInt256};

#[derive(Parser)]
#[command(name = "wide-scan")]
#[command(about = "Parallel page-frame scans over generated long256 data")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
struct ScanArgs {
    /// Rows to generate
    #[arg(short, long, default_value = "1000000")]
    rows: usize,

    /// Rows per page frame
    #[arg(long, default_value = "8192")]
    frame_rows: usize,

    /// Worker threads (defaults to the number of cores)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Make every n-th value NULL (0 = no nulls)
    #[arg(long, default_value = "0")]
    null_every: usize,

    /// Random seed
    #[arg(long, default_value = "42")]
    seed: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// sum(val) over the whole table
    Sum {
        #[command(flatten)]
        scan: ScanArgs,
    },

    /// Rows whose val is at least --min
    Filter {
        #[command(flatten)]
        scan: ScanArgs,

        /// Lower bound as 0x-prefixed hex
        #[arg(long, default_value = "0x0")]
        min: String,

        /// Scan frames from last to first
        #[arg(long)]
        desc: bool,

        /// Matching rows to print
        #[arg(long, default_value = "10")]
        limit: usize,
    },

    /// sum(val) grouped by grp, or by hour of ts
    GroupSum {
        #[command(flatten)]
        scan: ScanArgs,

        /// Distinct group keys to generate
        #[arg(short, long, default_value = "16")]
        groups: i64,

        /// Group by hour of day instead of grp
        #[arg(long)]
        hour: bool,
    },
}

fn context(scan: &ScanArgs) -> Result<ExecutionContext> {
    let mut config = EngineConfig {
        frame_rows: scan.frame_rows,
        ..EngineConfig::default()
    };
    if let Some(workers) = scan.workers {
        config.worker_count = workers;
    }
    ExecutionContext::try_new(config)
}

fn source(scan: &ScanArgs, groups: i64, ctx: &ExecutionContext) -> Result<MemoryPageFrameSource> {
    let start = Instant::now();
    let batches = WideTableGenerator::new(scan.seed)
        .with_groups(groups)
        .with_null_every(scan.null_every)
        .generate(scan.rows)?;
    let source =
        MemoryPageFrameSource::try_new(wide_table_schema(), batches, ctx.config().frame_rows)?;
    println!(
        "Generated {} rows in {:?}",
        source.total_rows(),
        start.elapsed()
    );
    Ok(source)
}

/// Unsigned comparison, most significant limb first
fn at_least(value: &WideInt256, min: &WideInt256) -> bool {
    let (v, m) = (value.limbs(), min.limbs());
    v.iter().rev().cmp(m.iter().rev()) != std::cmp::Ordering::Less
}

fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Sum { scan } => {
            let ctx = context(&scan)?;
            let source = source(&scan, 16, &ctx)?;
            let mut exec =
                VectorAggregateExec::new(Arc::new(source), SumLong256::new(VALUE_COLUMN), None);

            let start = Instant::now();
            let output = exec.execute(&ctx)?;
            let elapsed = start.elapsed();
            print_batches(&[output.into_batch()?])?;
            println!("Aggregated in {:?}", elapsed);
        }

        Commands::Filter {
            scan,
            min,
            desc,
            limit,
        } => {
            let min: WideInt256 = min.parse()?;
            let ctx = context(&scan)?;
            let source = source(&scan, 16, &ctx)?.with_descending_order(desc);
            let factory = AsyncFilteredCursorFactory::new(
                Arc::new(source),
                move |record: &FrameRecord<'_>| -> Result<bool> {
                    let value = record.get_wide(VALUE_COLUMN)?;
                    Ok(!value.is_null() && at_least(&value, &min))
                },
            );

            let start = Instant::now();
            let mut cursor = factory.get_cursor(&ctx)?;
            let mut printed = Vec::new();
            let mut remaining = limit;
            let mut matched = 0usize;
            while let Some(batch) = cursor.next_batch()? {
                matched += batch.num_rows();
                if remaining > 0 {
                    let take = remaining.min(batch.num_rows());
                    printed.push(batch.slice(0, take));
                    remaining -= take;
                }
            }
            cursor.close();
            let elapsed = start.elapsed();
            print_batches(&printed)?;
            println!("{} matching rows in {:?}", matched, elapsed);
        }

        Commands::GroupSum { scan, groups, hour } => {
            let ctx = context(&scan)?;
            let source = source(&scan, groups, &ctx)?;
            let group_by = if hour {
                GroupBy {
                    column: TS_COLUMN,
                    kind: KeyKind::Hour,
                }
            } else {
                GroupBy {
                    column: GROUP_COLUMN,
                    kind: KeyKind::Int,
                }
            };
            let mut exec = VectorAggregateExec::new(
                Arc::new(source),
                SumLong256::new(VALUE_COLUMN),
                Some(group_by),
            );

            let start = Instant::now();
            let batch = exec.execute(&ctx)?.into_batch()?;
            let elapsed = start.elapsed();
            print_batches(&[batch])?;
            println!("Aggregated in {:?}", elapsed);
        }
    }
    Ok(())
}

fn main() {
    // Set up logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli.command) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
