use clap::Parser;
use log::{info, error};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Instant;

use regionalize::config::subsystems::RegionCount;
use regionalize::grid::GridOutput;
use regionalize::io::{read_points_csv, write_json};
use regionalize::utils::logger::init_logging;
use regionalize::{Pipeline, PipelineOutput, RegionalizeConfig, SolverStatus};

#[derive(Parser, Debug)]
#[command(version, about = "Partition gridded point data into contiguous homogeneous regions", long_about = None)]
struct Args {
    /// CSV of points with lon/lat columns; all other columns are numeric values
    input: PathBuf,

    /// Where the grid, assignment and regions are written as JSON
    output: PathBuf,

    /// INI configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of regions, overriding the configuration
    #[arg(short = 'k', long)]
    regions: Option<usize>,

    /// Grid cell size in kilometers, overriding the configuration
    #[arg(long)]
    cell_size_km: Option<f64>,
}

#[derive(Serialize)]
struct RunReport<'a> {
    value_columns: &'a [String],
    grid: &'a GridOutput,
    result: &'a PipelineOutput,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => RegionalizeConfig::from_ini(path)?,
        None => RegionalizeConfig::default(),
    };
    if let Some(k) = args.regions {
        config.optimizer.region_count = RegionCount::Exact(k);
    }
    if let Some(km) = args.cell_size_km {
        config.grid.cell_size_km = km;
    }
    config.validate()?;
    init_logging(&config.logging)?;
    info!("Starting regionalization with log level: {:?}", config.logging.level_filter());

    let (value_columns, points) = read_points_csv(&args.input)?;
    let start = Instant::now();
    let (grid, output) = match Pipeline::new(config).run_points(&points) {
        Ok(result) => result,
        Err(e) => {
            if e.is_solver_outcome() {
                error!("Optimizer gave up: {}", e);
                eprintln!("No regionalization: {}", e);
                eprintln!("Relax the region count or size bounds, or raise solver_time_budget_seconds or max_attempts.");
            }
            return Err(e.into());
        }
    };
    let elapsed_time = start.elapsed();

    write_json(&args.output, &RunReport { value_columns: &value_columns, grid: &grid, result: &output })?;

    let status = match output.assignment.status {
        SolverStatus::Optimal => "optimal".to_string(),
        SolverStatus::FeasibleSuboptimal { gap } => format!("feasible (gap {:.4})", gap),
    };
    println!("Cells {} ({} empty)", grid.occupied_cells, grid.empty_cells);
    println!("Regions {}", output.assignment.region_count);
    println!("Objective {:.6} [{}]", output.assignment.objective, status);
    println!("Execution time {:?}", elapsed_time);
    Ok(())
}
