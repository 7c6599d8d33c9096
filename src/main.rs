use anyhow::{bail, Result};
use clap::{value_parser, Arg, ArgAction, Command};
use distribution_matrix::client::{self, DistributionClient};
use distribution_matrix::export::{self, ExportOutcome};
use distribution_matrix::matrix::{ColumnRun, MatrixCell};
use distribution_matrix::models::{Application, Config, DataSourceMode, DistributionDetails, Locale};
use distribution_matrix::pipeline::{DistributionMatrix, MatrixInputs};
use distribution_matrix::rows::{sub_type_label, PlacementKind};
use distribution_matrix::telemetry;
use std::fs;
use std::path::Path;

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("distribution-matrix")
        .version("1.0")
        .about("Aggregates scholarship distribution results into a student matrix and workbook")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("config.toml"),
        )
        .arg(
            Arg::new("ranking-id")
                .short('r')
                .long("ranking-id")
                .value_name("ID")
                .help("Ranking to load, overrides the configuration")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("locale")
                .short('l')
                .long("locale")
                .value_name("zh|en")
                .help("Display language for labels and sheet headers"),
        )
        .arg(
            Arg::new("no-export")
                .long("no-export")
                .help("Print the matrix without writing the workbook")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let config_file = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or("config.toml");

    // Load or create configuration
    let mut config = if Path::new(config_file).exists() {
        println!("📋 Loading configuration from: {}", config_file);
        Config::load_from_file(config_file)?
    } else {
        println!("📝 Creating default configuration file: {}", config_file);
        let default_config = Config::default();
        default_config.save_to_file(config_file)?;
        println!("⚠️  Please edit {} and set the ranking to load, then run the program again.", config_file);
        return Ok(());
    };

    telemetry::init(config.log_level.as_deref().unwrap_or("info"))?;

    if let Some(ranking_id) = matches.get_one::<u64>("ranking-id") {
        config.ranking_id = *ranking_id;
    }
    if let Some(value) = matches.get_one::<String>("locale") {
        match Locale::parse(value) {
            Some(locale) => config.locale = locale,
            None => bail!("unsupported locale '{}', expected zh or en", value),
        }
    }

    let locale = config.locale;
    let output_dir = config.output_directory.clone().unwrap_or_else(|| "output".to_string());

    println!("🔍 Loading distribution for ranking: {}", config.ranking_id);
    let (details, applications) = match load_inputs(&config).await {
        Ok(inputs) => inputs,
        Err(e) => {
            println!("❌ Failed to load distribution data: {:#}", e);
            println!("   Run the command again to retry.");
            return Err(e);
        }
    };
    println!(
        "   ✅ {} sub-types, {} ranked applications, {} rejected",
        details.distribution_summary.len(),
        applications.len(),
        details.rejected.len()
    );

    let inputs = MatrixInputs {
        details,
        applications,
        quota_overrides: config.quota_overrides.clone(),
        translations: config.sub_type_translations.clone(),
        locale,
    };
    let matrix = DistributionMatrix::build(&inputs);

    if matrix.is_empty() {
        println!("ℹ️  {}", locale.pick("尚無分配資料", "No distribution data for this ranking yet."));
        return Ok(());
    }

    print_matrix(&matrix, &inputs);
    print_summary(&matrix, &inputs.details, locale);

    if matches.get_flag("no-export") {
        return Ok(());
    }

    fs::create_dir_all(&output_dir)?;
    clean_output_directory(&output_dir)?;

    let today = chrono::Local::now().date_naive();
    match export::export_distribution(
        Path::new(&output_dir),
        &inputs.details,
        &matrix.aggregation,
        &matrix.rows,
        locale,
        today,
    )? {
        ExportOutcome::Written(path) => {
            println!("\n✅ Export complete!");
            println!("📂 Workbook: {}", path.display());
            println!("📂 CSV sheets: {}", output_dir);
        }
        ExportOutcome::Skipped(notice) => println!("\n⚠️  Export skipped: {}", notice),
    }

    Ok(())
}

async fn load_inputs(config: &Config) -> Result<(DistributionDetails, Vec<Application>)> {
    match config.data_source_mode {
        DataSourceMode::Local => {
            let distribution_file = config
                .distribution_file
                .as_deref()
                .unwrap_or("data/distribution.json");
            let applications_file = config
                .applications_file
                .as_deref()
                .unwrap_or("data/applications.json");
            println!("📂 Reading local files: {}, {}", distribution_file, applications_file);

            let details = client::load_distribution_file(distribution_file)?;
            let applications = client::load_applications_file(applications_file)?;
            Ok((details, applications))
        }
        DataSourceMode::Internet => {
            if config.ranking_id == 0 {
                bail!("ranking_id is not set in the configuration");
            }
            let api = DistributionClient::from_config(config)?;
            println!("🌐 Fetching data from: {}", api.distribution_url(config.ranking_id));

            let details = api.fetch_distribution(config.ranking_id).await?;
            let applications = api.fetch_applications(config.ranking_id).await?;
            Ok((details, applications))
        }
    }
}

fn print_matrix(matrix: &DistributionMatrix, inputs: &MatrixInputs) {
    let locale = inputs.locale;
    let aggregation = &matrix.aggregation;
    let headers: Vec<String> = aggregation
        .sub_types
        .iter()
        .map(|code| sub_type_label(code, aggregation, &inputs.translations, locale))
        .collect();

    println!("\n📊 {}", locale.pick("分配矩陣", "DISTRIBUTION MATRIX"));
    println!("==========\n");
    println!("{:>5}  {:<16} {}", "#", "", headers.join(" | "));

    for (row, matrix_row) in matrix.rows.iter().zip(&matrix.matrix) {
        let cells: Vec<String> = matrix_row
            .cells
            .iter()
            .zip(&headers)
            .map(|(cell, header)| {
                let mark = match cell {
                    MatrixCell::Admitted { .. } => "●".to_string(),
                    MatrixCell::Backup { position, .. } => match position {
                        Some(position) => format!("B{}", position),
                        None => "B-".to_string(),
                    },
                    MatrixCell::Eligible => "○".to_string(),
                    MatrixCell::NotEligible => String::new(),
                };
                format!("{:^width$}", mark, width = header.chars().count())
            })
            .collect();

        let rank = row
            .rank
            .map(|rank| rank.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:>5}  {:<16} {}  {}",
            rank,
            row.student_name,
            cells.join(" | "),
            format_runs(&matrix_row.eligibility_runs)
        );
    }
}

fn format_runs(runs: &[ColumnRun]) -> String {
    runs.iter()
        .map(|run| {
            if run.start == run.end {
                format!("[{}]", run.start + 1)
            } else {
                format!("[{}-{}]", run.start + 1, run.end + 1)
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn print_summary(matrix: &DistributionMatrix, details: &DistributionDetails, locale: Locale) {
    let aggregation = &matrix.aggregation;

    println!("\n📈 {}", locale.pick("分配摘要", "SUMMARY"));
    println!("==========\n");
    println!("   Ranking: {}", export::ranking_display_name(details));
    if matrix.filtered {
        println!("   Scoped to the ranked applicant pool");
    }

    for code in &aggregation.sub_types {
        println!(
            "   {}: quota {}, admitted {}, backup {}",
            aggregation.label(code, locale).unwrap_or(code),
            aggregation.quota(code),
            aggregation.admitted_count(code),
            aggregation.backup_count(code)
        );
    }

    println!();
    for kind in PlacementKind::ALL {
        let count = matrix
            .rows
            .iter()
            .filter(|row| row.placement().kind() == kind)
            .count();
        println!("   {}: {}", kind.label(locale), count);
    }

    if !aggregation.conflicts.is_empty() {
        println!("\n⚠️  {} application(s) admitted more than once:", aggregation.conflicts.len());
        for conflict in &aggregation.conflicts {
            println!(
                "   - #{} kept {}/{}, ignored {}/{}",
                conflict.application_id,
                conflict.kept.sub_type,
                conflict.kept.college,
                conflict.ignored.sub_type,
                conflict.ignored.college
            );
        }
    }
}

// Clean up previous CSV exports from output directory
fn clean_output_directory(output_dir: &str) -> Result<()> {
    let output_path = Path::new(output_dir);

    if !output_path.exists() {
        return Ok(());
    }

    let items_to_clean = [export::OVERVIEW_CSV, export::DETAILS_CSV, export::REJECTED_CSV];

    for item in &items_to_clean {
        let item_path = output_path.join(item);
        if item_path.is_file() {
            fs::remove_file(&item_path)?;
            println!("   🗑️  Removed file: {}", item);
        }
    }

    Ok(())
}
