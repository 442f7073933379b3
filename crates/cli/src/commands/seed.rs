use std::path::Path;
use std::process;
use std::sync::Arc;

use stepwise_core::OwnerId;
use stepwise_engine::ProcessManager;
use stepwise_sqlite::SqliteStorage;

use crate::config::Settings;
use crate::definitions::{self, DefinitionsError};
use crate::{print_json, report_error, OutputFormat};

pub(crate) async fn cmd_seed(
    storage: SqliteStorage,
    settings: &Settings,
    file: &Path,
    owner: &str,
    output: OutputFormat,
    quiet: bool,
) {
    let parsed = match definitions::load(file) {
        Ok(parsed) => parsed,
        Err(e) => {
            report_error(&e.to_string(), output, quiet);
            process::exit(1);
        }
    };
    let manager = match ProcessManager::new(Arc::new(storage), &settings.engine) {
        Ok(manager) => manager,
        Err(e) => {
            report_error(&e.to_string(), output, quiet);
            process::exit(1);
        }
    };

    match definitions::seed(&manager, &OwnerId::new(owner), parsed).await {
        Ok(report) => match output {
            OutputFormat::Json => print_json(&report),
            OutputFormat::Text => {
                if !quiet {
                    println!(
                        "Seeded {} forms, {} processes, {} steps",
                        report.forms,
                        report.processes.len(),
                        report.steps
                    );
                    for slug in &report.processes {
                        println!("  {}", slug);
                    }
                }
            }
        },
        Err(DefinitionsError::Invalid(problems)) => {
            if !quiet {
                for problem in &problems {
                    eprintln!("{}", problem);
                }
            }
            report_error(&DefinitionsError::Invalid(problems).to_string(), output, quiet);
            process::exit(1);
        }
        Err(e) => {
            report_error(&e.to_string(), output, quiet);
            process::exit(1);
        }
    }
}
