use std::process;
use std::sync::Arc;

use stepwise_engine::{ExecutionService, IdleSweeper, TracingObserver};
use stepwise_sqlite::SqliteStorage;
use time::Duration;

use crate::config::Settings;
use crate::{print_json, report_error, OutputFormat};

pub(crate) async fn cmd_sweep(
    storage: SqliteStorage,
    settings: &Settings,
    idle_minutes: u32,
    output: OutputFormat,
    quiet: bool,
) {
    let service = match ExecutionService::new(Arc::new(storage), settings.engine.clone()) {
        Ok(service) => service.with_observer(Arc::new(TracingObserver)),
        Err(e) => {
            report_error(&e.to_string(), output, quiet);
            process::exit(1);
        }
    };

    let sweeper = IdleSweeper::new(Arc::new(service));
    match sweeper
        .abandon_idle_for(Duration::minutes(i64::from(idle_minutes)))
        .await
    {
        Ok(report) => match output {
            OutputFormat::Json => print_json(&report),
            OutputFormat::Text => {
                if !quiet {
                    println!(
                        "Scanned {} idle runs: {} abandoned, {} busy, {} failed",
                        report.scanned,
                        report.abandoned.len(),
                        report.conflicts,
                        report.failures
                    );
                }
            }
        },
        Err(e) => {
            report_error(&e.to_string(), output, quiet);
            process::exit(1);
        }
    }
}
