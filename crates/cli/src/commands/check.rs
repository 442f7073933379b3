use std::path::Path;
use std::process;

use crate::definitions::{self, DefinitionsError};
use crate::{print_json, report_error, OutputFormat};

pub(crate) fn cmd_check(file: &Path, output: OutputFormat, quiet: bool) {
    let parsed = match definitions::load(file) {
        Ok(parsed) => parsed,
        Err(e) => {
            report_error(&e.to_string(), output, quiet);
            process::exit(1);
        }
    };

    let problems = definitions::check(&parsed);
    match output {
        OutputFormat::Json => {
            print_json(&serde_json::json!({
                "valid": problems.is_empty(),
                "forms": parsed.forms.len(),
                "processes": parsed.processes.len(),
                "problems": problems,
            }));
        }
        OutputFormat::Text => {
            if problems.is_empty() {
                if !quiet {
                    println!(
                        "{}: ok ({} forms, {} processes)",
                        file.display(),
                        parsed.forms.len(),
                        parsed.processes.len()
                    );
                }
            } else {
                if !quiet {
                    for problem in &problems {
                        eprintln!("{}", problem);
                    }
                }
                report_error(
                    &DefinitionsError::Invalid(problems.clone()).to_string(),
                    output,
                    quiet,
                );
            }
        }
    }
    if !problems.is_empty() {
        process::exit(1);
    }
}
