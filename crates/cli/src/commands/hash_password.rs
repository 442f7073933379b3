use std::process;

use stepwise_engine::SecretHasher;

use crate::config::Settings;
use crate::{print_json, report_error, OutputFormat};

pub(crate) fn cmd_hash_password(password: &str, settings: &Settings, output: OutputFormat, quiet: bool) {
    if password.is_empty() {
        report_error("password must not be empty", output, quiet);
        process::exit(1);
    }
    let hashed = SecretHasher::new(settings.engine.hashing).and_then(|h| h.hash(password));
    match hashed {
        Ok(hash) => match output {
            OutputFormat::Json => print_json(&serde_json::json!({ "hash": hash })),
            OutputFormat::Text => println!("{}", hash),
        },
        Err(e) => {
            report_error(&format!("hashing failed: {}", e), output, quiet);
            process::exit(1);
        }
    }
}
