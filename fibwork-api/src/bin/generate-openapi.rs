//! OpenAPI Specification Generator Binary
//!
//! Writes the gateway's OpenAPI document as JSON to stdout.
//!
//! Usage:
//!   cargo run -p fibwork-api --bin generate-openapi > openapi.json

use fibwork_api::ApiDoc;

fn main() {
    match ApiDoc::to_json() {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Failed to serialize OpenAPI document: {}", e);
            std::process::exit(1);
        }
    }
}
