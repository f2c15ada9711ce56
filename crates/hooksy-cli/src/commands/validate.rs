//! `hooksy validate`: load the merged config and report rule/pattern errors.

use anyhow::{bail, Result};

use hooksy_core::config::Config;
use hooksy_core::matcher::PatternMatcher;

pub fn run(config: Config) -> Result<()> {
    let matcher = PatternMatcher::new();
    match config.validate(&matcher) {
        Ok(()) => {
            println!("config is valid");
            Ok(())
        }
        Err(errors) => {
            for e in &errors {
                eprintln!("error: {e}");
            }
            bail!("{} config error(s) found", errors.len());
        }
    }
}
