use std::path::PathBuf;

use clap::Parser;
use libverdin::actual_target;

#[derive(Parser, Debug)]
pub struct Target {
    /// Path whose anchor and target to resolve.
    pub path: PathBuf,
}

impl Target {
    pub fn run(self) -> Result<(), anyhow::Error> {
        let path = self.path.to_str().map(|s| s.to_string()).unwrap_or_default();
        let (anchor, target) = actual_target(path.trim_end_matches('/'))?;
        println!("anchor: {}", if anchor.is_empty() { "." } else { &anchor });
        match target {
            Some(t) => println!("target: {}", t),
            None => println!("target: (entire directory)"),
        }
        Ok(())
    }
}
