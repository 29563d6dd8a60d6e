//! Per-title exclusion policy.
//!
//! Multi-screen titles look wrong on a single marquee display, so the
//! front-end's per-title ini is consulted for a `numscreens` entry.
//! Absence of metadata means "do not skip".

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use tracing::debug;

pub struct ExclusionPolicy {
    ini_dir: PathBuf,
}

impl ExclusionPolicy {
    pub fn new(ini_dir: PathBuf) -> Self {
        ExclusionPolicy { ini_dir }
    }

    /// Whether the marquee for this key should be skipped.
    pub fn should_skip(&self, key: &str) -> bool {
        let path = self.ini_dir.join(format!("{key}.ini"));
        let Ok(file) = File::open(&path) else {
            return false;
        };
        for line in BufReader::new(file).lines() {
            let Ok(line) = line else { break };
            let line = line.trim_start();
            // get() rather than slicing: ini files are not trusted input.
            let matches = line
                .get(..10)
                .is_some_and(|p| p.eq_ignore_ascii_case("numscreens"));
            if matches {
                let screens = line
                    .get(10..)
                    .unwrap_or("")
                    .trim()
                    .parse::<u32>()
                    .unwrap_or(1);
                if screens > 1 {
                    debug!(key, screens, "title excluded by policy");
                    return true;
                }
                // First numscreens entry decides.
                return false;
            }
        }
        false
    }
}
