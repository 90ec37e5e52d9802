use std::env;
use std::fs;
use std::path::PathBuf;

use once_cell::sync::Lazy;

/// Version of this app. This is not the protocol version.
pub const SERVICEVERSION: &str = env!("CARGO_PKG_VERSION");

// Descriptors reserved for stdin/stdout/stderr, the index store, the
// listener and whatever else the process keeps open outside the cache.
const FD_RESERVE: u64 = 24;

// If a file with this name is present, take env variables from it.
const CONFFILE: &str = ".env";

#[derive(Debug)]
pub struct Config {
    pub indexdbpath: PathBuf,
    pub seqpath: PathBuf,
    pub mountpath: String,
    pub debug: bool,
    pub loglevel: String,
    pub alias_authority: Option<String>,
}

pub static CONFIG: Lazy<Config> = Lazy::new(Config::from_env);

impl Config {
    fn from_env() -> Self {
        load_dotenv(CONFFILE);
        Config {
            indexdbpath: PathBuf::from(var_or("INDEXDBPATH", "/www/unit/data/indexdb.tkh")),
            seqpath: PathBuf::from(var_or("SEQPATH", "/www/unit/data/")),
            mountpath: var_or("MOUNTPATH", "/"),
            debug: matches!(
                var_or("DEBUG", "false").to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            ),
            loglevel: var_or("LOGLEVEL", "INFO"),
            alias_authority: env::var("ALIASAUTHORITY").ok().filter(|v| !v.is_empty()),
        }
    }

    /// Log filter directive for the tracing subscriber. DEBUG wins over
    /// LOGLEVEL.
    pub fn log_filter(&self) -> String {
        if self.debug {
            return "debug".to_string();
        }
        self.loglevel.to_ascii_lowercase()
    }
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

// KEY=VALUE lines; variables already set in the real environment win.
fn load_dotenv(path: &str) {
    let Ok(content) = fs::read_to_string(path) else {
        return;
    };
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let key = key.trim();
            if env::var_os(key).is_none() {
                env::set_var(key, value.trim());
            }
        }
    }
}

/// Number of filehandles the app may keep open to read the compressed data
/// files. There will be some more open file handles for stdio and the
/// index store, hence the reserve.
pub fn max_open_filehandles() -> usize {
    let mut rl = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    let rc = unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut rl) };
    if rc != 0 {
        return 1000;
    }
    rl.rlim_cur.saturating_sub(FD_RESERVE).max(1) as usize
}
