use crate::cli::Cli;

/// Flags that steer resolution and archive opening. Everything else about
/// a scan passes through untouched.
#[derive(Debug, Clone)]
pub struct ScanSpec {
    pub blacklist_system_jars: bool,
    pub scan_nested_jars: bool,
    pub enable_remote_jar_scanning: bool,
    pub num_worker_threads: usize,
}

impl Default for ScanSpec {
    fn default() -> Self {
        Self {
            blacklist_system_jars: true,
            scan_nested_jars: true,
            enable_remote_jar_scanning: false,
            num_worker_threads: default_worker_threads(),
        }
    }
}

impl ScanSpec {
    pub fn from_cli(cli: &Cli) -> Self {
        Self {
            blacklist_system_jars: !cli.keep_system_jars,
            scan_nested_jars: !cli.no_nested_jars,
            enable_remote_jar_scanning: cli.remote_jars,
            num_worker_threads: cli.threads.unwrap_or_else(default_worker_threads).max(1),
        }
    }
}

pub fn default_worker_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

pub fn classpath_separator() -> char {
    if cfg!(windows) {
        ';'
    } else {
        ':'
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_spec_blacklists_system_jars_and_disables_remote() {
        let spec = ScanSpec::default();
        assert!(spec.blacklist_system_jars);
        assert!(spec.scan_nested_jars);
        assert!(!spec.enable_remote_jar_scanning);
        assert!(spec.num_worker_threads >= 1);
    }
}
