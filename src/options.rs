//! Recognized configuration (spec.md §6), parsed with `clap`'s builder API
//! in the same style the teacher's `main.rs` used for its own argument set.

use clap::{crate_version, Arg, ArgAction, Command};
use log::LevelFilter;

#[derive(Debug, Clone)]
pub struct Options {
    pub host: String,
    pub port: u16,
    pub db: String,
    pub coll_prefix: String,
    pub log_file: Option<String>,
    pub log_level: LevelFilter,
    pub mem_chunk_size_bytes: usize,
    pub max_mem_file_chunks: u32,
    pub enable_dyn_mem_chunk: bool,
    pub mountpoint: String,
    pub auto_unmount: bool,
    pub allow_root: bool,
}

impl Options {
    pub fn max_mem_file_size(&self) -> u64 {
        self.mem_chunk_size_bytes as u64 * self.max_mem_file_chunks as u64
    }

    pub fn parse() -> Result<Options, String> {
        let matches = Command::new("gridmount")
            .version(crate_version!())
            .author("gridmount contributors")
            .about("Mounts a GridFS-style MongoDB bucket as a POSIX filesystem")
            .arg(Arg::new("mountpoint").required(true).help("path where the bucket should be mounted"))
            .arg(Arg::new("host").long("host").default_value("localhost").help("MongoDB hostname"))
            .arg(Arg::new("port").long("port").default_value("27017").help("MongoDB port number, 1..65535"))
            .arg(Arg::new("db").long("db").default_value("test").help("logical database name"))
            .arg(Arg::new("coll-prefix").long("coll-prefix").default_value("fs").help("bucket collection prefix"))
            .arg(Arg::new("log-file").long("log-file").help("optional file sink for logs"))
            .arg(
                Arg::new("log-level")
                    .long("log-level")
                    .default_value("INFO")
                    .help("TRACE/DEBUG/INFO/WARN/ERROR/FATAL/NONE, case-insensitive"),
            )
            .arg(
                Arg::new("mem-chunk-size")
                    .long("mem-chunk-size")
                    .default_value("128")
                    .help("staging-cache chunk size in kilobytes"),
            )
            .arg(
                Arg::new("max-mem-file-chunks")
                    .long("max-mem-file-chunks")
                    .default_value("512")
                    .help("maximum chunks per staged file"),
            )
            .arg(
                Arg::new("enable-dyn-mem-chunk")
                    .long("enable-dyn-mem-chunk")
                    .action(ArgAction::SetTrue)
                    .help("allow staged chunk size to adapt to the remote file's chunk size"),
            )
            .arg(
                Arg::new("auto-unmount")
                    .long("auto-unmount")
                    .action(ArgAction::SetTrue)
                    .help("automatically unmount on process exit"),
            )
            .arg(Arg::new("allow-root").long("allow-root").action(ArgAction::SetTrue).help("allow root to access the mount"))
            .try_get_matches()
            .map_err(|e| e.to_string())?;

        let port: u16 = matches
            .get_one::<String>("port")
            .unwrap()
            .parse()
            .map_err(|_| "port must be a number in 1..65535".to_string())?;
        if port == 0 {
            return Err("port must be in 1..65535".to_string());
        }

        let log_level = parse_log_level(matches.get_one::<String>("log-level").unwrap());

        let mem_chunk_kb: usize = matches
            .get_one::<String>("mem-chunk-size")
            .unwrap()
            .parse()
            .map_err(|_| "mem-chunk-size must be a number".to_string())?;

        let max_mem_file_chunks: u32 = matches
            .get_one::<String>("max-mem-file-chunks")
            .unwrap()
            .parse()
            .map_err(|_| "max-mem-file-chunks must be a number".to_string())?;

        Ok(Options {
            host: matches.get_one::<String>("host").unwrap().clone(),
            port,
            db: matches.get_one::<String>("db").unwrap().clone(),
            coll_prefix: matches.get_one::<String>("coll-prefix").unwrap().clone(),
            log_file: matches.get_one::<String>("log-file").cloned(),
            log_level,
            mem_chunk_size_bytes: mem_chunk_kb * 1024,
            max_mem_file_chunks,
            enable_dyn_mem_chunk: matches.get_flag("enable-dyn-mem-chunk"),
            mountpoint: matches.get_one::<String>("mountpoint").unwrap().clone(),
            auto_unmount: matches.get_flag("auto-unmount"),
            allow_root: matches.get_flag("allow-root"),
        })
    }
}

fn parse_log_level(raw: &str) -> LevelFilter {
    match raw.to_uppercase().as_str() {
        "TRACE" => LevelFilter::Trace,
        "DEBUG" => LevelFilter::Debug,
        "INFO" => LevelFilter::Info,
        "WARN" => LevelFilter::Warn,
        "ERROR" | "FATAL" => LevelFilter::Error,
        "NONE" => LevelFilter::Off,
        other => {
            eprintln!("unrecognized log level {other:?}, defaulting to INFO");
            LevelFilter::Info
        }
    }
}
