mod bucket;
mod dir_ops;
mod error;
mod file_ops;
mod fs;
mod handle_table;
mod ino;
mod local_file;
mod local_fs;
mod meta;
mod options;
mod path_util;
mod session_ops;

use std::process::ExitCode;
use std::sync::Arc;

use fuser::MountOption;

use bucket::{BlockingBucket, Bucket, MongoBucket};
use fs::GridMountFs;
use options::Options;
use session_ops::Session;

fn install_logger(options: &Options) {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(options.log_level);

    if let Some(log_file) = &options.log_file {
        match std::fs::OpenOptions::new().create(true).append(true).open(log_file) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(e) => {
                eprintln!("could not open log file {log_file:?}: {e}, logging to stderr instead");
            }
        }
    }

    builder.init();
}

async fn connect(options: &Options) -> Result<mongodb::Database, mongodb::error::Error> {
    let uri = format!("mongodb://{}:{}", options.host, options.port);
    let client = mongodb::Client::with_uri_str(&uri).await?;
    Ok(client.database(&options.db))
}

fn main() -> ExitCode {
    let options = match Options::parse() {
        Ok(o) => o,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    install_logger(&options);
    log::info!(
        "starting gridmount host={} port={} db={} coll_prefix={}",
        options.host,
        options.port,
        options.db,
        options.coll_prefix
    );

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => Arc::new(rt),
        Err(e) => {
            log::error!("failed to start tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let database = match runtime.block_on(connect(&options)) {
        Ok(db) => db,
        Err(e) => {
            log::error!("failed to connect to MongoDB: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mongo_bucket: Arc<dyn Bucket> = Arc::new(MongoBucket::new(database, &options.coll_prefix));
    let bucket = BlockingBucket::new(mongo_bucket, runtime);

    let mountpoint = options.mountpoint.clone();
    let mut mount_options = vec![MountOption::RW, MountOption::FSName("gridmount".to_string())];
    if options.auto_unmount {
        mount_options.push(MountOption::AutoUnmount);
    }
    if options.allow_root {
        mount_options.push(MountOption::AllowRoot);
    }

    let session = Session::new(options, bucket);
    if let Err(e) = session_ops::load_or_create_root(&session) {
        log::error!("failed to bootstrap root directory: {e}");
        return ExitCode::FAILURE;
    }

    let filesystem = GridMountFs::new(session);
    match fuser::mount2(filesystem, &mountpoint, &mount_options) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("mount failed: {e}");
            ExitCode::FAILURE
        }
    }
}
