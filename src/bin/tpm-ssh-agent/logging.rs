use std::path::Path;

use color_eyre::eyre::Result as EyreResult;
use flexi_logger::{FileSpec, LogSpecification, Logger, LoggerHandle, WriteMode};
use log::LevelFilter;

/// Log to `log_file` if given, standard error otherwise. The returned handle
/// must be held for as long as logging is wanted.
pub fn setup_logger(level: LevelFilter, log_file: Option<&Path>) -> EyreResult<LoggerHandle> {
    let spec = LogSpecification::builder().default(level).build();
    let logger = Logger::with(spec).format(flexi_logger::detailed_format);

    let logger = match log_file {
        Some(path) => logger
            .log_to_file(FileSpec::try_from(path)?)
            .append()
            .write_mode(WriteMode::Direct),
        None => logger.log_to_stderr(),
    };

    Ok(logger.start()?)
}
