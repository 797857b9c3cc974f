pub mod classify;
pub mod device;
pub mod lists;
pub mod model;
pub mod run;
pub mod runlog;
pub mod workflow;

pub use classify::{classify, clear_targets};
pub use device::{
    parse_package_list, probe_snapshot, AdbDevice, CommandOutcome, DeviceControl, DeviceError,
    PACKAGE_LINE_PREFIX,
};
pub use lists::{load_declarations, LIST_FILE_EXTENSION};
pub use model::{
    DeviceSnapshot, OutcomeStatus, PackageOutcome, RunMetadata, RunOptions, RunReport,
    WorkflowPhase, DEFAULT_LISTS_DIR, DEFAULT_LOG_FILE, REPORT_VERSION,
};
pub use run::execute_run;
pub use runlog::write_disabled_log;
pub use workflow::{
    wait_until_ready, Clock, PackagePrompt, SystemClock, WorkflowEngine, WorkflowOutcome,
};
