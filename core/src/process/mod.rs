mod environment;
mod io_pump;
mod processor;
mod task;

pub use environment::ProcessEnvironment;
pub use io_pump::{pump_stderr, pump_stdout, LineStream, LineTap};
pub use processor::{
    EntryParser, FirstLineOutputProcessor, ListOutputProcessor, OutputProcessor,
    SimpleOutputProcessor,
};
pub use task::{parse_progress_line, ProcessSpec, ProcessTask, ProgressLine};
