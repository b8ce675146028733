//! Seismic phase detection: STA/LTA and AMPA detectors, AR-AIC arrival-time
//! refinement, and the orchestration that turns their output into picks on
//! traces, sequentially or across worker processes.

pub mod analysis;
pub mod config;
pub mod error;
pub mod filter;
pub mod numeric;
pub mod picking;
pub mod record;
pub mod util;
pub mod worker;

pub use analysis::{detect, detect_batch, detect_batch_abortable, Action, BatchReport, DetectionConfig, TraceOutcome};
pub use config::Settings;
pub use error::{PickError, Result};
pub use picking::{AbortFlag, Algorithm, Ampa, ArRefiner, Detector, StaLta, StaLtaMethod};
pub use record::{EditEventRequest, Event, EventRow, Method, Mode, Signal, Status, StreamId, Trace};
