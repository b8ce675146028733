pub mod event;
pub mod export;
pub mod trace;

pub use event::{EditEventRequest, Event, Method, Mode, Status};
pub use export::EventRow;
pub use trace::{Signal, StreamId, Trace};
