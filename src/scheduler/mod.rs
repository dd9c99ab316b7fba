pub mod dispatcher;
pub mod job;
pub mod quota;
pub mod session;
pub mod transport;

pub use dispatcher::{DispatchReceipt, Dispatcher};
pub use job::{Job, JobStatus, JobUpdate};
pub use quota::{QuotaGuard, QuotaViolation};
pub use session::{Session, SessionPatch};
pub use transport::{ChannelTransport, RunMessage, TaskTransport, TransportReceiver};
