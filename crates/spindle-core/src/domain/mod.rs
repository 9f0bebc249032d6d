//! Domain model (IDs, envelopes, leases, records, errors, decisions).

pub mod dead_letter;
pub mod decision;
pub mod envelope;
pub mod errors;
pub mod ids;
pub mod job;
pub mod lease;
pub mod state;
pub mod task_type;

pub use dead_letter::DeadLetter;
pub use decision::{Decider, Decision, DefaultDecider, RetryCandidate};
pub use envelope::{JobEnvelope, Priority};
pub use errors::{ErrorKind, HandlerError, StoreError};
pub use ids::{Id, IdMarker, JobId, ParseIdError, WorkerToken};
pub use job::{JobRecord, JobStatus};
pub use lease::{Lease, LeaseRenewal, LeasedJob};
pub use state::JobState;
pub use task_type::TaskType;
